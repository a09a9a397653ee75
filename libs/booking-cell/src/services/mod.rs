pub mod booking;
pub mod conflict;
pub mod onec_client;
