pub mod provider;
pub mod query;
pub mod shift;
pub mod slot_store;

pub use provider::*;
pub use query::*;
pub use shift::*;
pub use slot_store::*;
