pub mod ingestion;
pub mod normalize;
pub mod reconcile;
