pub mod memory;
pub mod store;
pub mod supabase;
pub mod supabase_store;

pub use memory::MemorySchedulingStore;
pub use store::{Change, ChangeSet, EndpointResult, SchedulingStore, StoreError};
pub use supabase_store::SupabaseSchedulingStore;
