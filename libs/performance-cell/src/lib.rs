// =====================================================================================
// PERFORMANCE CELL - SLOT VIEW CACHE
// =====================================================================================

pub mod models;
pub mod handlers;
pub mod router;
pub mod services;

pub use models::*;
pub use router::create_performance_router;
pub use services::{clinic_cache_prefix, InMemorySlotCache, SlotCache};
