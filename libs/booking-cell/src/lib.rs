pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    BookingError, BookingOptions, CancellationResult, ConflictCode, ConflictOutcome,
    ExternalBookingError,
};
pub use router::{booking_routes, BookingCellState};
pub use services::booking::BookingEngine;
pub use services::conflict::{
    conflict_resolver, ConflictResolver, NullConflictResolver, OnecConflictResolver,
};
pub use services::onec_client::OnecClient;
