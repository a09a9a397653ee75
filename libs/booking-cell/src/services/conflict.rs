// libs/booking-cell/src/services/conflict.rs
use std::sync::Arc;

use tracing::info;

use crate::models::{remote_detail, ConflictCode, ConflictOutcome, ExternalBookingError};

const DEFAULT_GONE_MESSAGE: &str = "The booking no longer exists in the external scheduler";

/// Decides whether a failed remote cancel can be treated as done.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, error: &ExternalBookingError) -> Option<ConflictOutcome>;
}

pub struct OnecConflictResolver;

impl ConflictResolver for OnecConflictResolver {
    fn resolve(&self, error: &ExternalBookingError) -> Option<ConflictOutcome> {
        let detail = remote_detail(&error.body);
        let gone_status = matches!(error.status, Some(404) | Some(410));
        let says_not_found = detail
            .as_deref()
            .map(|text| text.to_lowercase().contains("not found"))
            .unwrap_or(false);

        if !gone_status && !says_not_found {
            return None;
        }

        info!("Remote booking already gone (status {:?})", error.status);
        Some(ConflictOutcome {
            code: ConflictCode::AlreadyGoneUpstream,
            message: detail.unwrap_or_else(|| DEFAULT_GONE_MESSAGE.to_string()),
            can_force_delete: true,
        })
    }
}

/// Used while reconciliation is switched off: nothing is ever resolved.
pub struct NullConflictResolver;

impl ConflictResolver for NullConflictResolver {
    fn resolve(&self, _error: &ExternalBookingError) -> Option<ConflictOutcome> {
        None
    }
}

pub fn conflict_resolver(reconciliation_enabled: bool) -> Arc<dyn ConflictResolver> {
    if reconciliation_enabled {
        Arc::new(OnecConflictResolver)
    } else {
        Arc::new(NullConflictResolver)
    }
}
