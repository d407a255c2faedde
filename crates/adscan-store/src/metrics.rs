//! Job store metrics collection.

use metrics::counter;

/// Metric name constants for consistency.
pub mod names {
    /// Transitions by target status and result (ok / stale / invalid).
    pub const TRANSITIONS_TOTAL: &str = "adscan_store_transitions_total";

    /// Optimistic-concurrency retries inside the Redis backend.
    pub const CAS_RETRIES_TOTAL: &str = "adscan_store_cas_retries_total";
}

/// Record the result of a transition attempt.
pub fn record_transition(next: &str, result: &'static str) {
    counter!(
        names::TRANSITIONS_TOTAL,
        "to" => next.to_string(),
        "result" => result
    )
    .increment(1);
}

/// Record a version mismatch that forced a re-read.
pub fn record_cas_retry(operation: &'static str) {
    counter!(names::CAS_RETRIES_TOTAL, "operation" => operation).increment(1);
}

pub(crate) fn result_label<T>(result: &crate::StoreResult<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(crate::StoreError::Stale(_)) => "stale",
        Err(crate::StoreError::InvalidTransition { .. }) => "invalid",
        Err(_) => "error",
    }
}
