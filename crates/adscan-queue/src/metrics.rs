//! Dispatch metrics.

use metrics::counter;

pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "adscan_jobs_submitted_total";
    pub const JOBS_CLAIMED_TOTAL: &str = "adscan_jobs_claimed_total";
    pub const CLAIM_CONFLICTS_TOTAL: &str = "adscan_claim_conflicts_total";
}

pub fn record_submitted(platform: &str) {
    counter!(names::JOBS_SUBMITTED_TOTAL, "platform" => platform.to_string()).increment(1);
}

pub fn record_claim(reclaimed: bool) {
    let kind = if reclaimed { "reclaim" } else { "fresh" };
    counter!(names::JOBS_CLAIMED_TOTAL, "kind" => kind).increment(1);
}

pub fn record_claim_conflict() {
    counter!(names::CLAIM_CONFLICTS_TOTAL).increment(1);
}
