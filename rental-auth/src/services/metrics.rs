//! Engine-level Prometheus metrics.
//!
//! HTTP metrics come from `service_core::middleware::metrics`; these cover
//! authentication outcomes.

use metrics::{counter, describe_counter};

pub const LOGINS_TOTAL: &str = "auth_logins_total";
pub const RATE_LIMITED_TOTAL: &str = "auth_rate_limited_total";
pub const RATE_LIMITER_DEGRADED_TOTAL: &str = "auth_rate_limiter_degraded_total";
pub const REFRESH_REUSE_DETECTED_TOTAL: &str = "auth_refresh_reuse_detected_total";
pub const TOKEN_REFRESHES_TOTAL: &str = "auth_token_refreshes_total";
pub const AUDIT_WRITE_FAILURES_TOTAL: &str = "audit_write_failures_total";

/// Register help text once at startup.
pub fn describe_metrics() {
    describe_counter!(LOGINS_TOTAL, "Login attempts by outcome");
    describe_counter!(RATE_LIMITED_TOTAL, "Requests rejected by the rate limiter");
    describe_counter!(
        RATE_LIMITER_DEGRADED_TOTAL,
        "Rate limit checks decided without the shared store"
    );
    describe_counter!(
        REFRESH_REUSE_DETECTED_TOTAL,
        "Refresh tokens presented again after rotation"
    );
    describe_counter!(TOKEN_REFRESHES_TOTAL, "Successful refresh token rotations");
    describe_counter!(
        AUDIT_WRITE_FAILURES_TOTAL,
        "Audit events that fell back after exhausting retries"
    );
}

/// `outcome` is one of `success`, `mfa_required`, `failure`.
pub fn record_login(outcome: &'static str) {
    counter!(LOGINS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_refresh_reuse() {
    counter!(REFRESH_REUSE_DETECTED_TOTAL).increment(1);
}

pub fn record_token_refresh() {
    counter!(TOKEN_REFRESHES_TOTAL).increment(1);
}
