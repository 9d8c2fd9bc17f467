//! Sliding-window rate limiter over the shared store.
//!
//! Each key owns two fixed buckets (`rl:<key>:<n>` and `rl:<key>:<n-1>`); the
//! previous bucket is weighted by how much of it still overlaps the sliding
//! window. Tiers come from one policy table built from configuration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use metrics::counter;
use serde_json::json;

use super::clock::Clock;
use super::security_audit::SecurityAuditLog;
use super::store::{SharedStore, StoreError};
use crate::config::RateLimitConfig;
use crate::models::SecurityEventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitTier {
    /// General API traffic, per IP
    Api,
    /// Authentication attempts, per IP
    Auth,
    /// Password reset and 2FA setup/disable, per user (IP when anonymous)
    Sensitive,
    /// Failed TOTP verifications, per user
    Mfa,
}

impl LimitTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitTier::Api => "api",
            LimitTier::Auth => "auth",
            LimitTier::Sensitive => "sensitive",
            LimitTier::Mfa => "mfa",
        }
    }

    pub fn key(&self, identity: &str) -> String {
        format!("{}:{}", self.as_str(), identity)
    }
}

/// What to do when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatePolicy {
    pub window: Duration,
    pub max_requests: u32,
    /// When false, successful requests are released from the count.
    pub count_successes: bool,
    pub failure_mode: FailureMode,
}

/// Declarative tier -> policy table.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<LimitTier, RatePolicy>,
}

impl PolicyTable {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let policies = HashMap::from([
            (
                LimitTier::Api,
                RatePolicy {
                    window: Duration::from_secs(config.api_window_seconds),
                    max_requests: config.api_limit,
                    count_successes: true,
                    failure_mode: FailureMode::Open,
                },
            ),
            (
                LimitTier::Auth,
                RatePolicy {
                    window: Duration::from_secs(config.auth_window_seconds),
                    max_requests: config.auth_attempts,
                    count_successes: false,
                    failure_mode: FailureMode::Closed,
                },
            ),
            (
                LimitTier::Sensitive,
                RatePolicy {
                    window: Duration::from_secs(config.sensitive_window_seconds),
                    max_requests: config.sensitive_attempts,
                    count_successes: true,
                    failure_mode: FailureMode::Closed,
                },
            ),
            (
                LimitTier::Mfa,
                RatePolicy {
                    window: Duration::from_secs(config.mfa_window_seconds),
                    max_requests: config.mfa_attempts,
                    count_successes: false,
                    failure_mode: FailureMode::Closed,
                },
            ),
        ]);
        Self { policies }
    }

    pub fn policy(&self, tier: LimitTier) -> &RatePolicy {
        // from_config fills every tier
        &self.policies[&tier]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// The store could not be consulted; the verdict came from the failure mode.
    pub degraded: bool,
    /// Bucket this request was counted in, for a later release.
    counted_in: Option<String>,
    bucket_ttl: Duration,
}

impl RateDecision {
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.reset_at - now).num_seconds().max(1) as u64
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    policies: Arc<PolicyTable>,
    audit: SecurityAuditLog,
    last_degraded_report: Arc<AtomicI64>,
}

const DEGRADED_REPORT_INTERVAL_SECS: i64 = 60;

impl RateLimiter {
    pub fn new(
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
        policies: PolicyTable,
        audit: SecurityAuditLog,
    ) -> Self {
        Self {
            store,
            clock,
            policies: Arc::new(policies),
            audit,
            last_degraded_report: Arc::new(AtomicI64::new(i64::MIN)),
        }
    }

    pub fn policy(&self, tier: LimitTier) -> &RatePolicy {
        self.policies.policy(tier)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Count one attempt for `identity` against `tier`.
    pub async fn check_tier(&self, tier: LimitTier, identity: &str) -> RateDecision {
        let policy = self.policies.policy(tier).clone();
        self.check(&tier.key(identity), &policy).await
    }

    /// Count one attempt against an arbitrary key and policy. Never fails:
    /// store errors are resolved through the policy's failure mode.
    pub async fn check(&self, key: &str, policy: &RatePolicy) -> RateDecision {
        match self.try_check(key, policy).await {
            Ok(decision) => {
                if !decision.allowed {
                    counter!(super::metrics::RATE_LIMITED_TOTAL, "key_class" => key_class(key)).increment(1);
                }
                decision
            }
            Err(err) => self.degraded_decision(key, policy, err),
        }
    }

    async fn try_check(&self, key: &str, policy: &RatePolicy) -> Result<RateDecision, StoreError> {
        let now = self.clock.now();
        let window_ms = (policy.window.as_millis() as i64).max(1);
        let now_ms = now.timestamp_millis();
        let bucket = now_ms.div_euclid(window_ms);
        let bucket_start_ms = bucket * window_ms;

        let current_key = format!("rl:{}:{}", key, bucket);
        let previous_key = format!("rl:{}:{}", key, bucket - 1);
        // Long enough for the bucket to serve as "previous" for one more window.
        let bucket_ttl = policy.window * 2;

        let current = self.store.increment(&current_key, 1, bucket_ttl).await?;
        let previous = self
            .store
            .get(&previous_key)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);

        let elapsed_ms = now_ms - bucket_start_ms;
        let overlap_ms = window_ms - elapsed_ms;
        let estimated = previous * overlap_ms / window_ms + current;

        let max = i64::from(policy.max_requests);
        let reset_at = Utc
            .timestamp_millis_opt(bucket_start_ms + window_ms)
            .single()
            .unwrap_or(now);

        Ok(RateDecision {
            allowed: estimated <= max,
            limit: policy.max_requests,
            remaining: (max - estimated).max(0) as u32,
            reset_at,
            degraded: false,
            counted_in: Some(current_key),
            bucket_ttl,
        })
    }

    fn degraded_decision(&self, key: &str, policy: &RatePolicy, err: StoreError) -> RateDecision {
        let now = self.clock.now();
        let allowed = policy.failure_mode == FailureMode::Open;

        if allowed {
            tracing::warn!(key, error = %err, "rate limiter degraded; failing open");
        } else {
            tracing::error!(key, error = %err, "rate limiter degraded; failing closed");
        }
        let mode = if allowed { "open" } else { "closed" };
        counter!(super::metrics::RATE_LIMITER_DEGRADED_TOTAL, "failure_mode" => mode).increment(1);
        self.report_degraded(key, allowed, &err, now);

        RateDecision {
            allowed,
            limit: policy.max_requests,
            remaining: if allowed { policy.max_requests } else { 0 },
            reset_at: now
                + chrono::Duration::from_std(policy.window)
                    .unwrap_or_else(|_| chrono::Duration::zero()),
            degraded: true,
            counted_in: None,
            bucket_ttl: policy.window,
        }
    }

    /// At most one audit event per interval, so an outage cannot flood the log.
    fn report_degraded(&self, key: &str, allowed: bool, err: &StoreError, now: DateTime<Utc>) {
        let now_secs = now.timestamp();
        let last = self.last_degraded_report.load(Ordering::Relaxed);
        if last != i64::MIN && now_secs - last < DEGRADED_REPORT_INTERVAL_SECS {
            return;
        }
        if self
            .last_degraded_report
            .compare_exchange(last, now_secs, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        self.audit.log_event(
            SecurityEventType::RateLimiterDegraded,
            None,
            None,
            None,
            json!({
                "key_class": key_class(key),
                "failure_mode": if allowed { "open" } else { "closed" },
                "error": err.to_string(),
            }),
        );
    }

    /// Give back the attempt counted by `decision`, for tiers that ignore successes.
    pub async fn release(&self, decision: &RateDecision) {
        let Some(bucket) = decision.counted_in.as_deref() else {
            return;
        };
        if let Err(err) = self.store.increment(bucket, -1, decision.bucket_ttl).await {
            tracing::warn!(bucket, error = %err, "failed to release rate limit attempt");
        }
    }

    /// Release `decision` if its tier does not count successful attempts.
    pub async fn record_success(&self, tier: LimitTier, decision: &RateDecision) {
        if !self.policies.policy(tier).count_successes {
            self.release(decision).await;
        }
    }
}

fn key_class(key: &str) -> &'static str {
    match key.split(':').next() {
        Some("api") => "api",
        Some("auth") => "auth",
        Some("sensitive") => "sensitive",
        Some("mfa") => "mfa",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use crate::services::security_audit::{AuditSettings, InMemoryAuditRepository};
    use crate::services::store::InMemoryStore;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            api_limit: 60,
            api_window_seconds: 60,
            auth_attempts: 10,
            auth_window_seconds: 900,
            sensitive_attempts: 5,
            sensitive_window_seconds: 3600,
            mfa_attempts: 5,
            mfa_window_seconds: 900,
        }
    }

    fn limiter() -> (RateLimiter, Arc<InMemoryStore>, ManualClock) {
        // A multiple of 3600, so every tier starts on a bucket boundary.
        let clock = ManualClock::new(Utc.timestamp_opt(1_800_000_000, 0).unwrap());
        let store = Arc::new(InMemoryStore::new(Arc::new(clock.clone())));
        let audit = SecurityAuditLog::new(
            Arc::new(InMemoryAuditRepository::default()),
            store.clone(),
            Arc::new(clock.clone()),
            AuditSettings::default(),
        );
        let limiter = RateLimiter::new(
            store.clone(),
            Arc::new(clock.clone()),
            PolicyTable::from_config(&config()),
            audit,
        );
        (limiter, store, clock)
    }

    #[tokio::test]
    async fn eleventh_auth_attempt_is_rejected() {
        let (limiter, _, _) = limiter();
        for i in 0..10 {
            let d = limiter.check_tier(LimitTier::Auth, "10.0.0.1").await;
            assert!(d.allowed, "attempt {} should pass", i + 1);
        }
        let d = limiter.check_tier(LimitTier::Auth, "10.0.0.1").await;
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        // other identities are unaffected
        assert!(limiter.check_tier(LimitTier::Auth, "10.0.0.2").await.allowed);
    }

    #[tokio::test]
    async fn released_successes_do_not_count() {
        let (limiter, _, _) = limiter();
        for _ in 0..20 {
            let d = limiter.check_tier(LimitTier::Auth, "ip").await;
            assert!(d.allowed);
            limiter.record_success(LimitTier::Auth, &d).await;
        }
        assert_eq!(limiter.check_tier(LimitTier::Auth, "ip").await.remaining, 9);
    }

    #[tokio::test]
    async fn counted_tiers_keep_successes() {
        let (limiter, _, _) = limiter();
        let d = limiter.check_tier(LimitTier::Sensitive, "user").await;
        limiter.record_success(LimitTier::Sensitive, &d).await;
        assert_eq!(limiter.check_tier(LimitTier::Sensitive, "user").await.remaining, 3);
    }

    #[tokio::test]
    async fn previous_bucket_is_weighted_by_overlap() {
        let (limiter, _, clock) = limiter();
        for _ in 0..10 {
            limiter.check_tier(LimitTier::Auth, "ip").await;
        }
        // Half way through the next bucket, half the old count still applies.
        clock.advance(chrono::Duration::seconds(900 + 450));
        let d = limiter.check_tier(LimitTier::Auth, "ip").await;
        assert!(d.allowed);
        assert_eq!(d.remaining, 10 - (5 + 1));
        // Two full windows later the slate is clean.
        clock.advance(chrono::Duration::seconds(1800));
        assert_eq!(limiter.check_tier(LimitTier::Auth, "ip").await.remaining, 9);
    }

    #[tokio::test]
    async fn outage_fails_closed_for_security_tiers_and_open_for_api() {
        let (limiter, store, _) = limiter();
        store.set_unavailable(true);

        let auth = limiter.check_tier(LimitTier::Auth, "ip").await;
        assert!(!auth.allowed);
        assert!(auth.degraded);

        let mfa = limiter.check_tier(LimitTier::Mfa, "user").await;
        assert!(!mfa.allowed);

        let api = limiter.check_tier(LimitTier::Api, "ip").await;
        assert!(api.allowed);
        assert!(api.degraded);
    }

    #[tokio::test]
    async fn reset_time_is_end_of_current_bucket() {
        let (limiter, _, clock) = limiter();
        let start = clock.now();
        clock.advance(chrono::Duration::seconds(10));
        let d = limiter.check_tier(LimitTier::Api, "ip").await;
        assert_eq!(d.reset_at, start + chrono::Duration::seconds(60));
        assert_eq!(d.retry_after_secs(clock.now()), 50);
    }
}
