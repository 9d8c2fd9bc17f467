//! Security audit log.
//!
//! Events are appended from a spawned task so the request path never waits on
//! (or fails because of) audit storage. Writes are retried with backoff; an
//! event that still cannot be stored goes to the `security_audit_fallback`
//! tracing target and a bounded in-process buffer.
//!
//! Repeated `FAILED_LOGIN` events for one identity inside the anomaly window
//! raise a `SUSPICIOUS_ACTIVITY_DETECTED` event.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde_json::{json, Value};
use service_core::utils::{retry_with_backoff, RetryConfig};
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::clock::Clock;
use super::store::SharedStore;
use crate::config::AuditConfig;
use crate::models::{SecurityAuditEvent, SecurityEventType, Severity};

/// Filter for audit queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub user_id: Option<Uuid>,
    pub event_type: Option<SecurityEventType>,
    pub ip_address: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
}

impl AuditFilter {
    pub const DEFAULT_LIMIT: i64 = 100;
    pub const MAX_LIMIT: i64 = 1000;

    pub fn matches(&self, event: &SecurityAuditEvent) -> bool {
        self.user_id.map_or(true, |id| event.user_id == Some(id))
            && self.event_type.map_or(true, |t| event.event_type == t)
            && self
                .ip_address
                .as_deref()
                .map_or(true, |ip| event.ip_address.as_deref() == Some(ip))
            && self.from.map_or(true, |from| event.created_utc >= from)
            && self.to.map_or(true, |to| event.created_utc <= to)
    }
}

/// Insert-only storage for audit events; no update or delete path.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, event: &SecurityAuditEvent) -> Result<(), anyhow::Error>;

    /// Newest first, at most `filter.limit` rows.
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<SecurityAuditEvent>, anyhow::Error>;
}

#[derive(Default)]
pub struct InMemoryAuditRepository {
    events: Mutex<Vec<SecurityAuditEvent>>,
    failing: AtomicBool,
}

impl InMemoryAuditRepository {
    /// Make every append fail, to exercise the fallback path.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<SecurityAuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn events_of(&self, event_type: SecurityEventType) -> Vec<SecurityAuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, event: &SecurityAuditEvent) -> Result<(), anyhow::Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("audit storage unavailable"));
        }
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("audit mutex poisoned"))?
            .push(event.clone());
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<SecurityAuditEvent>, anyhow::Error> {
        let events = self
            .events
            .lock()
            .map_err(|_| anyhow::anyhow!("audit mutex poisoned"))?;
        let mut matched: Vec<_> = events.iter().filter(|e| filter.matches(e)).cloned().collect();
        matched.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        matched.truncate(filter.limit.max(0) as usize);
        Ok(matched)
    }
}

#[derive(Debug, Clone)]
pub struct AuditSettings {
    pub retry: RetryConfig,
    pub fallback_capacity: usize,
    pub anomaly_threshold: i64,
    pub anomaly_window: Duration,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(20),
                backoff_multiplier: 2.0,
                add_jitter: true,
            },
            fallback_capacity: 1000,
            anomaly_threshold: 5,
            anomaly_window: Duration::from_secs(15 * 60),
        }
    }
}

impl AuditSettings {
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            retry: RetryConfig::with_max_retries(config.max_retries),
            fallback_capacity: config.fallback_buffer_size,
            anomaly_threshold: config.anomaly_failed_login_threshold,
            anomaly_window: Duration::from_secs(config.anomaly_window_seconds),
        }
    }
}

#[derive(Clone)]
pub struct SecurityAuditLog {
    repo: Arc<dyn AuditRepository>,
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    settings: Arc<AuditSettings>,
    fallback: Arc<Mutex<VecDeque<SecurityAuditEvent>>>,
    tasks: TaskTracker,
}

impl SecurityAuditLog {
    pub fn new(
        repo: Arc<dyn AuditRepository>,
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
        settings: AuditSettings,
    ) -> Self {
        Self {
            repo,
            store,
            clock,
            settings: Arc::new(settings),
            fallback: Arc::new(Mutex::new(VecDeque::new())),
            tasks: TaskTracker::new(),
        }
    }

    /// Record an event without waiting for it to be stored.
    pub fn log_event(
        &self,
        event_type: SecurityEventType,
        user_id: Option<Uuid>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        details: Value,
    ) {
        let event = SecurityAuditEvent::new(
            event_type,
            user_id,
            ip_address.map(str::to_string),
            user_agent.map(str::to_string),
            details,
            self.clock.now(),
        );
        self.record(event);
    }

    pub fn record(&self, event: SecurityAuditEvent) {
        let log = self.clone();
        self.tasks.spawn(async move { log.write(event).await });
    }

    async fn write(&self, event: SecurityAuditEvent) {
        tracing::info!(
            target: "security_audit",
            event_id = %event.event_id,
            event_type = event.event_type.as_str(),
            severity = event.severity.as_str(),
            user_id = ?event.user_id,
            ip_address = ?event.ip_address,
            "Security event"
        );

        let repo = self.repo.clone();
        let stored = retry_with_backoff(&self.settings.retry, "audit_append", || {
            let repo = repo.clone();
            let event = event.clone();
            async move { repo.append(&event).await }
        })
        .await;

        if let Err(e) = stored {
            counter!(super::metrics::AUDIT_WRITE_FAILURES_TOTAL).increment(1);
            self.write_fallback(&event, &e);
        }

        if event.event_type == SecurityEventType::FailedLogin {
            self.check_failed_login_anomaly(&event).await;
        }
    }

    fn write_fallback(&self, event: &SecurityAuditEvent, error: &anyhow::Error) {
        tracing::error!(
            target: "security_audit_fallback",
            error = %error,
            event = %serde_json::to_string(event).unwrap_or_default(),
            "Audit event could not be stored"
        );
        if let Ok(mut buffer) = self.fallback.lock() {
            buffer.push_back(event.clone());
            while buffer.len() > self.settings.fallback_capacity {
                buffer.pop_front();
            }
        }
    }

    async fn check_failed_login_anomaly(&self, event: &SecurityAuditEvent) {
        let identity = event
            .details
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| event.ip_address.clone())
            .or_else(|| event.user_id.map(|id| id.to_string()));
        let Some(identity) = identity else {
            return;
        };

        let key = format!("anomaly:failed_login:{}", identity);
        let count = match self
            .store
            .increment(&key, 1, self.settings.anomaly_window)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "failed-login anomaly counter unavailable");
                return;
            }
        };

        // Fire once when the threshold is crossed, not on every later failure.
        if count == self.settings.anomaly_threshold {
            tracing::warn!(identity = %identity, count, "Repeated failed logins detected");
            let suspicious = SecurityAuditEvent::new(
                SecurityEventType::SuspiciousActivityDetected,
                event.user_id,
                event.ip_address.clone(),
                event.user_agent.clone(),
                json!({
                    "reason": "repeated_failed_logins",
                    "identity": identity,
                    "failed_attempts": count,
                    "window_seconds": self.settings.anomaly_window.as_secs(),
                }),
                self.clock.now(),
            )
            .with_severity(Severity::Critical);
            self.record(suspicious);
        }
    }

    pub async fn query(
        &self,
        filter: &AuditFilter,
    ) -> Result<Vec<SecurityAuditEvent>, anyhow::Error> {
        self.repo.query(filter).await
    }

    /// Events that only reached the local fallback channel.
    pub fn fallback_events(&self) -> Vec<SecurityAuditEvent> {
        self.fallback
            .lock()
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Wait for every pending write, including events they trigger.
    pub async fn flush(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
