//! Shared key/value store abstraction.
//!
//! Every piece of cross-instance state (limiter counters, refresh-token
//! records, sessions, one-time tokens, MFA replay markers) goes through
//! [`SharedStore`]. Production uses Redis; tests use [`InMemoryStore`].

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::clock::Clock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("shared store unavailable: {0}")]
    Unavailable(String),

    #[error("shared store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("value under '{0}' has the wrong type for this operation")]
    WrongType(String),

    #[error("corrupt value under '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Add `delta` to the integer at `key`. A missing key starts at 0 and gets `ttl`;
    /// an existing key keeps its expiry.
    async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Returns false when the key already exists.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Replace the value only if it currently equals `expected`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Returns true when this call removed the key.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn add_member(&self, set_key: &str, member: &str, ttl: Duration)
        -> Result<(), StoreError>;

    async fn remove_member(&self, set_key: &str, member: &str) -> Result<(), StoreError>;

    async fn members(&self, set_key: &str) -> Result<Vec<String>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Read a JSON value and keep the raw text alongside it for a later compare-and-swap.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn SharedStore,
    key: &str,
) -> Result<Option<(String, T)>, StoreError> {
    match store.get(key).await? {
        Some(raw) => {
            let value = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
            Ok(Some((raw, value)))
        }
        None => Ok(None),
    }
}

pub fn to_json<T: serde::Serialize>(key: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

enum StoredValue {
    Text(String),
    Members(HashSet<String>),
}

struct Entry {
    value: StoredValue,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(3650))
}

/// In-process [`SharedStore`] backed by a `DashMap`; expiry follows the injected clock.
pub struct InMemoryStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
    failing_swaps: AtomicUsize,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            unavailable: AtomicBool::new(false),
            failing_swaps: AtomicUsize::new(0),
        }
    }

    /// Simulate an outage: every operation fails with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `count` compare-and-swap calls fail with `Unavailable`.
    pub fn fail_next_swaps(&self, count: usize) {
        self.failing_swaps.store(count, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<DateTime<Utc>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked down".into()));
        }
        Ok(self.clock.now())
    }

    fn purge_if_expired(&self, key: &str, now: DateTime<Utc>) {
        self.entries.remove_if(key, |_, e| e.is_expired(now));
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, StoreError> {
        let now = self.ensure_available()?;
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: StoredValue::Text("0".into()),
            expires_at: expiry(now, ttl),
        });
        if entry.is_expired(now) {
            *entry = Entry {
                value: StoredValue::Text("0".into()),
                expires_at: expiry(now, ttl),
            };
        }
        let current: i64 = match &entry.value {
            StoredValue::Text(s) => s.parse().map_err(|_| StoreError::Corrupt {
                key: key.to_string(),
                reason: "not an integer".into(),
            })?,
            StoredValue::Members(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        let next = current + delta;
        entry.value = StoredValue::Text(next.to_string());
        Ok(next)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.ensure_available()?;
        self.purge_if_expired(key, now);
        match self.entries.get(key) {
            Some(entry) => match &entry.value {
                StoredValue::Text(s) => Ok(Some(s.clone())),
                StoredValue::Members(_) => Err(StoreError::WrongType(key.to_string())),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.ensure_available()?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: StoredValue::Text(value.to_string()),
                expires_at: expiry(now, ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.ensure_available()?;
        self.purge_if_expired(key, now);
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Entry {
                    value: StoredValue::Text(value.to_string()),
                    expires_at: expiry(now, ttl),
                });
                Ok(true)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.ensure_available()?;
        self.purge_if_expired(key, now);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = expiry(now, ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.ensure_available()?;
        if self
            .failing_swaps
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("injected swap failure".into()));
        }
        self.purge_if_expired(key, now);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                let matches = matches!(&entry.value, StoredValue::Text(current) if current == expected);
                if matches {
                    entry.value = StoredValue::Text(new_value.to_string());
                    entry.expires_at = expiry(now, ttl);
                }
                Ok(matches)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.ensure_available()?;
        self.purge_if_expired(key, now);
        Ok(self.entries.remove(key).is_some())
    }

    async fn add_member(
        &self,
        set_key: &str,
        member: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = self.ensure_available()?;
        self.purge_if_expired(set_key, now);
        let mut entry = self
            .entries
            .entry(set_key.to_string())
            .or_insert_with(|| Entry {
                value: StoredValue::Members(HashSet::new()),
                expires_at: expiry(now, ttl),
            });
        match &mut entry.value {
            StoredValue::Members(set) => {
                set.insert(member.to_string());
            }
            StoredValue::Text(_) => return Err(StoreError::WrongType(set_key.to_string())),
        }
        entry.expires_at = expiry(now, ttl);
        Ok(())
    }

    async fn remove_member(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        let now = self.ensure_available()?;
        self.purge_if_expired(set_key, now);
        if let Some(mut entry) = self.entries.get_mut(set_key) {
            match &mut entry.value {
                StoredValue::Members(set) => {
                    set.remove(member);
                }
                StoredValue::Text(_) => return Err(StoreError::WrongType(set_key.to_string())),
            }
        }
        self.entries.remove_if(set_key, |_, e| {
            matches!(&e.value, StoredValue::Members(set) if set.is_empty())
        });
        Ok(())
    }

    async fn members(&self, set_key: &str) -> Result<Vec<String>, StoreError> {
        let now = self.ensure_available()?;
        self.purge_if_expired(set_key, now);
        match self.entries.get(set_key) {
            Some(entry) => match &entry.value {
                StoredValue::Members(set) => {
                    Ok(set.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect())
                }
                StoredValue::Text(_) => Err(StoreError::WrongType(set_key.to_string())),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.ensure_available().map(|_| ())
    }
}
