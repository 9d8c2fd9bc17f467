//! Per-user session/device registry.
//!
//! Sessions live under `session:<id>` with an index set `user_sessions:<user>`.
//! Writes after creation go through a single versioned compare-and-swap; a
//! version mismatch surfaces as [`SessionError::ConcurrentModification`] and
//! the caller decides whether to retry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::clock::Clock;
use super::store::{get_json, to_json, SharedStore, StoreError};
use super::token::{TokenError, TokenService};
use crate::models::{DeviceInfo, RevocationReason, Session};

const MAX_UPDATE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("session was modified concurrently")]
    ConcurrentModification,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

fn session_key(id: Uuid) -> String {
    format!("session:{}", id)
}

fn index_key(user_id: Uuid) -> String {
    format!("user_sessions:{}", user_id)
}

fn ttl_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (expires_at - now)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(1))
}

/// A new session plus whatever had to be evicted to make room for it.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session: Session,
    pub evicted: Vec<Session>,
}

#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn SharedStore>,
    tokens: TokenService,
    clock: Arc<dyn Clock>,
    max_sessions: usize,
    lifetime: Duration,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SharedStore>,
        tokens: TokenService,
        clock: Arc<dyn Clock>,
        max_sessions: usize,
    ) -> Self {
        let lifetime = tokens.settings().refresh_ttl;
        Self {
            store,
            tokens,
            clock,
            max_sessions: max_sessions.max(1),
            lifetime,
        }
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<(String, Session)>, SessionError> {
        let loaded = get_json::<Session>(self.store.as_ref(), &session_key(session_id)).await?;
        let now = self.clock.now();
        Ok(loaded.filter(|(_, s)| !s.is_expired_at(now)))
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Option<Session>, SessionError> {
        Ok(self.load(session_id).await?.map(|(_, s)| s))
    }

    /// Admit a new session, evicting the least recently active ones first
    /// when the user is at the cap. Concurrent logins may briefly overshoot.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        device: &DeviceInfo,
        two_factor_authenticated: bool,
    ) -> Result<CreatedSession, SessionError> {
        let mut existing = self.list_sessions(user_id).await?;
        let mut evicted = Vec::new();

        // list_sessions returns most recent first, so the tail is the oldest.
        while existing.len() >= self.max_sessions {
            let Some(oldest) = existing.pop() else {
                break;
            };
            if self
                .revoke_session(user_id, oldest.session_id, RevocationReason::SessionRevoked)
                .await?
            {
                tracing::info!(
                    user_id = %user_id,
                    session_id = %oldest.session_id,
                    "Evicted least recently active session"
                );
                evicted.push(oldest);
            }
        }

        let now = self.clock.now();
        let session = Session::new(
            user_id,
            device,
            two_factor_authenticated,
            now,
            now + self.lifetime,
        );
        let key = session_key(session.session_id);
        let ttl = ttl_until(session.expires_at, now);

        self.store
            .set_if_absent(&key, &to_json(&key, &session)?, ttl)
            .await?;
        self.store
            .add_member(&index_key(user_id), &session.session_id.to_string(), ttl)
            .await?;

        tracing::debug!(user_id = %user_id, session_id = %session.session_id, "Session created");
        Ok(CreatedSession { session, evicted })
    }

    /// One optimistic write: succeeds only if the stored version still equals
    /// `expected.version`.
    async fn update_versioned<F>(
        &self,
        expected: &Session,
        mutate: F,
    ) -> Result<Session, SessionError>
    where
        F: FnOnce(&mut Session),
    {
        let (raw, current) = self
            .load(expected.session_id)
            .await?
            .ok_or(SessionError::NotFound)?;
        if current.version != expected.version {
            return Err(SessionError::ConcurrentModification);
        }

        let mut next = current;
        mutate(&mut next);
        next.version += 1;

        let now = self.clock.now();
        let key = session_key(next.session_id);
        let swapped = self
            .store
            .compare_and_swap(&key, &raw, &to_json(&key, &next)?, ttl_until(next.expires_at, now))
            .await?;
        if !swapped {
            return Err(SessionError::ConcurrentModification);
        }
        Ok(next)
    }

    pub async fn touch(&self, session: &Session) -> Result<Session, SessionError> {
        let now = self.clock.now();
        self.update_versioned(session, |s| s.last_active_at = now)
            .await
    }

    /// Point the session at its new active refresh token and slide its expiry
    /// to match.
    pub async fn bind_refresh_token(
        &self,
        session: &Session,
        token_id: Uuid,
        token_expires_at: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let now = self.clock.now();
        let updated = self
            .update_versioned(session, |s| {
                s.refresh_token_id = Some(token_id);
                s.last_active_at = now;
                s.expires_at = token_expires_at.max(s.expires_at);
            })
            .await?;
        self.store
            .expire(
                &index_key(updated.user_id),
                ttl_until(updated.expires_at, now),
            )
            .await?;
        Ok(updated)
    }

    /// Record that the session's holder has passed a second factor. Retries
    /// a bounded number of times when the record changes underneath.
    pub async fn mark_two_factor_authenticated(
        &self,
        session_id: Uuid,
    ) -> Result<Session, SessionError> {
        let mut attempts = 0;
        loop {
            let current = self.get(session_id).await?.ok_or(SessionError::NotFound)?;
            if current.two_factor_authenticated {
                return Ok(current);
            }
            match self
                .update_versioned(&current, |s| s.two_factor_authenticated = true)
                .await
            {
                Err(SessionError::ConcurrentModification) if attempts + 1 < MAX_UPDATE_ATTEMPTS => {
                    attempts += 1;
                }
                result => return result,
            }
        }
    }

    /// Live sessions, most recently active first. Index entries whose record
    /// has expired are dropped.
    pub async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, SessionError> {
        let index = index_key(user_id);
        let mut sessions = Vec::new();

        for member in self.store.members(&index).await? {
            let live = match Uuid::parse_str(&member) {
                Ok(id) => self.get(id).await?.filter(|s| s.user_id == user_id),
                Err(_) => None,
            };
            match live {
                Some(session) => sessions.push(session),
                None => self.store.remove_member(&index, &member).await?,
            }
        }

        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(sessions)
    }

    /// Remove a session and revoke its active refresh token. Returns false
    /// when the session is already gone or belongs to someone else.
    pub async fn revoke_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        reason: RevocationReason,
    ) -> Result<bool, SessionError> {
        let Some(session) = self.get(session_id).await? else {
            self.store
                .remove_member(&index_key(user_id), &session_id.to_string())
                .await?;
            return Ok(false);
        };
        if session.user_id != user_id {
            return Ok(false);
        }

        let removed = self.store.delete(&session_key(session_id)).await?;
        self.store
            .remove_member(&index_key(user_id), &session_id.to_string())
            .await?;
        if let Some(token_id) = session.refresh_token_id {
            self.tokens.revoke(token_id, reason).await?;
        }

        if removed {
            tracing::info!(
                user_id = %user_id,
                session_id = %session_id,
                reason = reason.as_str(),
                "Session revoked"
            );
        }
        Ok(removed)
    }

    /// Revoke every session of the user except `keep`. Returns how many went.
    pub async fn revoke_all(
        &self,
        user_id: Uuid,
        keep: Option<Uuid>,
        reason: RevocationReason,
    ) -> Result<usize, SessionError> {
        let mut revoked = 0;
        for session in self.list_sessions(user_id).await? {
            if Some(session.session_id) == keep {
                continue;
            }
            if self
                .revoke_session(user_id, session.session_id, reason)
                .await?
            {
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::test_config;
    use crate::models::Role;
    use crate::services::clock::ManualClock;
    use crate::services::store::InMemoryStore;

    struct Fixture {
        registry: SessionRegistry,
        tokens: TokenService,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::default();
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new(Arc::new(clock.clone())));
        let config = test_config();
        let tokens = TokenService::new(&config.jwt, store.clone(), Arc::new(clock.clone()));
        let registry = SessionRegistry::new(
            store,
            tokens.clone(),
            Arc::new(clock.clone()),
            config.session.max_sessions_per_user,
        );
        Fixture {
            registry,
            tokens,
            clock,
        }
    }

    fn device(ip: &str) -> DeviceInfo {
        DeviceInfo {
            ip_address: ip.to_string(),
            user_agent: Some("test-agent".to_string()),
            device_id: None,
        }
    }

    async fn login(f: &Fixture, user_id: Uuid, ip: &str) -> Session {
        let created = f.registry.create_session(user_id, &device(ip), false).await.unwrap();
        let pair = f
            .tokens
            .issue_token_pair(user_id, Role::Client, &created.session)
            .await
            .unwrap();
        f.registry
            .bind_refresh_token(&created.session, pair.refresh_token_id, pair.refresh_token.expires_at)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_and_list() {
        let f = fixture();
        let user = Uuid::new_v4();
        let s = login(&f, user, "10.0.0.1").await;

        let listed = f.registry.list_sessions(user).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id, s.session_id);
        assert_eq!(listed[0].device_fingerprint, device("10.0.0.1").fingerprint());
    }

    #[tokio::test]
    async fn cap_evicts_least_recently_active_and_its_token() {
        let f = fixture();
        let user = Uuid::new_v4();
        let first = login(&f, user, "10.0.0.1").await;
        f.clock.advance(Duration::seconds(1));
        let second = login(&f, user, "10.0.0.2").await;
        f.clock.advance(Duration::seconds(1));
        let third = login(&f, user, "10.0.0.3").await;
        f.clock.advance(Duration::seconds(1));

        // Touching the first makes the second the eviction candidate.
        f.registry.touch(&first).await.unwrap();
        f.clock.advance(Duration::seconds(1));

        let created = f.registry.create_session(user, &device("10.0.0.4"), false).await.unwrap();
        assert_eq!(created.evicted.len(), 1);
        assert_eq!(created.evicted[0].session_id, second.session_id);

        let ids: Vec<Uuid> = f
            .registry
            .list_sessions(user)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&first.session_id));
        assert!(ids.contains(&third.session_id));
        assert!(!ids.contains(&second.session_id));

        let token = f.tokens.get(second.refresh_token_id.unwrap()).await.unwrap().unwrap();
        assert!(token.revoked);
    }

    #[tokio::test]
    async fn stale_version_is_a_concurrent_modification() {
        let f = fixture();
        let s = login(&f, Uuid::new_v4(), "10.0.0.1").await;

        let touched = f.registry.touch(&s).await.unwrap();
        assert_eq!(touched.version, s.version + 1);
        assert!(matches!(
            f.registry.touch(&s).await,
            Err(SessionError::ConcurrentModification)
        ));
        assert!(f.registry.touch(&touched).await.is_ok());
    }

    #[tokio::test]
    async fn marking_two_factor_survives_a_concurrent_touch() {
        let f = fixture();
        let s = login(&f, Uuid::new_v4(), "10.0.0.1").await;
        f.registry.touch(&s).await.unwrap();

        let marked = f.registry.mark_two_factor_authenticated(s.session_id).await.unwrap();
        assert!(marked.two_factor_authenticated);
        assert_eq!(marked.version, s.version + 2);

        let again = f.registry.mark_two_factor_authenticated(s.session_id).await.unwrap();
        assert_eq!(again.version, marked.version);
        assert!(matches!(
            f.registry.mark_two_factor_authenticated(Uuid::new_v4()).await,
            Err(SessionError::NotFound)
        ));
    }

    #[tokio::test]
    async fn revoke_is_idempotent_and_owner_scoped() {
        let f = fixture();
        let user = Uuid::new_v4();
        let s = login(&f, user, "10.0.0.1").await;

        assert!(!f
            .registry
            .revoke_session(Uuid::new_v4(), s.session_id, RevocationReason::Logout)
            .await
            .unwrap());
        assert!(f
            .registry
            .revoke_session(user, s.session_id, RevocationReason::Logout)
            .await
            .unwrap());
        assert!(!f
            .registry
            .revoke_session(user, s.session_id, RevocationReason::Logout)
            .await
            .unwrap());
        assert!(f.registry.list_sessions(user).await.unwrap().is_empty());

        let token = f.tokens.get(s.refresh_token_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(token.revocation_reason, Some(RevocationReason::Logout));
    }

    #[tokio::test]
    async fn revoke_all_keeps_the_current_session() {
        let f = fixture();
        let user = Uuid::new_v4();
        let keep = login(&f, user, "10.0.0.1").await;
        login(&f, user, "10.0.0.2").await;
        login(&f, user, "10.0.0.3").await;

        let revoked = f
            .registry
            .revoke_all(user, Some(keep.session_id), RevocationReason::PasswordChanged)
            .await
            .unwrap();
        assert_eq!(revoked, 2);
        let left = f.registry.list_sessions(user).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].session_id, keep.session_id);
    }

    #[tokio::test]
    async fn expired_sessions_drop_out_of_listing() {
        let f = fixture();
        let user = Uuid::new_v4();
        login(&f, user, "10.0.0.1").await;
        f.clock.advance(Duration::days(8));
        assert!(f.registry.list_sessions(user).await.unwrap().is_empty());
    }
}
