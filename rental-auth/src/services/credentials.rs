//! Credential store seam: user lookup and mutation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{user::normalize_email, User};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("email already registered")]
    DuplicateEmail,

    #[error("user not found")]
    NotFound,

    #[error("credential store failure: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Soft-deleted users are invisible to every lookup.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, CredentialError>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, CredentialError>;

    async fn create(&self, user: &User) -> Result<(), CredentialError>;

    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError>;

    async fn mark_email_verified(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError>;

    async fn enable_mfa(
        &self,
        user_id: Uuid,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError>;

    async fn disable_mfa(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), CredentialError>;

    async fn soft_delete(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), CredentialError>;

    async fn health_check(&self) -> Result<(), CredentialError>;
}

/// `DashMap`-backed repository for tests and local runs.
#[derive(Default)]
pub struct InMemoryUserRepository {
    users: DashMap<Uuid, User>,
}

impl InMemoryUserRepository {
    fn update<F>(&self, user_id: Uuid, f: F) -> Result<(), CredentialError>
    where
        F: FnOnce(&mut User),
    {
        match self.users.get_mut(&user_id) {
            Some(mut user) if !user.is_deleted() => {
                f(&mut user);
                Ok(())
            }
            _ => Err(CredentialError::NotFound),
        }
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, CredentialError> {
        let email = normalize_email(email);
        Ok(self
            .users
            .iter()
            .find(|u| u.email == email && !u.is_deleted())
            .map(|u| u.clone()))
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, CredentialError> {
        Ok(self
            .users
            .get(&user_id)
            .filter(|u| !u.is_deleted())
            .map(|u| u.clone()))
    }

    async fn create(&self, user: &User) -> Result<(), CredentialError> {
        if self.find_by_email(&user.email).await?.is_some() {
            return Err(CredentialError::DuplicateEmail);
        }
        self.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        self.update(user_id, |u| {
            u.password_hash = password_hash.to_string();
            u.updated_utc = now;
        })
    }

    async fn mark_email_verified(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        self.update(user_id, |u| {
            u.email_verified = true;
            u.updated_utc = now;
        })
    }

    async fn enable_mfa(
        &self,
        user_id: Uuid,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        self.update(user_id, |u| {
            u.mfa_enabled = true;
            u.mfa_secret = Some(secret.to_string());
            u.updated_utc = now;
        })
    }

    async fn disable_mfa(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), CredentialError> {
        self.update(user_id, |u| {
            u.mfa_enabled = false;
            u.mfa_secret = None;
            u.updated_utc = now;
        })
    }

    async fn soft_delete(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), CredentialError> {
        self.update(user_id, |u| {
            u.deleted_utc = Some(now);
            u.updated_utc = now;
        })
    }

    async fn health_check(&self) -> Result<(), CredentialError> {
        Ok(())
    }
}
