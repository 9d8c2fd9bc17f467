//! TOTP second factor: secret provisioning and code verification.
//!
//! Codes are RFC 6238 (SHA-1, 6 digits, 30 second steps) and accepted one
//! step either side of now. A matched step is burned per user, so the same
//! code cannot be replayed while it is still valid.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use super::clock::Clock;
use super::credentials::{CredentialError, UserRepository};
use super::rate_limiter::{LimitTier, RateLimiter};
use super::store::{SharedStore, StoreError};
use crate::config::MfaConfig;
use crate::models::User;
use crate::utils::{verify_password, Password, PasswordHashString};

const DIGITS: usize = 6;
const STEP_SECONDS: u64 = 30;
const DRIFT_STEPS: i64 = 1;
/// Long enough to outlive every step a code can still match.
const REPLAY_MARKER_TTL: Duration = Duration::from_secs(STEP_SECONDS * 4);

#[derive(Debug, Error)]
pub enum MfaError {
    #[error("invalid verification code")]
    InvalidCode,

    #[error("no TOTP secret provisioned")]
    SecretNotProvisioned,

    #[error("too many verification attempts")]
    TooManyAttempts { retry_after_secs: u64 },

    #[error("two-factor authentication is already enabled")]
    AlreadyEnabled,

    #[error("TOTP secret is unusable: {0}")]
    BadSecret(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Where a code is being verified; decides what success does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfaContext {
    /// Confirming a freshly provisioned secret; success enables MFA.
    Setup,
    /// Second step of a login; success lets the session be marked 2FA.
    Login,
}

/// Returned once from setup; the secret is never shown again.
#[derive(Debug, Clone)]
pub struct MfaEnrollment {
    pub secret: String,
    pub provisioning_uri: String,
}

fn pending_key(user_id: Uuid) -> String {
    format!("mfa:pending:{}", user_id)
}

fn replay_key(user_id: Uuid, step: i64) -> String {
    format!("mfa:used:{}:{}", user_id, step)
}

#[derive(Clone)]
pub struct MfaEngine {
    users: Arc<dyn UserRepository>,
    store: Arc<dyn SharedStore>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    issuer: String,
    pending_ttl: Duration,
}

impl MfaEngine {
    pub fn new(
        users: Arc<dyn UserRepository>,
        store: Arc<dyn SharedStore>,
        limiter: RateLimiter,
        clock: Arc<dyn Clock>,
        config: &MfaConfig,
    ) -> Self {
        Self {
            users,
            store,
            limiter,
            clock,
            issuer: config.issuer.clone(),
            pending_ttl: Duration::from_secs(config.pending_secret_ttl_seconds),
        }
    }

    fn totp(&self, secret: &str, account: &str) -> Result<TOTP, MfaError> {
        let bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| MfaError::BadSecret(format!("{:?}", e)))?;
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            1,
            STEP_SECONDS,
            bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| MfaError::BadSecret(e.to_string()))
    }

    /// Provision a new secret, held unconfirmed until the first valid code.
    pub async fn generate_secret(&self, user: &User) -> Result<MfaEnrollment, MfaError> {
        if user.mfa_enabled {
            return Err(MfaError::AlreadyEnabled);
        }

        let raw = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| MfaError::BadSecret(format!("{:?}", e)))?;
        let totp = TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            1,
            STEP_SECONDS,
            raw,
            Some(self.issuer.clone()),
            user.email.clone(),
        )
        .map_err(|e| MfaError::BadSecret(e.to_string()))?;
        let secret = totp.get_secret_base32();

        self.store
            .set(&pending_key(user.user_id), &secret, self.pending_ttl)
            .await?;
        tracing::info!(user_id = %user.user_id, "TOTP secret provisioned");

        Ok(MfaEnrollment {
            provisioning_uri: totp.get_url(),
            secret,
        })
    }

    async fn secret_for(&self, user: &User, context: MfaContext) -> Result<String, MfaError> {
        let secret = match context {
            MfaContext::Setup => self.store.get(&pending_key(user.user_id)).await?,
            MfaContext::Login if user.mfa_enabled => user.mfa_secret.clone(),
            MfaContext::Login => None,
        };
        secret.ok_or(MfaError::SecretNotProvisioned)
    }

    pub async fn verify_code(
        &self,
        user: &User,
        code: &str,
        context: MfaContext,
    ) -> Result<bool, MfaError> {
        self.verify_code_at(user, code, context, self.clock.now())
            .await
    }

    /// Verify `code` as of `at`. Failed attempts count against the `mfa` tier.
    pub async fn verify_code_at(
        &self,
        user: &User,
        code: &str,
        context: MfaContext,
        at: DateTime<Utc>,
    ) -> Result<bool, MfaError> {
        let secret = self.secret_for(user, context).await?;

        let decision = self
            .limiter
            .check_tier(LimitTier::Mfa, &user.user_id.to_string())
            .await;
        if !decision.allowed {
            return Err(MfaError::TooManyAttempts {
                retry_after_secs: decision.retry_after_secs(self.limiter.now()),
            });
        }

        let code = code.trim();
        if code.len() != DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
            return Ok(false);
        }

        let totp = self.totp(&secret, &user.email)?;
        let Some(step) = matching_step(&totp, code, at) else {
            tracing::debug!(user_id = %user.user_id, "TOTP code did not match");
            return Ok(false);
        };

        let fresh = self
            .store
            .set_if_absent(&replay_key(user.user_id, step), "1", REPLAY_MARKER_TTL)
            .await?;
        if !fresh {
            tracing::warn!(user_id = %user.user_id, step, "TOTP code replayed");
            return Ok(false);
        }

        self.limiter.record_success(LimitTier::Mfa, &decision).await;

        if context == MfaContext::Setup {
            let now = self.clock.now();
            self.users.enable_mfa(user.user_id, &secret, now).await?;
            self.store.delete(&pending_key(user.user_id)).await?;
            tracing::info!(user_id = %user.user_id, "Two-factor authentication enabled");
        }
        Ok(true)
    }

    /// Clear MFA after the password is re-confirmed. False on a wrong password
    /// or when MFA was not enabled.
    pub async fn disable(&self, user: &User, password: &Password) -> Result<bool, MfaError> {
        let hash = PasswordHashString::new(user.password_hash.clone());
        if verify_password(password, &hash).is_err() {
            return Ok(false);
        }
        if !user.mfa_enabled {
            return Ok(false);
        }
        self.users.disable_mfa(user.user_id, self.clock.now()).await?;
        tracing::info!(user_id = %user.user_id, "Two-factor authentication disabled");
        Ok(true)
    }
}

/// Time step (within drift) whose code equals `code`, compared in constant time.
fn matching_step(totp: &TOTP, code: &str, at: DateTime<Utc>) -> Option<i64> {
    let current = at.timestamp().div_euclid(STEP_SECONDS as i64);
    let mut matched = None;
    for step in (current - DRIFT_STEPS)..=(current + DRIFT_STEPS) {
        if step < 0 {
            continue;
        }
        let candidate = totp.generate(step as u64 * STEP_SECONDS);
        if bool::from(candidate.as_bytes().ct_eq(code.as_bytes())) && matched.is_none() {
            matched = Some(step);
        }
    }
    matched
}
