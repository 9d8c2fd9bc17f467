//! Access/refresh token issuance, validation and rotation.
//!
//! Access and temporary (MFA-pending) tokens are signed with the access key,
//! refresh tokens with a separate refresh key. Every token carries a `typ`
//! claim so one kind is never accepted where another is expected.
//!
//! Refresh tokens are backed by a record in the shared store holding only
//! the token hash. Rotation retires the old record with a compare-and-swap,
//! so exactly one concurrent presenter wins.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::clock::Clock;
use super::store::{get_json, to_json, SharedStore, StoreError};
use crate::config::JwtConfig;
use crate::models::{RefreshToken, RevocationReason, Role, Session};

const MAX_CAS_ATTEMPTS: usize = 3;
const MAX_CHAIN_LENGTH: usize = 64;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("malformed token")]
    Malformed,

    #[error("token type not accepted here")]
    WrongType,

    #[error("refresh token not recognised")]
    UnknownToken,

    #[error("refresh token revoked")]
    Revoked,

    #[error("refresh token reuse detected")]
    ReuseDetected { user_id: Uuid, session_id: Uuid },

    #[error("refresh token kept changing under rotation")]
    Contention,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
    MfaPending,
}

trait TypedClaims: DeserializeOwned {
    fn kind(&self) -> TokenKind;
    fn exp(&self) -> i64;
}

/// Claims for access tokens (short-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: Uuid,
    pub role: Role,
    /// Session id
    pub sid: Uuid,
    /// Whether the session passed a second factor
    pub tfa: bool,
    pub typ: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

/// Claims for refresh tokens (long-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub sub: Uuid,
    pub sid: Uuid,
    pub typ: TokenKind,
    pub iat: i64,
    pub exp: i64,
    /// Matches the stored record id
    pub jti: Uuid,
}

/// Claims for the MFA-pending token issued between password and TOTP checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporaryTokenClaims {
    pub sub: Uuid,
    pub typ: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

impl TypedClaims for AccessTokenClaims {
    fn kind(&self) -> TokenKind {
        self.typ
    }
    fn exp(&self) -> i64 {
        self.exp
    }
}

impl TypedClaims for RefreshTokenClaims {
    fn kind(&self) -> TokenKind {
        self.typ
    }
    fn exp(&self) -> i64 {
        self.exp
    }
}

impl TypedClaims for TemporaryTokenClaims {
    fn kind(&self) -> TokenKind {
        self.typ
    }
    fn exp(&self) -> i64 {
        self.exp
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
    pub refresh_token_id: Uuid,
}

/// Result of a successful rotation. The caller still signs the access token,
/// since role and 2FA state come from the user and session.
#[derive(Debug, Clone)]
pub struct RotatedRefreshToken {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub refresh_token: IssuedToken,
    pub refresh_token_id: Uuid,
    pub previous_token_id: Uuid,
    /// The presented token was already rotated but fell inside the grace window.
    pub via_grace: bool,
}

#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub temporary_ttl: Duration,
    pub rotation_grace: Duration,
    pub retention: Duration,
}

impl TokenSettings {
    pub fn from_config(config: &JwtConfig) -> Self {
        Self {
            access_ttl: Duration::minutes(config.access_token_expiry_minutes),
            refresh_ttl: Duration::days(config.refresh_token_expiry_days),
            temporary_ttl: Duration::minutes(config.temporary_token_expiry_minutes),
            rotation_grace: Duration::seconds(config.rotation_grace_seconds),
            retention: Duration::days(config.refresh_token_retention_days),
        }
    }
}

#[derive(Clone)]
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    validation: Validation,
    settings: TokenSettings,
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
}

fn record_key(id: Uuid) -> String {
    format!("refresh:{}", id)
}

impl TokenService {
    pub fn new(config: &JwtConfig, store: Arc<dyn SharedStore>, clock: Arc<dyn Clock>) -> Self {
        let access = config.access_secret.expose_secret().as_bytes();
        let refresh = config.refresh_secret.expose_secret().as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock instead.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(["exp".to_string(), "sub".to_string()]);

        Self {
            access_encoding: EncodingKey::from_secret(access),
            access_decoding: DecodingKey::from_secret(access),
            refresh_encoding: EncodingKey::from_secret(refresh),
            refresh_decoding: DecodingKey::from_secret(refresh),
            validation,
            settings: TokenSettings::from_config(config),
            store,
            clock,
        }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    pub fn access_ttl_seconds(&self) -> i64 {
        self.settings.access_ttl.num_seconds()
    }

    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.settings.refresh_ttl.num_seconds()
    }

    fn sign<T: Serialize>(&self, claims: &T, key: &EncodingKey) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn verify<T: TypedClaims>(
        &self,
        token: &str,
        key: &DecodingKey,
        expected: TokenKind,
    ) -> Result<T, TokenError> {
        let data = decode::<T>(token, key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Malformed,
        })?;
        let claims = data.claims;
        if claims.kind() != expected {
            return Err(TokenError::WrongType);
        }
        if claims.exp() <= self.clock.now().timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        role: Role,
        session: &Session,
    ) -> Result<IssuedToken, TokenError> {
        let now = self.clock.now();
        let expires_at = now + self.settings.access_ttl;
        let claims = AccessTokenClaims {
            sub: user_id,
            role,
            sid: session.session_id,
            tfa: session.two_factor_authenticated,
            typ: TokenKind::Access,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4(),
        };
        Ok(IssuedToken {
            token: self.sign(&claims, &self.access_encoding)?,
            expires_at,
        })
    }

    /// MFA-pending token; only the 2FA verify endpoint accepts it.
    pub fn issue_temporary_token(&self, user_id: Uuid) -> Result<IssuedToken, TokenError> {
        let now = self.clock.now();
        let expires_at = now + self.settings.temporary_ttl;
        let claims = TemporaryTokenClaims {
            sub: user_id,
            typ: TokenKind::MfaPending,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4(),
        };
        Ok(IssuedToken {
            token: self.sign(&claims, &self.access_encoding)?,
            expires_at,
        })
    }

    fn sign_refresh(
        &self,
        id: Uuid,
        user_id: Uuid,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(IssuedToken, RefreshToken), TokenError> {
        let expires_at = now + self.settings.refresh_ttl;
        let claims = RefreshTokenClaims {
            sub: user_id,
            sid: session_id,
            typ: TokenKind::Refresh,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: id,
        };
        let token = self.sign(&claims, &self.refresh_encoding)?;
        let record = RefreshToken::new_with_id(id, user_id, session_id, &token, now, expires_at);
        Ok((IssuedToken { token, expires_at }, record))
    }

    /// Records outlive the token itself by the retention period so reuse stays detectable.
    fn record_ttl(&self, record: &RefreshToken, now: DateTime<Utc>) -> std::time::Duration {
        (record.expires_at + self.settings.retention - now)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(1))
    }

    async fn persist(&self, record: &RefreshToken, now: DateTime<Utc>) -> Result<(), TokenError> {
        let key = record_key(record.id);
        self.store
            .set(&key, &to_json(&key, record)?, self.record_ttl(record, now))
            .await?;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<(String, RefreshToken)>, TokenError> {
        Ok(get_json(self.store.as_ref(), &record_key(id)).await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<RefreshToken>, TokenError> {
        Ok(self.load(id).await?.map(|(_, record)| record))
    }

    /// Issue a pair for an established session. The refresh record is stored
    /// before anything is returned.
    pub async fn issue_token_pair(
        &self,
        user_id: Uuid,
        role: Role,
        session: &Session,
    ) -> Result<TokenPair, TokenError> {
        let now = self.clock.now();
        let id = Uuid::new_v4();
        let (refresh_token, record) = self.sign_refresh(id, user_id, session.session_id, now)?;
        self.persist(&record, now).await?;
        let access_token = self.issue_access_token(user_id, role, session)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            refresh_token_id: id,
        })
    }

    pub fn validate_access(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        self.verify(token, &self.access_decoding, TokenKind::Access)
    }

    pub fn validate_temporary(&self, token: &str) -> Result<TemporaryTokenClaims, TokenError> {
        self.verify(token, &self.access_decoding, TokenKind::MfaPending)
    }

    pub fn validate_refresh(&self, token: &str) -> Result<RefreshTokenClaims, TokenError> {
        self.verify(token, &self.refresh_decoding, TokenKind::Refresh)
    }

    /// Exchange a refresh token for a new one bound to the same session.
    ///
    /// Presenting a token that was already rotated revokes the rest of its
    /// chain and fails with [`TokenError::ReuseDetected`], unless it is the
    /// immediate predecessor of the active token and still inside the grace
    /// window.
    pub async fn rotate(&self, presented: &str) -> Result<RotatedRefreshToken, TokenError> {
        let claims = self.validate_refresh(presented)?;
        let (mut raw, mut record) = self
            .load(claims.jti)
            .await?
            .ok_or(TokenError::UnknownToken)?;

        if record.user_id != claims.sub
            || record.session_id != claims.sid
            || !record.matches(presented)
        {
            return Err(TokenError::InvalidSignature);
        }

        let previous_token_id = record.id;
        let mut via_grace = false;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = self.clock.now();

            if record.revoked {
                if !record.was_rotated() {
                    return Err(TokenError::Revoked);
                }
                match self.grace_successor(&record, now).await? {
                    Some((successor_raw, successor)) => {
                        tracing::info!(
                            token_id = %record.id,
                            successor_id = %successor.id,
                            "Accepting rotated refresh token inside grace window"
                        );
                        raw = successor_raw;
                        record = successor;
                        via_grace = true;
                    }
                    None => {
                        self.revoke_chain_from(&record, RevocationReason::ReuseDetected)
                            .await;
                        return Err(TokenError::ReuseDetected {
                            user_id: record.user_id,
                            session_id: record.session_id,
                        });
                    }
                }
            }

            if record.is_expired_at(now) {
                return Err(TokenError::Expired);
            }

            let new_id = Uuid::new_v4();
            let (refresh_token, new_record) =
                self.sign_refresh(new_id, record.user_id, record.session_id, now)?;
            self.persist(&new_record, now).await?;

            let retired = record.rotated_into(new_id, now);
            let key = record_key(record.id);
            let swapped = self
                .store
                .compare_and_swap(
                    &key,
                    &raw,
                    &to_json(&key, &retired)?,
                    self.record_ttl(&record, now),
                )
                .await?;

            if swapped {
                return Ok(RotatedRefreshToken {
                    user_id: record.user_id,
                    session_id: record.session_id,
                    refresh_token,
                    refresh_token_id: new_id,
                    previous_token_id,
                    via_grace,
                });
            }

            // Lost the race: drop the speculative record and look again.
            if let Err(e) = self.store.delete(&record_key(new_id)).await {
                tracing::warn!(token_id = %new_id, error = %e, "Failed to discard speculative refresh token");
            }
            match self.load(record.id).await? {
                Some((latest_raw, latest)) => {
                    raw = latest_raw;
                    record = latest;
                }
                None => return Err(TokenError::UnknownToken),
            }
        }

        Err(TokenError::Contention)
    }

    /// The active successor of `record`, if `record` is its immediate
    /// predecessor and was rotated less than the grace window ago.
    async fn grace_successor(
        &self,
        record: &RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<Option<(String, RefreshToken)>, TokenError> {
        if self.settings.rotation_grace <= Duration::zero() {
            return Ok(None);
        }
        let (Some(successor_id), Some(revoked_at)) = (record.superseded_by, record.revoked_at)
        else {
            return Ok(None);
        };
        if now - revoked_at > self.settings.rotation_grace {
            return Ok(None);
        }
        match self.load(successor_id).await? {
            Some((raw, successor)) if successor.is_active_at(now) => Ok(Some((raw, successor))),
            _ => Ok(None),
        }
    }

    /// Walk `superseded_by` links and revoke whatever is still active.
    async fn revoke_chain_from(&self, record: &RefreshToken, reason: RevocationReason) {
        let mut next = record.superseded_by;
        for _ in 0..MAX_CHAIN_LENGTH {
            let Some(id) = next else {
                return;
            };
            match self.load(id).await {
                Ok(Some((_, successor))) => {
                    next = successor.superseded_by;
                    if !successor.revoked {
                        if let Err(e) = self.revoke(id, reason).await {
                            tracing::error!(token_id = %id, error = %e, "Failed to revoke refresh token chain");
                        }
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    tracing::error!(token_id = %id, error = %e, "Failed to walk refresh token chain");
                    return;
                }
            }
        }
    }

    /// Revoke a refresh token. False when it is missing or already revoked.
    pub async fn revoke(&self, id: Uuid, reason: RevocationReason) -> Result<bool, TokenError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some((raw, record)) = self.load(id).await? else {
                return Ok(false);
            };
            if record.revoked {
                return Ok(false);
            }
            let now = self.clock.now();
            let key = record_key(id);
            let revoked = record.revoked_with(reason, now);
            if self
                .store
                .compare_and_swap(&key, &raw, &to_json(&key, &revoked)?, self.record_ttl(&record, now))
                .await?
            {
                tracing::debug!(token_id = %id, reason = reason.as_str(), "Refresh token revoked");
                return Ok(true);
            }
        }
        Err(TokenError::Contention)
    }
}
