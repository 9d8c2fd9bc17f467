use service_core::error::{AppError, FieldError};
use thiserror::Error;

use super::credentials::CredentialError;
use super::mfa::MfaError;
use super::session::SessionError;
use super::store::StoreError;
use super::token::TokenError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    #[error("Role cannot be self-assigned")]
    RoleNotAllowed,

    #[error("Password does not meet requirements")]
    WeakPassword(Vec<FieldError>),

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Email address not verified")]
    EmailNotVerified,

    #[error("Two-factor authentication required")]
    TwoFactorRequired,

    #[error("Refresh token reuse detected")]
    ReuseDetected,

    #[error("Session not found")]
    SessionNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Mfa(#[from] MfaError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::ReuseDetected { .. } => AppError::ReuseDetected,
            TokenError::Store(e) => e.into(),
            TokenError::Signing(e) => AppError::InternalError(anyhow::anyhow!(e)),
            TokenError::Contention => AppError::Conflict(anyhow::anyhow!(
                "Refresh token is being rotated concurrently; retry"
            )),
            other => AppError::AuthError(anyhow::anyhow!(other)),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) | StoreError::Timeout(_) => {
                tracing::error!(error = %err, "Shared store unavailable");
                AppError::ServiceUnavailable
            }
            other => AppError::InternalError(anyhow::anyhow!(other)),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => AppError::AuthError(anyhow::anyhow!("session not found")),
            SessionError::ConcurrentModification => AppError::Conflict(anyhow::anyhow!(
                "Session was modified concurrently; retry"
            )),
            SessionError::Store(e) => e.into(),
            SessionError::Token(e) => e.into(),
        }
    }
}

impl From<MfaError> for AppError {
    fn from(err: MfaError) -> Self {
        match err {
            MfaError::InvalidCode => AppError::AuthError(anyhow::anyhow!("invalid TOTP code")),
            MfaError::SecretNotProvisioned => AppError::BadRequest(anyhow::anyhow!(
                "Two-factor authentication has not been set up"
            )),
            MfaError::TooManyAttempts { retry_after_secs } => AppError::TooManyRequests(
                "Too many verification attempts. Please try again later.".to_string(),
                Some(retry_after_secs),
            ),
            MfaError::AlreadyEnabled => AppError::Conflict(anyhow::anyhow!(
                "Two-factor authentication is already enabled"
            )),
            MfaError::Store(e) => e.into(),
            MfaError::Credential(e) => e.into(),
            MfaError::BadSecret(e) => AppError::InternalError(anyhow::anyhow!(e)),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::DuplicateEmail => {
                AppError::Conflict(anyhow::anyhow!("Email already registered"))
            }
            CredentialError::NotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            CredentialError::Storage(e) => AppError::InternalError(e),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidCredentials => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::Unauthorized => AppError::AuthError(anyhow::anyhow!("Unauthorized")),
            ServiceError::EmailAlreadyRegistered => {
                AppError::Conflict(anyhow::anyhow!("Email already registered"))
            }
            ServiceError::RoleNotAllowed => AppError::Forbidden(anyhow::anyhow!(
                "Only client and agent roles can be chosen at registration"
            )),
            ServiceError::WeakPassword(fields) => AppError::ValidationError(fields),
            ServiceError::InvalidToken => {
                AppError::BadRequest(anyhow::anyhow!("Invalid or expired token"))
            }
            ServiceError::EmailNotVerified => {
                AppError::Forbidden(anyhow::anyhow!("Email address not verified"))
            }
            ServiceError::TwoFactorRequired => {
                AppError::Forbidden(anyhow::anyhow!("Two-factor authentication required"))
            }
            ServiceError::ReuseDetected => AppError::ReuseDetected,
            ServiceError::SessionNotFound => {
                AppError::NotFound(anyhow::anyhow!("Session not found"))
            }
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            ServiceError::Token(e) => e.into(),
            ServiceError::Session(e) => e.into(),
            ServiceError::Mfa(e) => e.into(),
            ServiceError::Credential(e) => e.into(),
            ServiceError::Store(e) => e.into(),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
