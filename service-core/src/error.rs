use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

static PRODUCTION_MODE: AtomicBool = AtomicBool::new(true);

/// Toggle whether internal error detail is rendered in responses.
///
/// Defaults to production (detail suppressed); binaries flip it once at startup.
pub fn set_production_mode(production: bool) {
    PRODUCTION_MODE.store(production, Ordering::Relaxed);
}

pub fn is_production_mode() -> bool {
    PRODUCTION_MODE.load(Ordering::Relaxed)
}

/// A single field-level validation failure.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation failed")]
    ValidationError(Vec<FieldError>),

    #[error("Authentication failed: {0}")]
    AuthError(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Refresh token reuse detected")]
    ReuseDetected,

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) | AppError::ReuseDetected => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::TooManyRequests(..) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable tag, used for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) => "validation_error",
            AppError::AuthError(_) => "authentication_error",
            AppError::Forbidden(_) => "authorization_error",
            AppError::TooManyRequests(..) => "rate_limit_error",
            AppError::Conflict(_) => "conflict_error",
            AppError::NotFound(_) => "not_found_error",
            AppError::ReuseDetected => "reuse_detected_error",
            AppError::ServiceUnavailable => "service_unavailable",
            AppError::InternalError(_) | AppError::ConfigError(_) => "internal_error",
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                let field = field.to_string();
                errs.iter().map(move |err| {
                    let message = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("invalid value ({})", err.code));
                    FieldError::new(field.clone(), message)
                })
            })
            .collect();
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        AppError::ValidationError(fields)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();

        let (message, errors, stack, retry_after) = match self {
            AppError::ValidationError(fields) => {
                ("Validation failed".to_string(), Some(fields), None, None)
            }
            AppError::BadRequest(err) => (err.to_string(), None, None, None),
            // Authentication failures never say which check failed.
            AppError::AuthError(err) => {
                tracing::debug!(error = %err, "authentication rejected");
                ("Authentication failed".to_string(), None, None, None)
            }
            AppError::Forbidden(err) => (err.to_string(), None, None, None),
            AppError::TooManyRequests(msg, retry) => (msg, None, None, retry),
            AppError::Conflict(err) => (err.to_string(), None, None, None),
            AppError::NotFound(err) => (err.to_string(), None, None, None),
            AppError::ReuseDetected => (
                "Session revoked: refresh token reuse detected".to_string(),
                None,
                None,
                None,
            ),
            AppError::ServiceUnavailable => {
                ("Service unavailable".to_string(), None, None, None)
            }
            AppError::InternalError(err) | AppError::ConfigError(err) => {
                tracing::error!(error = ?err, "internal error");
                let stack = (!is_production_mode()).then(|| format!("{:#?}", err));
                ("Internal server error".to_string(), None, stack, None)
            }
        };

        tracing::debug!(status = status.as_u16(), kind, "request failed");

        let mut res = (
            status,
            Json(ErrorEnvelope {
                success: false,
                message,
                errors,
                stack,
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry));
        }

        res
    }
}
