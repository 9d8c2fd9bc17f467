//! Security audit event model - append-only record of security-relevant activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    UserRegistered,
    SuccessfulLogin,
    FailedLogin,
    UserLogout,
    PasswordResetRequested,
    PasswordResetCompleted,
    PasswordChanged,
    EmailVerified,
    TwoFactorEnabled,
    TwoFactorDisabled,
    #[serde(rename = "SUCCESSFUL_2FA")]
    Successful2fa,
    #[serde(rename = "FAILED_2FA")]
    Failed2fa,
    TokenRefreshed,
    SessionRevoked,
    SuspiciousActivityDetected,
    RateLimitExceeded,
    RateLimiterDegraded,
    AccountDeleted,
}

impl SecurityEventType {
    pub const ALL: [SecurityEventType; 18] = [
        SecurityEventType::UserRegistered,
        SecurityEventType::SuccessfulLogin,
        SecurityEventType::FailedLogin,
        SecurityEventType::UserLogout,
        SecurityEventType::PasswordResetRequested,
        SecurityEventType::PasswordResetCompleted,
        SecurityEventType::PasswordChanged,
        SecurityEventType::EmailVerified,
        SecurityEventType::TwoFactorEnabled,
        SecurityEventType::TwoFactorDisabled,
        SecurityEventType::Successful2fa,
        SecurityEventType::Failed2fa,
        SecurityEventType::TokenRefreshed,
        SecurityEventType::SessionRevoked,
        SecurityEventType::SuspiciousActivityDetected,
        SecurityEventType::RateLimitExceeded,
        SecurityEventType::RateLimiterDegraded,
        SecurityEventType::AccountDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::UserRegistered => "USER_REGISTERED",
            SecurityEventType::SuccessfulLogin => "SUCCESSFUL_LOGIN",
            SecurityEventType::FailedLogin => "FAILED_LOGIN",
            SecurityEventType::UserLogout => "USER_LOGOUT",
            SecurityEventType::PasswordResetRequested => "PASSWORD_RESET_REQUESTED",
            SecurityEventType::PasswordResetCompleted => "PASSWORD_RESET_COMPLETED",
            SecurityEventType::PasswordChanged => "PASSWORD_CHANGED",
            SecurityEventType::EmailVerified => "EMAIL_VERIFIED",
            SecurityEventType::TwoFactorEnabled => "TWO_FACTOR_ENABLED",
            SecurityEventType::TwoFactorDisabled => "TWO_FACTOR_DISABLED",
            SecurityEventType::Successful2fa => "SUCCESSFUL_2FA",
            SecurityEventType::Failed2fa => "FAILED_2FA",
            SecurityEventType::TokenRefreshed => "TOKEN_REFRESHED",
            SecurityEventType::SessionRevoked => "SESSION_REVOKED",
            SecurityEventType::SuspiciousActivityDetected => "SUSPICIOUS_ACTIVITY_DETECTED",
            SecurityEventType::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            SecurityEventType::RateLimiterDegraded => "RATE_LIMITER_DEGRADED",
            SecurityEventType::AccountDeleted => "ACCOUNT_DELETED",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            SecurityEventType::SuspiciousActivityDetected => Severity::Critical,
            SecurityEventType::FailedLogin
            | SecurityEventType::Failed2fa
            | SecurityEventType::RateLimitExceeded
            | SecurityEventType::RateLimiterDegraded
            | SecurityEventType::TwoFactorDisabled
            | SecurityEventType::AccountDeleted => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

impl FromStr for SecurityEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecurityEventType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown security event type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SecurityAuditEvent {
    pub event_id: Uuid,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl SecurityAuditEvent {
    pub fn new(
        event_type: SecurityEventType,
        user_id: Option<Uuid>,
        ip_address: Option<String>,
        user_agent: Option<String>,
        details: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            severity: event_type.default_severity(),
            user_id,
            ip_address,
            user_agent,
            details,
            created_utc: now,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_as_str() {
        for t in SecurityEventType::ALL {
            let json = serde_json::to_value(t).unwrap();
            assert_eq!(json, serde_json::Value::String(t.as_str().to_string()));
            assert_eq!(t.as_str().parse::<SecurityEventType>().unwrap(), t);
        }
    }

    #[test]
    fn suspicious_activity_is_critical() {
        assert_eq!(
            SecurityEventType::SuspiciousActivityDetected.default_severity(),
            Severity::Critical
        );
        assert_eq!(SecurityEventType::SuccessfulLogin.default_severity(), Severity::Info);
    }
}
