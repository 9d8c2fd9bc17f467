//! Session model - one record per logged-in device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::utils::token::hash_token;

/// Client details captured from the inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub ip_address: String,
    pub user_agent: Option<String>,
    /// Optional client-supplied device identifier (`x-device-id`)
    pub device_id: Option<String>,
}

impl DeviceInfo {
    /// SHA-256 over `ip|user-agent|device id`.
    pub fn fingerprint(&self) -> String {
        hash_token(&format!(
            "{}|{}|{}",
            self.ip_address,
            self.user_agent.as_deref().unwrap_or(""),
            self.device_id.as_deref().unwrap_or("")
        ))
    }
}

/// Session record kept in the shared store under `session:<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub device_fingerprint: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Optimistic-concurrency token, bumped on every write
    pub version: u64,
    pub two_factor_authenticated: bool,
    /// The session's current active refresh token
    pub refresh_token_id: Option<Uuid>,
}

impl Session {
    pub fn new(
        user_id: Uuid,
        device: &DeviceInfo,
        two_factor_authenticated: bool,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            device_fingerprint: device.fingerprint(),
            ip_address: device.ip_address.clone(),
            user_agent: device.user_agent.clone(),
            created_at: now,
            last_active_at: now,
            expires_at,
            version: 0,
            two_factor_authenticated,
            refresh_token_id: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Session info for API responses.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub two_factor_authenticated: bool,
    pub is_current: bool,
}

impl SessionInfo {
    pub fn from_session(s: &Session, current_session_id: Uuid) -> Self {
        Self {
            session_id: s.session_id,
            ip_address: s.ip_address.clone(),
            user_agent: s.user_agent.clone(),
            created_at: s.created_at,
            last_active_at: s.last_active_at,
            expires_at: s.expires_at,
            two_factor_authenticated: s.two_factor_authenticated,
            is_current: s.session_id == current_session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn device(ip: &str) -> DeviceInfo {
        DeviceInfo {
            ip_address: ip.to_string(),
            user_agent: Some("Mozilla/5.0".to_string()),
            device_id: None,
        }
    }

    #[test]
    fn fingerprint_is_stable_and_device_specific() {
        assert_eq!(device("10.0.0.1").fingerprint(), device("10.0.0.1").fingerprint());
        assert_ne!(device("10.0.0.1").fingerprint(), device("10.0.0.2").fingerprint());
    }

    #[test]
    fn session_info_marks_current() {
        let now = Utc::now();
        let session = Session::new(Uuid::new_v4(), &device("10.0.0.1"), false, now, now + Duration::days(7));
        assert!(SessionInfo::from_session(&session, session.session_id).is_current);
        assert!(!SessionInfo::from_session(&session, Uuid::new_v4()).is_current);
    }
}
