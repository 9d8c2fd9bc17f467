use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::utils::token::hash_token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Rotated,
    Logout,
    SessionRevoked,
    PasswordChanged,
    ReuseDetected,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Rotated => "rotated",
            RevocationReason::Logout => "logout",
            RevocationReason::SessionRevoked => "session_revoked",
            RevocationReason::PasswordChanged => "password_changed",
            RevocationReason::ReuseDetected => "reuse_detected",
        }
    }
}

/// Refresh token record kept in the shared store under `refresh:<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Matches the `jti` claim of the signed token
    pub id: Uuid,

    pub user_id: Uuid,

    pub session_id: Uuid,

    /// SHA-256 hex of the signed token; the plaintext is never stored
    pub token_hash: String,

    pub issued_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,

    #[serde(default)]
    pub revoked: bool,

    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub revocation_reason: Option<RevocationReason>,

    /// Id of the token that replaced this one on rotation
    #[serde(default)]
    pub superseded_by: Option<Uuid>,
}

impl RefreshToken {
    pub fn new_with_id(
        id: Uuid,
        user_id: Uuid,
        session_id: Uuid,
        token: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            session_id,
            token_hash: hash_token(token),
            issued_at,
            expires_at,
            revoked: false,
            revoked_at: None,
            revocation_reason: None,
            superseded_by: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Not revoked and not expired.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }

    /// Constant-time comparison of the presented token against the stored hash.
    pub fn matches(&self, presented: &str) -> bool {
        let presented = hash_token(presented);
        presented.as_bytes().ct_eq(self.token_hash.as_bytes()).into()
    }

    /// True when this token was retired by rotation, i.e. re-presenting it is reuse.
    pub fn was_rotated(&self) -> bool {
        self.revoked && self.superseded_by.is_some()
    }

    pub fn revoked_with(&self, reason: RevocationReason, now: DateTime<Utc>) -> Self {
        Self {
            revoked: true,
            revoked_at: Some(now),
            revocation_reason: Some(reason),
            ..self.clone()
        }
    }

    pub fn rotated_into(&self, successor: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            superseded_by: Some(successor),
            ..self.revoked_with(RevocationReason::Rotated, now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(now: DateTime<Utc>) -> RefreshToken {
        RefreshToken::new_with_id(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "token_abc",
            now,
            now + Duration::days(7),
        )
    }

    #[test]
    fn stores_hash_not_plaintext() {
        let t = token(Utc::now());
        assert_ne!(t.token_hash, "token_abc");
        assert_eq!(t.token_hash.len(), 64);
        assert!(t.matches("token_abc"));
        assert!(!t.matches("token_abd"));
    }

    #[test]
    fn expiry_is_evaluated_against_given_time() {
        let now = Utc::now();
        let t = token(now);
        assert!(t.is_active_at(now));
        assert!(!t.is_active_at(now + Duration::days(7)));
        assert!(t.is_expired_at(now + Duration::days(8)));
    }

    #[test]
    fn rotation_marks_superseded() {
        let now = Utc::now();
        let t = token(now);
        let next = Uuid::new_v4();
        let rotated = t.rotated_into(next, now);
        assert!(rotated.revoked);
        assert!(rotated.was_rotated());
        assert_eq!(rotated.superseded_by, Some(next));
        assert_eq!(rotated.revocation_reason, Some(RevocationReason::Rotated));
        assert!(!rotated.is_active_at(now));
    }

    #[test]
    fn logout_revocation_is_not_rotation() {
        let now = Utc::now();
        let revoked = token(now).revoked_with(RevocationReason::Logout, now);
        assert!(revoked.revoked);
        assert!(!revoked.was_rotated());
    }
}
