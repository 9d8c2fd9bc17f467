//! User model - marketplace accounts owned by the credential store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Closed set of marketplace roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Agent,
    Admin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Client, Role::Agent, Role::Admin, Role::SuperAdmin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Agent => "agent",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Roles a caller may pick for themselves at registration.
    pub fn is_self_assignable(&self) -> bool {
        matches!(self, Role::Client | Role::Agent)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Role::Client),
            "agent" => Ok(Role::Agent),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// User entity.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role_code: String,
    pub email_verified: bool,
    pub mfa_enabled: bool,
    /// Base32 TOTP secret, set only after a confirmed setup.
    pub mfa_secret: Option<String>,
    pub display_name: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(
        email: &str,
        password_hash: String,
        role: Role,
        display_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            email: normalize_email(email),
            password_hash,
            role_code: role.as_str().to_string(),
            email_verified: false,
            mfa_enabled: false,
            mfa_secret: None,
            display_name,
            created_utc: now,
            updated_utc: now,
            deleted_utc: None,
        }
    }

    /// Unknown role codes degrade to the least privileged role.
    pub fn role(&self) -> Role {
        self.role_code.parse().unwrap_or(Role::Client)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_utc.is_some()
    }

    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self)
    }
}

/// Emails compare case-insensitively; this is the stored form.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Public projection of a user. Never carries the password hash or MFA secret.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
    pub mfa_enabled: bool,
    pub display_name: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(u: &User) -> Self {
        Self {
            user_id: u.user_id,
            email: u.email.clone(),
            role: u.role(),
            email_verified: u.email_verified,
            mfa_enabled: u.mfa_enabled,
            display_name: u.display_name.clone(),
            created_utc: u.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_normalizes_email_and_defaults_flags() {
        let user = User::new(" Tenant@Example.COM ", "hash".into(), Role::Client, None, Utc::now());
        assert_eq!(user.email, "tenant@example.com");
        assert!(!user.email_verified);
        assert!(!user.mfa_enabled);
        assert_eq!(user.role(), Role::Client);
    }

    #[test]
    fn unknown_role_code_falls_back_to_client() {
        let mut user = User::new("a@b.co", "hash".into(), Role::Agent, None, Utc::now());
        user.role_code = "landlord".into();
        assert_eq!(user.role(), Role::Client);
    }

    #[test]
    fn sanitized_user_has_no_secrets() {
        let mut user = User::new("a@b.co", "hash".into(), Role::Admin, None, Utc::now());
        user.mfa_secret = Some("JBSWY3DPEHPK3PXP".into());
        let json = serde_json::to_value(user.sanitized()).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("mfa_secret").is_none());
        assert_eq!(json["role"], "admin");
    }

    #[test]
    fn only_client_and_agent_are_self_assignable() {
        assert!(Role::Client.is_self_assignable());
        assert!(Role::Agent.is_self_assignable());
        assert!(!Role::Admin.is_self_assignable());
        assert!(!Role::SuperAdmin.is_self_assignable());
    }
}
