//! Auth orchestrator: the flows behind every `/auth` endpoint.
//!
//! Rate limiting happens in front of these methods (route middleware);
//! everything else, including audit and notifications, happens here.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use super::clock::Clock;
use super::credentials::UserRepository;
use super::metrics;
use super::mfa::{MfaContext, MfaEngine, MfaEnrollment};
use super::notification_client::{Notification, NotificationDispatcher};
use super::security_audit::{AuditFilter, SecurityAuditLog};
use super::session::{SessionError, SessionRegistry};
use super::store::SharedStore;
use super::token::{IssuedToken, TokenError, TokenPair, TokenService};
use super::ServiceError;
use crate::config::AccountConfig;
use crate::dtos::auth::{
    ChangePasswordRequest, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
    TokenResponse,
};
use crate::middleware::AuthenticatedContext;
use crate::models::{
    DeviceInfo, RevocationReason, Role, SecurityAuditEvent, SecurityEventType, Session,
    SessionInfo, Severity, User, UserResponse,
};
use crate::utils::password::verify_against_dummy;
use crate::utils::{
    check_password_strength, generate_random_token, hash_password, hash_token, verify_password,
    Password, PasswordHashString,
};

const MAX_SESSION_BIND_ATTEMPTS: usize = 3;

fn verification_key(token: &str) -> String {
    format!("verify:{}", hash_token(token))
}

fn reset_key(token: &str) -> String {
    format!("reset:{}", hash_token(token))
}

fn temporary_token_key(jti: Uuid) -> String {
    format!("mfa:temp:{}", jti)
}

/// Password login progress. Only `CredentialsValid` can advance.
enum LoginState {
    Unauthenticated {
        reason: &'static str,
        user_id: Option<Uuid>,
    },
    CredentialsValid(User),
    MfaRequired(User),
    Authenticated(User),
}

impl LoginState {
    fn advance(self) -> Self {
        match self {
            LoginState::CredentialsValid(user) if user.mfa_enabled => LoginState::MfaRequired(user),
            LoginState::CredentialsValid(user) => LoginState::Authenticated(user),
            other => other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountSettings {
    pub verification_ttl: Duration,
    pub reset_ttl: Duration,
    pub require_verified_email: bool,
}

impl AccountSettings {
    pub fn from_config(config: &AccountConfig) -> Self {
        Self {
            verification_ttl: Duration::from_secs(
                config.verification_token_ttl_hours.max(1) as u64 * 3600,
            ),
            reset_ttl: Duration::from_secs(config.reset_token_ttl_minutes.max(1) as u64 * 60),
            require_verified_email: config.require_verified_email,
        }
    }
}

/// A fully established login: tokens plus the session they belong to.
#[derive(Debug, Clone)]
pub struct EstablishedSession {
    pub user: UserResponse,
    pub session: Session,
    pub tokens: TokenResponse,
}

impl From<EstablishedSession> for LoginResponse {
    fn from(e: EstablishedSession) -> Self {
        LoginResponse {
            require_two_factor: false,
            temporary_token: None,
            tokens: Some(e.tokens),
            user: Some(e.user),
            session_id: Some(e.session.session_id),
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    store: Arc<dyn SharedStore>,
    tokens: TokenService,
    sessions: SessionRegistry,
    mfa: MfaEngine,
    audit: SecurityAuditLog,
    notifications: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    settings: AccountSettings,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserRepository>,
        store: Arc<dyn SharedStore>,
        tokens: TokenService,
        sessions: SessionRegistry,
        mfa: MfaEngine,
        audit: SecurityAuditLog,
        notifications: NotificationDispatcher,
        clock: Arc<dyn Clock>,
        settings: AccountSettings,
    ) -> Self {
        Self {
            users,
            store,
            tokens,
            sessions,
            mfa,
            audit,
            notifications,
            clock,
            settings,
        }
    }

    fn audit_event(
        &self,
        event_type: SecurityEventType,
        user_id: Option<Uuid>,
        device: &DeviceInfo,
        details: serde_json::Value,
    ) {
        self.audit.log_event(
            event_type,
            user_id,
            Some(device.ip_address.as_str()),
            device.user_agent.as_deref(),
            details,
        );
    }

    fn token_response(&self, access_token: String, refresh_token: String) -> TokenResponse {
        TokenResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_ttl_seconds(),
            refresh_expires_in: self.tokens.refresh_ttl_seconds(),
        }
    }

    async fn load_user(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }

    /// Sensitive account changes by an MFA user need a session that has
    /// passed the second factor.
    fn require_second_factor(ctx: &AuthenticatedContext, user: &User) -> Result<(), ServiceError> {
        if user.mfa_enabled && !ctx.two_factor_authenticated {
            return Err(ServiceError::TwoFactorRequired);
        }
        Ok(())
    }

    fn require_strong(password: &str, field: &str) -> Result<(), ServiceError> {
        let problems = check_password_strength(field, password);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::WeakPassword(problems))
        }
    }

    pub async fn register(
        &self,
        req: RegisterRequest,
        device: &DeviceInfo,
    ) -> Result<RegisterResponse, ServiceError> {
        Self::require_strong(&req.password, "password")?;

        let role = req.role.unwrap_or(Role::Client);
        if !role.is_self_assignable() {
            return Err(ServiceError::RoleNotAllowed);
        }

        if self.users.find_by_email(&req.email).await?.is_some() {
            return Err(ServiceError::EmailAlreadyRegistered);
        }

        let hash = hash_password(&Password::new(req.password))?;
        let user = User::new(
            &req.email,
            hash.into_string(),
            role,
            req.display_name,
            self.clock.now(),
        );
        self.users.create(&user).await.map_err(|e| match e {
            super::credentials::CredentialError::DuplicateEmail => {
                ServiceError::EmailAlreadyRegistered
            }
            other => other.into(),
        })?;

        let token = generate_random_token();
        self.store
            .set(
                &verification_key(&token),
                &user.user_id.to_string(),
                self.settings.verification_ttl,
            )
            .await?;
        self.notifications.dispatch(Notification::Verification {
            to: user.email.clone(),
            token,
        });

        self.audit_event(
            SecurityEventType::UserRegistered,
            Some(user.user_id),
            device,
            json!({ "email": user.email, "role": role.as_str() }),
        );
        tracing::info!(user_id = %user.user_id, role = role.as_str(), "User registered");

        Ok(RegisterResponse {
            user: user.sanitized(),
        })
    }

    pub async fn verify_email(&self, token: &str, device: &DeviceInfo) -> Result<(), ServiceError> {
        let key = verification_key(token);
        let user_id = self
            .store
            .get(&key)
            .await?
            .and_then(|v| Uuid::parse_str(&v).ok())
            .ok_or(ServiceError::InvalidToken)?;
        // Single use: whoever deletes the key owns the verification.
        if !self.store.delete(&key).await? {
            return Err(ServiceError::InvalidToken);
        }

        self.users
            .mark_email_verified(user_id, self.clock.now())
            .await?;
        self.audit_event(SecurityEventType::EmailVerified, Some(user_id), device, json!({}));
        Ok(())
    }

    async fn check_credentials(&self, email: &str, password: &Password) -> Result<LoginState, ServiceError> {
        let Some(user) = self.users.find_by_email(email).await? else {
            verify_against_dummy(password);
            return Ok(LoginState::Unauthenticated {
                reason: "unknown_email",
                user_id: None,
            });
        };

        let hash = PasswordHashString::new(user.password_hash.clone());
        if verify_password(password, &hash).is_err() {
            return Ok(LoginState::Unauthenticated {
                reason: "bad_password",
                user_id: Some(user.user_id),
            });
        }
        Ok(LoginState::CredentialsValid(user))
    }

    pub async fn login(
        &self,
        req: LoginRequest,
        device: &DeviceInfo,
    ) -> Result<LoginResponse, ServiceError> {
        let password = Password::new(req.password);
        let state = self.check_credentials(&req.email, &password).await?;

        if let LoginState::CredentialsValid(user) = &state {
            if self.settings.require_verified_email && !user.email_verified {
                metrics::record_login("failure");
                self.audit_event(
                    SecurityEventType::FailedLogin,
                    Some(user.user_id),
                    device,
                    json!({ "email": user.email, "reason": "email_not_verified" }),
                );
                return Err(ServiceError::EmailNotVerified);
            }
        }

        match state.advance() {
            LoginState::Unauthenticated { reason, user_id } => {
                metrics::record_login("failure");
                self.audit_event(
                    SecurityEventType::FailedLogin,
                    user_id,
                    device,
                    json!({ "email": crate::models::user::normalize_email(&req.email), "reason": reason }),
                );
                Err(ServiceError::InvalidCredentials)
            }
            LoginState::MfaRequired(user) => {
                let temporary = self.tokens.issue_temporary_token(user.user_id)?;
                metrics::record_login("mfa_required");
                tracing::info!(user_id = %user.user_id, "Password accepted; second factor required");
                Ok(LoginResponse {
                    require_two_factor: true,
                    temporary_token: Some(temporary.token),
                    tokens: None,
                    user: None,
                    session_id: None,
                })
            }
            LoginState::Authenticated(user) => {
                let established = self.establish_session(&user, device, false).await?;
                metrics::record_login("success");
                Ok(established.into())
            }
            LoginState::CredentialsValid(_) => Err(ServiceError::Internal(anyhow::anyhow!(
                "login state did not advance"
            ))),
        }
    }

    /// Create the session, persist its refresh token and bind the two before
    /// anything is handed back.
    async fn establish_session(
        &self,
        user: &User,
        device: &DeviceInfo,
        two_factor_authenticated: bool,
    ) -> Result<EstablishedSession, ServiceError> {
        let created = self
            .sessions
            .create_session(user.user_id, device, two_factor_authenticated)
            .await?;
        for evicted in &created.evicted {
            self.audit_event(
                SecurityEventType::SessionRevoked,
                Some(user.user_id),
                device,
                json!({ "session_id": evicted.session_id, "reason": "session_limit" }),
            );
        }

        let (access_token, refresh_token, session) = match self.issue_for(user, &created.session).await {
            Ok(issued) => issued,
            Err(e) => {
                let session_id = created.session.session_id;
                if let Err(cleanup) = self
                    .sessions
                    .revoke_session(user.user_id, session_id, RevocationReason::SessionRevoked)
                    .await
                {
                    tracing::error!(session_id = %session_id, error = %cleanup, "Failed to remove half-built session");
                }
                return Err(e);
            }
        };

        self.audit_event(
            SecurityEventType::SuccessfulLogin,
            Some(user.user_id),
            device,
            json!({
                "session_id": session.session_id,
                "two_factor": two_factor_authenticated,
            }),
        );
        tracing::info!(user_id = %user.user_id, session_id = %session.session_id, "Login successful");

        Ok(EstablishedSession {
            user: user.sanitized(),
            tokens: self.token_response(access_token.token, refresh_token.token),
            session,
        })
    }

    async fn issue_for(
        &self,
        user: &User,
        session: &Session,
    ) -> Result<(IssuedToken, IssuedToken, Session), ServiceError> {
        let TokenPair {
            access_token,
            refresh_token,
            refresh_token_id,
        } = self
            .tokens
            .issue_token_pair(user.user_id, user.role(), session)
            .await?;
        match self
            .sessions
            .bind_refresh_token(session, refresh_token_id, refresh_token.expires_at)
            .await
        {
            Ok(session) => Ok((access_token, refresh_token, session)),
            Err(e) => {
                // Never bound, so revoking the session would not reach it.
                if let Err(cleanup) = self
                    .tokens
                    .revoke(refresh_token_id, RevocationReason::SessionRevoked)
                    .await
                {
                    tracing::error!(token_id = %refresh_token_id, error = %cleanup, "Failed to revoke unbound refresh token");
                }
                Err(e.into())
            }
        }
    }

    /// Second step of an MFA login, authorised by the temporary token.
    pub async fn complete_two_factor_login(
        &self,
        temporary_token: &str,
        code: &str,
        device: &DeviceInfo,
    ) -> Result<EstablishedSession, ServiceError> {
        let claims = self.tokens.validate_temporary(temporary_token)?;
        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or(ServiceError::Unauthorized)?;

        if !self.mfa.verify_code(&user, code, MfaContext::Login).await? {
            self.audit_event(
                SecurityEventType::Failed2fa,
                Some(user.user_id),
                device,
                json!({ "context": "login" }),
            );
            return Err(super::mfa::MfaError::InvalidCode.into());
        }

        let now = self.clock.now();
        let expires_at = chrono::DateTime::from_timestamp(claims.exp, 0).unwrap_or(now);
        let ttl = (expires_at - now).to_std().unwrap_or(Duration::from_secs(1));
        if !self
            .store
            .set_if_absent(&temporary_token_key(claims.jti), "used", ttl)
            .await?
        {
            return Err(ServiceError::Unauthorized);
        }

        self.audit_event(
            SecurityEventType::Successful2fa,
            Some(user.user_id),
            device,
            json!({ "context": "login" }),
        );
        let established = self.establish_session(&user, device, true).await?;
        metrics::record_login("success");
        Ok(established)
    }

    pub async fn refresh(
        &self,
        refresh_token: &str,
        device: &DeviceInfo,
    ) -> Result<TokenResponse, ServiceError> {
        let rotated = match self.tokens.rotate(refresh_token).await {
            Ok(rotated) => rotated,
            Err(TokenError::ReuseDetected {
                user_id,
                session_id,
            }) => {
                self.handle_reuse(user_id, session_id, device).await;
                return Err(ServiceError::ReuseDetected);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(user) = self.users.find_by_id(rotated.user_id).await? else {
            self.tokens
                .revoke(rotated.refresh_token_id, RevocationReason::SessionRevoked)
                .await?;
            self.sessions
                .revoke_session(
                    rotated.user_id,
                    rotated.session_id,
                    RevocationReason::SessionRevoked,
                )
                .await?;
            return Err(ServiceError::Unauthorized);
        };

        let mut attempts = 0;
        let session = loop {
            let Some(current) = self.sessions.get(rotated.session_id).await? else {
                // Session ended while we were rotating; the new token must not outlive it.
                self.tokens
                    .revoke(rotated.refresh_token_id, RevocationReason::SessionRevoked)
                    .await?;
                return Err(ServiceError::Unauthorized);
            };
            match self
                .sessions
                .bind_refresh_token(
                    &current,
                    rotated.refresh_token_id,
                    rotated.refresh_token.expires_at,
                )
                .await
            {
                Ok(session) => break session,
                Err(SessionError::ConcurrentModification)
                    if attempts + 1 < MAX_SESSION_BIND_ATTEMPTS =>
                {
                    attempts += 1;
                    tracing::debug!(session_id = %current.session_id, attempts, "Retrying session update");
                }
                Err(e) => return Err(e.into()),
            }
        };

        let access = self
            .tokens
            .issue_access_token(user.user_id, user.role(), &session)?;

        metrics::record_token_refresh();
        self.audit_event(
            SecurityEventType::TokenRefreshed,
            Some(user.user_id),
            device,
            json!({
                "session_id": session.session_id,
                "previous_token_id": rotated.previous_token_id,
                "grace": rotated.via_grace,
            }),
        );

        Ok(self.token_response(access.token, rotated.refresh_token.token))
    }

    async fn handle_reuse(&self, user_id: Uuid, session_id: Uuid, device: &DeviceInfo) {
        metrics::record_refresh_reuse();
        tracing::warn!(user_id = %user_id, session_id = %session_id, "Refresh token reuse detected; revoking session");

        if let Err(e) = self
            .sessions
            .revoke_session(user_id, session_id, RevocationReason::ReuseDetected)
            .await
        {
            tracing::error!(session_id = %session_id, error = %e, "Failed to revoke session after reuse");
        }

        self.audit.record(
            SecurityAuditEvent::new(
                SecurityEventType::SuspiciousActivityDetected,
                Some(user_id),
                Some(device.ip_address.clone()),
                device.user_agent.clone(),
                json!({ "reason": "refresh_token_reuse", "session_id": session_id }),
                self.clock.now(),
            )
            .with_severity(Severity::Critical),
        );

        if let Ok(Some(user)) = self.users.find_by_id(user_id).await {
            self.notifications.dispatch(Notification::Security {
                to: user.email,
                subject: "Suspicious sign-in activity".to_string(),
                message: "A refresh token for one of your sessions was used twice. \
                          That session has been signed out."
                    .to_string(),
            });
        }
    }

    pub async fn logout(
        &self,
        ctx: &AuthenticatedContext,
        device: &DeviceInfo,
    ) -> Result<(), ServiceError> {
        self.sessions
            .revoke_session(ctx.user_id, ctx.session_id, RevocationReason::Logout)
            .await?;
        self.audit_event(
            SecurityEventType::UserLogout,
            Some(ctx.user_id),
            device,
            json!({ "session_id": ctx.session_id }),
        );
        Ok(())
    }

    /// Always succeeds from the caller's point of view so the response never
    /// reveals whether the email is registered.
    pub async fn forgot_password(&self, email: &str, device: &DeviceInfo) -> Result<(), ServiceError> {
        let Some(user) = self.users.find_by_email(email).await? else {
            self.audit_event(
                SecurityEventType::PasswordResetRequested,
                None,
                device,
                json!({ "email": crate::models::user::normalize_email(email), "known": false }),
            );
            return Ok(());
        };

        let token = generate_random_token();
        self.store
            .set(
                &reset_key(&token),
                &user.user_id.to_string(),
                self.settings.reset_ttl,
            )
            .await?;
        self.notifications.dispatch(Notification::PasswordReset {
            to: user.email.clone(),
            token,
        });
        self.audit_event(
            SecurityEventType::PasswordResetRequested,
            Some(user.user_id),
            device,
            json!({ "known": true }),
        );
        Ok(())
    }

    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        device: &DeviceInfo,
    ) -> Result<(), ServiceError> {
        Self::require_strong(new_password, "password")?;

        let key = reset_key(token);
        let user_id = self
            .store
            .get(&key)
            .await?
            .and_then(|v| Uuid::parse_str(&v).ok())
            .ok_or(ServiceError::InvalidToken)?;
        if !self.store.delete(&key).await? {
            return Err(ServiceError::InvalidToken);
        }
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        let hash = hash_password(&Password::new(new_password))?;
        self.users
            .update_password(user.user_id, hash.as_str(), self.clock.now())
            .await?;
        let revoked = self
            .sessions
            .revoke_all(user.user_id, None, RevocationReason::PasswordChanged)
            .await?;

        self.notifications
            .dispatch(Notification::PasswordChanged { to: user.email.clone() });
        self.audit_event(
            SecurityEventType::PasswordResetCompleted,
            Some(user.user_id),
            device,
            json!({ "sessions_revoked": revoked }),
        );
        Ok(())
    }

    pub async fn change_password(
        &self,
        ctx: &AuthenticatedContext,
        req: ChangePasswordRequest,
        device: &DeviceInfo,
    ) -> Result<(), ServiceError> {
        let user = self.load_user(ctx.user_id).await?;
        Self::require_second_factor(ctx, &user)?;
        let hash = PasswordHashString::new(user.password_hash.clone());
        if verify_password(&Password::new(req.current_password), &hash).is_err() {
            return Err(ServiceError::InvalidCredentials);
        }
        Self::require_strong(&req.new_password, "new_password")?;

        let new_hash = hash_password(&Password::new(req.new_password))?;
        self.users
            .update_password(user.user_id, new_hash.as_str(), self.clock.now())
            .await?;
        let revoked = self
            .sessions
            .revoke_all(
                user.user_id,
                Some(ctx.session_id),
                RevocationReason::PasswordChanged,
            )
            .await?;

        self.notifications
            .dispatch(Notification::PasswordChanged { to: user.email.clone() });
        self.audit_event(
            SecurityEventType::PasswordChanged,
            Some(user.user_id),
            device,
            json!({ "sessions_revoked": revoked }),
        );
        Ok(())
    }

    pub async fn setup_two_factor(
        &self,
        ctx: &AuthenticatedContext,
    ) -> Result<MfaEnrollment, ServiceError> {
        let user = self.load_user(ctx.user_id).await?;
        Ok(self.mfa.generate_secret(&user).await?)
    }

    pub async fn confirm_two_factor_setup(
        &self,
        ctx: &AuthenticatedContext,
        code: &str,
        device: &DeviceInfo,
    ) -> Result<(), ServiceError> {
        let user = self.load_user(ctx.user_id).await?;
        if !self.mfa.verify_code(&user, code, MfaContext::Setup).await? {
            self.audit_event(
                SecurityEventType::Failed2fa,
                Some(user.user_id),
                device,
                json!({ "context": "setup" }),
            );
            return Err(super::mfa::MfaError::InvalidCode.into());
        }
        self.sessions
            .mark_two_factor_authenticated(ctx.session_id)
            .await?;

        self.audit_event(
            SecurityEventType::TwoFactorEnabled,
            Some(user.user_id),
            device,
            json!({}),
        );
        self.notifications.dispatch(Notification::Security {
            to: user.email,
            subject: "Two-factor authentication enabled".to_string(),
            message: "Two-factor authentication is now required to sign in to your account."
                .to_string(),
        });
        Ok(())
    }

    pub async fn disable_two_factor(
        &self,
        ctx: &AuthenticatedContext,
        password: &str,
        device: &DeviceInfo,
    ) -> Result<(), ServiceError> {
        let user = self.load_user(ctx.user_id).await?;
        if !user.mfa_enabled {
            return Err(super::mfa::MfaError::SecretNotProvisioned.into());
        }
        Self::require_second_factor(ctx, &user)?;
        if !self.mfa.disable(&user, &Password::new(password)).await? {
            return Err(ServiceError::InvalidCredentials);
        }

        self.audit_event(
            SecurityEventType::TwoFactorDisabled,
            Some(user.user_id),
            device,
            json!({}),
        );
        self.notifications.dispatch(Notification::Security {
            to: user.email,
            subject: "Two-factor authentication disabled".to_string(),
            message: "Two-factor authentication was turned off for your account. \
                      If this wasn't you, reset your password immediately."
                .to_string(),
        });
        Ok(())
    }

    pub async fn list_sessions(
        &self,
        ctx: &AuthenticatedContext,
    ) -> Result<Vec<SessionInfo>, ServiceError> {
        Ok(self
            .sessions
            .list_sessions(ctx.user_id)
            .await?
            .iter()
            .map(|s| SessionInfo::from_session(s, ctx.session_id))
            .collect())
    }

    pub async fn revoke_session(
        &self,
        ctx: &AuthenticatedContext,
        session_id: Uuid,
        device: &DeviceInfo,
    ) -> Result<(), ServiceError> {
        if !self
            .sessions
            .revoke_session(ctx.user_id, session_id, RevocationReason::SessionRevoked)
            .await?
        {
            return Err(ServiceError::SessionNotFound);
        }
        self.audit_event(
            SecurityEventType::SessionRevoked,
            Some(ctx.user_id),
            device,
            json!({ "session_id": session_id, "reason": "user_request" }),
        );
        Ok(())
    }

    pub async fn current_user(
        &self,
        ctx: &AuthenticatedContext,
    ) -> Result<UserResponse, ServiceError> {
        Ok(self.load_user(ctx.user_id).await?.sanitized())
    }

    pub async fn delete_account(
        &self,
        ctx: &AuthenticatedContext,
        password: &str,
        device: &DeviceInfo,
    ) -> Result<(), ServiceError> {
        let user = self.load_user(ctx.user_id).await?;
        Self::require_second_factor(ctx, &user)?;
        let hash = PasswordHashString::new(user.password_hash.clone());
        if verify_password(&Password::new(password), &hash).is_err() {
            return Err(ServiceError::InvalidCredentials);
        }

        self.users.soft_delete(user.user_id, self.clock.now()).await?;
        let revoked = self
            .sessions
            .revoke_all(user.user_id, None, RevocationReason::SessionRevoked)
            .await?;
        self.audit_event(
            SecurityEventType::AccountDeleted,
            Some(user.user_id),
            device,
            json!({ "sessions_revoked": revoked }),
        );
        Ok(())
    }

    pub async fn query_audit(
        &self,
        filter: &AuditFilter,
    ) -> Result<Vec<SecurityAuditEvent>, ServiceError> {
        Ok(self.audit.query(filter).await?)
    }
}
