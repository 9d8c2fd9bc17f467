use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::Role;
use crate::AppState;

/// The authenticated caller, placed in request extensions by
/// [`auth_middleware`] and extracted explicitly by handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedContext {
    pub user_id: Uuid,
    pub role: Role,
    pub session_id: Uuid,
    pub two_factor_authenticated: bool,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Validate the access token and confirm its session still exists. The
/// second-factor flag comes from the live session, not the token.
async fn authenticate(state: &AppState, token: &str) -> Result<AuthenticatedContext, AppError> {
    let claims = state.tokens.validate_access(token)?;

    match state.sessions.get(claims.sid).await? {
        Some(session) if session.user_id == claims.sub => Ok(AuthenticatedContext {
            user_id: claims.sub,
            role: claims.role,
            session_id: claims.sid,
            two_factor_authenticated: session.two_factor_authenticated,
        }),
        _ => Err(AppError::AuthError(anyhow::anyhow!("session no longer active"))),
    }
}

/// Middleware to require authentication
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("missing bearer token")))?;

    let context = authenticate(&state, token).await?;
    req.extensions_mut().insert(context);

    Ok(next.run(req).await)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedContext>()
            .cloned()
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("no authenticated context")))
    }
}

/// Caller of `POST /auth/2fa/verify`: a full session (confirming setup) or
/// the MFA-pending token from a password login.
#[derive(Debug, Clone)]
pub enum TwoFactorCaller {
    Session(AuthenticatedContext),
    PendingLogin { token: String },
}

#[axum::async_trait]
impl FromRequestParts<AppState> for TwoFactorCaller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("missing bearer token")))?;

        if state.tokens.validate_temporary(token).is_ok() {
            return Ok(TwoFactorCaller::PendingLogin {
                token: token.to_string(),
            });
        }
        Ok(TwoFactorCaller::Session(authenticate(state, token).await?))
    }
}
