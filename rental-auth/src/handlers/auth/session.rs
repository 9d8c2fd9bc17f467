use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{LoginRequest, RefreshRequest},
        ApiResponse,
    },
    middleware::{AuthenticatedContext, RequestMeta},
    utils::ValidatedJson,
    AppState,
};

/// Login with email and password
///
/// Accounts with two-factor enabled get `require_two_factor` and a
/// temporary token instead of a token pair.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful or second factor required", body = LoginResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    RequestMeta(device): RequestMeta,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.login(req, &device).await?;
    let message = if res.require_two_factor {
        "Two-factor authentication required"
    } else {
        "Login successful"
    };
    Ok(Json(ApiResponse::ok(message, res)))
}

/// Logout and end the current session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logged out successfully"),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    RequestMeta(device): RequestMeta,
    ctx: AuthenticatedContext,
) -> Result<impl IntoResponse, AppError> {
    state.auth.logout(&ctx, &device).await?;
    Ok(Json(ApiResponse::message("Logged out successfully")))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/auth/refresh-token",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed successfully", body = TokenResponse),
        (status = 401, description = "Invalid, expired or reused token", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    RequestMeta(device): RequestMeta,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.refresh(&req.refresh_token, &device).await?;
    Ok(Json(ApiResponse::ok("Token refreshed successfully", res)))
}
