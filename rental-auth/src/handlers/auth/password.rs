use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{ChangePasswordRequest, ForgotPasswordRequest, ResetPasswordRequest},
        ApiResponse,
    },
    middleware::{AuthenticatedContext, RequestMeta},
    utils::ValidatedJson,
    AppState,
};

const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists for that email, a password reset link has been sent.";

/// Request a password reset link
///
/// The response is identical whether or not the email is registered.
#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset link sent if the account exists"),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    RequestMeta(device): RequestMeta,
    ValidatedJson(req): ValidatedJson<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.forgot_password(&req.email, &device).await?;
    Ok(Json(ApiResponse::message(RESET_REQUESTED_MESSAGE)))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/auth/reset-password/{token}",
    params(("token" = String, Path, description = "Reset token from the email link")),
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset; all sessions signed out"),
        (status = 400, description = "Invalid token or weak password", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    RequestMeta(device): RequestMeta,
    Path(token): Path<String>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .reset_password(&token, &req.password, &device)
        .await?;
    Ok(Json(ApiResponse::message(
        "Password has been reset. Please sign in again.",
    )))
}

/// Change the password of the signed-in user
#[utoipa::path(
    post,
    path = "/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed; other sessions signed out"),
        (status = 400, description = "Weak password", body = ErrorResponse),
        (status = 401, description = "Current password is wrong", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn change_password(
    State(state): State<AppState>,
    RequestMeta(device): RequestMeta,
    ctx: AuthenticatedContext,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.change_password(&ctx, req, &device).await?;
    Ok(Json(ApiResponse::message("Password changed successfully")))
}
