use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{auth::DeleteAccountRequest, ApiResponse},
    middleware::{AuthenticatedContext, RequestMeta},
    utils::ValidatedJson,
    AppState,
};

/// Get current user profile
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user profile", body = UserResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_me(
    State(state): State<AppState>,
    ctx: AuthenticatedContext,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.current_user(&ctx).await?;
    Ok(Json(ApiResponse::ok("Profile retrieved", user)))
}

/// Delete the signed-in account
///
/// Soft deletes the user and signs out every session.
#[utoipa::path(
    delete,
    path = "/auth/account",
    request_body = DeleteAccountRequest,
    responses(
        (status = 200, description = "Account deleted"),
        (status = 401, description = "Wrong password", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_account(
    State(state): State<AppState>,
    RequestMeta(device): RequestMeta,
    ctx: AuthenticatedContext,
    ValidatedJson(req): ValidatedJson<DeleteAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .delete_account(&ctx, &req.password, &device)
        .await?;
    Ok(Json(ApiResponse::message("Account deleted")))
}
