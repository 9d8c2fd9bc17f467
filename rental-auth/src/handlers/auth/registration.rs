use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{auth::RegisterRequest, ApiResponse},
    middleware::RequestMeta,
    utils::ValidatedJson,
    AppState,
};

/// Register a new user
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered successfully", body = RegisterResponse),
        (status = 400, description = "Validation error or weak password", body = ErrorResponse),
        (status = 403, description = "Role cannot be self-assigned", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    RequestMeta(device): RequestMeta,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.register(req, &device).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(
            "Registration successful. Check your email to verify your account.",
            res,
        )),
    ))
}

/// Verify user email
#[utoipa::path(
    get,
    path = "/auth/verify-email/{token}",
    params(("token" = String, Path, description = "Verification token from the email link")),
    responses(
        (status = 200, description = "Email verified successfully"),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn verify_email(
    State(state): State<AppState>,
    RequestMeta(device): RequestMeta,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.verify_email(&token, &device).await?;
    Ok(Json(ApiResponse::message("Email verified successfully")))
}
