use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        session::{
            TwoFactorDisableRequest, TwoFactorSetupResponse, TwoFactorVerifyRequest,
            TwoFactorVerifyResponse,
        },
        ApiResponse,
    },
    middleware::{AuthenticatedContext, RequestMeta, TwoFactorCaller},
    utils::ValidatedJson,
    AppState,
};

/// Start two-factor enrolment
#[utoipa::path(
    post,
    path = "/auth/2fa/setup",
    responses(
        (status = 200, description = "Secret generated; confirm with a code", body = TwoFactorSetupResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 409, description = "Two-factor already enabled", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn setup_two_factor(
    State(state): State<AppState>,
    ctx: AuthenticatedContext,
) -> Result<impl IntoResponse, AppError> {
    let enrollment = state.auth.setup_two_factor(&ctx).await?;
    Ok(Json(ApiResponse::ok(
        "Scan the code with your authenticator app, then verify",
        TwoFactorSetupResponse {
            secret: enrollment.secret,
            provisioning_uri: enrollment.provisioning_uri,
        },
    )))
}

/// Verify a TOTP code
///
/// With a session token this confirms enrolment. With the temporary token
/// from a password login it completes that login.
#[utoipa::path(
    post,
    path = "/auth/2fa/verify",
    request_body = TwoFactorVerifyRequest,
    responses(
        (status = 200, description = "Code accepted", body = TwoFactorVerifyResponse),
        (status = 401, description = "Invalid code or token", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn verify_two_factor(
    State(state): State<AppState>,
    RequestMeta(device): RequestMeta,
    caller: TwoFactorCaller,
    ValidatedJson(req): ValidatedJson<TwoFactorVerifyRequest>,
) -> Result<impl IntoResponse, AppError> {
    match caller {
        TwoFactorCaller::Session(ctx) => {
            state
                .auth
                .confirm_two_factor_setup(&ctx, &req.code, &device)
                .await?;
            Ok(Json(ApiResponse::ok(
                "Two-factor authentication enabled",
                TwoFactorVerifyResponse {
                    two_factor_enabled: true,
                    tokens: None,
                    user: None,
                    session_id: None,
                },
            )))
        }
        TwoFactorCaller::PendingLogin { token } => {
            let established = state
                .auth
                .complete_two_factor_login(&token, &req.code, &device)
                .await?;
            Ok(Json(ApiResponse::ok(
                "Login successful",
                TwoFactorVerifyResponse {
                    two_factor_enabled: true,
                    tokens: Some(established.tokens),
                    user: Some(established.user),
                    session_id: Some(established.session.session_id),
                },
            )))
        }
    }
}

/// Turn two-factor authentication off
#[utoipa::path(
    delete,
    path = "/auth/2fa",
    request_body = TwoFactorDisableRequest,
    responses(
        (status = 200, description = "Two-factor disabled"),
        (status = 401, description = "Wrong password", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn disable_two_factor(
    State(state): State<AppState>,
    RequestMeta(device): RequestMeta,
    ctx: AuthenticatedContext,
    ValidatedJson(req): ValidatedJson<TwoFactorDisableRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .disable_two_factor(&ctx, &req.password, &device)
        .await?;
    Ok(Json(ApiResponse::message(
        "Two-factor authentication disabled",
    )))
}
