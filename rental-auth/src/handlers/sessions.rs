use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{session::SessionListResponse, ApiResponse},
    middleware::{AuthenticatedContext, RequestMeta},
    AppState,
};

/// List the caller's active sessions, most recent first
#[utoipa::path(
    get,
    path = "/auth/sessions",
    responses(
        (status = 200, description = "Active sessions", body = SessionListResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "Sessions",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    ctx: AuthenticatedContext,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state.auth.list_sessions(&ctx).await?;
    Ok(Json(ApiResponse::ok(
        "Sessions retrieved",
        SessionListResponse { sessions },
    )))
}

/// Sign out one of the caller's sessions
#[utoipa::path(
    delete,
    path = "/auth/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session to revoke")),
    responses(
        (status = 200, description = "Session revoked"),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "No such session for this user", body = ErrorResponse)
    ),
    tag = "Sessions",
    security(
        ("bearer_auth" = [])
    )
)]
#[tracing::instrument(skip(state, device, ctx), fields(user_id = %ctx.user_id))]
pub async fn revoke_session(
    State(state): State<AppState>,
    RequestMeta(device): RequestMeta,
    ctx: AuthenticatedContext,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.revoke_session(&ctx, session_id, &device).await?;
    Ok(Json(ApiResponse::message("Session revoked")))
}
