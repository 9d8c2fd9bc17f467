//! Security audit query endpoint.
//!
//! Read-only: the log is append-only and nothing here edits or deletes events.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        audit::{AuditEventQuery, AuditEventsResponse},
        ApiResponse,
    },
    services::AuditFilter,
    AppState,
};

/// List security audit events, newest first.
///
/// GET /auth/admin/audit-events
#[utoipa::path(
    get,
    path = "/auth/admin/audit-events",
    params(AuditEventQuery),
    responses(
        (status = 200, description = "Matching audit events", body = AuditEventsResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Missing read:audit_logs", body = ErrorResponse)
    ),
    tag = "Admin",
    security(
        ("bearer_auth" = [])
    )
)]
#[tracing::instrument(
    skip(state),
    fields(
        user_id = ?query.user_id,
        event_type = ?query.event_type,
        limit = ?query.limit
    )
)]
pub async fn list_audit_events(
    State(state): State<AppState>,
    Query(query): Query<AuditEventQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = AuditFilter::from(query);
    let events = state.auth.query_audit(&filter).await?;
    tracing::debug!(count = events.len(), "Audit events retrieved");
    Ok(Json(ApiResponse::ok(
        "Audit events retrieved",
        AuditEventsResponse { events },
    )))
}
