use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::models::{SecurityAuditEvent, SecurityEventType};
use crate::services::AuditFilter;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditEventQuery {
    pub user_id: Option<Uuid>,
    /// e.g. `FAILED_LOGIN`
    #[param(value_type = Option<String>)]
    pub event_type: Option<SecurityEventType>,
    pub ip_address: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Defaults to 100, capped at 1000
    pub limit: Option<i64>,
}

impl From<AuditEventQuery> for AuditFilter {
    fn from(q: AuditEventQuery) -> Self {
        AuditFilter {
            user_id: q.user_id,
            event_type: q.event_type,
            ip_address: q.ip_address,
            from: q.from,
            to: q.to,
            limit: q
                .limit
                .unwrap_or(AuditFilter::DEFAULT_LIMIT)
                .clamp(1, AuditFilter::MAX_LIMIT),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditEventsResponse {
    pub events: Vec<SecurityAuditEvent>,
}
