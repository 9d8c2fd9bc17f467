use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use super::auth::AuthenticatedContext;
use crate::services::RbacEvaluator;

/// Permission a route requires, carried as the state of [`permission_middleware`].
#[derive(Clone)]
pub struct RequiredPermission {
    pub action: &'static str,
    pub resource: &'static str,
    rbac: Arc<RbacEvaluator>,
}

pub fn require_permission(
    rbac: Arc<RbacEvaluator>,
    action: &'static str,
    resource: &'static str,
) -> RequiredPermission {
    RequiredPermission {
        action,
        resource,
        rbac,
    }
}

/// Must run after [`super::auth_middleware`].
pub async fn permission_middleware(
    State(required): State<RequiredPermission>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = req
        .extensions()
        .get::<AuthenticatedContext>()
        .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("no authenticated context")))?;

    if !required
        .rbac
        .has_permission(context.role, required.action, required.resource)
    {
        tracing::warn!(
            user_id = %context.user_id,
            role = context.role.as_str(),
            action = required.action,
            resource = required.resource,
            "Permission denied"
        );
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Insufficient permissions. Required: {}:{}",
            required.action,
            required.resource
        )));
    }

    Ok(next.run(req).await)
}
