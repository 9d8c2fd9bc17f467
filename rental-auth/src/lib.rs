pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use service_core::axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::config::AuthConfig;
use crate::middleware::DEVICE_ID_HEADER;
use crate::services::{
    AccountSettings, AuditRepository, AuditSettings, AuthService, Clock, MfaEngine,
    NotificationDispatcher, PolicyTable, RateLimiter, RbacEvaluator, SecurityAuditLog,
    SecurityNotifier, SessionRegistry, SharedStore, TokenService, UserRepository,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::registration::register,
        handlers::auth::registration::verify_email,
        handlers::auth::session::login,
        handlers::auth::session::logout,
        handlers::auth::session::refresh_token,
        handlers::auth::password::forgot_password,
        handlers::auth::password::reset_password,
        handlers::auth::password::change_password,
        handlers::auth::two_factor::setup_two_factor,
        handlers::auth::two_factor::verify_two_factor,
        handlers::auth::two_factor::disable_two_factor,
        handlers::sessions::list_sessions,
        handlers::sessions::revoke_session,
        handlers::user::get_me,
        handlers::user::delete_account,
        handlers::audit::list_audit_events,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::RegisterResponse,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            dtos::auth::TokenResponse,
            dtos::auth::RefreshRequest,
            dtos::auth::ForgotPasswordRequest,
            dtos::auth::ResetPasswordRequest,
            dtos::auth::ChangePasswordRequest,
            dtos::auth::DeleteAccountRequest,
            dtos::session::SessionListResponse,
            dtos::session::TwoFactorSetupResponse,
            dtos::session::TwoFactorVerifyRequest,
            dtos::session::TwoFactorVerifyResponse,
            dtos::session::TwoFactorDisableRequest,
            dtos::audit::AuditEventsResponse,
            models::Role,
            models::UserResponse,
            models::SessionInfo,
            models::SecurityAuditEvent,
            models::SecurityEventType,
            models::Severity,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Registration, login and token management"),
        (name = "Two-Factor", description = "TOTP enrolment and verification"),
        (name = "Sessions", description = "Device session management"),
        (name = "User", description = "Account profile and lifecycle"),
        (name = "Admin", description = "Security audit access"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthConfig>,
    pub auth: AuthService,
    pub tokens: TokenService,
    pub sessions: SessionRegistry,
    pub limiter: RateLimiter,
    pub rbac: Arc<RbacEvaluator>,
    pub audit: SecurityAuditLog,
    pub notifications: NotificationDispatcher,
    pub users: Arc<dyn UserRepository>,
    pub store: Arc<dyn SharedStore>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wire every engine from configuration and the injected collaborators.
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserRepository>,
        audit_repo: Arc<dyn AuditRepository>,
        store: Arc<dyn SharedStore>,
        notifier: Arc<dyn SecurityNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let audit = SecurityAuditLog::new(
            audit_repo,
            store.clone(),
            clock.clone(),
            AuditSettings::from_config(&config.audit),
        );
        let limiter = RateLimiter::new(
            store.clone(),
            clock.clone(),
            PolicyTable::from_config(&config.rate_limit),
            audit.clone(),
        );
        let tokens = TokenService::new(&config.jwt, store.clone(), clock.clone());
        let sessions = SessionRegistry::new(
            store.clone(),
            tokens.clone(),
            clock.clone(),
            config.session.max_sessions_per_user,
        );
        let mfa = MfaEngine::new(
            users.clone(),
            store.clone(),
            limiter.clone(),
            clock.clone(),
            &config.mfa,
        );
        let notifications =
            NotificationDispatcher::new(notifier, config.account.public_base_url.clone());
        let auth = AuthService::new(
            users.clone(),
            store.clone(),
            tokens.clone(),
            sessions.clone(),
            mfa,
            audit.clone(),
            notifications.clone(),
            clock.clone(),
            AccountSettings::from_config(&config.account),
        );

        Self {
            config: Arc::new(config),
            auth,
            tokens,
            sessions,
            limiter,
            rbac: Arc::new(RbacEvaluator::default()),
            audit,
            notifications,
            users,
            store,
            clock,
        }
    }

    /// Wait for queued audit writes and notifications.
    pub async fn flush(&self) {
        self.audit.flush().await;
        self.notifications.flush().await;
    }
}

fn cors_layer(config: &AuthConfig) -> CorsLayer {
    let origins = config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(origin) => Some(origin),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Invalid CORS origin, skipping");
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static(DEVICE_ID_HEADER),
        ])
        .expose_headers([
            header::RETRY_AFTER,
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
        ])
}

pub fn build_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/me", get(handlers::get_me))
        .route("/auth/change-password", post(handlers::change_password))
        .route("/auth/account", delete(handlers::delete_account))
        .route("/auth/2fa/setup", post(handlers::setup_two_factor))
        .route("/auth/2fa", delete(handlers::disable_two_factor))
        .route("/auth/sessions", get(handlers::list_sessions))
        .route("/auth/sessions/:session_id", delete(handlers::revoke_session))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    // Permission check runs after authentication: the last layer added runs first.
    let admin_routes = Router::new()
        .route(
            "/auth/admin/audit-events",
            get(handlers::list_audit_events),
        )
        .route_layer(from_fn_with_state(
            middleware::require_permission(state.rbac.clone(), "read", "audit_logs"),
            middleware::permission_middleware,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let api_routes = Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/verify-email/:token", get(handlers::verify_email))
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh-token", post(handlers::refresh_token))
        .route("/auth/forgot-password", post(handlers::forgot_password))
        .route(
            "/auth/reset-password/:token",
            post(handlers::reset_password),
        )
        .route("/auth/2fa/verify", post(handlers::verify_two_factor))
        .merge(protected_routes)
        .merge(admin_routes)
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ));

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .merge(api_routes)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.users.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Credential store health check failed");
        AppError::ServiceUnavailable
    })?;

    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Shared store health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "database": "up",
            "store": "up"
        }
    })))
}
