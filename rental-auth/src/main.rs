use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rental_auth::{
    build_router,
    config::AuthConfig,
    db,
    services::{
        self, Database, NoopNotifier, NotificationClient, RedisStore, SecurityNotifier,
        SystemClock,
    },
    AppState,
};
use service_core::error::{set_production_mode, AppError};
use service_core::observability::{init_metrics, init_tracing};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )
    .map_err(AppError::ConfigError)?;

    init_metrics();
    services::metrics::describe_metrics();
    set_production_mode(config.is_production());

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting authentication service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Database connection failed: {}", e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Migrations failed: {}", e)))?;
    let database = Arc::new(Database::new(pool));
    tracing::info!("Database initialized successfully");

    let store = Arc::new(RedisStore::new(&config.redis).await?);
    tracing::info!("Shared store initialized");

    let notifier: Arc<dyn SecurityNotifier> = if config.notification.enabled {
        Arc::new(NotificationClient::new(&config.notification)?)
    } else {
        tracing::warn!("Notification delivery disabled; security emails will not be sent");
        Arc::new(NoopNotifier)
    };

    let shutdown_grace = Duration::from_secs(config.common.shutdown_grace_seconds);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );

    let state = AppState::new(
        config,
        database.clone(),
        database,
        store,
        notifier,
        Arc::new(SystemClock),
    );
    let app = build_router(state.clone());

    let _guard = service_span.enter();
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Audit events and notifications are written in the background; give them
    // a bounded window to drain.
    if tokio::time::timeout(shutdown_grace, state.flush()).await.is_err() {
        tracing::warn!(
            grace_seconds = shutdown_grace.as_secs(),
            "Background work did not drain before shutdown"
        );
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
