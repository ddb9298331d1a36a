use std::net::SocketAddr;
use std::sync::Arc;

use oidc_auth::{
    build_router,
    config::GatewayConfig,
    db::{create_pool, run_migrations},
    services::{MemoryUserStore, OidcProvider, PgUserStore, ProviderRegistry, UserStore},
    AppState,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on invalid configuration
    let config = GatewayConfig::from_env()?;

    init_tracing(&config.service_name, &config.log_level);

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting oidc-auth gateway"
    );

    let store: Arc<dyn UserStore> = if config.database.uses_memory_store() {
        tracing::warn!("Using in-memory user store, data is lost on restart");
        Arc::new(MemoryUserStore::new())
    } else {
        let pool = create_pool(&config.database).await?;
        run_migrations(&pool).await?;
        Arc::new(PgUserStore::new(pool))
    };

    let mut providers = ProviderRegistry::new();
    for provider_config in &config.providers {
        let provider =
            OidcProvider::new(provider_config.clone(), store.clone(), config.timeouts.login())
                .map_err(AppError::ConfigError)?;
        providers.register(Arc::new(provider));
    }
    if config.providers.is_empty() {
        tracing::warn!("No OAuth providers configured, every login will be rejected");
    }

    let state = AppState::new(config.clone(), store, providers)?;
    let app = build_router(state)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

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
            Ok(mut stream) => {
                stream.recv().await;
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
