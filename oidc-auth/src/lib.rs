pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use secrecy::ExposeSecret;
use service_core::axum::{
    http::{header, HeaderValue, Method, Request},
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::services::{
    Clock, InviteCodeService, LoginOrchestrator, ProviderRegistry, StateCarrier, SystemClock,
    UserStore,
};

pub const API_PREFIX: &str = "/oidc-auth/api/v1";

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub store: Arc<dyn UserStore>,
    pub login: Arc<LoginOrchestrator>,
    pub invites: Arc<InviteCodeService>,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn UserStore>,
        providers: ProviderRegistry,
    ) -> Result<Self, AppError> {
        Self::with_clock(config, store, providers, Arc::new(SystemClock))
    }

    /// Wire the services around `store`, reading time from `clock`.
    pub fn with_clock(
        config: GatewayConfig,
        store: Arc<dyn UserStore>,
        providers: ProviderRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        let carrier =
            StateCarrier::from_base64(config.state_carrier.encryption_key.expose_secret())
                .map_err(AppError::ConfigError)?;

        let invites = Arc::new(
            InviteCodeService::new(store.clone(), config.invite.clone()).with_clock(clock.clone()),
        );
        let login = Arc::new(
            LoginOrchestrator::new(
                providers,
                carrier,
                store.clone(),
                invites.clone(),
                &config.base_url,
                config.timeouts.clone(),
            )
            .with_clock(clock),
        );

        Ok(Self {
            config,
            store,
            login,
            invites,
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("service_name", &self.config.service_name)
            .finish_non_exhaustive()
    }
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, AppError> {
    let allow_origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins = allowed_origins
            .iter()
            .map(|o| {
                o.parse::<HeaderValue>().map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!("Invalid CORS origin '{}': {}", o, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let cors = cors_layer(&state.config.security.allowed_origins)?;

    let api = Router::new()
        .route("/plugin/login", get(handlers::plugin_login))
        .route("/plugin/login/callback", get(handlers::login_callback))
        .route("/plugin/login/status", get(handlers::login_status))
        .route("/plugin/login/token", get(handlers::login_token))
        .route("/plugin/login/logout", get(handlers::logout))
        .route("/manager/login", get(handlers::web_login))
        .route("/manager/login/callback", get(handlers::login_callback))
        .route("/manager/invite-code", get(handlers::my_invite_code))
        .route("/invite/generate", post(handlers::generate_invite_code))
        .route("/invite/list", get(handlers::list_invite_codes));

    let app = Router::new()
        .nest(API_PREFIX, api)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                // Only the path: the query carries login state and codes.
                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors);

    Ok(app)
}
