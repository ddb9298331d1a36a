//! Test helpers for oidc-auth integration tests.
//!
//! Builds the full router over the in-memory store, scripted providers and a
//! manually driven clock.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::Utc;
use oidc_auth::{
    build_router,
    config::GatewayConfig,
    models::AuthUser,
    services::{
        FixedClock, MemoryUserStore, MockAccount, MockProvider, ProviderRegistry, UserStore,
    },
    AppState,
};
use service_core::config::Config as CommonConfig;
use tower::util::ServiceExt;

/// Base64 of 32 bytes of 0x07.
pub const TEST_STATE_KEY: &str = "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc=";
pub const CASDOOR_ENDPOINT: &str = "https://casdoor.test";
pub const GITHUB_ENDPOINT: &str = "https://github.test";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryUserStore>,
    /// Hands its own tokens to the plugin.
    pub casdoor: Arc<MockProvider>,
    /// Identity only, never issues plugin tokens.
    pub github: Arc<MockProvider>,
    pub clock: Arc<FixedClock>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::spawn_with(&[])
    }

    /// Spawn with extra configuration keys layered over the defaults.
    pub fn spawn_with(overrides: &[(&str, &str)]) -> Self {
        let mut vars: HashMap<String, String> = [
            ("DATABASE_URL", "memory://"),
            ("STATE_ENCRYPTION_KEY", TEST_STATE_KEY),
            ("BASE_URL", "https://gateway.test"),
            ("LOG_LEVEL", "error"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in overrides {
            vars.insert(k.to_string(), v.to_string());
        }
        let config = GatewayConfig::from_source(CommonConfig::default(), &|key| {
            vars.get(key).cloned()
        })
        .expect("Failed to build test config");

        let store = Arc::new(MemoryUserStore::new());
        let dyn_store = store.clone() as Arc<dyn UserStore>;
        let casdoor = Arc::new(MockProvider::new(
            "casdoor",
            CASDOOR_ENDPOINT,
            true,
            dyn_store.clone(),
        ));
        let github = Arc::new(MockProvider::new(
            "github",
            GITHUB_ENDPOINT,
            false,
            dyn_store.clone(),
        ));
        let providers = ProviderRegistry::new()
            .with(casdoor.clone())
            .with(github.clone());
        let clock = Arc::new(FixedClock::new(Utc::now()));

        let state = AppState::with_clock(config, dyn_store, providers, clock.clone())
            .expect("Failed to build app state");
        let router = build_router(state.clone()).expect("Failed to build router");

        Self {
            router,
            state,
            store,
            casdoor,
            github,
            clock,
        }
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn get_with_bearer(&self, uri: &str, token: &str) -> Response {
        self.send(
            Request::builder()
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Start a plugin login and return the packed state from the provider URL.
    pub async fn start_plugin_login(
        &self,
        provider: &str,
        machine_code: &str,
        state: &str,
        invite_code: &str,
    ) -> String {
        let uri = format!(
            "/oidc-auth/api/v1/plugin/login?provider={}&state={}&machine_code={}\
             &vscode_version=1.90.0&uri_scheme=vscode&plugin_version=1.2.3&invite_code={}",
            provider, state, machine_code, invite_code
        );
        let response = self.get(&uri).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        packed_state(&location(&response))
    }

    /// Run a full plugin login and return the callback response.
    pub async fn plugin_login(
        &self,
        provider: &str,
        machine_code: &str,
        state: &str,
        code: &str,
        invite_code: &str,
    ) -> Response {
        let packed = self
            .start_plugin_login(provider, machine_code, state, invite_code)
            .await;
        self.get(&format!(
            "/oidc-auth/api/v1/plugin/login/callback?code={}&state={}",
            code, packed
        ))
        .await
    }

    pub async fn user_by_external_id(&self, external_id: &str) -> AuthUser {
        self.store
            .find_user_by_field(oidc_auth::services::UserField::ExternalId, external_id)
            .await
            .unwrap()
            .expect("user should exist")
    }

    pub async fn seed_user(&self, name: &str) -> AuthUser {
        let user = AuthUser::new(name, self.clock_now());
        self.store.upsert_user(&user).await.unwrap();
        user
    }

    pub fn clock_now(&self) -> chrono::DateTime<Utc> {
        use oidc_auth::services::Clock;
        self.clock.now()
    }
}

pub fn account(external_id: &str) -> MockAccount {
    MockAccount {
        external_id: external_id.to_string(),
        name: format!("user {}", external_id),
        email: format!("{}@example.com", external_id),
    }
}

pub fn location(response: &Response) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

/// The `state` query value of a provider authorization URL.
pub fn packed_state(auth_url: &str) -> String {
    let query = auth_url.split_once('?').map(|(_, q)| q).unwrap_or_default();
    let raw = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("state="))
        .expect("auth url carries a state");
    urlencoding::decode(raw).unwrap().into_owned()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
