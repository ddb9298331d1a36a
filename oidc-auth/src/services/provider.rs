//! Upstream identity provider abstraction and name-based registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use super::store::{StoreError, UserField, UserStore};
use crate::models::AuthUser;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    Transport(String),

    #[error("Provider rejected the request: {0}")]
    Rejected(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Tokens returned by the provider's token endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderToken {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: Option<i64>,
}

/// Authorization-code client for one upstream provider.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Authorization URL seeded with `state` that returns to `redirect_uri`.
    fn auth_url(&self, state: &str, redirect_uri: &str) -> String;

    async fn exchange_token(&self, code: &str) -> Result<ProviderToken, ProviderError>;

    /// Resolve the account behind `access_token`, merged onto the stored user
    /// when one already exists. `None` means the provider returned no account.
    async fn user_info(&self, access_token: &str) -> Result<Option<AuthUser>, ProviderError>;

    /// Persist the resolved user.
    async fn update(&self, user: &AuthUser) -> Result<(), ProviderError>;

    /// Base URL of the provider's pages, browser-facing unless `internal`.
    fn endpoint(&self, internal: bool) -> &str;

    /// Whether the provider's own access/refresh tokens are handed to the
    /// plugin as its session tokens.
    fn issues_raw_tokens(&self) -> bool;
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn OAuthProvider>) {
        tracing::info!(provider = %provider.name(), "Registered OAuth provider");
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn OAuthProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn OAuthProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

/// Account the mock provider hands out for one authorization code.
#[derive(Debug, Clone, Default)]
pub struct MockAccount {
    pub external_id: String,
    pub name: String,
    pub email: String,
}

/// Scripted provider for tests and local runs. Authorization codes are
/// registered up front; `exchange_token` issues `at-<code>` / `rt-<code>`.
pub struct MockProvider {
    name: String,
    endpoint: String,
    raw_tokens: bool,
    store: Arc<dyn UserStore>,
    accounts: Mutex<HashMap<String, MockAccount>>,
    delay: Mutex<Option<Duration>>,
    update_limit: Mutex<Option<usize>>,
    pub fail_update: AtomicBool,
    pub exchange_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: &str, endpoint: &str, raw_tokens: bool, store: Arc<dyn UserStore>) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            raw_tokens,
            store,
            accounts: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            update_limit: Mutex::new(None),
            fail_update: AtomicBool::new(false),
            exchange_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }

    /// Make `code` exchangeable for `account`.
    pub fn add_code(&self, code: &str, account: MockAccount) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.insert(code.to_string(), account);
        }
    }

    /// Delay every token exchange by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut guard) = self.delay.lock() {
            *guard = Some(delay);
        }
    }

    /// Let the next `allowed` updates through and reject every one after.
    pub fn fail_updates_after(&self, allowed: usize) {
        if let Ok(mut guard) = self.update_limit.lock() {
            *guard = Some(self.update_calls.load(Ordering::SeqCst) + allowed);
        }
    }

    fn account_for_code(&self, code: &str) -> Result<Option<MockAccount>, ProviderError> {
        let accounts = self
            .accounts
            .lock()
            .map_err(|e| ProviderError::Transport(format!("Mock provider mutex poisoned: {}", e)))?;
        Ok(accounts.get(code).cloned())
    }
}

#[async_trait]
impl OAuthProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn auth_url(&self, state: &str, redirect_uri: &str) -> String {
        format!(
            "{}/login/oauth/authorize?redirect_uri={}&state={}",
            self.endpoint,
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state)
        )
    }

    async fn exchange_token(&self, code: &str) -> Result<ProviderToken, ProviderError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay.lock().map(|d| *d).unwrap_or(None);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.account_for_code(code)?.is_none() {
            return Err(ProviderError::Rejected(format!("unknown code {}", code)));
        }
        Ok(ProviderToken {
            access_token: format!("at-{}", code),
            refresh_token: format!("rt-{}", code),
            token_type: "Bearer".to_string(),
            expires_in: Some(3600),
        })
    }

    async fn user_info(&self, access_token: &str) -> Result<Option<AuthUser>, ProviderError> {
        let Some(code) = access_token.strip_prefix("at-") else {
            return Ok(None);
        };
        let Some(account) = self.account_for_code(code)? else {
            return Ok(None);
        };

        let existing = self
            .store
            .find_user_by_field(UserField::ExternalId, &account.external_id)
            .await?;
        let user = match existing {
            Some(mut user) => {
                user.access_time = Utc::now();
                user
            }
            None => {
                let mut user = AuthUser::new(account.name, Utc::now());
                user.external_id = account.external_id;
                user.email = account.email;
                user
            }
        };
        Ok(Some(user))
    }

    async fn update(&self, user: &AuthUser) -> Result<(), ProviderError> {
        let call = self.update_calls.fetch_add(1, Ordering::SeqCst);
        let over_limit = self
            .update_limit
            .lock()
            .map_err(|e| ProviderError::Transport(format!("Mock provider mutex poisoned: {}", e)))?
            .is_some_and(|limit| call >= limit);
        if over_limit || self.fail_update.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("update rejected".to_string()));
        }
        self.store.upsert_user(user).await?;
        Ok(())
    }

    fn endpoint(&self, _internal: bool) -> &str {
        &self.endpoint
    }

    fn issues_raw_tokens(&self) -> bool {
        self.raw_tokens
    }
}
