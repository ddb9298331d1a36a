//! Generic OpenID Connect authorization-code client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::provider::{OAuthProvider, ProviderError, ProviderToken};
use super::store::{UserField, UserStore};
use crate::config::ProviderConfig;
use crate::models::AuthUser;

/// Response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Standard OIDC userinfo claims plus the common non-standard `phone` key.
#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    #[serde(default)]
    sub: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone_number: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

impl UserInfoResponse {
    fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.preferred_username.clone())
            .unwrap_or_default()
    }

    fn phone(&self) -> String {
        self.phone_number
            .clone()
            .or_else(|| self.phone.clone())
            .unwrap_or_default()
    }
}

pub struct OidcProvider {
    config: ProviderConfig,
    http: reqwest::Client,
    store: Arc<dyn UserStore>,
}

impl OidcProvider {
    pub fn new(
        config: ProviderConfig,
        store: Arc<dyn UserStore>,
        request_timeout: Duration,
    ) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            config,
            http,
            store,
        })
    }

    /// Stored user for these claims: external id first, then phone, then email.
    async fn find_existing(
        &self,
        info: &UserInfoResponse,
        phone: &str,
        email: &str,
    ) -> Result<Option<AuthUser>, ProviderError> {
        let candidates = [
            (UserField::ExternalId, info.sub.as_str()),
            (UserField::Phone, phone),
            (UserField::Email, email),
        ];
        for (field, value) in candidates {
            if value.is_empty() {
                continue;
            }
            if let Some(user) = self.store.find_user_by_field(field, value).await? {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl OAuthProvider for OidcProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn auth_url(&self, state: &str, redirect_uri: &str) -> String {
        let separator = if self.config.auth_url.contains('?') {
            '&'
        } else {
            '?'
        };
        format!(
            "{}{}client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.config.auth_url,
            separator,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.config.scopes),
            urlencoding::encode(state),
        )
    }

    #[tracing::instrument(skip(self, code), fields(provider = %self.config.name))]
    async fn exchange_token(&self, code: &str) -> Result<ProviderToken, ProviderError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                (
                    "client_secret",
                    self.config.client_secret.expose_secret().as_str(),
                ),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("token endpoint: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, error = %error_text, "Token exchange failed");
            return Err(ProviderError::Rejected(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| ProviderError::Transport(format!("parse token response: {}", e)))?;

        Ok(ProviderToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token.unwrap_or_default(),
            token_type: token.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: token.expires_in,
        })
    }

    #[tracing::instrument(skip(self, access_token), fields(provider = %self.config.name))]
    async fn user_info(&self, access_token: &str) -> Result<Option<AuthUser>, ProviderError> {
        let response = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("userinfo endpoint: {}", e)))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                tracing::warn!("Provider refused the access token");
                return Ok(None);
            }
            status if !status.is_success() => {
                return Err(ProviderError::Rejected(format!(
                    "userinfo endpoint returned {}",
                    status
                )));
            }
            _ => {}
        }

        let info = response
            .json::<UserInfoResponse>()
            .await
            .map_err(|e| ProviderError::Transport(format!("parse userinfo response: {}", e)))?;
        if info.sub.is_empty() {
            return Ok(None);
        }

        let phone = info.phone();
        let email = info.email.clone().unwrap_or_default();
        let name = info.display_name();
        let now = Utc::now();

        let user = match self.find_existing(&info, &phone, &email).await? {
            Some(mut user) => {
                if !name.is_empty() {
                    user.name = name;
                }
                if user.external_id.is_empty() {
                    user.external_id = info.sub.clone();
                }
                if user.phone.is_empty() {
                    user.phone = phone;
                }
                if user.email.is_empty() {
                    user.email = email;
                }
                user.access_time = now;
                user
            }
            None => {
                tracing::info!(external_id = %info.sub, "First login for provider account");
                let mut user = AuthUser::new(name, now);
                user.external_id = info.sub.clone();
                user.phone = phone;
                user.email = email;
                user
            }
        };

        Ok(Some(user))
    }

    async fn update(&self, user: &AuthUser) -> Result<(), ProviderError> {
        self.store.upsert_user(user).await?;
        Ok(())
    }

    fn endpoint(&self, internal: bool) -> &str {
        if internal {
            &self.config.internal_endpoint
        } else {
            &self.config.endpoint
        }
    }

    fn issues_raw_tokens(&self) -> bool {
        self.config.issues_raw_tokens
    }
}
