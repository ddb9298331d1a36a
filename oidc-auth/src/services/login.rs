//! Login orchestration: authorization redirect, callback handling, device
//! session reconciliation, token hand-off, logout and invite redemption.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::clock::{Clock, SystemClock};
use super::invite_code::InviteCodeService;
use super::provider::{OAuthProvider, ProviderRegistry, ProviderToken};
use super::state_carrier::{ParameterCarrier, StateCarrier};
use super::store::{TokenHashField, UserStore};
use super::ServiceError;
use crate::config::TimeoutConfig;
use crate::models::{
    AuthUser, Device, DeviceStatus, Fingerprint, Platform, TOKEN_PROVIDER_CUSTOM,
    TOKEN_PROVIDER_GATEWAY,
};
use crate::utils::{generate_token, hash_token};

pub const PLUGIN_CALLBACK_PATH: &str = "/oidc-auth/api/v1/plugin/login/callback";
pub const WEB_CALLBACK_PATH: &str = "/oidc-auth/api/v1/manager/login/callback";

/// Provider page shown to the plugin user once the login completed.
pub const LOGIN_SUCCESS_PATH: &str = "/login/success";
/// Provider page where a web user binds further accounts.
pub const BIND_ACCOUNT_PATH: &str = "/bind/account";

/// Query parameters of a login request.
#[derive(Debug, Clone, Default)]
pub struct LoginParams {
    pub provider: String,
    pub state: String,
    pub machine_code: String,
    pub vscode_version: String,
    pub uri_scheme: String,
    pub plugin_version: String,
    pub invite_code: String,
}

impl LoginParams {
    fn validate(&self, platform: Platform) -> Result<(), ServiceError> {
        if self.state.is_empty() {
            return Err(ServiceError::BadRequestParam("state is required".to_string()));
        }
        if platform == Platform::Plugin {
            if self.vscode_version.is_empty() {
                return Err(ServiceError::BadRequestParam(
                    "vscode_version is required".to_string(),
                ));
            }
            if self.machine_code.is_empty() {
                return Err(ServiceError::BadRequestParam(
                    "machine_code is required".to_string(),
                ));
            }
        }
        if self.provider.is_empty() {
            return Err(ServiceError::BadRequestParam(
                "provider is required, such as casdoor".to_string(),
            ));
        }
        Ok(())
    }
}

/// Progress of a plugin login, polled by the client using its state value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatusView {
    pub state: String,
    pub status: DeviceStatus,
    pub token_ready: bool,
    pub updated_at: DateTime<Utc>,
}

/// Session tokens handed to the plugin once its login completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceTokenView {
    pub state: String,
    pub access_token: String,
    pub refresh_token: String,
}

pub struct LoginOrchestrator {
    providers: ProviderRegistry,
    carrier: StateCarrier,
    store: Arc<dyn UserStore>,
    invites: Arc<InviteCodeService>,
    clock: Arc<dyn Clock>,
    base_url: String,
    timeouts: TimeoutConfig,
}

impl LoginOrchestrator {
    pub fn new(
        providers: ProviderRegistry,
        carrier: StateCarrier,
        store: Arc<dyn UserStore>,
        invites: Arc<InviteCodeService>,
        base_url: &str,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            providers,
            carrier,
            store,
            invites,
            clock: Arc::new(SystemClock),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeouts,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn carrier(&self) -> &StateCarrier {
        &self.carrier
    }

    fn provider(&self, name: &str) -> Result<Arc<dyn OAuthProvider>, ServiceError> {
        self.providers.get(name).ok_or_else(|| {
            ServiceError::BadRequestParam(format!("login method {} is not supported", name))
        })
    }

    /// Build the provider authorization URL for a login started on `platform`.
    #[tracing::instrument(skip(self, params), fields(platform = platform.as_str(), provider = %params.provider))]
    pub fn login(&self, platform: Platform, params: LoginParams) -> Result<String, ServiceError> {
        params.validate(platform)?;
        let provider = self.provider(&params.provider)?;

        let packed = self.carrier.pack(&ParameterCarrier {
            provider: params.provider,
            platform: platform.as_str().to_string(),
            machine_code: params.machine_code,
            vscode_version: params.vscode_version,
            uri_scheme: params.uri_scheme,
            plugin_version: params.plugin_version,
            state: params.state,
            invite_code: params.invite_code,
        })?;

        let callback_path = match platform {
            Platform::Plugin => PLUGIN_CALLBACK_PATH,
            Platform::Web => WEB_CALLBACK_PATH,
        };
        let redirect_uri = format!("{}{}", self.base_url, callback_path);
        Ok(provider.auth_url(&packed, &redirect_uri))
    }

    /// Complete a login from the provider callback and return the URL the
    /// browser is sent to.
    #[tracing::instrument(skip_all)]
    pub async fn callback(&self, code: &str, encrypted_state: &str) -> Result<String, ServiceError> {
        if code.is_empty() {
            return Err(ServiceError::BadRequestParam("code is required".to_string()));
        }
        if encrypted_state.is_empty() {
            return Err(ServiceError::DataDecryption("state is required".to_string()));
        }

        let params = self.carrier.unpack(encrypted_state)?;
        if params.state.is_empty() {
            return Err(ServiceError::DataDecryption(
                "state is missing from the carried parameters".to_string(),
            ));
        }
        let provider = self.provider(&params.provider)?;
        let platform: Platform = params
            .platform
            .parse()
            .map_err(ServiceError::BadRequestParam)?;

        tracing::info!(
            provider = %params.provider,
            platform = platform.as_str(),
            "Handling login callback"
        );

        tokio::time::timeout(
            self.timeouts.login(),
            self.complete(provider, platform, code, params),
        )
        .await
        .map_err(|_| {
            tracing::error!("Login callback timed out");
            ServiceError::Upstream(format!(
                "login callback exceeded {}s",
                self.timeouts.login_seconds
            ))
        })?
    }

    async fn complete(
        &self,
        provider: Arc<dyn OAuthProvider>,
        platform: Platform,
        code: &str,
        params: ParameterCarrier,
    ) -> Result<String, ServiceError> {
        let fingerprint = Fingerprint::new(&params.machine_code, &params.vscode_version);
        if platform == Platform::Plugin {
            self.squeeze_out(&fingerprint).await?;
        }

        let token = provider
            .exchange_token(code)
            .await
            .map_err(|e| ServiceError::UserNotFound(format!("failed to exchange token: {}", e)))?;
        let mut user = provider
            .user_info(&token.access_token)
            .await
            .map_err(|e| ServiceError::UserNotFound(format!("failed to query user info: {}", e)))?
            .ok_or_else(|| {
                ServiceError::TokenInvalid("provider returned no user for the token".to_string())
            })?;

        let now = self.clock.now();
        if platform == Platform::Plugin {
            let device = self.new_device(provider.as_ref(), fingerprint, &params, &token, now);
            user.devices.push(device);
        }
        user.updated_at = now;
        user.access_time = now;

        provider.update(&user).await.map_err(|e| {
            tracing::error!(user_id = %user.id, error = %e, "Failed to persist user");
            ServiceError::UpdateInfo(e.to_string())
        })?;

        if !params.invite_code.is_empty() {
            self.redeem_invite(provider.as_ref(), &params.invite_code, &mut user)
                .await;
        }

        let path = match platform {
            Platform::Plugin => LOGIN_SUCCESS_PATH,
            Platform::Web => BIND_ACCOUNT_PATH,
        };
        tracing::info!(user_id = %user.id, platform = platform.as_str(), "Login completed");
        Ok(format!("{}{}", provider.endpoint(false), path))
    }

    /// Redeem `code` for the freshly persisted `user`. Every failure is
    /// logged and absorbed. When the inviter link cannot be persisted the
    /// usage row is removed again so the user keeps their redemption.
    async fn redeem_invite(&self, provider: &dyn OAuthProvider, code: &str, user: &mut AuthUser) {
        let user_id = user.id;
        let inviter_before = user.inviter_id;
        let usage = match self.invites.validate_and_redeem(code, user_id, user).await {
            Ok(usage) => usage,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    invite_code = %code,
                    error = %e,
                    "Failed to process invite code, continuing login"
                );
                return;
            }
        };
        if user.inviter_id == inviter_before {
            return;
        }

        if let Err(e) = provider.update(user).await {
            tracing::warn!(
                user_id = %user_id,
                invite_code = %code,
                error = %e,
                "Failed to persist inviter, reverting redemption"
            );
            user.inviter_id = inviter_before;
            if let Err(e) = self.store.delete_invite_code_usage(usage.id).await {
                tracing::error!(
                    user_id = %user_id,
                    usage_id = %usage.id,
                    error = %e,
                    "Failed to revert invite code redemption"
                );
            }
        }
    }

    /// Log off every session on `fingerprint`, whoever owns it, so the login
    /// in progress becomes the only one.
    async fn squeeze_out(&self, fingerprint: &Fingerprint) -> Result<(), ServiceError> {
        let owners = self
            .store
            .find_users_by_device(fingerprint)
            .await
            .map_err(|e| ServiceError::UserNotFound(format!("failed to query user info: {}", e)))?;

        let now = self.clock.now();
        for mut user in owners {
            let mut squeezed = 0;
            for device in user
                .devices
                .iter_mut()
                .filter(|d| fingerprint.matches(d) && d.holds_session())
            {
                device.squeeze_out(now);
                squeezed += 1;
            }
            if squeezed == 0 {
                return Err(ServiceError::UserNotFound(
                    "device lookup returned a user without the device".to_string(),
                ));
            }
            user.updated_at = now;

            self.store.upsert_user(&user).await.map_err(|e| {
                ServiceError::UpdateInfo(format!("failed to update login user information: {}", e))
            })?;
            tracing::info!(
                user_id = %user.id,
                machine_code = %fingerprint.machine_code,
                devices = squeezed,
                "Squeezed out previous session on device"
            );
        }
        Ok(())
    }

    fn new_device(
        &self,
        provider: &dyn OAuthProvider,
        fingerprint: Fingerprint,
        params: &ParameterCarrier,
        token: &ProviderToken,
        now: DateTime<Utc>,
    ) -> Device {
        let mut device = Device::new(fingerprint, provider.name(), now);
        device.uri_scheme = params.uri_scheme.clone();
        device.plugin_version = params.plugin_version.clone();
        device.state = params.state.clone();

        if provider.issues_raw_tokens() {
            if !token.access_token.is_empty() {
                device.access_token = token.access_token.clone();
                device.access_token_hash = hash_token(&token.access_token);
            }
            if !token.refresh_token.is_empty() {
                device.refresh_token = token.refresh_token.clone();
                device.refresh_token_hash = hash_token(&token.refresh_token);
            }
            device.token_provider = TOKEN_PROVIDER_CUSTOM.to_string();
        }
        device
    }

    /// Status of the device created by the login identified by `state`.
    pub async fn status(
        &self,
        state: &str,
        machine_code: &str,
    ) -> Result<DeviceStatusView, ServiceError> {
        if state.is_empty() {
            return Err(ServiceError::BadRequestParam("state is required".to_string()));
        }
        if machine_code.is_empty() {
            return Err(ServiceError::BadRequestParam(
                "machine_code is required".to_string(),
            ));
        }

        let user = self
            .store
            .find_user_by_device_state(state)
            .await?
            .ok_or_else(|| ServiceError::UserNotFound("no login for this state".to_string()))?;
        let device = user
            .find_device_by_state(state)
            .filter(|d| d.machine_code == machine_code)
            .ok_or_else(|| ServiceError::UserNotFound("no login for this state".to_string()))?;

        Ok(DeviceStatusView {
            state: device.state.clone(),
            status: device.status,
            token_ready: device.status != DeviceStatus::LoggedOffline,
            updated_at: device.updated_at,
        })
    }

    /// Hand the session tokens of the login identified by `state` to the
    /// plugin. Providers without raw tokens get gateway-minted ones here. The
    /// device moves to `logged_in` and the state is consumed.
    #[tracing::instrument(skip_all)]
    pub async fn token(
        &self,
        state: &str,
        machine_code: &str,
    ) -> Result<DeviceTokenView, ServiceError> {
        if state.is_empty() {
            return Err(ServiceError::BadRequestParam("state is required".to_string()));
        }
        if machine_code.is_empty() {
            return Err(ServiceError::BadRequestParam(
                "machine_code is required".to_string(),
            ));
        }

        self.within_lookup_timeout("token lookup", self.hand_out_tokens(state, machine_code))
            .await
    }

    async fn hand_out_tokens(
        &self,
        state: &str,
        machine_code: &str,
    ) -> Result<DeviceTokenView, ServiceError> {
        let mut user = self
            .store
            .find_user_by_device_state(state)
            .await?
            .ok_or_else(|| ServiceError::UserNotFound("no login for this state".to_string()))?;

        let now = self.clock.now();
        let device = user
            .devices
            .iter_mut()
            .find(|d| d.state == state && d.machine_code == machine_code)
            .ok_or_else(|| ServiceError::UserNotFound("no login for this state".to_string()))?;
        if device.status == DeviceStatus::LoggedOffline {
            return Err(ServiceError::TokenInvalid(
                "session was taken over by another login".to_string(),
            ));
        }

        if device.access_token.is_empty() {
            let access_token = generate_token();
            let refresh_token = generate_token();
            device.access_token_hash = hash_token(&access_token);
            device.refresh_token_hash = hash_token(&refresh_token);
            device.access_token = access_token;
            device.refresh_token = refresh_token;
            device.token_provider = TOKEN_PROVIDER_GATEWAY.to_string();
        }
        let view = DeviceTokenView {
            state: state.to_string(),
            access_token: device.access_token.clone(),
            refresh_token: device.refresh_token.clone(),
        };
        device.log_in(now);
        user.updated_at = now;

        self.store.upsert_user(&user).await.map_err(|e| {
            ServiceError::UpdateInfo(format!("failed to store device tokens: {}", e))
        })?;
        tracing::info!(user_id = %user.id, machine_code = %machine_code, "Handed out device tokens");
        Ok(view)
    }

    /// End the device session authenticated by `access_token`.
    #[tracing::instrument(skip_all)]
    pub async fn logout(&self, access_token: &str) -> Result<(), ServiceError> {
        if access_token.is_empty() {
            return Err(ServiceError::TokenInvalid("access token is required".to_string()));
        }
        let hash = hash_token(access_token);

        self.within_lookup_timeout("logout", self.end_session(&hash))
            .await
    }

    async fn end_session(&self, access_token_hash: &str) -> Result<(), ServiceError> {
        let mut user = self
            .store
            .find_user_by_token_hash(TokenHashField::AccessTokenHash, access_token_hash)
            .await?
            .ok_or_else(|| ServiceError::TokenInvalid("no session for this token".to_string()))?;

        let now = self.clock.now();
        let device = user
            .devices
            .iter_mut()
            .find(|d| d.access_token_hash == access_token_hash)
            .ok_or_else(|| ServiceError::TokenInvalid("no session for this token".to_string()))?;
        device.log_out(now);
        user.updated_at = now;

        self.store.upsert_user(&user).await.map_err(|e| {
            ServiceError::UpdateInfo(format!("failed to log out device: {}", e))
        })?;
        tracing::info!(user_id = %user.id, "Logged out device");
        Ok(())
    }

    /// The caller's own invite code, issued on first request.
    #[tracing::instrument(skip_all)]
    pub async fn my_invite_code(&self, access_token: &str) -> Result<String, ServiceError> {
        if access_token.is_empty() {
            return Err(ServiceError::TokenInvalid("access token is required".to_string()));
        }
        let hash = hash_token(access_token);

        self.within_lookup_timeout("invite code lookup", self.own_invite_code(&hash))
            .await
    }

    async fn within_lookup_timeout<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        tokio::time::timeout(self.timeouts.lookup(), fut)
            .await
            .map_err(|_| {
                ServiceError::Upstream(format!(
                    "{} exceeded {}s",
                    what, self.timeouts.lookup_seconds
                ))
            })?
    }

    async fn own_invite_code(&self, access_token_hash: &str) -> Result<String, ServiceError> {
        let mut user: AuthUser = self
            .store
            .find_user_by_token_hash(TokenHashField::AccessTokenHash, access_token_hash)
            .await
            .map_err(|e| ServiceError::UserNotFound(e.to_string()))?
            .ok_or_else(|| ServiceError::UserNotFound("no session for this token".to_string()))?;

        if let Some(code) = user.invite_code.as_ref().filter(|c| !c.is_empty()) {
            return Ok(code.clone());
        }

        let code = self.invites.generate(user.id).await?;
        user.invite_code = Some(code.code.clone());
        user.updated_at = self.clock.now();
        self.store.upsert_user(&user).await.map_err(|e| {
            ServiceError::UpdateInfo(format!("failed to update invite code: {}", e))
        })?;

        tracing::info!(user_id = %user.id, "Issued own invite code");
        Ok(code.code)
    }
}
