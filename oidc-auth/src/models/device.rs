//! Device model - one entry per (user, plugin installation) pairing.
//!
//! Devices live inside the owning [`AuthUser`](super::AuthUser) record and are
//! never stored on their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a device session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Device registered but no token has been handed to the client yet.
    #[default]
    LoggedOut,
    LoggedIn,
    /// Squeezed out by a newer login carrying the same fingerprint.
    LoggedOffline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::LoggedOut => "logged_out",
            DeviceStatus::LoggedIn => "logged_in",
            DeviceStatus::LoggedOffline => "logged_offline",
        }
    }
}

/// Client surface a login was started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Plugin,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Plugin => "plugin",
            Platform::Web => "web",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plugin" => Ok(Platform::Plugin),
            "web" => Ok(Platform::Web),
            _ => Err(format!("Invalid platform: {}", s)),
        }
    }
}

/// Identifies one plugin installation: (machine identifier, editor version).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    pub machine_code: String,
    pub vscode_version: String,
}

impl Fingerprint {
    pub fn new(machine_code: impl Into<String>, vscode_version: impl Into<String>) -> Self {
        Self {
            machine_code: machine_code.into(),
            vscode_version: vscode_version.into(),
        }
    }

    pub fn matches(&self, device: &Device) -> bool {
        device.machine_code == self.machine_code && device.vscode_version == self.vscode_version
    }
}

/// Marks tokens that were issued by the provider itself rather than by a
/// later token-issuance step of this service.
pub const TOKEN_PROVIDER_CUSTOM: &str = "custom";
/// Marks tokens minted by this service at the token step.
pub const TOKEN_PROVIDER_GATEWAY: &str = "gateway";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub machine_code: String,
    pub vscode_version: String,
    #[serde(default)]
    pub plugin_version: String,
    #[serde(default)]
    pub uri_scheme: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub access_token_hash: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub refresh_token_hash: String,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub token_provider: String,
}

impl Device {
    /// Create a plugin device for a fresh login.
    pub fn new(fingerprint: Fingerprint, provider: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            machine_code: fingerprint.machine_code,
            vscode_version: fingerprint.vscode_version,
            provider: provider.to_string(),
            platform: Platform::Plugin.as_str().to_string(),
            status: DeviceStatus::LoggedOut,
            ..Default::default()
        }
    }

    /// Whether this entry still carries a usable session.
    pub fn has_live_tokens(&self) -> bool {
        !self.access_token.is_empty()
            || !self.access_token_hash.is_empty()
            || !self.refresh_token.is_empty()
            || !self.refresh_token_hash.is_empty()
    }

    /// Whether this entry still takes part in a session: a pending login
    /// (transient state set) or issued tokens, and not squeezed out.
    pub fn holds_session(&self) -> bool {
        self.status != DeviceStatus::LoggedOffline
            && (self.has_live_tokens() || !self.state.is_empty())
    }

    /// Tokens were handed to the client. The transient state is single use.
    pub fn log_in(&mut self, now: DateTime<Utc>) {
        self.status = DeviceStatus::LoggedIn;
        self.state.clear();
        self.updated_at = now;
    }

    /// Client-initiated logout.
    pub fn log_out(&mut self, now: DateTime<Utc>) {
        self.status = DeviceStatus::LoggedOut;
        self.clear_tokens();
        self.state.clear();
        self.updated_at = now;
    }

    fn clear_tokens(&mut self) {
        self.access_token.clear();
        self.access_token_hash.clear();
        self.refresh_token.clear();
        self.refresh_token_hash.clear();
    }

    /// Invalidate the session because another login took over the same
    /// fingerprint.
    pub fn squeeze_out(&mut self, now: DateTime<Utc>) {
        self.status = DeviceStatus::LoggedOffline;
        self.clear_tokens();
        self.state.clear();
        self.updated_at = now;
    }
}
