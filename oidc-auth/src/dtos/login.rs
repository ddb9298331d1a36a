use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::DeviceStatus;
use crate::services::LoginParams;

/// Query of `GET /plugin/login` and `GET /manager/login`.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct LoginQuery {
    #[validate(length(max = 64, message = "provider is too long"))]
    pub provider: String,

    #[validate(length(max = 512, message = "state is too long"))]
    pub state: String,

    #[validate(length(max = 256, message = "machine_code is too long"))]
    pub machine_code: String,

    #[validate(length(max = 64, message = "uri_scheme is too long"))]
    pub uri_scheme: String,

    #[validate(length(max = 64, message = "plugin_version is too long"))]
    pub plugin_version: String,

    #[validate(length(max = 64, message = "vscode_version is too long"))]
    pub vscode_version: String,

    #[validate(length(max = 64, message = "invite_code is too long"))]
    pub invite_code: String,
}

impl From<LoginQuery> for LoginParams {
    fn from(q: LoginQuery) -> Self {
        Self {
            provider: q.provider,
            state: q.state,
            machine_code: q.machine_code,
            vscode_version: q.vscode_version,
            uri_scheme: q.uri_scheme,
            plugin_version: q.plugin_version,
            invite_code: q.invite_code,
        }
    }
}

/// Query the provider sends back to the callback endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

/// Query of the status poll and of the token step.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatusQuery {
    pub state: String,
    pub machine_code: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub status: DeviceStatus,
}
