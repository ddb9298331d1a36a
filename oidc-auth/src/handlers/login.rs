//! Login handlers for the plugin and web (account binding) flows.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Response,
};
use service_core::error::AppError;
use service_core::response::Envelope;
use validator::Validate;

use super::found;
use crate::dtos::invite::MyInviteCodeResponse;
use crate::dtos::login::{CallbackQuery, LoginQuery, LogoutResponse, StatusQuery};
use crate::models::{DeviceStatus, Platform};
use crate::services::{DeviceStatusView, DeviceTokenView};
use crate::utils::bearer_token;
use crate::AppState;

fn start_login(state: &AppState, platform: Platform, query: LoginQuery) -> Result<Response, AppError> {
    query.validate()?;
    let auth_url = state.login.login(platform, query.into())?;
    Ok(found(&auth_url))
}

/// Start a device-bound plugin login.
///
/// GET /oidc-auth/api/v1/plugin/login
#[tracing::instrument(skip_all, fields(provider = %query.provider))]
pub async fn plugin_login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> Result<Response, AppError> {
    start_login(&state, Platform::Plugin, query)
}

/// Start a web login used for account binding.
///
/// GET /oidc-auth/api/v1/manager/login
#[tracing::instrument(skip_all, fields(provider = %query.provider))]
pub async fn web_login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> Result<Response, AppError> {
    start_login(&state, Platform::Web, query)
}

/// Provider callback for both flows; the platform travels in the state.
///
/// GET /oidc-auth/api/v1/plugin/login/callback
/// GET /oidc-auth/api/v1/manager/login/callback
#[tracing::instrument(skip_all)]
pub async fn login_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, AppError> {
    let success_url = state
        .login
        .callback(&query.code, &query.state)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Login callback failed");
            AppError::from(e)
        })?;
    Ok(found(&success_url))
}

/// Poll the outcome of a plugin login by its state value.
///
/// GET /oidc-auth/api/v1/plugin/login/status
#[tracing::instrument(skip_all)]
pub async fn login_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Envelope<DeviceStatusView>, AppError> {
    let view = state.login.status(&query.state, &query.machine_code).await?;
    Ok(Envelope::success("Success", view))
}

/// Fetch the session tokens of a completed plugin login.
///
/// GET /oidc-auth/api/v1/plugin/login/token
#[tracing::instrument(skip_all)]
pub async fn login_token(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Envelope<DeviceTokenView>, AppError> {
    let tokens = state.login.token(&query.state, &query.machine_code).await?;
    Ok(Envelope::success("Success", tokens))
}

/// GET /oidc-auth/api/v1/plugin/login/logout
#[tracing::instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Envelope<LogoutResponse>, AppError> {
    let token = bearer_token(&headers).ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("authentication failed: missing bearer token"))
    })?;
    state.login.logout(token).await?;
    Ok(Envelope::success(
        "Logged out",
        LogoutResponse {
            status: DeviceStatus::LoggedOut,
        },
    ))
}

/// The caller's own invite code, identified by its bearer access token.
///
/// GET /oidc-auth/api/v1/manager/invite-code
#[tracing::instrument(skip_all)]
pub async fn my_invite_code(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Envelope<MyInviteCodeResponse>, AppError> {
    let token = bearer_token(&headers).ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("authentication failed: missing bearer token"))
    })?;
    let invite_code = state.login.my_invite_code(token).await?;
    Ok(Envelope::success("Success", MyInviteCodeResponse { invite_code }))
}
