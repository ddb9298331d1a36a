//! Invite code handlers.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use service_core::error::AppError;
use service_core::response::Envelope;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::invite::{
    GenerateInviteCodeRequest, GenerateInviteCodeResponse, InviteCodeInfo,
    InviteCodeListResponse, ListInviteCodesQuery,
};
use crate::services::ServiceError;
use crate::AppState;

/// Parse `raw` as a user id and make sure the user exists.
async fn existing_user_id(state: &AppState, raw: &str, blank_message: &str) -> Result<Uuid, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(blank_message.to_string())));
    }
    let user_id = Uuid::parse_str(raw)
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid user ID")))?;

    state
        .store
        .find_user_by_id(user_id)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;
    Ok(user_id)
}

/// Generate a new invite code for a user.
///
/// POST /oidc-auth/api/v1/invite/generate
#[tracing::instrument(skip_all)]
pub async fn generate_invite_code(
    State(state): State<AppState>,
    payload: Result<Json<GenerateInviteCodeRequest>, JsonRejection>,
) -> Result<Envelope<GenerateInviteCodeResponse>, AppError> {
    let Json(req) = payload
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid request parameters: {}", e)))?;
    req.validate()?;

    let user_id = existing_user_id(&state, &req.user_id, "User ID cannot be empty").await?;
    let code = state.invites.generate(user_id).await.map_err(|e| {
        tracing::error!(user_id = %user_id, error = %e, "Failed to generate invite code");
        AppError::from(e)
    })?;

    Ok(Envelope::success(
        "Invite code generated successfully",
        GenerateInviteCodeResponse::from(&code),
    ))
}

/// List the invite codes owned by a user.
///
/// GET /oidc-auth/api/v1/invite/list?user_id=...
#[tracing::instrument(skip_all)]
pub async fn list_invite_codes(
    State(state): State<AppState>,
    Query(query): Query<ListInviteCodesQuery>,
) -> Result<Envelope<InviteCodeListResponse>, AppError> {
    let user_id = existing_user_id(&state, &query.user_id, "User ID is required").await?;
    let codes = state.invites.list(user_id).await?;

    Ok(Envelope::success(
        "Success",
        InviteCodeListResponse {
            codes: codes.iter().map(InviteCodeInfo::from).collect(),
        },
    ))
}
