use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::InviteCode;

/// Timestamp layout used by the invite endpoints.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateInviteCodeRequest {
    #[serde(default)]
    #[validate(length(max = 64, message = "User ID is too long"))]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateInviteCodeResponse {
    pub code: String,
    pub created_at: String,
}

impl From<&InviteCode> for GenerateInviteCodeResponse {
    fn from(code: &InviteCode) -> Self {
        Self {
            code: code.code.clone(),
            created_at: format_timestamp(code.created_at),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListInviteCodesQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct InviteCodeInfo {
    pub id: String,
    pub code: String,
    pub created_at: String,
}

impl From<&InviteCode> for InviteCodeInfo {
    fn from(code: &InviteCode) -> Self {
        Self {
            id: code.id.to_string(),
            code: code.code.clone(),
            created_at: format_timestamp(code.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InviteCodeListResponse {
    pub codes: Vec<InviteCodeInfo>,
}

#[derive(Debug, Serialize)]
pub struct MyInviteCodeResponse {
    pub invite_code: String,
}
