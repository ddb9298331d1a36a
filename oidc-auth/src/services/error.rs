use service_core::error::AppError;
use thiserror::Error;

use super::store::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Bad request parameter: {0}")]
    BadRequestParam(String),

    #[error("Failed to encrypt login state: {0}")]
    DataEncryption(String),

    #[error("Failed to decrypt login state: {0}")]
    DataDecryption(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid token: {0}")]
    TokenInvalid(String),

    #[error("Failed to update user info: {0}")]
    UpdateInfo(String),

    #[error("Upstream timed out: {0}")]
    Upstream(String),

    #[error("Invite code not found")]
    InviteCodeNotFound,

    #[error("Invite code expired")]
    InviteCodeExpired,

    #[error("Invite code already used")]
    InviteCodeAlreadyUsed,

    #[error("Registration window for invite codes has expired")]
    RegistrationWindowExpired,

    #[error("Failed to generate a unique invite code after {0} attempts")]
    InviteCodeExhausted(u32),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::BadRequestParam(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::UserNotFound(e) => {
                AppError::Unauthorized(anyhow::anyhow!("User not found: {}", e))
            }
            ServiceError::TokenInvalid(e) => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid token: {}", e))
            }
            ServiceError::InviteCodeNotFound => {
                AppError::NotFound(anyhow::anyhow!("Invite code not found"))
            }
            ServiceError::InviteCodeAlreadyUsed => {
                AppError::Conflict(anyhow::anyhow!("Invite code already used"))
            }
            ServiceError::InviteCodeExpired => AppError::Gone(anyhow::anyhow!("Invite code expired")),
            ServiceError::RegistrationWindowExpired => AppError::Gone(anyhow::anyhow!(
                "Registration window for invite codes has expired"
            )),
            ServiceError::Upstream(e) => AppError::GatewayTimeout(e),
            ServiceError::Store(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            e @ (ServiceError::DataEncryption(_)
            | ServiceError::DataDecryption(_)
            | ServiceError::UpdateInfo(_)
            | ServiceError::InviteCodeExhausted(_)) => AppError::InternalError(anyhow::anyhow!(e)),
        }
    }
}
