//! Persistence seam for users, devices and invite codes.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{AuthUser, Fingerprint, InviteCode, InviteCodeUsage};

#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Unique identity keys of an [`AuthUser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    ExternalId,
    Phone,
    Email,
}

impl UserField {
    pub fn column(&self) -> &'static str {
        match self {
            UserField::ExternalId => "external_id",
            UserField::Phone => "phone",
            UserField::Email => "email",
        }
    }

    pub fn value_of<'a>(&self, user: &'a AuthUser) -> &'a str {
        match self {
            UserField::ExternalId => &user.external_id,
            UserField::Phone => &user.phone,
            UserField::Email => &user.email,
        }
    }
}

/// Device token hash a session can be looked up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenHashField {
    AccessTokenHash,
    RefreshTokenHash,
}

impl TokenHashField {
    pub fn json_key(&self) -> &'static str {
        match self {
            TokenHashField::AccessTokenHash => "access_token_hash",
            TokenHashField::RefreshTokenHash => "refresh_token_hash",
        }
    }
}

/// Storage for users (with their embedded devices), invite codes and
/// invite code usages.
///
/// Implementations must be safe for concurrent use and must enforce the
/// uniqueness rules atomically: user identity keys, `InviteCode::code` and
/// `InviteCodeUsage::user_id`. Violations surface as [`StoreError::Conflict`].
/// Lookups by an empty value never match.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<AuthUser>, StoreError>;

    async fn find_user_by_field(
        &self,
        field: UserField,
        value: &str,
    ) -> Result<Option<AuthUser>, StoreError>;

    /// Every user owning a device with exactly this fingerprint that still
    /// holds a session (see [`Device::holds_session`]). Squeezed-out entries
    /// are ignored.
    ///
    /// [`Device::holds_session`]: crate::models::Device::holds_session
    async fn find_users_by_device(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<AuthUser>, StoreError>;

    async fn find_user_by_token_hash(
        &self,
        field: TokenHashField,
        hash: &str,
    ) -> Result<Option<AuthUser>, StoreError>;

    /// User owning the device whose transient login state equals `state`.
    async fn find_user_by_device_state(&self, state: &str)
        -> Result<Option<AuthUser>, StoreError>;

    /// Insert or fully replace the user keyed by `user.id`.
    async fn upsert_user(&self, user: &AuthUser) -> Result<(), StoreError>;

    async fn find_invite_code(&self, code: &str) -> Result<Option<InviteCode>, StoreError>;

    async fn insert_invite_code(&self, code: &InviteCode) -> Result<(), StoreError>;

    /// Codes owned by `user_id`, oldest first, ties broken by code.
    async fn list_invite_codes(&self, user_id: Uuid) -> Result<Vec<InviteCode>, StoreError>;

    /// The redemption made by `user_id`, if any.
    async fn find_invite_code_usage(
        &self,
        user_id: Uuid,
    ) -> Result<Option<InviteCodeUsage>, StoreError>;

    async fn insert_invite_code_usage(&self, usage: &InviteCodeUsage) -> Result<(), StoreError>;

    /// Remove a redemption. Deleting an unknown id is not an error.
    async fn delete_invite_code_usage(&self, usage_id: Uuid) -> Result<(), StoreError>;
}
