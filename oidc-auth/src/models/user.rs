//! AuthUser model - identities resolved through an OAuth provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Device, Fingerprint};

/// User entity. Created on first successful provider login, never deleted by
/// this service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AuthUser {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
    /// Subject identifier at the upstream provider.
    pub external_id: String,
    pub phone: String,
    pub email: String,
    /// Owner of the invite code this user redeemed. Set at most once.
    pub inviter_id: Option<Uuid>,
    /// This user's own referral code, issued lazily.
    pub invite_code: Option<String>,
    #[sqlx(json)]
    pub devices: Vec<Device>,
    pub access_time: DateTime<Utc>,
}

impl AuthUser {
    /// Create a new, not yet persisted user.
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            name: name.into(),
            external_id: String::new(),
            phone: String::new(),
            email: String::new(),
            inviter_id: None,
            invite_code: None,
            devices: Vec::new(),
            access_time: now,
        }
    }

    /// Index of the device carrying this fingerprint, if any.
    pub fn find_device_index(&self, fingerprint: &Fingerprint) -> Option<usize> {
        self.devices.iter().position(|d| fingerprint.matches(d))
    }

    /// Device started by the login attempt identified by `state`.
    pub fn find_device_by_state(&self, state: &str) -> Option<&Device> {
        if state.is_empty() {
            return None;
        }
        self.devices.iter().find(|d| d.state == state)
    }

    /// Age of the account at `now`.
    pub fn account_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}
