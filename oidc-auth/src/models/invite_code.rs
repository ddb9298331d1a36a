//! Invite code models - referral codes and their single-use redemptions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Referral code owned by one user. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct InviteCode {
    pub id: Uuid,
    pub code: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InviteCode {
    pub fn new(code: String, user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            user_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// A code stays redeemable while its age is at most `validity`; a code
    /// exactly `validity` old is still valid.
    pub fn is_expired_at(&self, now: DateTime<Utc>, validity: Duration) -> bool {
        now - self.created_at > validity
    }
}

/// One successful redemption. At most one row exists per redeeming user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct InviteCodeUsage {
    pub id: Uuid,
    pub invite_code_id: Uuid,
    pub user_id: Uuid,
    pub used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InviteCodeUsage {
    pub fn new(invite_code_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            invite_code_id,
            user_id,
            used_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}
