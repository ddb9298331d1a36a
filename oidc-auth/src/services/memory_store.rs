use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::store::{StoreError, TokenHashField, UserField, UserStore};
use crate::models::{AuthUser, Device, Fingerprint, InviteCode, InviteCodeUsage};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, AuthUser>,
    invite_codes: Vec<InviteCode>,
    usages: Vec<InviteCodeUsage>,
}

/// In-process [`UserStore`] used by tests and local runs without a database.
///
/// One mutex guards every table, so each check-and-write is atomic.
#[derive(Default)]
pub struct MemoryUserStore {
    tables: Mutex<Tables>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("Memory store mutex poisoned: {}", e)))
    }

    fn find_user_where(
        &self,
        predicate: impl Fn(&AuthUser) -> bool,
    ) -> Result<Option<AuthUser>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .users
            .values()
            .filter(|u| predicate(u))
            .min_by_key(|u| (u.created_at, u.id))
            .cloned())
    }

    /// Most recently updated user owning a matching device.
    fn find_user_by_device_where(
        &self,
        predicate: impl Fn(&Device) -> bool,
    ) -> Result<Option<AuthUser>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .users
            .values()
            .filter(|u| u.devices.iter().any(&predicate))
            .max_by_key(|u| (u.updated_at, u.id))
            .cloned())
    }

    /// Number of invite codes currently stored.
    pub fn invite_code_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.invite_codes.len())
    }

    /// Number of redemptions currently stored.
    pub fn usage_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.usages.len())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<AuthUser>, StoreError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn find_user_by_field(
        &self,
        field: UserField,
        value: &str,
    ) -> Result<Option<AuthUser>, StoreError> {
        if value.is_empty() {
            return Ok(None);
        }
        self.find_user_where(|u| field.value_of(u) == value)
    }

    async fn find_users_by_device(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<AuthUser>, StoreError> {
        let tables = self.lock()?;
        let mut owners: Vec<AuthUser> = tables
            .users
            .values()
            .filter(|u| {
                u.devices
                    .iter()
                    .any(|d| fingerprint.matches(d) && d.holds_session())
            })
            .cloned()
            .collect();
        owners.sort_by_key(|u| (u.created_at, u.id));
        Ok(owners)
    }

    async fn find_user_by_token_hash(
        &self,
        field: TokenHashField,
        hash: &str,
    ) -> Result<Option<AuthUser>, StoreError> {
        if hash.is_empty() {
            return Ok(None);
        }
        self.find_user_by_device_where(|d| match field {
            TokenHashField::AccessTokenHash => d.access_token_hash == hash,
            TokenHashField::RefreshTokenHash => d.refresh_token_hash == hash,
        })
    }

    async fn find_user_by_device_state(
        &self,
        state: &str,
    ) -> Result<Option<AuthUser>, StoreError> {
        if state.is_empty() {
            return Ok(None);
        }
        self.find_user_by_device_where(|d| d.state == state)
    }

    async fn upsert_user(&self, user: &AuthUser) -> Result<(), StoreError> {
        let mut tables = self.lock()?;

        for other in tables.users.values().filter(|u| u.id != user.id) {
            for field in [UserField::ExternalId, UserField::Phone, UserField::Email] {
                let value = field.value_of(user);
                if !value.is_empty() && field.value_of(other) == value {
                    return Err(StoreError::Conflict(format!(
                        "{} already belongs to another user",
                        field.column()
                    )));
                }
            }
            if user.invite_code.is_some() && other.invite_code == user.invite_code {
                return Err(StoreError::Conflict(
                    "invite_code already belongs to another user".to_string(),
                ));
            }
        }

        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_invite_code(&self, code: &str) -> Result<Option<InviteCode>, StoreError> {
        Ok(self
            .lock()?
            .invite_codes
            .iter()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn insert_invite_code(&self, code: &InviteCode) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.invite_codes.iter().any(|c| c.code == code.code) {
            return Err(StoreError::Conflict(format!(
                "invite code {} already exists",
                code.code
            )));
        }
        tables.invite_codes.push(code.clone());
        Ok(())
    }

    async fn list_invite_codes(&self, user_id: Uuid) -> Result<Vec<InviteCode>, StoreError> {
        let tables = self.lock()?;
        let mut codes: Vec<InviteCode> = tables
            .invite_codes
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        codes.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.code.cmp(&b.code))
        });
        Ok(codes)
    }

    async fn find_invite_code_usage(
        &self,
        user_id: Uuid,
    ) -> Result<Option<InviteCodeUsage>, StoreError> {
        Ok(self
            .lock()?
            .usages
            .iter()
            .find(|u| u.user_id == user_id)
            .cloned())
    }

    async fn insert_invite_code_usage(&self, usage: &InviteCodeUsage) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.usages.iter().any(|u| u.user_id == usage.user_id) {
            return Err(StoreError::Conflict(format!(
                "user {} already redeemed an invite code",
                usage.user_id
            )));
        }
        tables.usages.push(usage.clone());
        Ok(())
    }

    async fn delete_invite_code_usage(&self, usage_id: Uuid) -> Result<(), StoreError> {
        self.lock()?.usages.retain(|u| u.id != usage_id);
        Ok(())
    }
}
