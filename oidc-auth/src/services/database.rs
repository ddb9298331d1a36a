//! PostgreSQL-backed [`UserStore`].
//!
//! Devices live in the `auth_users.devices` JSONB column and are matched with
//! containment queries (`devices @> '[{...}]'`).

use async_trait::async_trait;
use serde_json::json;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::store::{StoreError, TokenHashField, UserField, UserStore};
use crate::models::{AuthUser, Fingerprint, InviteCode, InviteCodeUsage};

const USER_COLUMNS: &str = "id, created_at, updated_at, name, external_id, phone, email, \
                            inviter_id, invite_code, devices, access_time";

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_user_by_device_json(
        &self,
        device: serde_json::Value,
    ) -> Result<Option<AuthUser>, StoreError> {
        let sql = format!(
            "SELECT {} FROM auth_users WHERE devices @> $1 ORDER BY updated_at DESC LIMIT 1",
            USER_COLUMNS
        );
        sqlx::query_as::<_, AuthUser>(&sql)
            .bind(Json(json!([device])))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

/// Unique violations become [`StoreError::Conflict`], everything else a
/// backend error.
fn map_sqlx_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            StoreError::Conflict(db_err.constraint().unwrap_or("unique").to_string())
        }
        _ => StoreError::Backend(anyhow::anyhow!("Database error: {}", e)),
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<AuthUser>, StoreError> {
        let sql = format!("SELECT {} FROM auth_users WHERE id = $1", USER_COLUMNS);
        sqlx::query_as::<_, AuthUser>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn find_user_by_field(
        &self,
        field: UserField,
        value: &str,
    ) -> Result<Option<AuthUser>, StoreError> {
        if value.is_empty() {
            return Ok(None);
        }
        // Column names come from a closed enum, never from input.
        let sql = format!(
            "SELECT {} FROM auth_users WHERE {} = $1 ORDER BY created_at LIMIT 1",
            USER_COLUMNS,
            field.column()
        );
        sqlx::query_as::<_, AuthUser>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn find_users_by_device(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<AuthUser>, StoreError> {
        let sql = format!(
            "SELECT {} FROM auth_users WHERE devices @> $1 ORDER BY created_at, id",
            USER_COLUMNS
        );
        let candidates = sqlx::query_as::<_, AuthUser>(&sql)
            .bind(Json(json!([{
                "machine_code": fingerprint.machine_code,
                "vscode_version": fingerprint.vscode_version,
            }])))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        // Containment cannot express "tokens or state present", so the
        // session check runs on the decoded devices.
        Ok(candidates
            .into_iter()
            .filter(|u| {
                u.devices
                    .iter()
                    .any(|d| fingerprint.matches(d) && d.holds_session())
            })
            .collect())
    }

    async fn find_user_by_token_hash(
        &self,
        field: TokenHashField,
        hash: &str,
    ) -> Result<Option<AuthUser>, StoreError> {
        if hash.is_empty() {
            return Ok(None);
        }
        let mut device = serde_json::Map::new();
        device.insert(field.json_key().to_string(), json!(hash));
        self.find_user_by_device_json(serde_json::Value::Object(device))
            .await
    }

    async fn find_user_by_device_state(
        &self,
        state: &str,
    ) -> Result<Option<AuthUser>, StoreError> {
        if state.is_empty() {
            return Ok(None);
        }
        self.find_user_by_device_json(json!({ "state": state })).await
    }

    async fn upsert_user(&self, user: &AuthUser) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO auth_users (id, created_at, updated_at, name, external_id, phone, email,
                                    inviter_id, invite_code, devices, access_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                updated_at = EXCLUDED.updated_at,
                name = EXCLUDED.name,
                external_id = EXCLUDED.external_id,
                phone = EXCLUDED.phone,
                email = EXCLUDED.email,
                inviter_id = COALESCE(auth_users.inviter_id, EXCLUDED.inviter_id),
                invite_code = EXCLUDED.invite_code,
                devices = EXCLUDED.devices,
                access_time = EXCLUDED.access_time
            "#,
        )
        .bind(user.id)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(&user.name)
        .bind(&user.external_id)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(user.inviter_id)
        .bind(&user.invite_code)
        .bind(Json(&user.devices))
        .bind(user.access_time)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_invite_code(&self, code: &str) -> Result<Option<InviteCode>, StoreError> {
        sqlx::query_as::<_, InviteCode>(
            "SELECT id, code, user_id, created_at, updated_at FROM invite_codes WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn insert_invite_code(&self, code: &InviteCode) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO invite_codes (id, code, user_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(code.id)
        .bind(&code.code)
        .bind(code.user_id)
        .bind(code.created_at)
        .bind(code.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_invite_codes(&self, user_id: Uuid) -> Result<Vec<InviteCode>, StoreError> {
        sqlx::query_as::<_, InviteCode>(
            r#"
            SELECT id, code, user_id, created_at, updated_at
            FROM invite_codes
            WHERE user_id = $1
            ORDER BY created_at, code
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_invite_code_usage(
        &self,
        user_id: Uuid,
    ) -> Result<Option<InviteCodeUsage>, StoreError> {
        sqlx::query_as::<_, InviteCodeUsage>(
            r#"
            SELECT id, invite_code_id, user_id, used_at, created_at, updated_at
            FROM invite_code_usages
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn insert_invite_code_usage(&self, usage: &InviteCodeUsage) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO invite_code_usages (id, invite_code_id, user_id, used_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(usage.id)
        .bind(usage.invite_code_id)
        .bind(usage.user_id)
        .bind(usage.used_at)
        .bind(usage.created_at)
        .bind(usage.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn delete_invite_code_usage(&self, usage_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM invite_code_usages WHERE id = $1")
            .bind(usage_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
