//! Invite code issuance and single-use redemption.

use std::sync::Arc;

use chrono::Duration;
use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::store::{StoreError, UserStore};
use super::ServiceError;
use crate::config::InviteCodeConfig;
use crate::models::{AuthUser, InviteCode, InviteCodeUsage};

/// Produces candidate codes. Uniqueness is checked by the service.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self, charset: &[u8], length: usize) -> String;
}

/// Draws one byte per character from the OS CSPRNG and maps it into the
/// charset by modulo.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self, charset: &[u8], length: usize) -> String {
        let mut bytes = vec![0u8; length];
        OsRng.fill_bytes(&mut bytes);
        bytes
            .iter()
            .map(|b| charset[*b as usize % charset.len()] as char)
            .collect()
    }
}

pub struct InviteCodeService {
    store: Arc<dyn UserStore>,
    policy: InviteCodeConfig,
    clock: Arc<dyn Clock>,
    generator: Arc<dyn CodeGenerator>,
}

impl InviteCodeService {
    pub fn new(store: Arc<dyn UserStore>, policy: InviteCodeConfig) -> Self {
        Self {
            store,
            policy,
            clock: Arc::new(SystemClock),
            generator: Arc::new(RandomCodeGenerator),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn CodeGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn policy(&self) -> &InviteCodeConfig {
        &self.policy
    }

    /// Issue a new code owned by `user_id`.
    ///
    /// A candidate that already exists, or loses an insert race, is redrawn
    /// up to `max_generate_attempts` times in total.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn generate(&self, user_id: Uuid) -> Result<InviteCode, ServiceError> {
        let charset = self.policy.chars.as_bytes();
        let max_attempts = self.policy.max_generate_attempts;

        for attempt in 1..=max_attempts {
            let candidate = self.generator.generate(charset, self.policy.length);

            if self.store.find_invite_code(&candidate).await?.is_some() {
                tracing::debug!(attempt, "Invite code collision, redrawing");
                continue;
            }

            let code = InviteCode::new(candidate, user_id, self.clock.now());
            match self.store.insert_invite_code(&code).await {
                Ok(()) => {
                    tracing::info!(code = %code.code, attempt, "Generated invite code");
                    return Ok(code);
                }
                Err(StoreError::Conflict(_)) => {
                    tracing::debug!(attempt, "Invite code inserted concurrently, redrawing");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::error!(max_attempts, "Invite code space exhausted");
        Err(ServiceError::InviteCodeExhausted(max_attempts))
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<InviteCode>, ServiceError> {
        Ok(self.store.list_invite_codes(user_id).await?)
    }

    /// Validate `code` for `redeemer_id` and record the redemption.
    ///
    /// Checks run in order and stop at the first failure: the code exists,
    /// the code is within its validity window, the redeemer is within the
    /// post-registration grace window, and the redeemer has not redeemed
    /// before. Both windows are inclusive at the boundary. The storage-level
    /// uniqueness on the redeemer settles concurrent attempts.
    #[tracing::instrument(skip(self, user), fields(redeemer_id = %redeemer_id))]
    pub async fn validate_and_redeem(
        &self,
        code: &str,
        redeemer_id: Uuid,
        user: &mut AuthUser,
    ) -> Result<InviteCodeUsage, ServiceError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ServiceError::InviteCodeNotFound);
        }

        let invite = self
            .store
            .find_invite_code(code)
            .await?
            .ok_or(ServiceError::InviteCodeNotFound)?;

        let now = self.clock.now();
        if invite.is_expired_at(now, Duration::days(self.policy.valid_days)) {
            return Err(ServiceError::InviteCodeExpired);
        }
        if user.account_age(now) > Duration::days(self.policy.register_valid_days) {
            return Err(ServiceError::RegistrationWindowExpired);
        }
        if invite.user_id == redeemer_id {
            return Err(ServiceError::BadRequestParam(
                "cannot redeem your own invite code".to_string(),
            ));
        }
        if self.store.find_invite_code_usage(redeemer_id).await?.is_some() {
            return Err(ServiceError::InviteCodeAlreadyUsed);
        }

        let usage = InviteCodeUsage::new(invite.id, redeemer_id, now);
        match self.store.insert_invite_code_usage(&usage).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(ServiceError::InviteCodeAlreadyUsed),
            Err(e) => return Err(e.into()),
        }

        if user.inviter_id.is_none() {
            user.inviter_id = Some(invite.user_id);
        }
        tracing::info!(code = %invite.code, inviter_id = %invite.user_id, "Invite code redeemed");
        Ok(usage)
    }
}
