use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use super::{password::hash_password, services::generate_token};
use crate::{
    error::{AppError, AppResult},
    store::{ResetRecord, Store},
};

/// One-time password reset tokens.
#[derive(Clone)]
pub struct PasswordResetManager {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl PasswordResetManager {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Returns a token only when the account exists. Callers must answer the
    /// same way in both cases.
    pub async fn request_reset(&self, email: &str) -> AppResult<Option<String>> {
        let Some(user) = self.store.find_user_by_email(email).await? else {
            debug!("reset requested for unknown email");
            return Ok(None);
        };
        let token = generate_token();
        let record = ResetRecord {
            user_id: user.id,
            expires: OffsetDateTime::now_utc() + self.ttl,
            used: false,
        };
        self.store.insert_reset(&token, record).await?;
        info!(user_id = %user.id, "password reset issued");
        Ok(Some(token))
    }

    /// The token is claimed before the password changes, so two concurrent
    /// consumers cannot both succeed.
    pub async fn consume_reset(&self, token: &str, new_password: &str) -> AppResult<()> {
        let Some(record) = self.store.claim_reset(token).await? else {
            return Err(AppError::InvalidToken);
        };
        if record.expires < OffsetDateTime::now_utc() {
            self.store.delete_reset(token).await?;
            warn!(user_id = %record.user_id, "expired reset token presented");
            return Err(AppError::TokenExpired);
        }

        let hash = hash_password(new_password)?;
        self.store.set_password_hash(record.user_id, &hash).await?;
        info!(user_id = %record.user_id, "password reset completed");
        Ok(())
    }
}
