//! Bearer session bookkeeping.
//!
//! A session is a flat credential: valid until its absolute expiry or an
//! explicit logout. There is no rotation, so a leaked token is trusted for the
//! rest of its lifetime.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::services::generate_token;
use crate::{
    error::{AppError, AppResult},
    store::{SessionRecord, Store},
};

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn issue(&self, user_id: Uuid) -> AppResult<String> {
        let token = generate_token();
        let record = SessionRecord {
            user_id,
            expires: OffsetDateTime::now_utc() + self.ttl,
        };
        self.store.insert_session(&token, record).await?;
        debug!(%user_id, "session issued");
        Ok(token)
    }

    /// Resolve a token to its user. Expired sessions are deleted on the way out.
    pub async fn validate(&self, token: &str) -> AppResult<Uuid> {
        let Some(record) = self.store.find_session(token).await? else {
            return Err(AppError::unauthorized());
        };
        if record.expires <= OffsetDateTime::now_utc() {
            self.store.delete_session(token).await?;
            debug!(user_id = %record.user_id, "expired session reaped");
            return Err(AppError::unauthorized());
        }
        Ok(record.user_id)
    }

    /// Idempotent: revoking an unknown token is not an error.
    pub async fn revoke(&self, token: &str) -> AppResult<()> {
        if self.store.delete_session(token).await? {
            debug!("session revoked");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileStore;

    fn manager() -> (SessionManager, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(FileStore::in_memory());
        (SessionManager::new(store.clone(), Duration::days(7)), store)
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let (sessions, store) = manager();
        let user_id = Uuid::new_v4();
        let token = sessions.issue(user_id).await.unwrap();
        assert_eq!(sessions.validate(&token).await.unwrap(), user_id);

        let record = store.find_session(&token).await.unwrap().unwrap();
        let ttl = record.expires - OffsetDateTime::now_utc();
        assert!(ttl > Duration::days(7) - Duration::minutes(1));
        assert!(ttl <= Duration::days(7));
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected_and_deleted() {
        let (sessions, store) = manager();
        let record = SessionRecord {
            user_id: Uuid::new_v4(),
            expires: OffsetDateTime::now_utc() - Duration::seconds(1),
        };
        store.insert_session("stale", record).await.unwrap();

        let err = sessions.validate("stale").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        assert!(store.find_session("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthorized() {
        let (sessions, _) = manager();
        assert!(matches!(
            sessions.validate("nope").await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (sessions, _) = manager();
        let token = sessions.issue(Uuid::new_v4()).await.unwrap();
        sessions.revoke(&token).await.unwrap();
        sessions.revoke(&token).await.unwrap();
        assert!(sessions.validate(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_tokens_are_distinct_per_issue() {
        let (sessions, _) = manager();
        let user_id = Uuid::new_v4();
        let a = sessions.issue(user_id).await.unwrap();
        let b = sessions.issue(user_id).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(sessions.validate(&a).await.unwrap(), user_id);
        assert_eq!(sessions.validate(&b).await.unwrap(), user_id);
    }
}
