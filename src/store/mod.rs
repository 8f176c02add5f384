//! Credential store: the single source of truth for users, sessions,
//! password-reset tokens and the used-phone set.
//!
//! Two backends implement [`Store`]: [`pg::PgStore`] (PostgreSQL) and
//! [`file::FileStore`] (a JSON document on disk or in memory). Each backend is
//! responsible for the atomic operations documented on the trait methods.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

pub mod file;
pub mod pg;

pub use file::FileStore;
pub use pg::PgStore;

/// Profile keys a user may write through the profile endpoint.
pub const PROFILE_FIELDS: [&str; 3] = ["name", "billing_address", "vat"];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already exists")]
    DuplicateEmail,

    #[error("user {0} not found")]
    UserNotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("data file error: {0}")]
    File(#[from] std::io::Error),

    #[error("data file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub phone: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub trial_expires: Option<OffsetDateTime>,
    pub billing_customer_id: Option<String>,
    pub subscription: Option<Subscription>,
    #[serde(default)]
    pub profile: Map<String, Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Locally known subscription state, written by the billing synchronizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_invoice: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub started: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated: Option<OffsetDateTime>,
}

impl Subscription {
    /// Overwrite the fields that `patch` sets; leave the rest untouched.
    pub fn merge(&mut self, patch: Subscription) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if patch.$field.is_some() {
                    self.$field = patch.$field;
                })*
            };
        }
        take!(plan, status, subscription_id, last_invoice, started, updated);
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub phone: String,
}

/// A trial the store grants only if it can claim `phone` for the first time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialOffer {
    pub phone: String,
    pub expires: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub expires: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetRecord {
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub expires: OffsetDateTime,
    pub used: bool,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Create a user. When `trial` is given, its phone is claimed in the
    /// used-phone set in the same transaction and `trial_expires` is set only
    /// if that claim succeeded. A failed creation claims nothing.
    async fn create_user(&self, new: NewUser, trial: Option<TrialOffer>) -> StoreResult<User>;

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Merge `fields` into the profile; keys not present are left alone.
    async fn update_profile(&self, user_id: Uuid, fields: Map<String, Value>) -> StoreResult<()>;

    async fn set_password_hash(&self, user_id: Uuid, hash: &str) -> StoreResult<()>;

    /// Store `customer_id` unless the user already has one. Returns the id
    /// stored after the call, which is the earlier one if there was a race.
    async fn attach_billing_customer(&self, user_id: Uuid, customer_id: &str)
        -> StoreResult<String>;

    async fn set_subscription(&self, user_id: Uuid, subscription: Subscription)
        -> StoreResult<()>;

    /// Merge the set fields of `patch` into the subscription of the user
    /// owning `customer_id`, as one atomic write. Returns that user's id, or
    /// `None` when no user has this customer.
    async fn merge_subscription_by_customer(
        &self,
        customer_id: &str,
        patch: Subscription,
    ) -> StoreResult<Option<Uuid>>;

    async fn insert_session(&self, token: &str, record: SessionRecord) -> StoreResult<()>;

    async fn find_session(&self, token: &str) -> StoreResult<Option<SessionRecord>>;

    /// Returns whether a session was removed.
    async fn delete_session(&self, token: &str) -> StoreResult<bool>;

    async fn insert_reset(&self, token: &str, record: ResetRecord) -> StoreResult<()>;

    /// Atomically mark an unused reset token as used and return it. Returns
    /// `None` if the token does not exist or was already used.
    async fn claim_reset(&self, token: &str) -> StoreResult<Option<ResetRecord>>;

    async fn delete_reset(&self, token: &str) -> StoreResult<()>;
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
