//! JSON document store. Every operation runs under one async mutex, and
//! mutations are flushed with write-to-temp-then-rename, so a reader never sees
//! a half-written file and check-then-write sequences cannot interleave.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    normalize_email, NewUser, ResetRecord, SessionRecord, Store, StoreError, StoreResult,
    Subscription, TrialOffer, User,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    users: HashMap<Uuid, User>,
    #[serde(default)]
    sessions: HashMap<String, SessionRecord>,
    #[serde(default)]
    password_resets: HashMap<String, ResetRecord>,
    #[serde(default)]
    used_phones: BTreeSet<String>,
}

impl Document {
    fn user_mut(&mut self, id: Uuid) -> StoreResult<&mut User> {
        self.users.get_mut(&id).ok_or(StoreError::UserNotFound(id))
    }
}

pub struct FileStore {
    path: Option<PathBuf>,
    doc: Mutex<Document>,
}

impl FileStore {
    /// Open (or create) the document at `path`.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)?,
            Ok(_) => Document::default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(dir).await?;
                }
                let doc = Document::default();
                write_atomic(&path, &doc).await?;
                info!(path = %path.display(), "created data file");
                doc
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            doc: Mutex::new(doc),
        })
    }

    /// A store that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: Mutex::new(Document::default()),
        }
    }

    async fn persist(&self, doc: &Document) -> StoreResult<()> {
        match &self.path {
            Some(path) => write_atomic(path, doc).await,
            None => Ok(()),
        }
    }

    /// Apply `f` to a copy of the document and swap it in only once the copy
    /// is on disk. A failed write leaves memory as it was.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Document) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *doc = next;
        Ok(out)
    }
}

async fn write_atomic(path: &Path, doc: &Document) -> StoreResult<()> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "data file flushed");
    Ok(())
}

#[async_trait]
impl Store for FileStore {
    async fn create_user(&self, new: NewUser, trial: Option<TrialOffer>) -> StoreResult<User> {
        let email = normalize_email(&new.email);
        self.mutate(|doc| {
            if doc.users.values().any(|u| u.email == email) {
                return Err(StoreError::DuplicateEmail);
            }

            let trial_expires = trial.and_then(|offer| {
                doc.used_phones
                    .insert(offer.phone)
                    .then_some(offer.expires)
            });

            let user = User {
                id: Uuid::new_v4(),
                email,
                password_hash: new.password_hash,
                phone: Some(new.phone),
                trial_expires,
                billing_customer_id: None,
                subscription: None,
                profile: Map::new(),
                created_at: OffsetDateTime::now_utc(),
            };
            doc.users.insert(user.id, user.clone());
            Ok(user)
        })
        .await
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.doc.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = normalize_email(email);
        let doc = self.doc.lock().await;
        Ok(doc.users.values().find(|u| u.email == email).cloned())
    }

    async fn update_profile(&self, user_id: Uuid, fields: Map<String, Value>) -> StoreResult<()> {
        self.mutate(|doc| {
            doc.user_mut(user_id)?.profile.extend(fields);
            Ok(())
        })
        .await
    }

    async fn set_password_hash(&self, user_id: Uuid, hash: &str) -> StoreResult<()> {
        self.mutate(|doc| {
            doc.user_mut(user_id)?.password_hash = hash.to_string();
            Ok(())
        })
        .await
    }

    async fn attach_billing_customer(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> StoreResult<String> {
        self.mutate(|doc| {
            let stored = doc
                .user_mut(user_id)?
                .billing_customer_id
                .get_or_insert_with(|| customer_id.to_string())
                .clone();
            Ok(stored)
        })
        .await
    }

    async fn set_subscription(
        &self,
        user_id: Uuid,
        subscription: Subscription,
    ) -> StoreResult<()> {
        self.mutate(|doc| {
            doc.user_mut(user_id)?.subscription = Some(subscription);
            Ok(())
        })
        .await
    }

    async fn merge_subscription_by_customer(
        &self,
        customer_id: &str,
        patch: Subscription,
    ) -> StoreResult<Option<Uuid>> {
        {
            let doc = self.doc.lock().await;
            if !doc
                .users
                .values()
                .any(|u| u.billing_customer_id.as_deref() == Some(customer_id))
            {
                return Ok(None);
            }
        }
        self.mutate(|doc| {
            let user = doc
                .users
                .values_mut()
                .find(|u| u.billing_customer_id.as_deref() == Some(customer_id));
            Ok(user.map(|u| {
                u.subscription.get_or_insert_with(Default::default).merge(patch);
                u.id
            }))
        })
        .await
    }

    async fn insert_session(&self, token: &str, record: SessionRecord) -> StoreResult<()> {
        self.mutate(|doc| {
            doc.sessions.insert(token.to_string(), record);
            Ok(())
        })
        .await
    }

    async fn find_session(&self, token: &str) -> StoreResult<Option<SessionRecord>> {
        Ok(self.doc.lock().await.sessions.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> StoreResult<bool> {
        if !self.doc.lock().await.sessions.contains_key(token) {
            return Ok(false);
        }
        self.mutate(|doc| Ok(doc.sessions.remove(token).is_some()))
            .await
    }

    async fn insert_reset(&self, token: &str, record: ResetRecord) -> StoreResult<()> {
        self.mutate(|doc| {
            doc.password_resets.insert(token.to_string(), record);
            Ok(())
        })
        .await
    }

    async fn claim_reset(&self, token: &str) -> StoreResult<Option<ResetRecord>> {
        self.mutate(|doc| {
            Ok(match doc.password_resets.get_mut(token) {
                Some(record) if !record.used => {
                    record.used = true;
                    Some(record.clone())
                }
                _ => None,
            })
        })
        .await
    }

    async fn delete_reset(&self, token: &str) -> StoreResult<()> {
        if !self.doc.lock().await.password_resets.contains_key(token) {
            return Ok(());
        }
        self.mutate(|doc| {
            doc.password_resets.remove(token);
            Ok(())
        })
        .await
    }
}
