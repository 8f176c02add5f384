use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{types::Json, FromRow, PgPool};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::{
    normalize_email, NewUser, ResetRecord, SessionRecord, Store, StoreError, StoreResult,
    Subscription, TrialOffer, User,
};

const USER_COLUMNS: &str = "id, email, password_hash, phone, trial_expires, \
     billing_customer_id, subscription, profile, created_at";

/// Row shape of `users`; JSONB columns are decoded through `sqlx::types::Json`.
#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    phone: Option<String>,
    trial_expires: Option<OffsetDateTime>,
    billing_customer_id: Option<String>,
    subscription: Option<Json<Subscription>>,
    profile: Json<Map<String, Value>>,
    created_at: OffsetDateTime,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            email: r.email,
            password_hash: r.password_hash,
            phone: r.phone,
            trial_expires: r.trial_expires,
            billing_customer_id: r.billing_customer_id,
            subscription: r.subscription.map(|s| s.0),
            profile: r.profile.0,
            created_at: r.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn expect_row(user_id: Uuid, rows_affected: u64) -> StoreResult<()> {
    if rows_affected == 0 {
        return Err(StoreError::UserNotFound(user_id));
    }
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, new: NewUser, trial: Option<TrialOffer>) -> StoreResult<User> {
        let mut tx = self.db.begin().await?;

        // The phone claim and the user insert commit together; concurrent
        // claims of the same phone block on the primary key and only one
        // inserts a row.
        let trial_expires = match trial {
            Some(offer) => {
                let claimed = sqlx::query(
                    "INSERT INTO used_phones (phone) VALUES ($1) ON CONFLICT (phone) DO NOTHING",
                )
                .bind(&offer.phone)
                .execute(&mut *tx)
                .await?
                .rows_affected()
                    == 1;
                claimed.then_some(offer.expires)
            }
            None => None,
        };

        let inserted = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, phone, trial_expires)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(normalize_email(&new.email))
        .bind(&new.password_hash)
        .bind(&new.phone)
        .bind(trial_expires)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => return Err(StoreError::DuplicateEmail),
            Err(e) => return Err(e.into()),
        };
        tx.commit().await?;
        debug!(user_id = %row.id, trial = trial_expires.is_some(), "user row inserted");
        Ok(row.into())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(User::from))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(User::from))
    }

    async fn update_profile(&self, user_id: Uuid, fields: Map<String, Value>) -> StoreResult<()> {
        let res = sqlx::query("UPDATE users SET profile = profile || $2 WHERE id = $1")
            .bind(user_id)
            .bind(Json(fields))
            .execute(&self.db)
            .await?;
        expect_row(user_id, res.rows_affected())
    }

    async fn set_password_hash(&self, user_id: Uuid, hash: &str) -> StoreResult<()> {
        let res = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(hash)
            .execute(&self.db)
            .await?;
        expect_row(user_id, res.rows_affected())
    }

    async fn attach_billing_customer(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> StoreResult<String> {
        let stored: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            UPDATE users
               SET billing_customer_id = COALESCE(billing_customer_id, $2)
             WHERE id = $1
            RETURNING billing_customer_id
            "#,
        )
        .bind(user_id)
        .bind(customer_id)
        .fetch_optional(&self.db)
        .await?;

        stored
            .and_then(|(id,)| id)
            .ok_or(StoreError::UserNotFound(user_id))
    }

    async fn set_subscription(
        &self,
        user_id: Uuid,
        subscription: Subscription,
    ) -> StoreResult<()> {
        let res = sqlx::query("UPDATE users SET subscription = $2 WHERE id = $1")
            .bind(user_id)
            .bind(Json(subscription))
            .execute(&self.db)
            .await?;
        expect_row(user_id, res.rows_affected())
    }

    async fn merge_subscription_by_customer(
        &self,
        customer_id: &str,
        patch: Subscription,
    ) -> StoreResult<Option<Uuid>> {
        // `||` on JSONB keeps keys the patch omits; unset fields are not
        // serialized, so only the patch's fields are replaced.
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE users
               SET subscription = COALESCE(subscription, '{}'::jsonb) || $2
             WHERE billing_customer_id = $1
            RETURNING id
            "#,
        )
        .bind(customer_id)
        .bind(Json(patch))
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    async fn insert_session(&self, token: &str, record: SessionRecord) -> StoreResult<()> {
        sqlx::query("INSERT INTO sessions (token, user_id, expires) VALUES ($1, $2, $3)")
            .bind(token)
            .bind(record.user_id)
            .bind(record.expires)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn find_session(&self, token: &str) -> StoreResult<Option<SessionRecord>> {
        let row: Option<(Uuid, OffsetDateTime)> =
            sqlx::query_as("SELECT user_id, expires FROM sessions WHERE token = $1")
                .bind(token)
                .fetch_optional(&self.db)
                .await?;
        Ok(row.map(|(user_id, expires)| SessionRecord { user_id, expires }))
    }

    async fn delete_session(&self, token: &str) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn insert_reset(&self, token: &str, record: ResetRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO password_resets (token, user_id, expires, used) VALUES ($1, $2, $3, $4)",
        )
        .bind(token)
        .bind(record.user_id)
        .bind(record.expires)
        .bind(record.used)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn claim_reset(&self, token: &str) -> StoreResult<Option<ResetRecord>> {
        // Single-statement flip: a concurrent claimer re-evaluates `used` after
        // the first commit and matches no row.
        let row: Option<(Uuid, OffsetDateTime)> = sqlx::query_as(
            r#"
            UPDATE password_resets
               SET used = TRUE
             WHERE token = $1 AND used = FALSE
            RETURNING user_id, expires
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|(user_id, expires)| ResetRecord {
            user_id,
            expires,
            used: true,
        }))
    }

    async fn delete_reset(&self, token: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM password_resets WHERE token = $1")
            .bind(token)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_row_maps_json_columns() {
        let mut profile = Map::new();
        profile.insert("vat".into(), Value::String("DE123".into()));
        let row = UserRow {
            id: Uuid::new_v4(),
            email: "a@x.com".into(),
            password_hash: "h".into(),
            phone: Some("+1".into()),
            trial_expires: None,
            billing_customer_id: Some("cus_1".into()),
            subscription: Some(Json(Subscription {
                status: Some("active".into()),
                ..Default::default()
            })),
            profile: Json(profile),
            created_at: OffsetDateTime::now_utc(),
        };
        let user = User::from(row);
        assert_eq!(user.profile["vat"], "DE123");
        assert_eq!(
            user.subscription.and_then(|s| s.status).as_deref(),
            Some("active")
        );
    }

    #[test]
    fn test_expect_row_reports_missing_user() {
        let id = Uuid::new_v4();
        assert!(expect_row(id, 1).is_ok());
        assert!(matches!(
            expect_row(id, 0),
            Err(StoreError::UserNotFound(missing)) if missing == id
        ));
    }

    fn new_user(email: &str, phone: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password_hash: "hash".into(),
            phone: phone.into(),
        }
    }

    fn offer(phone: &str) -> Option<TrialOffer> {
        Some(TrialOffer {
            phone: phone.into(),
            expires: OffsetDateTime::now_utc() + time::Duration::days(7),
        })
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_trial_claimed_once_per_phone(pool: PgPool) {
        let store = PgStore::new(pool);
        let first = store
            .create_user(new_user("a@x.com", "+15550001"), offer("+15550001"))
            .await
            .unwrap();
        assert!(first.trial_expires.is_some());

        let second = store
            .create_user(new_user("b@x.com", "+15550001"), offer("+15550001"))
            .await
            .unwrap();
        assert!(second.trial_expires.is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_duplicate_email_rolls_back_phone_claim(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        store
            .create_user(new_user("a@x.com", "+15550001"), None)
            .await
            .unwrap();

        let err = store
            .create_user(new_user("A@x.com", "+15550002"), offer("+15550002"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));

        let (claimed,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM used_phones WHERE phone = $1")
                .bind("+15550002")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(claimed, 0);

        let user = store
            .create_user(new_user("c@x.com", "+15550002"), offer("+15550002"))
            .await
            .unwrap();
        assert!(user.trial_expires.is_some());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_concurrent_reset_claims_succeed_once(pool: PgPool) {
        let store = PgStore::new(pool);
        let user = store
            .create_user(new_user("a@x.com", "+15550001"), None)
            .await
            .unwrap();
        store
            .insert_reset(
                "reset-tok",
                ResetRecord {
                    user_id: user.id,
                    expires: OffsetDateTime::now_utc() + time::Duration::hours(1),
                    used: false,
                },
            )
            .await
            .unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.claim_reset("reset-tok").await })
            })
            .collect();

        let mut claimed = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().is_some() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_attach_billing_customer_first_wins(pool: PgPool) {
        let store = PgStore::new(pool);
        let user = store
            .create_user(new_user("a@x.com", "+15550001"), None)
            .await
            .unwrap();

        assert_eq!(
            store.attach_billing_customer(user.id, "cus_1").await.unwrap(),
            "cus_1"
        );
        assert_eq!(
            store.attach_billing_customer(user.id, "cus_2").await.unwrap(),
            "cus_1"
        );
        assert!(matches!(
            store.attach_billing_customer(Uuid::new_v4(), "cus_3").await,
            Err(StoreError::UserNotFound(_))
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_subscription_merges_keep_each_others_fields(pool: PgPool) {
        let store = PgStore::new(pool);
        let user = store
            .create_user(new_user("a@x.com", "+15550001"), None)
            .await
            .unwrap();
        store.attach_billing_customer(user.id, "cus_1").await.unwrap();
        store
            .set_subscription(
                user.id,
                Subscription {
                    plan: Some("pro".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let checkout = Subscription {
            status: Some("active".into()),
            subscription_id: Some("sub_1".into()),
            ..Default::default()
        };
        let invoice = Subscription {
            last_invoice: Some("in_1".into()),
            ..Default::default()
        };
        let (a, b) = tokio::join!(
            store.merge_subscription_by_customer("cus_1", checkout),
            store.merge_subscription_by_customer("cus_1", invoice),
        );
        assert_eq!(a.unwrap(), Some(user.id));
        assert_eq!(b.unwrap(), Some(user.id));

        let sub = store
            .find_user(user.id)
            .await
            .unwrap()
            .and_then(|u| u.subscription)
            .unwrap();
        assert_eq!(sub.plan.as_deref(), Some("pro"));
        assert_eq!(sub.status.as_deref(), Some("active"));
        assert_eq!(sub.subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(sub.last_invoice.as_deref(), Some("in_1"));

        assert_eq!(
            store
                .merge_subscription_by_customer("cus_unknown", Subscription::default())
                .await
                .unwrap(),
            None
        );
    }
}
