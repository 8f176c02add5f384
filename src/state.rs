use std::{sync::Arc, time::Duration};

use time::Duration as TtlDuration;
use tracing::info;

use crate::{
    auth::{PasswordResetManager, SessionManager, TrialPolicy},
    billing::{BillingProvider, BillingSync, StripeProvider},
    config::AppConfig,
    store::{FileStore, PgStore, Store},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub sessions: SessionManager,
    pub resets: PasswordResetManager,
    pub trial: TrialPolicy,
    pub billing: BillingSync,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let store: Arc<dyn Store> = match &config.database_url {
            Some(url) => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(url)
                    .await?;
                sqlx::migrate!("./migrations").run(&db).await?;
                info!("using postgres store");
                Arc::new(PgStore::new(db))
            }
            None => {
                let store = FileStore::open(&config.data_file).await?;
                info!(path = %config.data_file.display(), "using file store");
                Arc::new(store)
            }
        };

        let provider = match &config.stripe {
            Some(stripe) => {
                info!(api_base = ?stripe.api_base, "stripe billing enabled");
                Some(Arc::new(StripeProvider::new(stripe)) as Arc<dyn BillingProvider>)
            }
            None => {
                info!("stripe not configured; billing endpoints answer 501");
                None
            }
        };

        Ok(Self::from_parts(store, config, provider))
    }

    pub fn from_parts(
        store: Arc<dyn Store>,
        config: AppConfig,
        provider: Option<Arc<dyn BillingProvider>>,
    ) -> Self {
        let sessions =
            SessionManager::new(store.clone(), TtlDuration::days(config.session_ttl_days));
        let resets = PasswordResetManager::new(
            store.clone(),
            TtlDuration::minutes(config.reset_ttl_minutes),
        );
        let trial = TrialPolicy::new(TtlDuration::days(config.trial_days));
        let billing = BillingSync::new(
            store.clone(),
            provider,
            config.stripe_webhook_secret.clone(),
            config.public_url.clone(),
            config.default_price_id.clone(),
        );
        Self {
            store,
            config: Arc::new(config),
            sessions,
            resets,
            trial,
            billing,
        }
    }
}
