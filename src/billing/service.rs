use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::{BillingError, BillingEvent, BillingProvider, CheckoutSession, Invoice};
use crate::{
    error::{AppError, AppResult},
    store::{Store, Subscription, User},
};

pub const DEFAULT_PLAN: &str = "starter";

/// Caller-supplied checkout options; missing values fall back to defaults.
#[derive(Debug, Clone, Default)]
pub struct CheckoutRequest {
    pub price_id: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

/// Keeps each user's billing customer and subscription in sync with the
/// provider. Without a provider every remote operation fails with
/// [`BillingError::NotConfigured`], except `subscribe`, which records a mock.
#[derive(Clone)]
pub struct BillingSync {
    store: Arc<dyn Store>,
    provider: Option<Arc<dyn BillingProvider>>,
    webhook_secret: Option<String>,
    public_url: String,
    default_price_id: Option<String>,
}

impl BillingSync {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Option<Arc<dyn BillingProvider>>,
        webhook_secret: Option<String>,
        public_url: impl Into<String>,
        default_price_id: Option<String>,
    ) -> Self {
        Self {
            store,
            provider,
            webhook_secret,
            public_url: public_url.into(),
            default_price_id,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    fn provider(&self) -> Result<&Arc<dyn BillingProvider>, BillingError> {
        self.provider.as_ref().ok_or(BillingError::NotConfigured)
    }

    /// Return the user's billing customer id, creating it on first use.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn ensure_customer(&self, user: &User) -> AppResult<String> {
        if let Some(id) = &user.billing_customer_id {
            return Ok(id.clone());
        }
        let provider = self.provider()?;
        let created = provider.create_customer(&user.email).await?;
        let stored = self
            .store
            .attach_billing_customer(user.id, &created)
            .await?;
        if stored != created {
            warn!(%created, %stored, "customer created concurrently; keeping the first");
        }
        Ok(stored)
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn portal_session(
        &self,
        user: &User,
        return_url: Option<String>,
    ) -> AppResult<String> {
        let provider = self.provider()?;
        let customer = self.ensure_customer(user).await?;
        let return_url = return_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| format!("{}/", self.public_url));
        let url = provider.create_portal_session(&customer, &return_url).await?;
        Ok(url)
    }

    #[instrument(skip(self, user, req), fields(user_id = %user.id))]
    pub async fn checkout_session(
        &self,
        user: &User,
        req: CheckoutRequest,
    ) -> AppResult<CheckoutSession> {
        let price_id = req
            .price_id
            .filter(|p| !p.is_empty())
            .or_else(|| self.default_price_id.clone())
            .ok_or_else(|| {
                AppError::Validation("Missing price_id and DEFAULT_PRICE_ID not set".into())
            })?;
        let provider = self.provider()?;
        let customer = self.ensure_customer(user).await?;

        let success = req
            .success_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| format!("{}/dashboard.html", self.public_url));
        let success = with_session_placeholder(&success);
        let cancel = req
            .cancel_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| format!("{}/signup.html", self.public_url));

        let session = provider
            .create_checkout_session(&customer, &price_id, &success, &cancel)
            .await?;
        info!(session_id = %session.id, %price_id, "checkout session created");
        Ok(session)
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn invoices(&self, user: &User) -> AppResult<Vec<Invoice>> {
        let provider = self.provider()?;
        let Some(customer) = &user.billing_customer_id else {
            return Ok(Vec::new());
        };
        Ok(provider.list_invoices(customer).await?)
    }

    /// Record an active subscription locally when no provider is configured.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn subscribe(&self, user: &User, plan: Option<String>) -> AppResult<Subscription> {
        if self.is_configured() {
            self.ensure_customer(user).await?;
            return Err(AppError::NotConfigured(
                "Use /api/create-checkout-session to start a subscription".into(),
            ));
        }
        let plan = plan
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PLAN.to_string());
        let subscription = Subscription {
            plan: Some(plan),
            status: Some("active".into()),
            started: Some(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        self.store
            .set_subscription(user.id, subscription.clone())
            .await?;
        info!(plan = ?subscription.plan, "mock subscription recorded");
        Ok(subscription)
    }

    /// Verify (when a signing secret is configured) and decode a raw webhook.
    pub fn parse_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<BillingEvent, BillingError> {
        match (&self.webhook_secret, signature) {
            (Some(secret), Some(signature)) => BillingEvent::verified(payload, signature, secret),
            (Some(_), None) => Err(BillingError::InvalidSignature(
                "missing signature header".into(),
            )),
            (None, _) => {
                warn!("webhook signing secret not set; accepting unsigned event");
                BillingEvent::unverified(payload)
            }
        }
    }

    /// Apply an event to local state. Returns whether a user was updated.
    /// Events for unknown customers are acknowledged without changes.
    #[instrument(skip(self, event), fields(kind = %event.kind()))]
    pub async fn handle_event(&self, event: BillingEvent) -> AppResult<bool> {
        let now = Some(OffsetDateTime::now_utc());
        let (customer, patch) = match event {
            BillingEvent::CheckoutCompleted {
                customer,
                subscription,
            } => (
                customer,
                Subscription {
                    status: Some("active".into()),
                    subscription_id: subscription,
                    updated: now,
                    ..Default::default()
                },
            ),
            BillingEvent::InvoicePaymentSucceeded { customer, invoice } => (
                customer,
                Subscription {
                    last_invoice: invoice,
                    updated: now,
                    ..Default::default()
                },
            ),
            BillingEvent::Other(kind) => {
                info!(%kind, "webhook event ignored");
                return Ok(false);
            }
        };

        let Some(customer) = customer else {
            warn!("webhook event without customer");
            return Ok(false);
        };
        match self
            .store
            .merge_subscription_by_customer(&customer, patch)
            .await?
        {
            Some(user_id) => {
                info!(%user_id, %customer, "subscription updated from webhook");
                Ok(true)
            }
            None => {
                warn!(%customer, "webhook event for unknown customer");
                Ok(false)
            }
        }
    }
}

/// Append the provider's session-id placeholder to a success URL.
fn with_session_placeholder(url: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}session_id={{CHECKOUT_SESSION_ID}}")
}
