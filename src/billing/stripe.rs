//! Stripe provider on `async-stripe`. Every call carries the configured
//! timeout; failures are logged here and surfaced unchanged.

use std::{future::Future, time::Duration};

use ::stripe::{
    BillingPortalSession, CheckoutSessionMode, Client, CreateBillingPortalSession,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCustomer, Customer, CustomerId,
    InvoiceId, ListInvoices, StripeError,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info};

use super::{BillingError, BillingProvider, BillingResult, CheckoutSession, Invoice};
use crate::config::StripeConfig;

const INVOICE_PAGE_SIZE: u64 = 100;

pub struct StripeProvider {
    client: Client,
    timeout: Duration,
}

/// The invoice fields we keep, read from the provider's own serialization.
#[derive(Debug, Deserialize)]
struct RawInvoice {
    id: String,
    #[serde(default)]
    amount_due: i64,
    status: Option<String>,
    invoice_pdf: Option<String>,
}

impl From<RawInvoice> for Invoice {
    fn from(r: RawInvoice) -> Self {
        Self {
            id: r.id,
            amount_due: r.amount_due,
            status: r.status,
            pdf: r.invoice_pdf,
        }
    }
}

fn to_invoice(invoice: &::stripe::Invoice) -> BillingResult<Invoice> {
    serde_json::to_value(invoice)
        .and_then(serde_json::from_value::<RawInvoice>)
        .map(Invoice::from)
        .map_err(|e| BillingError::Provider(format!("unexpected invoice shape: {e}")))
}

fn parse_customer(id: &str) -> BillingResult<CustomerId> {
    id.parse()
        .map_err(|_| BillingError::Provider(format!("invalid customer id {id}")))
}

impl StripeProvider {
    pub fn new(config: &StripeConfig) -> Self {
        let client = match &config.api_base {
            Some(base) => Client::from_url(base.as_str(), config.secret_key.as_str()),
            None => Client::new(config.secret_key.as_str()),
        };
        Self {
            client,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        request: impl Future<Output = Result<T, StripeError>>,
    ) -> BillingResult<T> {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(operation, error = %e, "stripe request failed");
                Err(e.into())
            }
            Err(_) => {
                error!(operation, timeout = ?self.timeout, "stripe request timed out");
                Err(BillingError::Provider(format!("{operation} timed out")))
            }
        }
    }
}

#[async_trait]
impl BillingProvider for StripeProvider {
    async fn create_customer(&self, email: &str) -> BillingResult<String> {
        let params = CreateCustomer {
            email: Some(email),
            ..Default::default()
        };
        let customer = self
            .call("create_customer", Customer::create(&self.client, params))
            .await?;
        info!(customer_id = %customer.id, "stripe customer created");
        Ok(customer.id.to_string())
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<String> {
        let mut params = CreateBillingPortalSession::new(parse_customer(customer_id)?);
        params.return_url = Some(return_url);
        let session = self
            .call(
                "create_portal_session",
                BillingPortalSession::create(&self.client, params),
            )
            .await?;
        Ok(session.url)
    }

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> BillingResult<CheckoutSession> {
        let params = CreateCheckoutSession {
            mode: Some(CheckoutSessionMode::Subscription),
            customer: Some(parse_customer(customer_id)?),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(price_id.to_string()),
                quantity: Some(1),
                ..Default::default()
            }]),
            success_url: Some(success_url),
            cancel_url: Some(cancel_url),
            ..Default::default()
        };
        let session = self
            .call(
                "create_checkout_session",
                ::stripe::CheckoutSession::create(&self.client, params),
            )
            .await?;
        info!(session_id = %session.id, %customer_id, "stripe checkout session created");
        Ok(CheckoutSession {
            id: session.id.to_string(),
            url: session.url,
        })
    }

    async fn list_invoices(&self, customer_id: &str) -> BillingResult<Vec<Invoice>> {
        let customer = parse_customer(customer_id)?;
        let mut invoices: Vec<Invoice> = Vec::new();
        let mut starting_after: Option<InvoiceId> = None;
        loop {
            let params = ListInvoices {
                customer: Some(customer.clone()),
                limit: Some(INVOICE_PAGE_SIZE),
                starting_after: starting_after.take(),
                ..Default::default()
            };
            let page = self
                .call("list_invoices", ::stripe::Invoice::list(&self.client, &params))
                .await?;
            let before = invoices.len();
            for invoice in &page.data {
                invoices.push(to_invoice(invoice)?);
            }
            starting_after = invoices[before..]
                .last()
                .and_then(|last| last.id.parse().ok());
            if !page.has_more || starting_after.is_none() {
                break;
            }
        }
        debug!(%customer_id, count = invoices.len(), "stripe invoices listed");
        Ok(invoices)
    }
}
