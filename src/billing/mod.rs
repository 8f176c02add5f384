//! Billing state synchronizer.
//!
//! [`BillingProvider`] abstracts the payment provider (Stripe in production);
//! [`BillingSync`] owns the local side: lazy customer creation, portal and
//! checkout sessions, the mock subscription fallback and webhook events.

use async_trait::async_trait;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

pub mod dto;
pub mod handlers;
pub mod service;
pub mod stripe;
pub mod webhook;

pub use service::{BillingSync, CheckoutRequest};
pub use stripe::StripeProvider;
pub use webhook::BillingEvent;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Stripe not configured on server. Set STRIPE_SECRET_KEY environment variable.")]
    NotConfigured,

    #[error("billing provider error: {0}")]
    Provider(String),

    #[error("stripe request failed: {0}")]
    Stripe(#[from] ::stripe::StripeError),

    #[error("webhook signature rejected: {0}")]
    InvalidSignature(String),

    #[error("webhook payload rejected: {0}")]
    InvalidPayload(String),
}

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub amount_due: i64,
    pub status: Option<String>,
    pub pdf: Option<String>,
}

/// Remote payment provider operations. Implementations must not retry on
/// their own; failures are surfaced to the caller.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn create_customer(&self, email: &str) -> BillingResult<String>;

    async fn create_portal_session(&self, customer_id: &str, return_url: &str)
        -> BillingResult<String>;

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> BillingResult<CheckoutSession>;

    async fn list_invoices(&self, customer_id: &str) -> BillingResult<Vec<Invoice>>;
}

pub fn router() -> Router<AppState> {
    handlers::billing_routes()
}
