//! Stripe webhook decoding.
//!
//! Signed payloads go through `stripe::Webhook::construct_event`, which checks
//! the `Stripe-Signature` header (HMAC-SHA256 over `{t}.{raw body}`, five
//! minute tolerance) before parsing. The typed event is then reduced to the
//! few cases the synchronizer acts on.

use ::stripe::{Event, EventObject, EventType, Webhook, WebhookError};
use serde::Serialize;

use super::BillingError;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// The webhook events the synchronizer acts on, decoded once at the edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    CheckoutCompleted {
        customer: Option<String>,
        subscription: Option<String>,
    },
    InvoicePaymentSucceeded {
        customer: Option<String>,
        invoice: Option<String>,
    },
    Other(String),
}

/// Render a provider id (plain or optional) as a string.
fn id_string<T: Serialize>(id: &T) -> Option<String> {
    serde_json::to_value(id)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
}

fn event_name(kind: &EventType) -> String {
    id_string(kind).unwrap_or_else(|| format!("{kind:?}"))
}

impl BillingEvent {
    /// Check `signature` against the raw `payload`, then decode it.
    pub fn verified(payload: &[u8], signature: &str, secret: &str) -> Result<Self, BillingError> {
        let body = std::str::from_utf8(payload)
            .map_err(|e| BillingError::InvalidPayload(e.to_string()))?;
        let event = Webhook::construct_event(body, signature, secret).map_err(|e| match e {
            WebhookError::BadParse(e) => BillingError::InvalidPayload(e.to_string()),
            other => BillingError::InvalidSignature(other.to_string()),
        })?;
        Ok(Self::from(event))
    }

    /// Decode a payload that carries no signature.
    pub fn unverified(payload: &[u8]) -> Result<Self, BillingError> {
        let event: Event = serde_json::from_slice(payload)
            .map_err(|e| BillingError::InvalidPayload(e.to_string()))?;
        Ok(Self::from(event))
    }

    pub fn kind(&self) -> &str {
        match self {
            BillingEvent::CheckoutCompleted { .. } => "checkout.session.completed",
            BillingEvent::InvoicePaymentSucceeded { .. } => "invoice.payment_succeeded",
            BillingEvent::Other(kind) => kind,
        }
    }
}

impl From<Event> for BillingEvent {
    fn from(event: Event) -> Self {
        match (event.type_, event.data.object) {
            (EventType::CheckoutSessionCompleted, EventObject::CheckoutSession(session)) => {
                BillingEvent::CheckoutCompleted {
                    customer: session.customer.as_ref().map(|c| c.id().to_string()),
                    subscription: session.subscription.as_ref().map(|s| s.id().to_string()),
                }
            }
            (EventType::InvoicePaymentSucceeded, EventObject::Invoice(invoice)) => {
                BillingEvent::InvoicePaymentSucceeded {
                    customer: invoice.customer.as_ref().map(|c| c.id().to_string()),
                    invoice: id_string(&invoice.id),
                }
            }
            (kind, _) => BillingEvent::Other(event_name(&kind)),
        }
    }
}
