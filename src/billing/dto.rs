use serde::{Deserialize, Serialize};

use super::{service::CheckoutRequest, Invoice};
use crate::store::Subscription;

#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct InvoicesResponse {
    pub invoices: Vec<Invoice>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub plan: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub ok: bool,
    pub subscription: Subscription,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutSessionRequest {
    #[serde(default)]
    pub price_id: Option<String>,
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

impl From<CheckoutSessionRequest> for CheckoutRequest {
    fn from(r: CheckoutSessionRequest) -> Self {
        Self {
            price_id: r.price_id,
            success_url: r.success_url,
            cancel_url: r.cancel_url,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckoutSessionResponse {
    pub ok: bool,
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PortalSessionRequest {
    #[serde(default)]
    pub return_url: Option<String>,
}
