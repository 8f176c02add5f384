#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header::AUTHORIZATION, header::CONTENT_TYPE, Request, Response},
    Router,
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use memberdesk::{
    app::build_app,
    billing::{BillingProvider, BillingResult, CheckoutSession, Invoice},
    config::AppConfig,
    state::AppState,
    store::{FileStore, Store},
};

pub const PASSWORD: &str = "Passw0rd!";

/// Billing provider double that hands out sequential ids.
#[derive(Default)]
pub struct FakeBilling {
    pub customers: Mutex<Vec<String>>,
}

#[async_trait]
impl BillingProvider for FakeBilling {
    async fn create_customer(&self, email: &str) -> BillingResult<String> {
        let mut customers = self.customers.lock().unwrap();
        customers.push(email.to_string());
        Ok(format!("cus_{}", customers.len()))
    }

    async fn create_portal_session(&self, customer_id: &str, _return_url: &str) -> BillingResult<String> {
        Ok(format!("https://billing.test/portal/{customer_id}"))
    }

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        _success_url: &str,
        _cancel_url: &str,
    ) -> BillingResult<CheckoutSession> {
        Ok(CheckoutSession {
            id: format!("cs_{customer_id}_{price_id}"),
            url: Some("https://billing.test/checkout".into()),
        })
    }

    async fn list_invoices(&self, _customer_id: &str) -> BillingResult<Vec<Invoice>> {
        Ok(vec![Invoice {
            id: "in_1".into(),
            amount_due: 1500,
            status: Some("paid".into()),
            pdf: Some("https://billing.test/in_1.pdf".into()),
        }])
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<dyn Store>,
}

impl TestApp {
    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

/// Unconfigured billing, in-memory store, demo reset tokens on.
pub fn build_test_app() -> TestApp {
    build_with(AppConfig::for_tests(), None)
}

pub fn build_test_app_with_billing(webhook_secret: Option<&str>) -> (TestApp, Arc<FakeBilling>) {
    let mut config = AppConfig::for_tests();
    config.stripe_webhook_secret = webhook_secret.map(str::to_string);
    config.default_price_id = Some("price_basic".into());
    let fake = Arc::new(FakeBilling::default());
    let app = build_with(config, Some(fake.clone() as Arc<dyn BillingProvider>));
    (app, fake)
}

pub fn build_with(config: AppConfig, provider: Option<Arc<dyn BillingProvider>>) -> TestApp {
    let store: Arc<dyn Store> = Arc::new(FileStore::in_memory());
    let state = AppState::from_parts(store.clone(), config, provider);
    TestApp {
        router: build_app(state),
        store,
    }
}

pub async fn send(app: Router, req: Request<Body>) -> Response<Body> {
    app.oneshot(req).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(
        app,
        Request::post(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

pub async fn post_json_auth(
    app: Router,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> Response<Body> {
    send(
        app,
        Request::post(uri)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

pub async fn post_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(
        app,
        Request::post(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(
        app,
        Request::get(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

pub async fn body_json(res: Response<Body>) -> serde_json::Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(res: Response<Body>) -> String {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Sign up and return the session token.
pub async fn signup(app: Router, email: &str, phone: &str) -> serde_json::Value {
    let res = post_json(
        app,
        "/api/signup",
        serde_json::json!({ "email": email, "password": PASSWORD, "phone": phone }),
    )
    .await;
    assert_eq!(res.status(), 200);
    body_json(res).await
}

pub async fn signup_token(app: Router, email: &str, phone: &str) -> String {
    signup(app, email, phone).await["token"]
        .as_str()
        .unwrap()
        .to_string()
}

/// A complete provider object with selected fields overridden.
pub fn stripe_object<T: Default + serde::Serialize>(tag: &str, fields: serde_json::Value) -> serde_json::Value {
    let mut value = serde_json::to_value(T::default()).unwrap();
    value["object"] = serde_json::json!(tag);
    for (k, v) in fields.as_object().unwrap() {
        value[k] = v.clone();
    }
    value
}

pub fn stripe_event(kind: &str, object: serde_json::Value) -> String {
    serde_json::json!({
        "id": "evt_test_1",
        "object": "event",
        "type": kind,
        "created": 1_700_000_000,
        "livemode": false,
        "pending_webhooks": 0,
        "data": { "object": object }
    })
    .to_string()
}

pub fn checkout_completed_event(customer: &str, subscription: &str) -> String {
    stripe_event(
        "checkout.session.completed",
        stripe_object::<stripe::CheckoutSession>(
            "checkout.session",
            serde_json::json!({ "id": "cs_test_1", "customer": customer, "subscription": subscription }),
        ),
    )
}

pub fn invoice_paid_event(customer: &str, invoice: &str) -> String {
    stripe_event(
        "invoice.payment_succeeded",
        stripe_object::<stripe::Invoice>(
            "invoice",
            serde_json::json!({ "id": invoice, "customer": customer }),
        ),
    )
}

pub fn customer_created_event(customer: &str) -> String {
    stripe_event(
        "customer.created",
        stripe_object::<stripe::Customer>("customer", serde_json::json!({ "id": customer })),
    )
}

/// `Stripe-Signature` header value for `payload`, signed now.
pub fn stripe_signature(secret: &str, payload: &str) -> String {
    use hmac::{Hmac, Mac};

    let timestamp = time::OffsetDateTime::now_utc().unix_timestamp();
    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}
