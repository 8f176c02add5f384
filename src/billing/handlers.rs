use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use tracing::{info, instrument, warn};

use super::{
    dto::{
        CheckoutSessionRequest, CheckoutSessionResponse, InvoicesResponse, PortalSessionRequest,
        SubscribeRequest, SubscribeResponse, UrlResponse,
    },
    webhook::SIGNATURE_HEADER,
};
use crate::{
    auth::{dto::OkResponse, extractors::AuthUser},
    error::{ApiJson, AppResult},
    state::AppState,
};

pub fn billing_routes() -> Router<AppState> {
    Router::new()
        .route("/api/create-portal-session", post(create_portal_session))
        .route("/api/invoices", get(list_invoices))
        .route("/api/subscribe", post(subscribe))
        .route("/api/create-checkout-session", post(create_checkout_session))
        .route("/webhook", post(webhook))
}

#[instrument(skip(state, current, payload))]
pub async fn create_portal_session(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
    payload: Option<ApiJson<PortalSessionRequest>>,
) -> AppResult<Json<UrlResponse>> {
    let req = payload.map(|ApiJson(r)| r).unwrap_or_default();
    let url = state
        .billing
        .portal_session(&current.user, req.return_url)
        .await?;
    Ok(Json(UrlResponse { url }))
}

#[instrument(skip(state, current))]
pub async fn list_invoices(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
) -> AppResult<Json<InvoicesResponse>> {
    let invoices = state.billing.invoices(&current.user).await?;
    Ok(Json(InvoicesResponse { invoices }))
}

#[instrument(skip(state, current, payload))]
pub async fn subscribe(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
    payload: Option<ApiJson<SubscribeRequest>>,
) -> AppResult<Json<SubscribeResponse>> {
    let req = payload.map(|ApiJson(r)| r).unwrap_or_default();
    let subscription = state.billing.subscribe(&current.user, req.plan).await?;
    Ok(Json(SubscribeResponse {
        ok: true,
        subscription,
    }))
}

#[instrument(skip(state, current, payload))]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
    payload: Option<ApiJson<CheckoutSessionRequest>>,
) -> AppResult<Json<CheckoutSessionResponse>> {
    let req = payload.map(|ApiJson(r)| r).unwrap_or_default();
    let session = state
        .billing
        .checkout_session(&current.user, req.into())
        .await?;
    Ok(Json(CheckoutSessionResponse {
        ok: true,
        id: session.id,
        url: session.url,
    }))
}

/// Provider callback. The body is taken raw so the signature covers the exact
/// bytes that were sent.
#[instrument(skip(state, headers, body))]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<OkResponse>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let event = state
        .billing
        .parse_webhook(&body, signature)
        .inspect_err(|e| warn!(error = %e, "webhook rejected"))?;

    let kind = event.kind().to_string();
    let applied = state.billing.handle_event(event).await?;
    info!(%kind, applied, "webhook processed");
    Ok(Json(OkResponse::ok()))
}
