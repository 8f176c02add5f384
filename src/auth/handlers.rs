use axum::{extract::State, routing::post, Json, Router};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            LoginRequest, LoginResponse, OkResponse, ResetPasswordRequest, ResetRequest,
            ResetRequestResponse, SignupRequest, SignupResponse,
        },
        extractors::BearerToken,
        password::{hash_password, is_acceptable_password, verify_password, MIN_PASSWORD_LEN},
        services::is_valid_email,
        trial::normalize_phone,
    },
    error::{ApiJson, AppError, AppResult},
    state::AppState,
    store::{normalize_email, NewUser},
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/signup", post(signup))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/request-password-reset", post(request_password_reset))
        .route("/api/reset-password", post(reset_password))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SignupRequest>,
) -> AppResult<Json<SignupResponse>> {
    let email = normalize_email(&payload.email);
    let phone = normalize_phone(&payload.phone);
    if email.is_empty() || payload.password.is_empty() || phone.is_empty() {
        return Err(AppError::Validation("email,password,phone required".into()));
    }
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(AppError::Validation("invalid email".into()));
    }
    if !is_acceptable_password(&payload.password) {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    if state.store.find_user_by_email(&email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(AppError::Conflict("email already exists".into()));
    }

    let password_hash = hash_password(&payload.password)?;
    let offer = state.trial.evaluate(&phone, OffsetDateTime::now_utc());
    let user = state
        .store
        .create_user(
            NewUser {
                email,
                password_hash,
                phone,
            },
            Some(offer),
        )
        .await?;

    let token = state.sessions.issue(user.id).await?;
    let trial_expires = user.trial_expires;

    info!(user_id = %user.id, email = %user.email, free_trial = trial_expires.is_some(), "user signed up");
    Ok(Json(SignupResponse {
        ok: true,
        token,
        free_trial: trial_expires.is_some(),
        trial_expires,
    }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let email = normalize_email(&payload.email);
    if email.is_empty() || payload.password.is_empty() {
        return Err(AppError::Validation("email,password required".into()));
    }

    let invalid = || AppError::Unauthorized("invalid credentials".into());

    let Some(user) = state.store.find_user_by_email(&email).await? else {
        warn!(%email, "login unknown email");
        return Err(invalid());
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(%email, user_id = %user.id, "login invalid password");
        return Err(invalid());
    }

    let token = state.sessions.issue(user.id).await?;
    info!(user_id = %user.id, %email, "user logged in");
    Ok(Json(LoginResponse {
        ok: true,
        token,
        email: user.email,
    }))
}

/// Revoking a token that is already gone still succeeds.
#[instrument(skip(state, token))]
pub async fn logout(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> AppResult<Json<OkResponse>> {
    state.sessions.revoke(&token).await?;
    info!("user logged out");
    Ok(Json(OkResponse::ok()))
}

#[instrument(skip(state, payload))]
pub async fn request_password_reset(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ResetRequest>,
) -> AppResult<Json<ResetRequestResponse>> {
    let email = normalize_email(&payload.email);
    if email.is_empty() {
        return Err(AppError::Validation("email required".into()));
    }

    let token = state.resets.request_reset(&email).await?;

    // Delivery of the token is out of band; only demo mode echoes it.
    let reset_token = token.filter(|_| state.config.reset_token_in_response);
    Ok(Json(ResetRequestResponse {
        ok: true,
        reset_token,
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ResetPasswordRequest>,
) -> AppResult<Json<OkResponse>> {
    if payload.token.is_empty() || payload.password.is_empty() {
        return Err(AppError::Validation("token and password required".into()));
    }
    if !is_acceptable_password(&payload.password) {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    state
        .resets
        .consume_reset(&payload.token, &payload.password)
        .await?;
    Ok(Json(OkResponse::ok()))
}
