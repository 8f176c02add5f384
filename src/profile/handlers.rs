use axum::{extract::State, routing::get, Json, Router};
use tracing::{info, instrument};

use super::dto::{ProfileResponse, UpdateProfileRequest};
use crate::{
    auth::{
        dto::OkResponse,
        extractors::AuthUser,
        password::{hash_password, is_acceptable_password, MIN_PASSWORD_LEN},
    },
    error::{ApiJson, AppError, AppResult},
    state::AppState,
};

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/api/profile", get(get_profile).post(update_profile))
}

#[instrument(skip(current))]
pub async fn get_profile(AuthUser(current): AuthUser) -> AppResult<Json<ProfileResponse>> {
    Ok(Json(ProfileResponse {
        ok: true,
        profile: current.user.into(),
    }))
}

#[instrument(skip(state, current, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
    ApiJson(payload): ApiJson<UpdateProfileRequest>,
) -> AppResult<Json<OkResponse>> {
    let user_id = current.user.id;
    let password = payload.password.as_deref().filter(|p| !p.is_empty());
    if password.is_some_and(|p| !is_acceptable_password(p)) {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let fields = payload.profile_fields();
    if !fields.is_empty() {
        state.store.update_profile(user_id, fields).await?;
    }

    if let Some(password) = password {
        let hash = hash_password(password)?;
        state.store.set_password_hash(user_id, &hash).await?;
        info!(%user_id, "password changed from profile");
    }

    info!(%user_id, "profile updated");
    Ok(Json(OkResponse::ok()))
}
