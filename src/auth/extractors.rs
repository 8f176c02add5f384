use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use crate::{error::AppError, state::AppState, store::User};

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
}

/// Extractor wrapper; handlers take `AuthUser(current)` as an argument.
pub struct AuthUser(pub CurrentUser);

/// The raw bearer token, present but not checked against the session store.
pub struct BearerToken(pub String);

pub(crate) fn bearer_token(parts: &Parts) -> Option<&str> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(AppError::unauthorized)?;
        let user_id = state.sessions.validate(token).await?;

        let Some(user) = state.store.find_user(user_id).await? else {
            warn!(%user_id, "session points at a missing user");
            return Err(AppError::unauthorized());
        };

        Ok(AuthUser(CurrentUser { user }))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        bearer_token(parts)
            .map(|token| BearerToken(token.to_string()))
            .ok_or_else(AppError::unauthorized)
    }
}
