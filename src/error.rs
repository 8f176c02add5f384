use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::{billing::BillingError, store::StoreError};

/// Error returned by every handler. Rendered as `{"error": "<message>"}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    TokenExpired,

    #[error("{0}")]
    NotConfigured(String),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error(transparent)]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

/// `Json` whose rejection renders through [`AppError`] like every other error.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl AppError {
    pub fn unauthorized() -> Self {
        AppError::Unauthorized("Unauthorized".into())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => AppError::Conflict("email already exists".into()),
            StoreError::UserNotFound(_) => AppError::NotFound("user not found".into()),
            other => AppError::Store(other),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::Conflict(_)
            | AppError::InvalidToken
            | AppError::TokenExpired => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotConfigured(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::Billing(BillingError::NotConfigured) => StatusCode::NOT_IMPLEMENTED,
            AppError::Billing(BillingError::InvalidSignature(_))
            | AppError::Billing(BillingError::InvalidPayload(_)) => StatusCode::BAD_REQUEST,
            AppError::Billing(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Store(e) => {
                error!(error = %e, "store failure");
                "internal error".to_string()
            }
            AppError::Internal(e) => {
                error!(error = %e, "internal failure");
                "internal error".to_string()
            }
            AppError::Billing(e @ (BillingError::Provider(_) | BillingError::Stripe(_))) => {
                error!(error = %e, "billing provider failure");
                "billing provider error".to_string()
            }
            AppError::Billing(BillingError::InvalidSignature(_))
            | AppError::Billing(BillingError::InvalidPayload(_)) => "invalid webhook".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
