use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod password;
pub mod reset;
pub(crate) mod services;
pub mod session;
pub mod trial;

pub use extractors::{AuthUser, CurrentUser};
pub use reset::PasswordResetManager;
pub use session::SessionManager;
pub use trial::TrialPolicy;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
