use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::store::{Subscription, User, PROFILE_FIELDS};

/// What the profile endpoint exposes. Never carries the password hash.
#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub email: String,
    pub phone: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_expires: Option<OffsetDateTime>,
    pub billing_customer_id: Option<String>,
    pub subscription: Option<Subscription>,
    pub profile: Map<String, Value>,
}

impl From<User> for ProfileView {
    fn from(u: User) -> Self {
        Self {
            email: u.email,
            phone: u.phone,
            trial_expires: u.trial_expires,
            billing_customer_id: u.billing_customer_id,
            subscription: u.subscription,
            profile: u.profile,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub ok: bool,
    pub profile: ProfileView,
}

/// Body of `POST /api/profile`. Unknown keys are collected and dropped.
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl UpdateProfileRequest {
    /// Only the writable display fields that were actually supplied.
    pub fn profile_fields(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|(k, _)| PROFILE_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
