//! One free trial per phone number, ever.
//!
//! [`TrialPolicy::evaluate`] builds the offer; whether it is granted is decided
//! by the store, which claims the phone and creates the user in one atomic
//! step (see [`Store::create_user`](crate::store::Store::create_user)).

use time::{Duration, OffsetDateTime};

use crate::store::TrialOffer;

#[derive(Debug, Clone, Copy)]
pub struct TrialPolicy {
    pub length: Duration,
}

impl TrialPolicy {
    pub fn new(length: Duration) -> Self {
        Self { length }
    }

    pub fn evaluate(&self, phone: &str, now: OffsetDateTime) -> TrialOffer {
        TrialOffer {
            phone: normalize_phone(phone),
            expires: now + self.length,
        }
    }
}

impl Default for TrialPolicy {
    fn default() -> Self {
        Self::new(Duration::days(7))
    }
}

pub fn normalize_phone(phone: &str) -> String {
    phone.trim().to_string()
}
