use std::path::PathBuf;

/// Stripe API access. Present only when `STRIPE_SECRET_KEY` is set.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    /// Alternate API host such as a local stripe-mock; the `/v1` root is
    /// appended by the client.
    pub api_base: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres connection string; when absent the JSON file store is used.
    pub database_url: Option<String>,
    pub data_file: PathBuf,
    /// Base URL used to build default redirect targets for Stripe.
    pub public_url: String,
    pub session_ttl_days: i64,
    pub reset_ttl_minutes: i64,
    pub trial_days: i64,
    /// Demo mode: echo the reset token back in the response body.
    pub reset_token_in_response: bool,
    pub stripe: Option<StripeConfig>,
    /// Webhook signing secret, independent of the API key.
    pub stripe_webhook_secret: Option<String>,
    pub default_price_id: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_base = non_empty_var("STRIPE_API_BASE");
        if let Some(base) = &api_base {
            anyhow::ensure!(
                base.starts_with("http://") || base.starts_with("https://"),
                "STRIPE_API_BASE must be an http(s) URL, got {base}"
            );
        }
        let stripe = non_empty_var("STRIPE_SECRET_KEY").map(|secret_key| StripeConfig {
            secret_key,
            api_base,
            timeout_secs: parse_var("BILLING_TIMEOUT_SECS", 10),
        });

        let public_url = std::env::var("PUBLIC_URL").unwrap_or_else(|_| {
            format!(
                "http://localhost:{}",
                std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
            )
        });

        Ok(Self {
            database_url: non_empty_var("DATABASE_URL"),
            data_file: std::env::var("DATA_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/db.json")),
            public_url: public_url.trim_end_matches('/').to_string(),
            session_ttl_days: parse_var("SESSION_TTL_DAYS", 7),
            reset_ttl_minutes: parse_var("RESET_TTL_MINUTES", 60),
            trial_days: parse_var("TRIAL_DAYS", 7),
            reset_token_in_response: std::env::var("RESET_TOKEN_IN_RESPONSE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            stripe,
            stripe_webhook_secret: non_empty_var("STRIPE_WEBHOOK_SECRET"),
            default_price_id: non_empty_var("DEFAULT_PRICE_ID"),
        })
    }

    /// Defaults for tests and local tooling: in-memory friendly, billing off.
    pub fn for_tests() -> Self {
        Self {
            database_url: None,
            data_file: PathBuf::from("data/test.json"),
            public_url: "http://localhost:8080".into(),
            session_ttl_days: 7,
            reset_ttl_minutes: 60,
            trial_days: 7,
            reset_token_in_response: true,
            stripe: None,
            stripe_webhook_secret: None,
            default_price_id: None,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
