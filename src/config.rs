#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEnv {
    Development,
    Production,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("STRIPE_WEBHOOK_SECRET is required in production")]
    MissingWebhookSecret,

    #[error("BOOKD_GATEWAY_TOKEN is required in production")]
    MissingGatewayToken,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: RuntimeEnv,
    pub database_url: String,
    pub bind_addr: String,
    /// Presence switches the payment gateway from mock to live mode.
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub gateway_token: Option<String>,
    pub sweep_interval_secs: u64,
    pub payment_window_mins: i64,
    pub grace_window_mins: i64,
    pub pending_ttl_hours: i64,
    pub candidate_limit: i64,
    pub cancellation_fee_cents: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("APP_ENV")
            && value.eq_ignore_ascii_case("production")
        {
            config.env = RuntimeEnv::Production;
        }
        if let Ok(value) = std::env::var("DATABASE_URL")
            && !value.trim().is_empty()
        {
            config.database_url = value;
        }
        if let Ok(value) = std::env::var("BOOKD_BIND_ADDR")
            && !value.trim().is_empty()
        {
            config.bind_addr = value;
        }
        if let Ok(value) = std::env::var("STRIPE_SECRET_KEY")
            && !value.trim().is_empty()
        {
            config.stripe_secret_key = Some(value);
        }
        if let Ok(value) = std::env::var("STRIPE_WEBHOOK_SECRET")
            && !value.trim().is_empty()
        {
            config.stripe_webhook_secret = Some(value);
        }
        if let Ok(value) = std::env::var("BOOKD_GATEWAY_TOKEN")
            && !value.trim().is_empty()
        {
            config.gateway_token = Some(value);
        }
        if let Ok(value) = std::env::var("BOOKD_SWEEP_INTERVAL_SECS")
            && let Ok(parsed) = value.parse::<u64>()
        {
            config.sweep_interval_secs = parsed.max(1);
        }
        if let Ok(value) = std::env::var("BOOKD_PAYMENT_WINDOW_MINS")
            && let Ok(parsed) = value.parse::<i64>()
        {
            config.payment_window_mins = parsed.max(1);
        }
        if let Ok(value) = std::env::var("BOOKD_GRACE_WINDOW_MINS")
            && let Ok(parsed) = value.parse::<i64>()
        {
            config.grace_window_mins = parsed.max(1);
        }
        if let Ok(value) = std::env::var("BOOKD_PENDING_TTL_HOURS")
            && let Ok(parsed) = value.parse::<i64>()
        {
            config.pending_ttl_hours = parsed.max(1);
        }

        config
    }

    /// Fatal configuration checks. In production the webhook secret and the
    /// gateway token are mandatory; the process refuses to start without
    /// them rather than falling back to the development shortcuts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.env == RuntimeEnv::Production {
            if self.stripe_webhook_secret.is_none() {
                return Err(ConfigError::MissingWebhookSecret);
            }
            if self.gateway_token.is_none() {
                return Err(ConfigError::MissingGatewayToken);
            }
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.env == RuntimeEnv::Production
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: RuntimeEnv::Development,
            database_url: "sqlite:bookd.db".to_string(),
            bind_addr: "127.0.0.1:3000".to_string(),
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            gateway_token: None,
            sweep_interval_secs: 60,
            payment_window_mins: 15,
            grace_window_mins: 30,
            pending_ttl_hours: 24,
            candidate_limit: 5,
            cancellation_fee_cents: 1000,
        }
    }
}
