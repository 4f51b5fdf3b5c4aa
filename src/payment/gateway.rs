use serde_json::Value;
use uuid::Uuid;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";
const MOCK_REF_PREFIX: &str = "pi_mock_";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("payment provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("payment provider response missing {0}")]
    Malformed(&'static str),
}

/// Thin client for the payment provider. With a secret key configured it
/// speaks the Stripe REST API (authorizations are created with manual
/// capture so funds are held, not taken); without one it mints
/// `pi_mock_` references and performs no network I/O, which is also the
/// path every mock reference takes regardless of configuration.
#[derive(Debug, Clone)]
pub struct PaymentGateway {
    secret_key: Option<String>,
    http: reqwest::Client,
}

impl PaymentGateway {
    pub fn new(secret_key: Option<String>) -> Self {
        Self {
            secret_key,
            http: reqwest::Client::new(),
        }
    }

    /// Mock-mode gateway for tests and development.
    pub fn mock() -> Self {
        Self::new(None)
    }

    pub fn is_live(&self) -> bool {
        self.secret_key.is_some()
    }

    pub fn is_mock_ref(provider_ref: &str) -> bool {
        provider_ref.starts_with(MOCK_REF_PREFIX)
    }

    /// Requests a hold for the amount and returns the provider reference.
    pub async fn authorize(&self, amount_cents: i64, currency: &str) -> Result<String, GatewayError> {
        let Some(key) = &self.secret_key else {
            return Ok(format!("{MOCK_REF_PREFIX}{}", Uuid::new_v4().simple()));
        };

        let body = self
            .post_form(
                key,
                &format!("{STRIPE_API_BASE}/payment_intents"),
                &[
                    ("amount", amount_cents.to_string().as_str()),
                    ("currency", currency.to_lowercase().as_str()),
                    ("capture_method", "manual"),
                    ("payment_method_types[]", "card"),
                ],
            )
            .await?;

        let provider_ref = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or(GatewayError::Malformed("id"))?
            .to_string();

        tracing::info!(provider_ref = %provider_ref, amount_cents, "payment authorization requested");
        Ok(provider_ref)
    }

    /// Converts a held authorization into a charge. Mock references
    /// short-circuit.
    pub async fn capture(&self, provider_ref: &str) -> Result<(), GatewayError> {
        let Some(key) = self.live_key_for(provider_ref) else {
            return Ok(());
        };

        self.post_form(
            key,
            &format!("{STRIPE_API_BASE}/payment_intents/{provider_ref}/capture"),
            &[],
        )
        .await?;

        tracing::info!(provider_ref = %provider_ref, "payment captured");
        Ok(())
    }

    /// Voids a held authorization. Mock references short-circuit.
    pub async fn void(&self, provider_ref: &str) -> Result<(), GatewayError> {
        let Some(key) = self.live_key_for(provider_ref) else {
            return Ok(());
        };

        self.post_form(
            key,
            &format!("{STRIPE_API_BASE}/payment_intents/{provider_ref}/cancel"),
            &[],
        )
        .await?;

        tracing::info!(provider_ref = %provider_ref, "payment authorization voided");
        Ok(())
    }

    fn live_key_for(&self, provider_ref: &str) -> Option<&str> {
        if Self::is_mock_ref(provider_ref) {
            return None;
        }
        self.secret_key.as_deref()
    }

    async fn post_form(
        &self,
        key: &str,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<Value, GatewayError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(key)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<Value>().await?)
    }
}
