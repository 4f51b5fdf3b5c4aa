use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
};
use chrono::Utc;

use crate::{
    error::ApiError,
    payment::{self, store::PAYMENT_PROVIDER},
    state::AppState,
    store::StoreError,
    types::WebhookAck,
    webhook,
};

const SIGNATURE_HEADER: &str = "stripe-signature";

/// Signed payment-provider webhook entrypoint. Signature verification
/// happens here, before the idempotency ledger; the ledger then guarantees
/// the event's effects apply exactly once.
pub async fn webhook_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    if provider != "stripe" {
        return Err(ApiError::not_found("unknown webhook provider"));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    webhook::verify_signature(
        state.config.stripe_webhook_secret.as_deref(),
        signature,
        &body,
        Utc::now(),
    )
    .map_err(|err| ApiError::unauthorized(err.to_string()))?;

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::validation("body must be valid JSON"))?;

    let event_id = payload
        .get("id")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::validation("missing event id"))?
        .to_string();
    let event_type = payload
        .get("type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();
    let object_ref = payload
        .pointer("/data/object/id")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    let status = webhook::process_event(
        &state.pool,
        &provider,
        &event_id,
        &payload,
        move |conn, _payload| {
            Box::pin(async move {
                match event_type.as_str() {
                    "payment_intent.succeeded" | "payment_intent.amount_capturable_updated" => {
                        let provider_ref = object_ref.as_deref().ok_or_else(|| {
                            StoreError::Validation("missing payment intent id".to_string())
                        })?;
                        payment::on_authorization_success(conn, PAYMENT_PROVIDER, provider_ref)
                            .await
                    }
                    "payment_intent.payment_failed" => {
                        let provider_ref = object_ref.as_deref().ok_or_else(|| {
                            StoreError::Validation("missing payment intent id".to_string())
                        })?;
                        payment::mark_authorization_failed(
                            conn,
                            PAYMENT_PROVIDER,
                            provider_ref,
                            Some("payment_intent.payment_failed"),
                        )
                        .await
                    }
                    other => {
                        // Acknowledged without effect so the provider stops
                        // retrying event types the core does not consume.
                        tracing::debug!(event_type = other, "ignoring webhook event type");
                        Ok(())
                    }
                }
            })
        },
    )
    .await?;

    Ok(Json(WebhookAck { status }))
}
