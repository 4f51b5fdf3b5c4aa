//! Webhook idempotency ledger.
//!
//! For any `(provider, event_id)` pair the handler runs at most once with a
//! committed PROCESSED outcome. Duplicate deliveries return `Duplicate`
//! without re-running the handler; a failing handler leaves a retriable
//! FAILED row and no partial effects.

use chrono::Utc;
use futures::future::BoxFuture;
use sqlx::{SqliteConnection, SqlitePool};

use crate::store::{StoreError, format_utc};
use crate::types::{ProcessOutcome, WebhookStatus};

/// Runs `handler` under the ledger's transaction.
///
/// The upsert is deliberately the transaction's first statement: it is a
/// write, so it takes the database lock and concurrent deliveries of the
/// same event serialize here, each observing the committed status of the
/// previous one. Only the handler's success commits the PROCESSED mark —
/// and the handler's own effects — atomically. On handler failure the
/// transaction rolls back (discarding any partial effects) and a fresh,
/// short transaction records the FAILED row before the error propagates.
pub async fn process_event(
    pool: &SqlitePool,
    provider: &str,
    event_id: &str,
    payload: &serde_json::Value,
    handler: impl for<'c> FnOnce(
        &'c mut SqliteConnection,
        serde_json::Value,
    ) -> BoxFuture<'c, Result<(), StoreError>>,
) -> Result<ProcessOutcome, StoreError> {
    let payload_text = serde_json::to_string(payload)
        .map_err(|err| StoreError::Parse(format!("invalid webhook payload: {err}")))?;
    let now = format_utc(Utc::now());

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO webhook_events (provider, event_id, status, payload, last_error, first_seen_at, last_seen_at)
        VALUES (?, ?, ?, ?, NULL, ?, ?)
        ON CONFLICT (provider, event_id) DO UPDATE SET
            last_seen_at = excluded.last_seen_at
        "#,
    )
    .bind(provider)
    .bind(event_id)
    .bind(WebhookStatus::Pending.as_str())
    .bind(&payload_text)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    let (status,): (String,) =
        sqlx::query_as("SELECT status FROM webhook_events WHERE provider = ? AND event_id = ?")
            .bind(provider)
            .bind(event_id)
            .fetch_one(&mut *tx)
            .await?;
    let status = WebhookStatus::parse(&status)
        .ok_or_else(|| StoreError::Parse(format!("unknown webhook status: {status}")))?;

    if status == WebhookStatus::Processed {
        tx.commit().await?;
        tracing::info!(provider, event_id, "duplicate webhook delivery suppressed");
        return Ok(ProcessOutcome::Duplicate);
    }

    if status == WebhookStatus::Failed {
        sqlx::query(
            "UPDATE webhook_events SET status = ?, last_error = NULL WHERE provider = ? AND event_id = ?",
        )
        .bind(WebhookStatus::Pending.as_str())
        .bind(provider)
        .bind(event_id)
        .execute(&mut *tx)
        .await?;
    }

    let handled = handler(&mut *tx, payload.clone()).await;
    match handled {
        Ok(()) => {
            sqlx::query(
                "UPDATE webhook_events SET status = ?, last_seen_at = ? WHERE provider = ? AND event_id = ?",
            )
            .bind(WebhookStatus::Processed.as_str())
            .bind(&now)
            .bind(provider)
            .bind(event_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            tracing::info!(provider, event_id, "webhook processed");
            Ok(ProcessOutcome::Processed)
        }
        Err(err) => {
            tx.rollback().await?;
            record_failure(pool, provider, event_id, &payload_text, &err, &now).await?;
            tracing::warn!(provider, event_id, error = ?err, "webhook handler failed");
            Err(err)
        }
    }
}

/// Persists the FAILED row after the main transaction rolled back. Guarded
/// so a concurrent delivery that managed to process the event in the
/// meantime is not demoted.
async fn record_failure(
    pool: &SqlitePool,
    provider: &str,
    event_id: &str,
    payload_text: &str,
    err: &StoreError,
    now: &str,
) -> Result<(), StoreError> {
    let message = format!("{err:?}");

    sqlx::query(
        r#"
        INSERT INTO webhook_events (provider, event_id, status, payload, last_error, first_seen_at, last_seen_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (provider, event_id) DO UPDATE SET
            status = CASE
                WHEN webhook_events.status = 'PROCESSED' THEN webhook_events.status
                ELSE excluded.status
            END,
            last_error = CASE
                WHEN webhook_events.status = 'PROCESSED' THEN webhook_events.last_error
                ELSE excluded.last_error
            END,
            last_seen_at = excluded.last_seen_at
        "#,
    )
    .bind(provider)
    .bind(event_id)
    .bind(WebhookStatus::Failed.as_str())
    .bind(payload_text)
    .bind(&message)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}
