//! Background maintenance: expiring unpaid bookings past their TTL and
//! closing COMPLETE_PENDING bookings whose grace window has lapsed. Both
//! passes are conditional updates on current status, so they are safe to
//! run concurrently with request-path mutators and with each other.

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::auth::Role;
use crate::booking::store::fetch_booking;
use crate::config::AppConfig;
use crate::fsm;
use crate::outbox::{self, Audience, NotificationKind};
use crate::payment::{self, PaymentGateway};
use crate::store::{self, StoreError, append_event, format_utc, lock_booking, parse_utc};
use crate::types::{BookingStatus, PaymentIntentStatus};

/// Expires every PENDING_PAYMENT booking older than the TTL. Returns the
/// number of rows moved to EXPIRED.
pub async fn expire_stale_bookings(pool: &SqlitePool, ttl_hours: i64) -> Result<i64, StoreError> {
    let now = Utc::now();
    let cutoff = format_utc(now - Duration::hours(ttl_hours));
    let now_s = format_utc(now);

    let mut tx = pool.begin().await?;

    let expired_ids: Vec<String> = sqlx::query_scalar(
        r#"
        UPDATE bookings
        SET status = ?, updated_at = ?
        WHERE status = ? AND created_at < ?
        RETURNING id
        "#,
    )
    .bind(BookingStatus::Expired.as_str())
    .bind(&now_s)
    .bind(BookingStatus::PendingPayment.as_str())
    .bind(&cutoff)
    .fetch_all(&mut *tx)
    .await?;

    for id in &expired_ids {
        let booking_id = store::parse_uuid("booking id", id)?;
        append_event(
            &mut tx,
            booking_id,
            "expire_booking",
            Role::System,
            None,
            Some(BookingStatus::PendingPayment),
            Some(BookingStatus::Expired),
            None,
        )
        .await?;
    }

    tx.commit().await?;
    Ok(expired_ids.len() as i64)
}

/// Closes COMPLETE_PENDING bookings whose grace window has lapsed, one per
/// transaction. A booking whose capture fails is skipped and retried on the
/// next sweep. Returns the number of bookings closed.
pub async fn close_overdue_bookings(
    pool: &SqlitePool,
    gateway: &PaymentGateway,
) -> Result<i64, StoreError> {
    let now_s = format_utc(Utc::now());

    let overdue_ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT id
        FROM bookings
        WHERE status = ?
          AND complete_pending_until IS NOT NULL
          AND complete_pending_until <= ?
        "#,
    )
    .bind(BookingStatus::CompletePending.as_str())
    .bind(&now_s)
    .fetch_all(pool)
    .await?;

    let mut closed = 0;
    for id in overdue_ids {
        let booking_id = store::parse_uuid("booking id", &id)?;
        match close_one(pool, gateway, booking_id).await {
            Ok(true) => closed += 1,
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(booking_id = %booking_id, error = ?err, "grace close failed; will retry next sweep");
            }
        }
    }

    Ok(closed)
}

async fn close_one(
    pool: &SqlitePool,
    gateway: &PaymentGateway,
    booking_id: Uuid,
) -> Result<bool, StoreError> {
    let mut tx = pool.begin().await?;
    lock_booking(&mut tx, booking_id).await?;
    let booking = fetch_booking(&mut tx, booking_id).await?;

    // Re-check under the lock; the customer may have confirmed or flagged
    // an issue since the candidate scan.
    if booking.status != BookingStatus::CompletePending {
        return Ok(false);
    }
    let Some(deadline) = booking.complete_pending_until.as_deref() else {
        return Ok(false);
    };
    if Utc::now() <= parse_utc(deadline)? {
        return Ok(false);
    }
    if !fsm::can_transition(booking.status, BookingStatus::Closed, Role::System) {
        return Ok(false);
    }

    // The two-step flow reaches here with the hold still AUTHORIZED.
    let already_captured =
        payment::store::find_main_intent(&mut tx, booking_id, &[PaymentIntentStatus::Succeeded])
            .await?
            .is_some();
    if !already_captured {
        let captured = payment::capture(&mut tx, gateway, booking_id).await;
        match captured {
            Ok(_) => {}
            Err(StoreError::CaptureFailed(message)) => {
                tracing::warn!(booking_id = %booking_id, error = %message, "capture failed during grace close");
                return Ok(false);
            }
            Err(other) => return Err(other),
        }
    }

    let now_s = format_utc(Utc::now());
    let result =
        sqlx::query("UPDATE bookings SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(BookingStatus::Closed.as_str())
            .bind(&now_s)
            .bind(booking_id.to_string())
            .bind(BookingStatus::CompletePending.as_str())
            .execute(&mut *tx)
            .await?;
    if result.rows_affected() == 0 {
        return Ok(false);
    }

    append_event(
        &mut tx,
        booking_id,
        "close_booking",
        Role::System,
        None,
        Some(BookingStatus::CompletePending),
        Some(BookingStatus::Closed),
        Some("grace window elapsed"),
    )
    .await?;

    if let Some(provider_uid) = booking.provider_id.as_deref() {
        outbox::enqueue(
            &mut tx,
            booking_id,
            provider_uid,
            Audience::Provider,
            NotificationKind::BookingClosed,
            &json!({ "booking_id": booking.id }),
        )
        .await?;
    }

    tx.commit().await?;
    tracing::info!(booking_id = %booking_id, "booking closed after grace window");
    Ok(true)
}

/// Periodic driver for both passes; spawned at startup.
pub async fn run(pool: SqlitePool, gateway: PaymentGateway, config: AppConfig) {
    let mut ticker =
        tokio::time::interval(std::time::Duration::from_secs(config.sweep_interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match expire_stale_bookings(&pool, config.pending_ttl_hours).await {
            Ok(swept) if swept > 0 => tracing::info!(swept, "expired stale bookings"),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = ?err, "expiry sweep failed"),
        }

        match close_overdue_bookings(&pool, &gateway).await {
            Ok(closed) if closed > 0 => tracing::info!(closed, "closed overdue bookings"),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = ?err, "grace-close sweep failed"),
        }
    }
}
