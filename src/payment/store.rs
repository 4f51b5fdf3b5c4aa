//! Payment-intent ledger.
//!
//! One booking may own several intent rows (the main hold plus a separate
//! cancellation-fee charge), but at most one AUTHORIZED intent exists per
//! booking at any time, and a SUCCEEDED main intent only ever follows a
//! booking that passed through IN_PROGRESS.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::auth::{Principal, Role};
use crate::fsm;
use crate::payment::gateway::PaymentGateway;
use crate::store::{self, StoreError, append_event, format_utc, lock_booking};
use crate::types::{BookingStatus, IntentKind, PaymentIntent, PaymentIntentStatus};

pub const PAYMENT_PROVIDER: &str = "STRIPE";
pub const CURRENCY: &str = "ZAR";
pub const FALLBACK_AMOUNT_CENTS: i64 = 10_000;
pub const FEE_REF_PREFIX: &str = "pi_fee_";

/// Creates (or returns the already-open) main intent for a booking and
/// requests the authorization hold from the gateway.
///
/// The gateway round-trip happens outside the transaction so the database
/// write lock is never held across network I/O; a hold that loses the
/// re-check race is voided best-effort.
pub async fn create_intent(
    pool: &SqlitePool,
    gateway: &PaymentGateway,
    booking_id: Uuid,
    actor: &Principal,
) -> Result<PaymentIntent, StoreError> {
    let booking = read_booking_for_payment(pool, booking_id).await?;

    let mut conn = pool.acquire().await?;
    if let Some(existing) = find_main_intent(
        &mut conn,
        booking_id,
        &[PaymentIntentStatus::Created, PaymentIntentStatus::Authorized],
    )
    .await?
    {
        return Ok(existing);
    }
    drop(conn);

    if booking.status != BookingStatus::PendingPayment {
        return Err(StoreError::invalid_transition(format!(
            "booking is {} and cannot be paid",
            booking.status.as_str()
        )));
    }

    let amount_cents = booking.price_snapshot_cents.unwrap_or(FALLBACK_AMOUNT_CENTS);
    let provider_ref = gateway
        .authorize(amount_cents, CURRENCY)
        .await
        .map_err(|err| StoreError::Payment(err.to_string()))?;

    let mut tx = pool.begin().await?;
    lock_booking(&mut tx, booking_id).await?;

    let raced = find_main_intent(
        &mut tx,
        booking_id,
        &[PaymentIntentStatus::Created, PaymentIntentStatus::Authorized],
    )
    .await?;
    if let Some(existing) = raced {
        tx.commit().await?;
        if let Err(err) = gateway.void(&provider_ref).await {
            tracing::warn!(provider_ref = %provider_ref, error = %err, "failed to void superseded authorization");
        }
        return Ok(existing);
    }

    let now = format_utc(Utc::now());
    let intent = PaymentIntent {
        id: Uuid::new_v4(),
        booking_id,
        provider: PAYMENT_PROVIDER.to_string(),
        provider_ref: provider_ref.clone(),
        kind: IntentKind::Main,
        status: PaymentIntentStatus::Created,
        amount_cents,
        currency: CURRENCY.to_string(),
        created_at: now.clone(),
        updated_at: now.clone(),
    };
    insert_intent(&mut tx, &intent).await?;

    sqlx::query("UPDATE bookings SET stripe_payment_intent_id = ?, updated_at = ? WHERE id = ?")
        .bind(&provider_ref)
        .bind(&now)
        .bind(booking_id.to_string())
        .execute(&mut *tx)
        .await?;

    append_event(
        &mut tx,
        booking_id,
        "create_payment_intent",
        actor.role,
        Some(&actor.uid),
        None,
        None,
        Some(&provider_ref),
    )
    .await?;

    tx.commit().await?;
    Ok(intent)
}

/// Invoked by the webhook pipeline on the ledger's transaction. Moves the
/// matching intent CREATED → AUTHORIZED and drives the booking from
/// PENDING_PAYMENT to PAID_SEARCHING as the System actor. Re-delivery after
/// the intent is already AUTHORIZED or SUCCEEDED is a no-op.
pub async fn on_authorization_success(
    conn: &mut SqliteConnection,
    provider: &str,
    provider_ref: &str,
) -> Result<(), StoreError> {
    let intent = find_intent_by_ref(conn, provider, provider_ref)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("no intent for {provider_ref}")))?;

    lock_booking(conn, intent.booking_id).await?;

    match intent.status {
        PaymentIntentStatus::Authorized | PaymentIntentStatus::Succeeded => return Ok(()),
        PaymentIntentStatus::Created => {}
        other => {
            return Err(StoreError::invalid_transition(format!(
                "intent {} is {} and cannot be authorized",
                provider_ref,
                other.as_str()
            )));
        }
    }

    let booking_status = read_booking_status(conn, intent.booking_id).await?;
    if !fsm::can_transition(booking_status, BookingStatus::PaidSearching, Role::System) {
        return Err(StoreError::invalid_transition(format!(
            "booking is {} and cannot move to PAID_SEARCHING",
            booking_status.as_str()
        )));
    }

    update_intent_status(
        conn,
        intent.id,
        PaymentIntentStatus::Created,
        PaymentIntentStatus::Authorized,
    )
    .await?;

    let result = sqlx::query(
        "UPDATE bookings SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(BookingStatus::PaidSearching.as_str())
    .bind(format_utc(Utc::now()))
    .bind(intent.booking_id.to_string())
    .bind(BookingStatus::PendingPayment.as_str())
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::status_drift());
    }

    append_event(
        conn,
        intent.booking_id,
        "payment_authorized",
        Role::System,
        None,
        Some(booking_status),
        Some(BookingStatus::PaidSearching),
        Some(provider_ref),
    )
    .await?;

    tracing::info!(booking_id = %intent.booking_id, provider_ref = %provider_ref, "payment authorized");
    Ok(())
}

/// Marks a still-CREATED intent FAILED after a provider-side authorization
/// failure. Any other status means the failure event raced a later success
/// and is ignored.
pub async fn mark_authorization_failed(
    conn: &mut SqliteConnection,
    provider: &str,
    provider_ref: &str,
    reason: Option<&str>,
) -> Result<(), StoreError> {
    let Some(intent) = find_intent_by_ref(conn, provider, provider_ref).await? else {
        return Err(StoreError::NotFound(format!("no intent for {provider_ref}")));
    };

    if intent.status != PaymentIntentStatus::Created {
        return Ok(());
    }

    lock_booking(conn, intent.booking_id).await?;
    update_intent_status(
        conn,
        intent.id,
        PaymentIntentStatus::Created,
        PaymentIntentStatus::Failed,
    )
    .await?;

    append_event(
        conn,
        intent.booking_id,
        "payment_failed",
        Role::System,
        None,
        None,
        None,
        reason,
    )
    .await?;

    Ok(())
}

/// Captures the booking's AUTHORIZED main intent. Every failure mode —
/// no hold to capture, or the gateway refusing — surfaces as
/// `CaptureFailed` so the caller's retry point stays uniform.
pub async fn capture(
    conn: &mut SqliteConnection,
    gateway: &PaymentGateway,
    booking_id: Uuid,
) -> Result<PaymentIntent, StoreError> {
    let Some(intent) =
        find_main_intent(conn, booking_id, &[PaymentIntentStatus::Authorized]).await?
    else {
        return Err(StoreError::CaptureFailed(
            "no authorized payment intent to capture".to_string(),
        ));
    };

    if let Err(err) = gateway.capture(&intent.provider_ref).await {
        tracing::warn!(booking_id = %booking_id, provider_ref = %intent.provider_ref, error = %err, "capture failed");
        return Err(StoreError::CaptureFailed(err.to_string()));
    }

    update_intent_status(
        conn,
        intent.id,
        PaymentIntentStatus::Authorized,
        PaymentIntentStatus::Succeeded,
    )
    .await?;

    Ok(PaymentIntent {
        status: PaymentIntentStatus::Succeeded,
        ..intent
    })
}

/// Voids the booking's AUTHORIZED main intent, if any.
pub async fn release(
    conn: &mut SqliteConnection,
    gateway: &PaymentGateway,
    booking_id: Uuid,
) -> Result<Option<PaymentIntent>, StoreError> {
    let Some(intent) =
        find_main_intent(conn, booking_id, &[PaymentIntentStatus::Authorized]).await?
    else {
        return Ok(None);
    };

    gateway
        .void(&intent.provider_ref)
        .await
        .map_err(|err| StoreError::Payment(err.to_string()))?;

    update_intent_status(
        conn,
        intent.id,
        PaymentIntentStatus::Authorized,
        PaymentIntentStatus::Cancelled,
    )
    .await?;

    Ok(Some(PaymentIntent {
        status: PaymentIntentStatus::Cancelled,
        ..intent
    }))
}

/// Appends the fixed cancellation-fee charge as an already-SUCCEEDED row.
pub async fn fee(
    conn: &mut SqliteConnection,
    booking_id: Uuid,
    amount_cents: i64,
) -> Result<PaymentIntent, StoreError> {
    let now = format_utc(Utc::now());
    let intent = PaymentIntent {
        id: Uuid::new_v4(),
        booking_id,
        provider: PAYMENT_PROVIDER.to_string(),
        provider_ref: format!("{FEE_REF_PREFIX}{}", Uuid::new_v4().simple()),
        kind: IntentKind::Fee,
        status: PaymentIntentStatus::Succeeded,
        amount_cents,
        currency: CURRENCY.to_string(),
        created_at: now.clone(),
        updated_at: now,
    };
    insert_intent(conn, &intent).await?;
    Ok(intent)
}

pub async fn find_main_intent(
    conn: &mut SqliteConnection,
    booking_id: Uuid,
    statuses: &[PaymentIntentStatus],
) -> Result<Option<PaymentIntent>, StoreError> {
    let mut query = sqlx::QueryBuilder::new(
        "SELECT id, booking_id, provider, provider_ref, kind, status, amount_cents, currency, \
         created_at, updated_at FROM payment_intents WHERE booking_id = ",
    );
    query.push_bind(booking_id.to_string());
    query.push(" AND kind = 'MAIN' AND status IN (");
    let mut list = query.separated(", ");
    for status in statuses {
        list.push_bind(status.as_str());
    }
    list.push_unseparated(") ORDER BY created_at DESC LIMIT 1");

    let row: Option<IntentRow> = query.build_query_as().fetch_optional(&mut *conn).await?;
    row.map(IntentRow::try_into).transpose()
}

async fn find_intent_by_ref(
    conn: &mut SqliteConnection,
    provider: &str,
    provider_ref: &str,
) -> Result<Option<PaymentIntent>, StoreError> {
    let row: Option<IntentRow> = sqlx::query_as(
        r#"
        SELECT id, booking_id, provider, provider_ref, kind, status, amount_cents, currency,
               created_at, updated_at
        FROM payment_intents
        WHERE provider = ? AND provider_ref = ?
        "#,
    )
    .bind(provider)
    .bind(provider_ref)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(IntentRow::try_into).transpose()
}

async fn insert_intent(
    conn: &mut SqliteConnection,
    intent: &PaymentIntent,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO payment_intents (
            id,
            booking_id,
            provider,
            provider_ref,
            kind,
            status,
            amount_cents,
            currency,
            created_at,
            updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(intent.id.to_string())
    .bind(intent.booking_id.to_string())
    .bind(&intent.provider)
    .bind(&intent.provider_ref)
    .bind(intent.kind.as_str())
    .bind(intent.status.as_str())
    .bind(intent.amount_cents)
    .bind(&intent.currency)
    .bind(&intent.created_at)
    .bind(&intent.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn update_intent_status(
    conn: &mut SqliteConnection,
    intent_id: Uuid,
    expected: PaymentIntentStatus,
    target: PaymentIntentStatus,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE payment_intents SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(target.as_str())
    .bind(format_utc(Utc::now()))
    .bind(intent_id.to_string())
    .bind(expected.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::status_drift());
    }

    Ok(())
}

struct BookingForPayment {
    status: BookingStatus,
    price_snapshot_cents: Option<i64>,
}

async fn read_booking_for_payment(
    pool: &SqlitePool,
    booking_id: Uuid,
) -> Result<BookingForPayment, StoreError> {
    let row: Option<(String, Option<i64>)> =
        sqlx::query_as("SELECT status, price_snapshot_cents FROM bookings WHERE id = ?")
            .bind(booking_id.to_string())
            .fetch_optional(pool)
            .await?;

    let (status, price_snapshot_cents) =
        row.ok_or_else(|| StoreError::NotFound("booking not found".to_string()))?;
    let status = BookingStatus::parse(&status)
        .ok_or_else(|| StoreError::Parse(format!("unknown booking status: {status}")))?;

    Ok(BookingForPayment {
        status,
        price_snapshot_cents,
    })
}

async fn read_booking_status(
    conn: &mut SqliteConnection,
    booking_id: Uuid,
) -> Result<BookingStatus, StoreError> {
    let status: Option<(String,)> = sqlx::query_as("SELECT status FROM bookings WHERE id = ?")
        .bind(booking_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    let (status,) = status.ok_or_else(|| StoreError::NotFound("booking not found".to_string()))?;
    BookingStatus::parse(&status)
        .ok_or_else(|| StoreError::Parse(format!("unknown booking status: {status}")))
}

#[derive(sqlx::FromRow)]
struct IntentRow {
    id: String,
    booking_id: String,
    provider: String,
    provider_ref: String,
    kind: String,
    status: String,
    amount_cents: i64,
    currency: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<IntentRow> for PaymentIntent {
    type Error = StoreError;

    fn try_from(row: IntentRow) -> Result<Self, Self::Error> {
        Ok(PaymentIntent {
            id: store::parse_uuid("intent id", &row.id)?,
            booking_id: store::parse_uuid("booking id", &row.booking_id)?,
            provider: row.provider,
            provider_ref: row.provider_ref,
            kind: IntentKind::parse(&row.kind)
                .ok_or_else(|| StoreError::Parse(format!("unknown intent kind: {}", row.kind)))?,
            status: PaymentIntentStatus::parse(&row.status).ok_or_else(|| {
                StoreError::Parse(format!("unknown intent status: {}", row.status))
            })?,
            amount_cents: row.amount_cents,
            currency: row.currency,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
