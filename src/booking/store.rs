//! Booking engine.
//!
//! Every mutation follows the same shape: open a transaction, take the
//! booking row lock, verify preconditions against the fetched row and the
//! transition table, apply a conditional status-guarded UPDATE (zero
//! affected rows means concurrent drift), append the audit event and any
//! outbox rows, commit.

use chrono::{Duration, Utc};
use rand::Rng;
use serde_json::json;
use sqlx::{QueryBuilder, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::auth::{Principal, Role, constant_time_eq};
use crate::config::AppConfig;
use crate::fsm;
use crate::outbox::{self, Audience, NotificationKind};
use crate::payment::{self, PaymentGateway};
use crate::store::{
    self, StateCode, StoreError, append_event, format_utc, lock_booking, parse_utc,
};
use crate::types::{Booking, BookingStatus, CreateBookingRequest, PaymentIntentStatus};

/// Outcome of an operation whose capture step may fail. A failed capture
/// commits its audit trail but leaves the booking where it was, so reissuing
/// the call is always safe.
#[derive(Debug)]
pub enum CompleteOutcome {
    Completed(Booking),
    CaptureFailed { message: String },
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<BookingStatus>,
    pub limit: i64,
    pub offset: i64,
}

/// Creates a booking in PENDING_PAYMENT with price/name snapshots, the
/// candidate list (first online providers offering the service, oldest
/// profile first) and a fresh 4-digit OTP. The returned booking includes
/// the OTP; view-level redaction is the caller's concern.
pub async fn create_booking(
    pool: &SqlitePool,
    config: &AppConfig,
    customer_uid: &str,
    req: &CreateBookingRequest,
) -> Result<Booking, StoreError> {
    let otp = rand::thread_rng().gen_range(1000..=9999).to_string();
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    // Snapshot lookup is null-tolerant: a missing catalogue entry leaves the
    // snapshots empty and the payment ledger falls back to its default amount.
    let service: Option<(String, i64)> =
        sqlx::query_as("SELECT name, price_cents FROM services WHERE id = ? AND is_active = 1")
            .bind(req.service_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;

    let candidates: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT p.user_uid
        FROM providers p
        JOIN provider_services ps ON ps.provider_id = p.id
        WHERE ps.service_id = ? AND p.is_online = 1
        ORDER BY p.created_at ASC, p.id ASC
        LIMIT ?
        "#,
    )
    .bind(req.service_id.to_string())
    .bind(config.candidate_limit)
    .fetch_all(&mut *tx)
    .await?;

    let booking = Booking {
        id: Uuid::new_v4(),
        status: BookingStatus::PendingPayment,
        customer_id: customer_uid.to_string(),
        provider_id: None,
        service_id: req.service_id,
        slot_id: req.slot_id.clone(),
        candidate_list: candidates,
        otp,
        service_name_snapshot: service.as_ref().map(|(name, _)| name.clone()),
        price_snapshot_cents: service.as_ref().map(|(_, price)| *price),
        stripe_payment_intent_id: None,
        expires_at: format_utc(now + Duration::minutes(config.payment_window_mins)),
        complete_pending_until: None,
        created_at: format_utc(now),
        updated_at: format_utc(now),
    };

    let candidate_json = serde_json::to_string(&booking.candidate_list)
        .map_err(|err| StoreError::Parse(format!("invalid candidate list: {err}")))?;

    sqlx::query(
        r#"
        INSERT INTO bookings (
            id,
            status,
            customer_id,
            provider_id,
            service_id,
            slot_id,
            candidate_list,
            otp,
            service_name_snapshot,
            price_snapshot_cents,
            stripe_payment_intent_id,
            expires_at,
            complete_pending_until,
            created_at,
            updated_at
        )
        VALUES (?, ?, ?, NULL, ?, ?, ?, ?, ?, ?, NULL, ?, NULL, ?, ?)
        "#,
    )
    .bind(booking.id.to_string())
    .bind(booking.status.as_str())
    .bind(&booking.customer_id)
    .bind(booking.service_id.to_string())
    .bind(&booking.slot_id)
    .bind(&candidate_json)
    .bind(&booking.otp)
    .bind(booking.service_name_snapshot.as_deref())
    .bind(booking.price_snapshot_cents)
    .bind(&booking.expires_at)
    .bind(&booking.created_at)
    .bind(&booking.updated_at)
    .execute(&mut *tx)
    .await?;

    append_event(
        &mut tx,
        booking.id,
        "create_booking",
        Role::User,
        Some(customer_uid),
        None,
        Some(BookingStatus::PendingPayment),
        None,
    )
    .await?;

    tx.commit().await?;
    tracing::info!(booking_id = %booking.id, customer = customer_uid, "booking created");
    Ok(booking)
}

pub async fn get_booking(pool: &SqlitePool, booking_id: Uuid) -> Result<Booking, StoreError> {
    let mut conn = pool.acquire().await?;
    fetch_booking(&mut conn, booking_id).await
}

pub async fn list_for_customer(
    pool: &SqlitePool,
    customer_uid: &str,
    filter: &ListFilter,
) -> Result<Vec<Booking>, StoreError> {
    list_bookings(pool, "customer_id", customer_uid, filter).await
}

pub async fn list_claimed_by_provider(
    pool: &SqlitePool,
    provider_uid: &str,
    filter: &ListFilter,
) -> Result<Vec<Booking>, StoreError> {
    list_bookings(pool, "provider_id", provider_uid, filter).await
}

/// Atomic accept: exactly one provider wins any given booking. Everything
/// after the row lock is a deterministic precondition check; the final
/// conditional UPDATE is the drift backstop.
pub async fn accept_booking(
    pool: &SqlitePool,
    provider_uid: &str,
    booking_id: Uuid,
) -> Result<Booking, StoreError> {
    let mut tx = pool.begin().await?;
    lock_booking(&mut tx, booking_id).await?;
    let mut booking = fetch_booking(&mut tx, booking_id).await?;

    if booking.status != BookingStatus::PaidSearching {
        return Err(StoreError::invalid_transition(format!(
            "booking is {}; accept requires PAID_SEARCHING",
            booking.status.as_str()
        )));
    }

    if let Some(assigned) = &booking.provider_id
        && assigned != provider_uid
    {
        return Err(StoreError::state(
            StateCode::OwnedByOtherProvider,
            "booking already claimed by another provider",
        ));
    }

    if !booking.candidate_list.iter().any(|c| c == provider_uid) {
        return Err(StoreError::state(
            StateCode::NotACandidate,
            "provider is not a candidate for this booking",
        ));
    }

    if !fsm::can_transition(booking.status, BookingStatus::Accepted, Role::Provider) {
        return Err(StoreError::invalid_transition(
            "accept is not permitted from this state",
        ));
    }

    let now = format_utc(Utc::now());
    let result = sqlx::query(
        "UPDATE bookings SET status = ?, provider_id = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(BookingStatus::Accepted.as_str())
    .bind(provider_uid)
    .bind(&now)
    .bind(booking_id.to_string())
    .bind(BookingStatus::PaidSearching.as_str())
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::status_drift());
    }

    append_event(
        &mut tx,
        booking_id,
        "accept_booking",
        Role::Provider,
        Some(provider_uid),
        Some(BookingStatus::PaidSearching),
        Some(BookingStatus::Accepted),
        None,
    )
    .await?;

    outbox::enqueue(
        &mut tx,
        booking_id,
        &booking.customer_id,
        Audience::Customer,
        NotificationKind::BookingAccepted,
        &json!({ "booking_id": booking.id, "provider_uid": provider_uid }),
    )
    .await?;

    tx.commit().await?;
    tracing::info!(booking_id = %booking_id, provider = provider_uid, "booking accepted");

    booking.status = BookingStatus::Accepted;
    booking.provider_id = Some(provider_uid.to_string());
    booking.updated_at = now;
    Ok(booking)
}

pub async fn travel(
    pool: &SqlitePool,
    provider_uid: &str,
    booking_id: Uuid,
) -> Result<Booking, StoreError> {
    provider_move(pool, provider_uid, booking_id, BookingStatus::EnRoute, "travel", None, None)
        .await
}

pub async fn arrived(
    pool: &SqlitePool,
    provider_uid: &str,
    booking_id: Uuid,
) -> Result<Booking, StoreError> {
    provider_move(pool, provider_uid, booking_id, BookingStatus::Arrived, "arrived", None, None)
        .await
}

/// ARRIVED → IN_PROGRESS, gated on the customer-held OTP.
pub async fn start_service(
    pool: &SqlitePool,
    provider_uid: &str,
    booking_id: Uuid,
    otp: &str,
) -> Result<Booking, StoreError> {
    provider_move(
        pool,
        provider_uid,
        booking_id,
        BookingStatus::InProgress,
        "start_service",
        Some(otp),
        None,
    )
    .await
}

/// Two-step completion, first half: IN_PROGRESS → COMPLETE_PENDING without
/// capture. The customer's confirm (or the grace-window closer) captures.
pub async fn provider_complete(
    pool: &SqlitePool,
    config: &AppConfig,
    provider_uid: &str,
    booking_id: Uuid,
) -> Result<Booking, StoreError> {
    provider_move(
        pool,
        provider_uid,
        booking_id,
        BookingStatus::CompletePending,
        "provider_complete",
        None,
        Some(config.grace_window_mins),
    )
    .await
}

/// Guarded mover shared by the provider-driven transitions.
async fn provider_move(
    pool: &SqlitePool,
    provider_uid: &str,
    booking_id: Uuid,
    target: BookingStatus,
    action: &'static str,
    otp: Option<&str>,
    grace_mins: Option<i64>,
) -> Result<Booking, StoreError> {
    let mut tx = pool.begin().await?;
    lock_booking(&mut tx, booking_id).await?;
    let mut booking = fetch_booking(&mut tx, booking_id).await?;

    verify_assigned_provider(&booking, provider_uid)?;

    if !fsm::can_transition(booking.status, target, Role::Provider) {
        return Err(StoreError::invalid_transition(format!(
            "cannot move from {} to {}",
            booking.status.as_str(),
            target.as_str()
        )));
    }

    if target == BookingStatus::InProgress {
        let otp = otp.ok_or_else(|| StoreError::Validation("otp is required".to_string()))?;
        if !constant_time_eq(booking.otp.as_bytes(), otp.trim().as_bytes()) {
            return Err(StoreError::state(StateCode::InvalidOtp, "incorrect OTP"));
        }
    }

    let now = Utc::now();
    let now_s = format_utc(now);
    let grace_deadline = grace_mins.map(|mins| format_utc(now + Duration::minutes(mins)));

    let result = sqlx::query(
        r#"
        UPDATE bookings
        SET status = ?,
            complete_pending_until = COALESCE(?, complete_pending_until),
            updated_at = ?
        WHERE id = ? AND status = ? AND provider_id = ?
        "#,
    )
    .bind(target.as_str())
    .bind(grace_deadline.as_deref())
    .bind(&now_s)
    .bind(booking_id.to_string())
    .bind(booking.status.as_str())
    .bind(provider_uid)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::status_drift());
    }

    append_event(
        &mut tx,
        booking_id,
        action,
        Role::Provider,
        Some(provider_uid),
        Some(booking.status),
        Some(target),
        None,
    )
    .await?;

    tx.commit().await?;
    tracing::info!(booking_id = %booking_id, provider = provider_uid, action, to = target.as_str(), "booking transition");

    booking.status = target;
    if grace_deadline.is_some() {
        booking.complete_pending_until = grace_deadline;
    }
    booking.updated_at = now_s;
    Ok(booking)
}

/// Single-step completion: capture and move to COMPLETE_PENDING atomically.
/// A failed capture commits only the audit trail and leaves the booking
/// IN_PROGRESS, making the call an idempotent retry point.
pub async fn complete_with_capture(
    pool: &SqlitePool,
    gateway: &PaymentGateway,
    config: &AppConfig,
    provider_uid: &str,
    booking_id: Uuid,
) -> Result<CompleteOutcome, StoreError> {
    let mut tx = pool.begin().await?;
    lock_booking(&mut tx, booking_id).await?;
    let mut booking = fetch_booking(&mut tx, booking_id).await?;

    verify_assigned_provider(&booking, provider_uid)?;

    if !fsm::can_transition(booking.status, BookingStatus::CompletePending, Role::Provider) {
        return Err(StoreError::invalid_transition(format!(
            "cannot complete from {}",
            booking.status.as_str()
        )));
    }

    let captured = payment::capture(&mut tx, gateway, booking_id).await;
    match captured {
        Ok(_) => {}
        Err(StoreError::CaptureFailed(message)) => {
            append_event(
                &mut tx,
                booking_id,
                "capture_failed",
                Role::Provider,
                Some(provider_uid),
                None,
                None,
                Some(&message),
            )
            .await?;
            outbox::enqueue(
                &mut tx,
                booking_id,
                provider_uid,
                Audience::Provider,
                NotificationKind::CaptureFailed,
                &json!({ "booking_id": booking.id, "error": message }),
            )
            .await?;
            tx.commit().await?;
            return Ok(CompleteOutcome::CaptureFailed { message });
        }
        Err(other) => return Err(other),
    }

    let now = Utc::now();
    let now_s = format_utc(now);
    let grace_deadline = format_utc(now + Duration::minutes(config.grace_window_mins));

    let result = sqlx::query(
        r#"
        UPDATE bookings
        SET status = ?, complete_pending_until = ?, updated_at = ?
        WHERE id = ? AND status = ? AND provider_id = ?
        "#,
    )
    .bind(BookingStatus::CompletePending.as_str())
    .bind(&grace_deadline)
    .bind(&now_s)
    .bind(booking_id.to_string())
    .bind(BookingStatus::InProgress.as_str())
    .bind(provider_uid)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::status_drift());
    }

    append_event(
        &mut tx,
        booking_id,
        "complete_booking",
        Role::Provider,
        Some(provider_uid),
        Some(BookingStatus::InProgress),
        Some(BookingStatus::CompletePending),
        None,
    )
    .await?;

    tx.commit().await?;
    tracing::info!(booking_id = %booking_id, provider = provider_uid, "booking complete, capture succeeded");

    booking.status = BookingStatus::CompletePending;
    booking.complete_pending_until = Some(grace_deadline);
    booking.updated_at = now_s;
    Ok(CompleteOutcome::Completed(booking))
}

/// Customer confirmation of a two-step completion: captures (unless the
/// single-step flow already did) and closes. Idempotent once CLOSED.
pub async fn confirm_complete(
    pool: &SqlitePool,
    gateway: &PaymentGateway,
    customer_uid: &str,
    booking_id: Uuid,
) -> Result<CompleteOutcome, StoreError> {
    let mut tx = pool.begin().await?;
    lock_booking(&mut tx, booking_id).await?;
    let mut booking = fetch_booking(&mut tx, booking_id).await?;

    if booking.customer_id != customer_uid {
        return Err(StoreError::Forbidden("not your booking".to_string()));
    }

    if booking.status == BookingStatus::Closed {
        return Ok(CompleteOutcome::Completed(booking));
    }

    // Closing is the table's System transition; the customer's confirmation
    // triggers it after the ownership check above.
    if !fsm::can_transition(booking.status, BookingStatus::Closed, Role::System) {
        return Err(StoreError::invalid_transition(format!(
            "cannot confirm completion from {}",
            booking.status.as_str()
        )));
    }

    let already_captured =
        payment::store::find_main_intent(&mut tx, booking_id, &[PaymentIntentStatus::Succeeded])
            .await?
            .is_some();
    if !already_captured {
        let captured = payment::capture(&mut tx, gateway, booking_id).await;
        match captured {
            Ok(_) => {}
            Err(StoreError::CaptureFailed(message)) => {
                append_event(
                    &mut tx,
                    booking_id,
                    "capture_failed",
                    Role::User,
                    Some(customer_uid),
                    None,
                    None,
                    Some(&message),
                )
                .await?;
                tx.commit().await?;
                return Ok(CompleteOutcome::CaptureFailed { message });
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
            .bind(booking.status.as_str())
            .execute(&mut *tx)
            .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::status_drift());
    }

    append_event(
        &mut tx,
        booking_id,
        "confirm_complete",
        Role::User,
        Some(customer_uid),
        Some(booking.status),
        Some(BookingStatus::Closed),
        None,
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
    tracing::info!(booking_id = %booking_id, "booking closed by customer confirmation");

    booking.status = BookingStatus::Closed;
    booking.updated_at = now_s;
    Ok(CompleteOutcome::Completed(booking))
}

/// Cancellation by customer or assigned provider. Releases any held
/// authorization; charges the fixed fee only when the customer cancels
/// after the provider is already en route or on site.
pub async fn cancel_booking(
    pool: &SqlitePool,
    gateway: &PaymentGateway,
    config: &AppConfig,
    actor: &Principal,
    booking_id: Uuid,
) -> Result<Booking, StoreError> {
    let mut tx = pool.begin().await?;
    lock_booking(&mut tx, booking_id).await?;
    let mut booking = fetch_booking(&mut tx, booking_id).await?;

    match actor.role {
        Role::User => {
            if booking.customer_id != actor.uid {
                return Err(StoreError::Forbidden("not your booking".to_string()));
            }
        }
        Role::Provider => verify_assigned_provider(&booking, &actor.uid)?,
        _ => {
            return Err(StoreError::Forbidden(
                "cancel requires user or provider role".to_string(),
            ));
        }
    }

    if !fsm::can_transition(booking.status, BookingStatus::Cancelled, actor.role) {
        return Err(StoreError::invalid_transition(format!(
            "cannot cancel from {}",
            booking.status.as_str()
        )));
    }

    let fee_required = actor.role == Role::User
        && matches!(booking.status, BookingStatus::EnRoute | BookingStatus::Arrived);

    payment::release(&mut tx, gateway, booking_id).await?;

    if fee_required {
        payment::fee(&mut tx, booking_id, config.cancellation_fee_cents).await?;
    }

    let now_s = format_utc(Utc::now());
    let result =
        sqlx::query("UPDATE bookings SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(BookingStatus::Cancelled.as_str())
            .bind(&now_s)
            .bind(booking_id.to_string())
            .bind(booking.status.as_str())
            .execute(&mut *tx)
            .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::status_drift());
    }

    let detail = if fee_required {
        format!("cancellation fee {} cents", config.cancellation_fee_cents)
    } else {
        "no fee".to_string()
    };
    append_event(
        &mut tx,
        booking_id,
        "cancel_booking",
        actor.role,
        Some(&actor.uid),
        Some(booking.status),
        Some(BookingStatus::Cancelled),
        Some(&detail),
    )
    .await?;

    match actor.role {
        Role::User => {
            if let Some(provider_uid) = booking.provider_id.as_deref() {
                outbox::enqueue(
                    &mut tx,
                    booking_id,
                    provider_uid,
                    Audience::Provider,
                    NotificationKind::BookingCancelled,
                    &json!({ "booking_id": booking.id, "cancelled_by": "customer" }),
                )
                .await?;
            }
        }
        _ => {
            outbox::enqueue(
                &mut tx,
                booking_id,
                &booking.customer_id,
                Audience::Customer,
                NotificationKind::BookingCancelled,
                &json!({ "booking_id": booking.id, "cancelled_by": "provider" }),
            )
            .await?;
        }
    }

    tx.commit().await?;
    tracing::info!(booking_id = %booking_id, actor = %actor.uid, fee_required, "booking cancelled");

    booking.status = BookingStatus::Cancelled;
    booking.updated_at = now_s;
    Ok(booking)
}

/// Re-dispatch: the assigned provider abandons the booking, which returns
/// to PAID_SEARCHING with the candidate list intact so the remaining
/// candidates can run a fresh accept cycle.
pub async fn provider_cancel(
    pool: &SqlitePool,
    provider_uid: &str,
    booking_id: Uuid,
) -> Result<Booking, StoreError> {
    let mut tx = pool.begin().await?;
    lock_booking(&mut tx, booking_id).await?;
    let mut booking = fetch_booking(&mut tx, booking_id).await?;

    verify_assigned_provider(&booking, provider_uid)?;

    if !fsm::can_transition(booking.status, BookingStatus::PaidSearching, Role::Provider) {
        return Err(StoreError::invalid_transition(format!(
            "cannot re-dispatch from {}",
            booking.status.as_str()
        )));
    }

    let now_s = format_utc(Utc::now());
    let result = sqlx::query(
        r#"
        UPDATE bookings
        SET status = ?, provider_id = NULL, updated_at = ?
        WHERE id = ? AND status = ? AND provider_id = ?
        "#,
    )
    .bind(BookingStatus::PaidSearching.as_str())
    .bind(&now_s)
    .bind(booking_id.to_string())
    .bind(booking.status.as_str())
    .bind(provider_uid)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::status_drift());
    }

    append_event(
        &mut tx,
        booking_id,
        "provider_cancel",
        Role::Provider,
        Some(provider_uid),
        Some(booking.status),
        Some(BookingStatus::PaidSearching),
        None,
    )
    .await?;

    outbox::enqueue(
        &mut tx,
        booking_id,
        &booking.customer_id,
        Audience::Customer,
        NotificationKind::ProviderCancelled,
        &json!({ "booking_id": booking.id, "provider_uid": provider_uid }),
    )
    .await?;

    tx.commit().await?;
    tracing::info!(booking_id = %booking_id, provider = provider_uid, "booking re-dispatched");

    booking.status = BookingStatus::PaidSearching;
    booking.provider_id = None;
    booking.updated_at = now_s;
    Ok(booking)
}

/// Customer flags an issue during the grace window, parking the booking for
/// admin review instead of letting it close.
pub async fn flag_issue(
    pool: &SqlitePool,
    customer_uid: &str,
    booking_id: Uuid,
    reason: &str,
) -> Result<Booking, StoreError> {
    let mut tx = pool.begin().await?;
    lock_booking(&mut tx, booking_id).await?;
    let mut booking = fetch_booking(&mut tx, booking_id).await?;

    if booking.customer_id != customer_uid {
        return Err(StoreError::Forbidden("not your booking".to_string()));
    }

    if !fsm::can_transition(booking.status, BookingStatus::NeedsReview, Role::User) {
        return Err(StoreError::invalid_transition(format!(
            "cannot flag an issue from {}",
            booking.status.as_str()
        )));
    }

    let deadline = booking
        .complete_pending_until
        .as_deref()
        .ok_or_else(|| StoreError::Parse("missing complete_pending_until".to_string()))?;
    if Utc::now() > parse_utc(deadline)? {
        return Err(StoreError::state(
            StateCode::GraceExpired,
            "grace window closed",
        ));
    }

    let now_s = format_utc(Utc::now());
    let result =
        sqlx::query("UPDATE bookings SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(BookingStatus::NeedsReview.as_str())
            .bind(&now_s)
            .bind(booking_id.to_string())
            .bind(booking.status.as_str())
            .execute(&mut *tx)
            .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::status_drift());
    }

    append_event(
        &mut tx,
        booking_id,
        "issue_flagged",
        Role::User,
        Some(customer_uid),
        Some(booking.status),
        Some(BookingStatus::NeedsReview),
        Some(reason),
    )
    .await?;

    outbox::enqueue(
        &mut tx,
        booking_id,
        "admin",
        Audience::Admin,
        NotificationKind::IssueFlagged,
        &json!({ "booking_id": booking.id, "reason": reason }),
    )
    .await?;

    tx.commit().await?;
    tracing::info!(booking_id = %booking_id, "issue flagged, booking needs review");

    booking.status = BookingStatus::NeedsReview;
    booking.updated_at = now_s;
    Ok(booking)
}

/// Admin resolution of a flagged booking. Closing captures a still-held
/// authorization (so a CLOSED booking always ends with a SUCCEEDED main
/// intent); cancelling releases it. No fee either way.
pub async fn resolve_review(
    pool: &SqlitePool,
    gateway: &PaymentGateway,
    admin_uid: &str,
    booking_id: Uuid,
    outcome: BookingStatus,
) -> Result<CompleteOutcome, StoreError> {
    if !matches!(outcome, BookingStatus::Closed | BookingStatus::Cancelled) {
        return Err(StoreError::Validation(
            "outcome must be CLOSED or CANCELLED".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    lock_booking(&mut tx, booking_id).await?;
    let mut booking = fetch_booking(&mut tx, booking_id).await?;

    if !fsm::can_transition(booking.status, outcome, Role::Admin) {
        return Err(StoreError::invalid_transition(format!(
            "cannot resolve from {}",
            booking.status.as_str()
        )));
    }

    match outcome {
        BookingStatus::Closed => {
            let already_captured = payment::store::find_main_intent(
                &mut tx,
                booking_id,
                &[PaymentIntentStatus::Succeeded],
            )
            .await?
            .is_some();
            if !already_captured {
                let captured = payment::capture(&mut tx, gateway, booking_id).await;
                match captured {
                    Ok(_) => {}
                    Err(StoreError::CaptureFailed(message)) => {
                        append_event(
                            &mut tx,
                            booking_id,
                            "capture_failed",
                            Role::Admin,
                            Some(admin_uid),
                            None,
                            None,
                            Some(&message),
                        )
                        .await?;
                        tx.commit().await?;
                        return Ok(CompleteOutcome::CaptureFailed { message });
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        _ => {
            payment::release(&mut tx, gateway, booking_id).await?;
        }
    }

    let now_s = format_utc(Utc::now());
    let result =
        sqlx::query("UPDATE bookings SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(outcome.as_str())
            .bind(&now_s)
            .bind(booking_id.to_string())
            .bind(booking.status.as_str())
            .execute(&mut *tx)
            .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::status_drift());
    }

    append_event(
        &mut tx,
        booking_id,
        "resolve_review",
        Role::Admin,
        Some(admin_uid),
        Some(booking.status),
        Some(outcome),
        None,
    )
    .await?;

    match outcome {
        BookingStatus::Closed => {
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
        }
        _ => {
            outbox::enqueue(
                &mut tx,
                booking_id,
                &booking.customer_id,
                Audience::Customer,
                NotificationKind::BookingCancelled,
                &json!({ "booking_id": booking.id, "cancelled_by": "admin" }),
            )
            .await?;
        }
    }

    tx.commit().await?;
    tracing::info!(booking_id = %booking_id, outcome = outcome.as_str(), "review resolved");

    booking.status = outcome;
    booking.updated_at = now_s;
    Ok(CompleteOutcome::Completed(booking))
}

fn verify_assigned_provider(booking: &Booking, provider_uid: &str) -> Result<(), StoreError> {
    match booking.provider_id.as_deref() {
        Some(assigned) if assigned == provider_uid => Ok(()),
        Some(_) => Err(StoreError::state(
            StateCode::OwnedByOtherProvider,
            "booking is claimed by another provider",
        )),
        None => Err(StoreError::invalid_transition(
            "booking has no assigned provider",
        )),
    }
}

async fn list_bookings(
    pool: &SqlitePool,
    owner_column: &str,
    owner_uid: &str,
    filter: &ListFilter,
) -> Result<Vec<Booking>, StoreError> {
    let mut query = QueryBuilder::new(
        "SELECT id, status, customer_id, provider_id, service_id, slot_id, candidate_list, otp, \
         service_name_snapshot, price_snapshot_cents, stripe_payment_intent_id, expires_at, \
         complete_pending_until, created_at, updated_at FROM bookings WHERE ",
    );
    query.push(owner_column);
    query.push(" = ");
    query.push_bind(owner_uid);

    if let Some(status) = filter.status {
        query.push(" AND status = ");
        query.push_bind(status.as_str());
    }

    query.push(" ORDER BY created_at DESC, id DESC LIMIT ");
    query.push_bind(filter.limit);
    query.push(" OFFSET ");
    query.push_bind(filter.offset);

    let rows: Vec<BookingRow> = query.build_query_as().fetch_all(pool).await?;
    rows.into_iter().map(BookingRow::try_into).collect()
}

pub(crate) async fn fetch_booking(
    conn: &mut SqliteConnection,
    booking_id: Uuid,
) -> Result<Booking, StoreError> {
    let row: Option<BookingRow> = sqlx::query_as(
        r#"
        SELECT id, status, customer_id, provider_id, service_id, slot_id, candidate_list, otp,
               service_name_snapshot, price_snapshot_cents, stripe_payment_intent_id, expires_at,
               complete_pending_until, created_at, updated_at
        FROM bookings
        WHERE id = ?
        "#,
    )
    .bind(booking_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.ok_or_else(|| StoreError::NotFound("booking not found".to_string()))?
        .try_into()
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: String,
    status: String,
    customer_id: String,
    provider_id: Option<String>,
    service_id: String,
    slot_id: String,
    candidate_list: String,
    otp: String,
    service_name_snapshot: Option<String>,
    price_snapshot_cents: Option<i64>,
    stripe_payment_intent_id: Option<String>,
    expires_at: String,
    complete_pending_until: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let candidate_list: Vec<String> = serde_json::from_str(&row.candidate_list)
            .map_err(|err| StoreError::Parse(format!("invalid candidate list JSON: {err}")))?;

        Ok(Booking {
            id: store::parse_uuid("booking id", &row.id)?,
            status: BookingStatus::parse(&row.status).ok_or_else(|| {
                StoreError::Parse(format!("unknown booking status: {}", row.status))
            })?,
            customer_id: row.customer_id,
            provider_id: row.provider_id,
            service_id: store::parse_uuid("service id", &row.service_id)?,
            slot_id: row.slot_id,
            candidate_list,
            otp: row.otp,
            service_name_snapshot: row.service_name_snapshot,
            price_snapshot_cents: row.price_snapshot_cents,
            stripe_payment_intent_id: row.stripe_payment_intent_id,
            expires_at: row.expires_at,
            complete_pending_until: row.complete_pending_until,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
