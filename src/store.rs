use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::auth::Role;
use crate::types::BookingStatus;

/// Machine-readable codes for precondition failures observed under the
/// booking row lock. Retriable only after observing new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCode {
    InvalidTransition,
    StatusDrift,
    InvalidOtp,
    OwnedByOtherProvider,
    NotACandidate,
    GraceExpired,
}

#[derive(Debug)]
pub enum StoreError {
    Db(sqlx::Error),
    NotFound(String),
    Validation(String),
    Forbidden(String),
    State { code: StateCode, message: String },
    CaptureFailed(String),
    Payment(String),
    Parse(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err)
    }
}

impl StoreError {
    pub fn state(code: StateCode, message: impl Into<String>) -> Self {
        Self::State {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::state(StateCode::InvalidTransition, message)
    }

    pub fn status_drift() -> Self {
        Self::state(
            StateCode::StatusDrift,
            "booking status changed concurrently",
        )
    }
}

/// Takes the write lock for the current transaction by touching the booking
/// row. SQLite has no row-level `SELECT ... FOR UPDATE`; the first write in
/// a transaction acquires the database write lock, so concurrent mutators
/// queue here and then observe committed state. Returns NotFound when the
/// booking does not exist.
pub async fn lock_booking(
    conn: &mut SqliteConnection,
    booking_id: Uuid,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE bookings SET updated_at = updated_at WHERE id = ?")
        .bind(booking_id.to_string())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("booking not found".to_string()));
    }

    Ok(())
}

/// Appends one audit row to `booking_events` on the caller's transaction,
/// so the log captures exactly the commit order of the state changes.
#[allow(clippy::too_many_arguments)]
pub async fn append_event(
    conn: &mut SqliteConnection,
    booking_id: Uuid,
    action: &str,
    actor_role: Role,
    actor_uid: Option<&str>,
    from_status: Option<BookingStatus>,
    to_status: Option<BookingStatus>,
    detail: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO booking_events (
            id,
            booking_id,
            action,
            actor_role,
            actor_uid,
            from_status,
            to_status,
            detail,
            created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(booking_id.to_string())
    .bind(action)
    .bind(actor_role.as_str())
    .bind(actor_uid)
    .bind(from_status.map(BookingStatus::as_str))
    .bind(to_status.map(BookingStatus::as_str))
    .bind(detail)
    .bind(format_utc(Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_utc(value: &str) -> Result<DateTime<Utc>, StoreError> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|err| StoreError::Parse(format!("invalid timestamp: {err}")))?;
    Ok(parsed.with_timezone(&Utc))
}

pub fn parse_uuid(field: &str, value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|err| StoreError::Parse(format!("invalid {field}: {err}")))
}
