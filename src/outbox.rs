//! Notification outbox.
//!
//! The core only ever appends rows, inside the same transaction as the state
//! change they describe; delivery is an external concern.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::store::{StoreError, format_utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    BookingAccepted,
    BookingCancelled,
    ProviderCancelled,
    CaptureFailed,
    IssueFlagged,
    BookingClosed,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BookingAccepted => "BOOKING_ACCEPTED",
            Self::BookingCancelled => "BOOKING_CANCELLED",
            Self::ProviderCancelled => "PROVIDER_CANCELLED",
            Self::CaptureFailed => "CAPTURE_FAILED",
            Self::IssueFlagged => "ISSUE_FLAGGED",
            Self::BookingClosed => "BOOKING_CLOSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Customer,
    Provider,
    Admin,
}

impl Audience {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Provider => "provider",
            Self::Admin => "admin",
        }
    }
}

pub async fn enqueue(
    conn: &mut SqliteConnection,
    booking_id: Uuid,
    recipient_uid: &str,
    audience: Audience,
    kind: NotificationKind,
    payload: &serde_json::Value,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(payload)
        .map_err(|err| StoreError::Parse(format!("invalid outbox payload: {err}")))?;

    sqlx::query(
        r#"
        INSERT INTO notification_outbox (
            id,
            booking_id,
            recipient_uid,
            audience,
            kind,
            payload,
            created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(booking_id.to_string())
    .bind(recipient_uid)
    .bind(audience.as_str())
    .bind(kind.as_str())
    .bind(payload)
    .bind(format_utc(chrono::Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}
