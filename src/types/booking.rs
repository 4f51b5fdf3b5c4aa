use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{Principal, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    PendingPayment,
    PaidSearching,
    Accepted,
    EnRoute,
    Arrived,
    InProgress,
    CompletePending,
    NeedsReview,
    Closed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::PaidSearching => "PAID_SEARCHING",
            Self::Accepted => "ACCEPTED",
            Self::EnRoute => "EN_ROUTE",
            Self::Arrived => "ARRIVED",
            Self::InProgress => "IN_PROGRESS",
            Self::CompletePending => "COMPLETE_PENDING",
            Self::NeedsReview => "NEEDS_REVIEW",
            Self::Closed => "CLOSED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING_PAYMENT" => Some(Self::PendingPayment),
            "PAID_SEARCHING" => Some(Self::PaidSearching),
            "ACCEPTED" => Some(Self::Accepted),
            "EN_ROUTE" => Some(Self::EnRoute),
            "ARRIVED" => Some(Self::Arrived),
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETE_PENDING" => Some(Self::CompletePending),
            "NEEDS_REVIEW" => Some(Self::NeedsReview),
            "CLOSED" => Some(Self::Closed),
            "CANCELLED" => Some(Self::Cancelled),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Full booking row, including the customer-only OTP. Handlers never
/// serialize this directly; they go through [`BookingView`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub status: BookingStatus,
    pub customer_id: String,
    pub provider_id: Option<String>,
    pub service_id: Uuid,
    pub slot_id: String,
    pub candidate_list: Vec<String>,
    pub otp: String,
    pub service_name_snapshot: Option<String>,
    pub price_snapshot_cents: Option<i64>,
    pub stripe_payment_intent_id: Option<String>,
    pub expires_at: String,
    pub complete_pending_until: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Booking as exposed over HTTP. The OTP is the secret the customer reads
/// to the provider on site, so it is present only for the owning customer
/// and admins; provider and candidate viewers get `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingView {
    pub id: Uuid,
    pub status: BookingStatus,
    pub customer_id: String,
    pub provider_id: Option<String>,
    pub service_id: Uuid,
    pub slot_id: String,
    pub otp: Option<String>,
    pub service_name_snapshot: Option<String>,
    pub price_snapshot_cents: Option<i64>,
    pub expires_at: String,
    pub complete_pending_until: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl BookingView {
    pub fn for_principal(booking: Booking, principal: &Principal) -> Self {
        let otp_visible = principal.role == Role::Admin
            || (principal.role == Role::User && booking.customer_id == principal.uid);

        Self {
            id: booking.id,
            status: booking.status,
            customer_id: booking.customer_id,
            provider_id: booking.provider_id,
            service_id: booking.service_id,
            slot_id: booking.slot_id,
            otp: otp_visible.then_some(booking.otp),
            service_name_snapshot: booking.service_name_snapshot,
            price_snapshot_cents: booking.price_snapshot_cents,
            expires_at: booking.expires_at,
            complete_pending_until: booking.complete_pending_until,
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub service_id: Uuid,
    pub slot_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartServiceRequest {
    pub otp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub outcome: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListBookingsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionResponse {
    pub status: BookingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResponse {
    pub swept: i64,
    pub closed: i64,
}
