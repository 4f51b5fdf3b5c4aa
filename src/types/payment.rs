use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentIntentStatus {
    Created,
    Authorized,
    Succeeded,
    Cancelled,
    Failed,
}

impl PaymentIntentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Authorized => "AUTHORIZED",
            Self::Succeeded => "SUCCEEDED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATED" => Some(Self::Created),
            "AUTHORIZED" => Some(Self::Authorized),
            "SUCCEEDED" => Some(Self::Succeeded),
            "CANCELLED" => Some(Self::Cancelled),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// `Main` is the hold against the booking price; `Fee` rows are written
/// directly as SUCCEEDED for the fixed cancellation charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentKind {
    Main,
    Fee,
}

impl IntentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "MAIN",
            Self::Fee => "FEE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "MAIN" => Some(Self::Main),
            "FEE" => Some(Self::Fee),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub provider: String,
    pub provider_ref: String,
    pub kind: IntentKind,
    pub status: PaymentIntentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayResponse {
    pub payment_intent_id: String,
    pub status: PaymentIntentStatus,
    pub amount_cents: i64,
    pub currency: String,
}
