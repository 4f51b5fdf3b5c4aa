use axum::{Json, extract::State};

use crate::{
    auth::{Principal, Role},
    booking,
    error::ApiError,
    extractors::BookingId,
    payment,
    state::AppState,
    types::PayResponse,
};

/// Creates (or returns) the booking's main payment intent and requests the
/// authorization hold. Completion of the hold arrives via webhook.
pub async fn pay_handler(
    State(state): State<AppState>,
    principal: Principal,
    BookingId(booking_id): BookingId,
) -> Result<Json<PayResponse>, ApiError> {
    if !matches!(principal.role, Role::User | Role::Admin) {
        return Err(ApiError::forbidden("pay requires user or admin role"));
    }

    let booking = booking::get_booking(&state.pool, booking_id).await?;
    if principal.role == Role::User && booking.customer_id != principal.uid {
        return Err(ApiError::forbidden("not your booking"));
    }

    let intent =
        payment::create_intent(&state.pool, &state.gateway, booking_id, &principal).await?;

    Ok(Json(PayResponse {
        payment_intent_id: intent.provider_ref,
        status: intent.status,
        amount_cents: intent.amount_cents,
        currency: intent.currency,
    }))
}
