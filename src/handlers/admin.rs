use axum::{Json, extract::State};

use crate::{
    auth::{Principal, Role},
    booking::{self, CompleteOutcome},
    error::ApiError,
    extractors::{BookingId, ValidJson},
    handlers::require_role,
    state::AppState,
    sweeper,
    types::{BookingStatus, ResolveRequest, SweepResponse, TransitionResponse},
};

/// Runs both maintenance passes synchronously: TTL expiry of unpaid
/// bookings and grace-window closure.
pub async fn sweep_handler(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<SweepResponse>, ApiError> {
    require_role(&principal, Role::Admin)?;

    let swept =
        sweeper::expire_stale_bookings(&state.pool, state.config.pending_ttl_hours).await?;
    let closed = sweeper::close_overdue_bookings(&state.pool, &state.gateway).await?;

    Ok(Json(SweepResponse { swept, closed }))
}

pub async fn resolve_handler(
    State(state): State<AppState>,
    principal: Principal,
    BookingId(booking_id): BookingId,
    ValidJson(req): ValidJson<ResolveRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    require_role(&principal, Role::Admin)?;

    let outcome = BookingStatus::parse(req.outcome.trim())
        .filter(|status| matches!(status, BookingStatus::Closed | BookingStatus::Cancelled))
        .ok_or_else(|| ApiError::validation("outcome must be CLOSED or CANCELLED"))?;

    let result = booking::resolve_review(
        &state.pool,
        &state.gateway,
        &principal.uid,
        booking_id,
        outcome,
    )
    .await?;

    match result {
        CompleteOutcome::Completed(booking) => Ok(Json(TransitionResponse {
            status: booking.status,
        })),
        CompleteOutcome::CaptureFailed { message } => Err(ApiError::CaptureFailed { message }),
    }
}
