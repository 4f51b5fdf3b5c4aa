use axum::{Json, extract::State, http::StatusCode};

use crate::{
    auth::{Principal, Role},
    booking::{self, CompleteOutcome, ListFilter},
    error::ApiError,
    extractors::{BookingId, ValidJson, ValidQuery},
    handlers::require_role,
    state::AppState,
    types::{
        Booking, BookingStatus, BookingView, CreateBookingRequest, IssueRequest,
        ListBookingsQuery, StartServiceRequest, TransitionResponse,
    },
};

pub async fn create_booking_handler(
    State(state): State<AppState>,
    principal: Principal,
    ValidJson(req): ValidJson<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingView>), ApiError> {
    require_role(&principal, Role::User)?;
    validate_create_request(&req, &principal)?;

    let booking = booking::create_booking(&state.pool, &state.config, &principal.uid, &req).await?;

    Ok((
        StatusCode::CREATED,
        Json(BookingView::for_principal(booking, &principal)),
    ))
}

pub async fn get_booking_handler(
    State(state): State<AppState>,
    principal: Principal,
    BookingId(booking_id): BookingId,
) -> Result<Json<BookingView>, ApiError> {
    let booking = booking::get_booking(&state.pool, booking_id).await?;

    verify_can_view(&booking, &principal)?;

    Ok(Json(BookingView::for_principal(booking, &principal)))
}

pub async fn list_bookings_handler(
    State(state): State<AppState>,
    principal: Principal,
    ValidQuery(query): ValidQuery<ListBookingsQuery>,
) -> Result<Json<Vec<BookingView>>, ApiError> {
    require_role(&principal, Role::User)?;
    let filter = parse_list_filter(&query)?;

    let bookings = booking::list_for_customer(&state.pool, &principal.uid, &filter).await?;
    Ok(Json(to_views(bookings, &principal)))
}

pub async fn list_claimed_handler(
    State(state): State<AppState>,
    principal: Principal,
    ValidQuery(query): ValidQuery<ListBookingsQuery>,
) -> Result<Json<Vec<BookingView>>, ApiError> {
    require_role(&principal, Role::Provider)?;
    let filter = parse_list_filter(&query)?;

    let bookings = booking::list_claimed_by_provider(&state.pool, &principal.uid, &filter).await?;
    Ok(Json(to_views(bookings, &principal)))
}

pub async fn accept_handler(
    State(state): State<AppState>,
    principal: Principal,
    BookingId(booking_id): BookingId,
) -> Result<Json<TransitionResponse>, ApiError> {
    require_role(&principal, Role::Provider)?;

    let booking = booking::accept_booking(&state.pool, &principal.uid, booking_id).await?;
    Ok(Json(TransitionResponse {
        status: booking.status,
    }))
}

pub async fn travel_handler(
    State(state): State<AppState>,
    principal: Principal,
    BookingId(booking_id): BookingId,
) -> Result<Json<TransitionResponse>, ApiError> {
    require_role(&principal, Role::Provider)?;

    let booking = booking::travel(&state.pool, &principal.uid, booking_id).await?;
    Ok(Json(TransitionResponse {
        status: booking.status,
    }))
}

pub async fn arrived_handler(
    State(state): State<AppState>,
    principal: Principal,
    BookingId(booking_id): BookingId,
) -> Result<Json<TransitionResponse>, ApiError> {
    require_role(&principal, Role::Provider)?;

    let booking = booking::arrived(&state.pool, &principal.uid, booking_id).await?;
    Ok(Json(TransitionResponse {
        status: booking.status,
    }))
}

pub async fn start_handler(
    State(state): State<AppState>,
    principal: Principal,
    BookingId(booking_id): BookingId,
    ValidJson(req): ValidJson<StartServiceRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    require_role(&principal, Role::Provider)?;
    if req.otp.trim().is_empty() {
        return Err(ApiError::validation("otp is required"));
    }

    let booking = booking::start_service(&state.pool, &principal.uid, booking_id, &req.otp).await?;
    Ok(Json(TransitionResponse {
        status: booking.status,
    }))
}

pub async fn complete_handler(
    State(state): State<AppState>,
    principal: Principal,
    BookingId(booking_id): BookingId,
) -> Result<Json<TransitionResponse>, ApiError> {
    require_role(&principal, Role::Provider)?;

    let outcome = booking::complete_with_capture(
        &state.pool,
        &state.gateway,
        &state.config,
        &principal.uid,
        booking_id,
    )
    .await?;

    complete_outcome_to_response(outcome)
}

pub async fn provider_complete_handler(
    State(state): State<AppState>,
    principal: Principal,
    BookingId(booking_id): BookingId,
) -> Result<Json<TransitionResponse>, ApiError> {
    require_role(&principal, Role::Provider)?;

    let booking =
        booking::provider_complete(&state.pool, &state.config, &principal.uid, booking_id).await?;
    Ok(Json(TransitionResponse {
        status: booking.status,
    }))
}

pub async fn confirm_complete_handler(
    State(state): State<AppState>,
    principal: Principal,
    BookingId(booking_id): BookingId,
) -> Result<Json<TransitionResponse>, ApiError> {
    require_role(&principal, Role::User)?;

    let outcome =
        booking::confirm_complete(&state.pool, &state.gateway, &principal.uid, booking_id).await?;

    complete_outcome_to_response(outcome)
}

pub async fn cancel_handler(
    State(state): State<AppState>,
    principal: Principal,
    BookingId(booking_id): BookingId,
) -> Result<Json<TransitionResponse>, ApiError> {
    if !matches!(principal.role, Role::User | Role::Provider) {
        return Err(ApiError::forbidden("cancel requires user or provider role"));
    }

    let booking = booking::cancel_booking(
        &state.pool,
        &state.gateway,
        &state.config,
        &principal,
        booking_id,
    )
    .await?;
    Ok(Json(TransitionResponse {
        status: booking.status,
    }))
}

pub async fn provider_cancel_handler(
    State(state): State<AppState>,
    principal: Principal,
    BookingId(booking_id): BookingId,
) -> Result<Json<TransitionResponse>, ApiError> {
    require_role(&principal, Role::Provider)?;

    let booking = booking::provider_cancel(&state.pool, &principal.uid, booking_id).await?;
    Ok(Json(TransitionResponse {
        status: booking.status,
    }))
}

pub async fn issue_handler(
    State(state): State<AppState>,
    principal: Principal,
    BookingId(booking_id): BookingId,
    ValidJson(req): ValidJson<IssueRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    require_role(&principal, Role::User)?;

    let reason = req.reason.trim();
    if reason.len() < 5 {
        return Err(ApiError::validation(
            "reason must be at least 5 characters",
        ));
    }

    let booking = booking::flag_issue(&state.pool, &principal.uid, booking_id, reason).await?;
    Ok(Json(TransitionResponse {
        status: booking.status,
    }))
}

fn complete_outcome_to_response(
    outcome: CompleteOutcome,
) -> Result<Json<TransitionResponse>, ApiError> {
    match outcome {
        CompleteOutcome::Completed(booking) => Ok(Json(TransitionResponse {
            status: booking.status,
        })),
        CompleteOutcome::CaptureFailed { message } => Err(ApiError::CaptureFailed { message }),
    }
}

fn validate_create_request(req: &CreateBookingRequest, principal: &Principal) -> Result<(), ApiError> {
    if req.user_id != principal.uid {
        return Err(ApiError::forbidden("user_id must match the caller"));
    }
    if req.slot_id.trim().is_empty() {
        return Err(ApiError::validation("slot_id is required"));
    }
    Ok(())
}

fn verify_can_view(booking: &Booking, principal: &Principal) -> Result<(), ApiError> {
    let allowed = match principal.role {
        Role::Admin => true,
        Role::User => booking.customer_id == principal.uid,
        Role::Provider => {
            booking.provider_id.as_deref() == Some(principal.uid.as_str())
                || booking.candidate_list.iter().any(|c| c == &principal.uid)
        }
        Role::System => false,
    };

    if !allowed {
        return Err(ApiError::forbidden("no access to this booking"));
    }
    Ok(())
}

fn parse_list_filter(query: &ListBookingsQuery) -> Result<ListFilter, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            BookingStatus::parse(raw).ok_or_else(|| ApiError::validation("status is invalid"))?,
        ),
        None => None,
    };

    let limit = query.limit.unwrap_or(50);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::validation("limit must be between 1 and 100"));
    }

    let offset = query.offset.unwrap_or(0);
    if offset < 0 {
        return Err(ApiError::validation("offset must be >= 0"));
    }

    Ok(ListFilter {
        status,
        limit,
        offset,
    })
}

fn to_views(bookings: Vec<Booking>, principal: &Principal) -> Vec<BookingView> {
    bookings
        .into_iter()
        .map(|booking| BookingView::for_principal(booking, principal))
        .collect()
}
