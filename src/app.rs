use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::{
    auth::gateway_auth,
    handlers::{
        admin::{resolve_handler, sweep_handler},
        bookings::{
            accept_handler, arrived_handler, cancel_handler, complete_handler,
            confirm_complete_handler, create_booking_handler, get_booking_handler, issue_handler,
            list_bookings_handler, list_claimed_handler, provider_cancel_handler,
            provider_complete_handler, start_handler, travel_handler,
        },
        payments::pay_handler,
        services::list_services_handler,
        webhooks::webhook_handler,
    },
    state::AppState,
};

/// Full `/v1` surface. Webhooks authenticate by signature and the services
/// catalogue is public; everything else sits behind the gateway token.
pub fn app(state: AppState) -> Router {
    let authed = Router::new()
        .route(
            "/bookings",
            post(create_booking_handler).get(list_bookings_handler),
        )
        .route("/bookings/claimed", get(list_claimed_handler))
        .route("/bookings/:id", get(get_booking_handler))
        .route("/bookings/:id/pay", post(pay_handler))
        .route("/bookings/:id/accept", post(accept_handler))
        .route("/bookings/:id/travel", post(travel_handler))
        .route("/bookings/:id/arrived", post(arrived_handler))
        .route("/bookings/:id/start", post(start_handler))
        .route("/bookings/:id/complete", post(complete_handler))
        .route(
            "/bookings/:id/provider-complete",
            post(provider_complete_handler),
        )
        .route(
            "/bookings/:id/confirm-complete",
            post(confirm_complete_handler),
        )
        .route("/bookings/:id/cancel", post(cancel_handler))
        .route("/bookings/:id/provider_cancel", post(provider_cancel_handler))
        .route("/bookings/:id/issue", post(issue_handler))
        .route("/admin/sweep", post(sweep_handler))
        .route("/admin/bookings/:id/resolve", post(resolve_handler))
        .layer(middleware::from_fn_with_state(state.clone(), gateway_auth));

    let public = Router::new()
        .route("/webhooks/:provider", post(webhook_handler))
        .route("/services", get(list_services_handler));

    Router::new()
        .nest("/v1", authed.merge(public))
        .with_state(state)
}
