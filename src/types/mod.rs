pub mod api_error;
pub mod booking;
pub mod payment;
pub mod provider;
pub mod webhook;

#[allow(unused_imports)]
pub use api_error::{ApiErrorCode, ApiErrorResponse};
#[allow(unused_imports)]
pub use booking::{
    Booking, BookingStatus, BookingView, CreateBookingRequest, IssueRequest, ListBookingsQuery,
    ResolveRequest, StartServiceRequest, SweepResponse, TransitionResponse,
};
#[allow(unused_imports)]
pub use payment::{IntentKind, PayResponse, PaymentIntent, PaymentIntentStatus};
#[allow(unused_imports)]
pub use provider::{Provider, Service};
#[allow(unused_imports)]
pub use webhook::{ProcessOutcome, WebhookAck, WebhookStatus};
