pub mod store;

pub use store::{
    CompleteOutcome, ListFilter, accept_booking, arrived, cancel_booking, complete_with_capture,
    confirm_complete, create_booking, flag_issue, get_booking, list_claimed_by_provider,
    list_for_customer, provider_cancel, provider_complete, resolve_review, start_service, travel,
};
