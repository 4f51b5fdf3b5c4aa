//! Booking lifecycle state machine.
//!
//! The transition table is the single source of truth; the booking engine
//! layers semantic gates (OTP validity, candidate membership, provider
//! ownership, grace window) on top of it but never relaxes it.

use crate::auth::Role;
use crate::types::BookingStatus;

#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub actor: Role,
}

const fn t(from: BookingStatus, to: BookingStatus, actor: Role) -> Transition {
    Transition { from, to, actor }
}

use crate::auth::Role::*;
use crate::types::BookingStatus::*;

pub const TRANSITIONS: &[Transition] = &[
    t(PendingPayment, PaidSearching, System),
    t(PendingPayment, Cancelled, User),
    t(PendingPayment, Expired, System),
    t(PaidSearching, Accepted, Provider),
    t(PaidSearching, Cancelled, User),
    t(PaidSearching, Expired, System),
    t(Accepted, EnRoute, Provider),
    t(Accepted, PaidSearching, Provider),
    t(Accepted, Cancelled, User),
    t(Accepted, Cancelled, Provider),
    t(EnRoute, Arrived, Provider),
    t(EnRoute, PaidSearching, Provider),
    t(EnRoute, Cancelled, User),
    t(EnRoute, Cancelled, Provider),
    t(Arrived, InProgress, Provider),
    t(Arrived, Cancelled, User),
    t(Arrived, Cancelled, Provider),
    t(InProgress, CompletePending, Provider),
    t(CompletePending, Closed, System),
    t(CompletePending, NeedsReview, User),
    t(NeedsReview, Closed, Admin),
    t(NeedsReview, Cancelled, Admin),
];

pub fn can_transition(from: BookingStatus, to: BookingStatus, actor: Role) -> bool {
    TRANSITIONS
        .iter()
        .any(|tr| tr.from == from && tr.to == to && tr.actor == actor)
}

pub fn is_terminal(status: BookingStatus) -> bool {
    matches!(status, Closed | Cancelled | Expired)
}

/// A booking becomes eligible for provider payout once it is CLOSED.
pub fn is_eligible_for_payout(status: BookingStatus) -> bool {
    status == Closed
}

/// The main authorization can be voided without a fee while the booking is
/// still searching.
pub fn is_eligible_for_refund(status: BookingStatus) -> bool {
    status == PaidSearching
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_requires_provider_role() {
        assert!(can_transition(PaidSearching, Accepted, Provider));
        assert!(!can_transition(PaidSearching, Accepted, User));
        assert!(!can_transition(PaidSearching, Accepted, Admin));
    }

    #[test]
    fn authorization_is_a_system_transition() {
        assert!(can_transition(PendingPayment, PaidSearching, System));
        assert!(!can_transition(PendingPayment, PaidSearching, User));
    }

    #[test]
    fn redispatch_only_from_accepted_or_en_route() {
        assert!(can_transition(Accepted, PaidSearching, Provider));
        assert!(can_transition(EnRoute, PaidSearching, Provider));
        assert!(!can_transition(Arrived, PaidSearching, Provider));
        assert!(!can_transition(InProgress, PaidSearching, Provider));
    }

    #[test]
    fn user_cancellation_window_ends_at_in_progress() {
        assert!(can_transition(PendingPayment, Cancelled, User));
        assert!(can_transition(Arrived, Cancelled, User));
        assert!(!can_transition(InProgress, Cancelled, User));
        assert!(!can_transition(CompletePending, Cancelled, User));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for terminal in [Closed, Cancelled, Expired] {
            assert!(is_terminal(terminal));
            assert!(
                TRANSITIONS.iter().all(|tr| tr.from != terminal),
                "{terminal:?} must be terminal"
            );
        }
        assert!(!is_terminal(NeedsReview));
    }

    #[test]
    fn review_is_resolved_by_admin_only() {
        assert!(can_transition(NeedsReview, Closed, Admin));
        assert!(can_transition(NeedsReview, Cancelled, Admin));
        assert!(!can_transition(NeedsReview, Closed, User));
        assert!(!can_transition(NeedsReview, Cancelled, Provider));
    }

    #[test]
    fn eligibility_predicates_agree_with_the_table() {
        assert!(is_eligible_for_payout(Closed));
        assert!(!is_eligible_for_payout(CompletePending));
        assert!(is_eligible_for_refund(PaidSearching));
        assert!(!is_eligible_for_refund(Accepted));
    }
}
