use serde::Serialize;

use crate::reservation::{ReservationRecord, ReservationStatus};

/// The set of legal user actions for the current reservation state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    /// A fresh reservation request may be submitted.
    pub can_request: bool,
    /// The open reservation may be cancelled.
    pub can_cancel: bool,
    /// Book-and-pay may be launched (accepted, with a known id).
    pub can_book_now: bool,
    /// An agent decision or identifier recovery is still outstanding.
    pub must_wait: bool,
}

/// Pure decision function; no side effects, no network.
///
/// Terminal statuses report all flags false: the UI offers a status refresh
/// and falls back to `can_request` only after the stale record is cleared.
pub fn decide(record: Option<&ReservationRecord>) -> GateDecision {
    let Some(record) = record else {
        return GateDecision {
            can_request: true,
            ..GateDecision::default()
        };
    };
    match record.status {
        ReservationStatus::Pending => GateDecision {
            can_cancel: true,
            must_wait: true,
            ..GateDecision::default()
        },
        ReservationStatus::Accepted => {
            let has_id = record.reservation_id.is_some();
            GateDecision {
                can_cancel: true,
                can_book_now: has_id,
                must_wait: !has_id,
                ..GateDecision::default()
            }
        }
        ReservationStatus::Declined
        | ReservationStatus::Cancelled
        | ReservationStatus::Completed => GateDecision::default(),
    }
}
