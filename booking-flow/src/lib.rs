//! Client-side booking lifecycle orchestrator.
//!
//! Drives a reservation from "request" through "agent accepts", "pay" and
//! "booking confirmed" while tolerating page reloads, lost identifiers and a
//! payment provider whose completion signal can arrive through several
//! unreliable, non-exclusive channels.
//!
//! The moving parts:
//! * [`sync::ReservationSync`] — converges the cached reservation with
//!   backend truth and self-heals missing identifiers; one serialized poll
//!   per reservation.
//! * [`gate::decide`] — pure mapping from reservation state to the legal user
//!   actions.
//! * [`flow::BookingFlow`] — the one shared protocol behind every booking
//!   entry point: launch a payment session, arm its detector, finalize its
//!   success exactly once.
//! * [`payment::PaymentSession`] — a supervised payment interaction with
//!   three racing completion channels and first-wins-then-disarm semantics.
//!
//! All collaborators (remote API, payment surface, durable key-value store,
//! token source) are trait seams; the embedding application supplies the real
//! ones, tests script them.

pub mod api;
pub mod error;
pub mod flow;
pub mod gate;
pub mod payment;
pub mod reservation;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testutil;

pub use api::{
    BookAndPayRequest, BookingApi, CreateReservationRequest, DateWindow, HistoryEntry,
    PaymentInitiation, PriceBreakdown, StatusBreakdown, TokenProvider,
};
#[cfg(feature = "http")]
pub use api::HttpBookingApi;
pub use error::{BookingError, Result};
pub use flow::{BookingFlow, FALLBACK_PAYMENT_REFERENCE, FlowConfig};
pub use gate::{GateDecision, decide};
pub use payment::{
    DetectorConfig, PaymentOutcome, PaymentSession, PaymentSource, PaymentSurface,
    ProviderMessage, SurfaceError,
};
pub use reservation::{
    BookingDetails, RequestResponseBooking, ReservationRecord, ReservationStatus,
};
pub use store::{InMemoryStore, STORE_VERSION, SessionStore, StoreBackend};
pub use sync::{PollHandle, ReservationSync, SyncConfig};
