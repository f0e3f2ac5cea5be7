use chrono::NaiveDate;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BookingError>;

/// Errors surfaced by the booking flow, grouped by how the client should react.
#[derive(Error, Debug)]
pub enum BookingError {
    /// A required field is missing or malformed. Raised before any network call.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No usable bearer token. Disables synchronization and payment launch;
    /// read-only browsing is unaffected.
    #[error("not authenticated")]
    Unauthorized,

    /// A business-rule conflict reported by the backend, surfaced verbatim.
    /// `dates` carries the conflicting stay window when the backend names one.
    #[error("{message}")]
    Conflict {
        message: String,
        dates: Option<(NaiveDate, NaiveDate)>,
    },

    /// Transient transport failure. Absorbed by polling, reported for explicit
    /// user actions.
    #[error("network error: {0}")]
    Network(String),

    /// The operation is not legal in the current reservation state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The persistent session store failed to read or write.
    #[error("store error: {0}")]
    Store(String),
}

impl BookingError {
    /// Human-readable message for the error surface, with conflict dates
    /// appended when known.
    pub fn user_message(&self) -> String {
        match self {
            BookingError::Conflict {
                message,
                dates: Some((from, to)),
            } => format!("{message} ({from} to {to})"),
            other => other.to_string(),
        }
    }
}
