use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{BookingError, Result};

/// Backend-authoritative reservation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Accepted,
    Declined,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    /// Terminal statuses admit no further transition; polling stops on them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Declined
                | ReservationStatus::Cancelled
                | ReservationStatus::Completed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Accepted => "accepted",
            ReservationStatus::Declined => "declined",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One booking attempt for an apartment, mirrored from backend truth.
///
/// `reservation_id` may be absent right after creation if persistence was
/// interrupted; the synchronizer recovers it from booking history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub reservation_id: Option<String>,
    pub apartment_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub reservation_type: String,
    pub selected_bedrooms: Option<u32>,
    pub status: ReservationStatus,
}

/// A booking that originates from an agent's concrete offer against an open
/// request. Pre-accepted by construction; never touches the synchronizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResponseBooking {
    pub request_id: String,
    pub request_response_id: String,
    pub apartment_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl RequestResponseBooking {
    /// The identifying triple must be complete; dates are mandatory on this
    /// path since there is no prior reservation to source them from.
    pub fn validate(&self) -> Result<()> {
        require(&self.request_id, "request id")?;
        require(&self.request_response_id, "request response id")?;
        require(&self.apartment_id, "apartment id")?;
        Ok(())
    }
}

/// Customer-supplied submission payload for book-and-pay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub identification_type: String,
    pub identification_number: String,
    /// Opaque reference to the attached identification image.
    pub identification_image: String,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
    pub refund_policy_accepted: bool,
}

impl BookingDetails {
    /// Field-by-field check, performed before any network call so the user
    /// gets a specific reason rather than a backend rejection.
    pub fn validate(&self) -> Result<()> {
        require(&self.first_name, "first name")?;
        require(&self.last_name, "last name")?;
        require(&self.email, "email")?;
        require(&self.phone, "phone number")?;
        require(&self.identification_type, "identification type")?;
        require(&self.identification_number, "identification number")?;
        require(&self.identification_image, "identification image")?;
        require(&self.emergency_contact_name, "emergency contact name")?;
        require(&self.emergency_contact_phone, "emergency contact phone")?;
        if !self.refund_policy_accepted {
            return Err(BookingError::Validation(
                "the refund policy must be accepted".to_string(),
            ));
        }
        Ok(())
    }
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(BookingError::Validation(format!("{what} is required")))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> BookingDetails {
        BookingDetails {
            first_name: "Amina".to_string(),
            last_name: "Diallo".to_string(),
            email: "amina@example.com".to_string(),
            phone: "+221770000000".to_string(),
            identification_type: "passport".to_string(),
            identification_number: "A1234567".to_string(),
            identification_image: "upload://id-front.jpg".to_string(),
            emergency_contact_name: "Moussa Diallo".to_string(),
            emergency_contact_phone: "+221770000001".to_string(),
            refund_policy_accepted: true,
        }
    }

    #[test]
    fn complete_details_pass_validation() {
        assert!(details().validate().is_ok());
    }

    #[test]
    fn missing_email_is_reported_by_name() {
        let mut d = details();
        d.email = "  ".to_string();
        let err = d.validate().unwrap_err();
        assert!(matches!(err, BookingError::Validation(ref m) if m.contains("email")));
    }

    #[test]
    fn unaccepted_refund_policy_blocks_submission() {
        let mut d = details();
        d.refund_policy_accepted = false;
        let err = d.validate().unwrap_err();
        assert!(matches!(err, BookingError::Validation(ref m) if m.contains("refund policy")));
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(!ReservationStatus::Accepted.is_terminal());
        assert!(ReservationStatus::Declined.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(ReservationStatus::Completed.is_terminal());
    }
}
