//! Shared test doubles: a scripted, call-recording [`BookingApi`].

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::api::{
    BookAndPayRequest, BookingApi, CreateReservationRequest, DateWindow, HistoryEntry,
    PaymentInitiation, PriceBreakdown, StatusBreakdown,
};
use crate::error::{BookingError, Result};
use crate::reservation::{BookingDetails, RequestResponseBooking, ReservationStatus};

pub(crate) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub(crate) fn breakdown(status: ReservationStatus) -> StatusBreakdown {
    StatusBreakdown {
        status,
        selected_bedrooms: Some(2),
        check_in: date(2026, 9, 1),
        check_out: date(2026, 9, 5),
        price_breakdown: PriceBreakdown::default(),
    }
}

pub(crate) fn booking_details() -> BookingDetails {
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

pub(crate) struct RecordingApi {
    statuses: Mutex<VecDeque<StatusBreakdown>>,
    history: Mutex<Vec<HistoryEntry>>,
    created: Mutex<Vec<CreateReservationRequest>>,
    cancelled: Mutex<Vec<String>>,
    book_and_pay: Mutex<Vec<BookAndPayRequest>>,
    request_response: Mutex<Vec<RequestResponseBooking>>,
    next_id: AtomicU64,
    unauthorized: AtomicBool,
    fail_book_and_pay: AtomicBool,
}

impl RecordingApi {
    pub(crate) fn new() -> Self {
        Self {
            statuses: Mutex::new(VecDeque::new()),
            history: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            book_and_pay: Mutex::new(Vec::new()),
            request_response: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            unauthorized: AtomicBool::new(false),
            fail_book_and_pay: AtomicBool::new(false),
        }
    }

    /// Scripts the next status-breakdown response. The last scripted entry
    /// sticks for repeated calls.
    pub(crate) fn push_status(&self, breakdown: StatusBreakdown) {
        self.statuses.lock().unwrap().push_back(breakdown);
    }

    pub(crate) fn push_history(&self, entry: HistoryEntry) {
        self.history.lock().unwrap().push(entry);
    }

    pub(crate) fn set_unauthorized(&self, value: bool) {
        self.unauthorized.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_book_and_pay(&self, value: bool) {
        self.fail_book_and_pay.store(value, Ordering::SeqCst);
    }

    pub(crate) fn book_and_pay_calls(&self) -> Vec<BookAndPayRequest> {
        self.book_and_pay.lock().unwrap().clone()
    }

    pub(crate) fn request_response_calls(&self) -> usize {
        self.request_response.lock().unwrap().len()
    }

    pub(crate) fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    fn check_auth(&self) -> Result<()> {
        if self.unauthorized.load(Ordering::SeqCst) {
            Err(BookingError::Unauthorized)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BookingApi for RecordingApi {
    async fn create_reservation(&self, req: CreateReservationRequest) -> Result<String> {
        self.check_auth()?;
        let id = format!("res-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.created.lock().unwrap().push(req);
        Ok(id)
    }

    async fn reservation_status(&self, _reservation_id: &str) -> Result<StatusBreakdown> {
        self.check_auth()?;
        let mut statuses = self.statuses.lock().unwrap();
        match statuses.len() {
            0 => Err(BookingError::Network("no scripted status".to_string())),
            1 => Ok(statuses[0].clone()),
            _ => Ok(statuses.pop_front().unwrap()),
        }
    }

    async fn search_booking_history(
        &self,
        _statuses: &[ReservationStatus],
        _window: DateWindow,
    ) -> Result<Vec<HistoryEntry>> {
        self.check_auth()?;
        Ok(self.history.lock().unwrap().clone())
    }

    async fn cancel_reservation(&self, reservation_id: &str) -> Result<()> {
        self.check_auth()?;
        self.cancelled.lock().unwrap().push(reservation_id.to_string());
        Ok(())
    }

    async fn book_and_pay(&self, req: BookAndPayRequest) -> Result<PaymentInitiation> {
        self.check_auth()?;
        let confirmation = req.payment_status.is_some();
        self.book_and_pay.lock().unwrap().push(req);
        if self.fail_book_and_pay.load(Ordering::SeqCst) {
            return Err(BookingError::Network("connection reset".to_string()));
        }
        if confirmation {
            Ok(PaymentInitiation::Confirmed)
        } else {
            Ok(PaymentInitiation::Authorization {
                url: "https://pay.example.com/authorize/abc".to_string(),
            })
        }
    }

    async fn book_from_request_response(
        &self,
        booking: &RequestResponseBooking,
        _details: &BookingDetails,
    ) -> Result<PaymentInitiation> {
        self.check_auth()?;
        self.request_response.lock().unwrap().push(booking.clone());
        Ok(PaymentInitiation::Authorization {
            url: "https://pay.example.com/authorize/rr".to_string(),
        })
    }
}
