use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::reservation::{BookingDetails, RequestResponseBooking, ReservationStatus};

/// Supplies the bearer token for backend calls. Token storage and renewal
/// belong to the embedding application.
pub trait TokenProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReservationRequest {
    pub user_id: String,
    pub apartment_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub reservation_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub nightly_rate: f64,
    pub nights: u32,
    pub fees: f64,
    pub total: f64,
}

/// Response of the status-breakdown endpoint; the authority on status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBreakdown {
    pub status: ReservationStatus,
    pub selected_bedrooms: Option<u32>,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub price_breakdown: PriceBreakdown,
}

/// Entry of a booking-history search; used only for identifier recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub apartment_id: String,
    pub check_in: NaiveDate,
    #[serde(alias = "_id")]
    pub reservation_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAndPayRequest {
    pub reservation_id: String,
    pub details: BookingDetails,
    /// `Some("success")` on the post-payment confirmation re-submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
}

/// What a booking submission came back with: either an external authorization
/// URL to drive a payment interaction, or a direct confirmation (the tagged
/// post-payment re-submission gets this).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PaymentInitiation {
    Authorization { url: String },
    Confirmed,
}

/// The remote booking API, consumed as a black box.
#[async_trait]
pub trait BookingApi: Send + Sync {
    async fn create_reservation(&self, req: CreateReservationRequest) -> Result<String>;

    async fn reservation_status(&self, reservation_id: &str) -> Result<StatusBreakdown>;

    async fn search_booking_history(
        &self,
        statuses: &[ReservationStatus],
        window: DateWindow,
    ) -> Result<Vec<HistoryEntry>>;

    async fn cancel_reservation(&self, reservation_id: &str) -> Result<()>;

    async fn book_and_pay(&self, req: BookAndPayRequest) -> Result<PaymentInitiation>;

    async fn book_from_request_response(
        &self,
        booking: &RequestResponseBooking,
        details: &BookingDetails,
    ) -> Result<PaymentInitiation>;
}

#[cfg(feature = "http")]
mod http {
    use super::*;
    use crate::error::BookingError;
    use std::sync::Arc;

    /// reqwest-backed implementation of [`BookingApi`].
    pub struct HttpBookingApi {
        client: reqwest::Client,
        base_url: String,
        tokens: Arc<dyn TokenProvider>,
    }

    #[derive(Debug, Deserialize)]
    struct CreatedReservation {
        reservation_id: String,
    }

    #[derive(Debug, Deserialize)]
    struct InitiationResponse {
        authorization_url: Option<String>,
    }

    #[derive(Serialize)]
    struct RequestResponseBody<'a> {
        #[serde(flatten)]
        booking: &'a RequestResponseBooking,
        #[serde(flatten)]
        details: &'a BookingDetails,
    }

    impl HttpBookingApi {
        pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
            Self {
                client: reqwest::Client::new(),
                base_url: base_url.into(),
                tokens,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{path}", self.base_url.trim_end_matches('/'))
        }

        fn authorized(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
            let token = self.tokens.bearer_token().ok_or(BookingError::Unauthorized)?;
            Ok(req.bearer_auth(token))
        }

        async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
            let status = resp.status();
            if status.is_success() {
                Ok(resp)
            } else if status == reqwest::StatusCode::UNAUTHORIZED {
                Err(BookingError::Unauthorized)
            } else if status == reqwest::StatusCode::CONFLICT {
                let message = resp
                    .text()
                    .await
                    .unwrap_or_else(|_| "booking conflict".to_string());
                Err(BookingError::Conflict {
                    message,
                    dates: None,
                })
            } else {
                Err(BookingError::Network(format!("unexpected status {status}")))
            }
        }

        fn into_initiation(resp: InitiationResponse) -> PaymentInitiation {
            match resp.authorization_url {
                Some(url) => PaymentInitiation::Authorization { url },
                None => PaymentInitiation::Confirmed,
            }
        }
    }

    fn net(err: reqwest::Error) -> BookingError {
        BookingError::Network(err.to_string())
    }

    #[async_trait]
    impl BookingApi for HttpBookingApi {
        async fn create_reservation(&self, req: CreateReservationRequest) -> Result<String> {
            let request = self.authorized(self.client.post(self.url("/reservations")))?;
            let resp = request.json(&req).send().await.map_err(net)?;
            let created: CreatedReservation =
                Self::check(resp).await?.json().await.map_err(net)?;
            Ok(created.reservation_id)
        }

        async fn reservation_status(&self, reservation_id: &str) -> Result<StatusBreakdown> {
            let path = format!("/reservations/{reservation_id}/status-breakdown");
            let request = self.authorized(self.client.get(self.url(&path)))?;
            let resp = request.send().await.map_err(net)?;
            Self::check(resp).await?.json().await.map_err(net)
        }

        async fn search_booking_history(
            &self,
            statuses: &[ReservationStatus],
            window: DateWindow,
        ) -> Result<Vec<HistoryEntry>> {
            let statuses = statuses
                .iter()
                .map(ReservationStatus::as_str)
                .collect::<Vec<_>>()
                .join(",");
            let request = self.authorized(self.client.get(self.url("/bookings/history")))?;
            let resp = request
                .query(&[
                    ("statuses", statuses),
                    ("from", window.from.to_string()),
                    ("to", window.to.to_string()),
                ])
                .send()
                .await
                .map_err(net)?;
            Self::check(resp).await?.json().await.map_err(net)
        }

        async fn cancel_reservation(&self, reservation_id: &str) -> Result<()> {
            let path = format!("/reservations/{reservation_id}/cancel");
            let request = self.authorized(self.client.post(self.url(&path)))?;
            let resp = request.send().await.map_err(net)?;
            Self::check(resp).await?;
            Ok(())
        }

        async fn book_and_pay(&self, req: BookAndPayRequest) -> Result<PaymentInitiation> {
            let path = format!("/reservations/{}/book-and-pay", req.reservation_id);
            let request = self.authorized(self.client.post(self.url(&path)))?;
            let resp = request.json(&req).send().await.map_err(net)?;
            let body: InitiationResponse = Self::check(resp).await?.json().await.map_err(net)?;
            Ok(Self::into_initiation(body))
        }

        async fn book_from_request_response(
            &self,
            booking: &RequestResponseBooking,
            details: &BookingDetails,
        ) -> Result<PaymentInitiation> {
            let path = format!(
                "/requests/{}/responses/{}/book",
                booking.request_id, booking.request_response_id
            );
            let request = self.authorized(self.client.post(self.url(&path)))?;
            let resp = request
                .json(&RequestResponseBody { booking, details })
                .send()
                .await
                .map_err(net)?;
            let body: InitiationResponse = Self::check(resp).await?.json().await.map_err(net)?;
            Ok(Self::into_initiation(body))
        }
    }
}

#[cfg(feature = "http")]
pub use http::HttpBookingApi;
