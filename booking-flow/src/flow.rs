use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::api::{BookAndPayRequest, BookingApi, CreateReservationRequest, PaymentInitiation};
use crate::error::{BookingError, Result};
use crate::payment::{
    DetectorConfig, PaymentOutcome, PaymentSession, PaymentSource, PaymentSurface, ProviderMessage,
};
use crate::reservation::{
    BookingDetails, RequestResponseBooking, ReservationRecord, ReservationStatus,
};
use crate::store::SessionStore;

/// Reference reported to the backend when a success carries no provider
/// transaction token (manual confirmation).
pub const FALLBACK_PAYMENT_REFERENCE: &str = "payment_completed";

#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub detector: DetectorConfig,
    /// How long the terminal success view is shown before the embedder
    /// navigates back to the apartment detail view.
    pub success_view_delay: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            success_view_delay: Duration::from_secs(5),
        }
    }
}

/// The one shared booking protocol consumed by every booking entry point:
/// launch a payment session, arm its detector, finalize its success.
pub struct BookingFlow {
    api: Arc<dyn BookingApi>,
    store: SessionStore,
    config: FlowConfig,
    /// The single active session; launching a new one tears the previous one
    /// down so a stale channel cannot fire a duplicate completion.
    active: Mutex<Option<Arc<PaymentSession>>>,
}

impl BookingFlow {
    pub fn new(api: Arc<dyn BookingApi>, store: SessionStore) -> Self {
        Self::with_config(api, store, FlowConfig::default())
    }

    pub fn with_config(api: Arc<dyn BookingApi>, store: SessionStore, config: FlowConfig) -> Self {
        Self {
            api,
            store,
            config,
            active: Mutex::new(None),
        }
    }

    pub fn success_view_delay(&self) -> Duration {
        self.config.success_view_delay
    }

    /// Submits a reservation request and persists the resulting record.
    pub async fn request_reservation(
        &self,
        req: CreateReservationRequest,
    ) -> Result<ReservationRecord> {
        let reservation_id = self.api.create_reservation(req.clone()).await?;
        let record = ReservationRecord {
            reservation_id: Some(reservation_id),
            apartment_id: req.apartment_id,
            check_in: req.check_in,
            check_out: req.check_out,
            reservation_type: req.reservation_type,
            selected_bedrooms: req.bedrooms,
            status: ReservationStatus::Pending,
        };
        self.store.save_record(&record).await?;
        info!(apartment_id = %record.apartment_id, "reservation requested");
        Ok(record)
    }

    /// Cancels an open reservation and clears it from the store.
    pub async fn cancel_reservation(&self, record: &ReservationRecord) -> Result<()> {
        let reservation_id = record.reservation_id.as_deref().ok_or_else(|| {
            BookingError::InvalidState("no reservation id to cancel".to_string())
        })?;
        self.api.cancel_reservation(reservation_id).await?;
        self.store.remove_record(&record.apartment_id).await?;
        info!(apartment_id = %record.apartment_id, "reservation cancelled");
        Ok(())
    }

    /// Launches a payment session for an accepted reservation.
    ///
    /// The cached status may be stale, so the backend is re-checked
    /// synchronously before any money is involved; if it no longer reports
    /// `accepted`, the launch aborts without submitting.
    pub async fn launch_reservation_payment(
        &self,
        record: &ReservationRecord,
        details: &BookingDetails,
    ) -> Result<Arc<PaymentSession>> {
        details.validate()?;
        let reservation_id = record.reservation_id.clone().ok_or_else(|| {
            BookingError::InvalidState("reservation id is not known yet".to_string())
        })?;
        let breakdown = self.api.reservation_status(&reservation_id).await?;
        if breakdown.status != ReservationStatus::Accepted {
            return Err(BookingError::InvalidState(format!(
                "reservation is {} and cannot be booked",
                breakdown.status
            )));
        }
        let initiation = self
            .api
            .book_and_pay(BookAndPayRequest {
                reservation_id: reservation_id.clone(),
                details: details.clone(),
                payment_status: None,
                payment_reference: None,
            })
            .await?;
        let url = authorization_url(initiation)?;
        let session = Arc::new(PaymentSession::new(
            PaymentSource::Reservation {
                reservation_id,
                apartment_id: record.apartment_id.clone(),
            },
            url,
        ));
        self.install(session.clone()).await;
        Ok(session)
    }

    /// Launches a payment session for an agent's request-response offer.
    /// No reservation exists on this path; the triple and both dates are
    /// mandatory, and the origin submission itself confirms server-side.
    pub async fn launch_request_response_payment(
        &self,
        booking: &RequestResponseBooking,
        details: &BookingDetails,
    ) -> Result<Arc<PaymentSession>> {
        details.validate()?;
        booking.validate()?;
        let initiation = self
            .api
            .book_from_request_response(booking, details)
            .await?;
        let url = authorization_url(initiation)?;
        let session = Arc::new(PaymentSession::new(
            PaymentSource::RequestResponse(booking.clone()),
            url,
        ));
        self.install(session.clone()).await;
        Ok(session)
    }

    /// Arms the detector channels of a launched session.
    pub fn arm_detector(
        &self,
        session: &PaymentSession,
        surface: Arc<dyn PaymentSurface>,
        messages: mpsc::UnboundedReceiver<ProviderMessage>,
    ) {
        session.arm(surface, messages, self.config.detector.clone());
    }

    /// Converts a detected payment success into a durable confirmed booking,
    /// exactly once per session; a second invocation is a no-op.
    ///
    /// The reservation path re-submits the payload tagged as paid. That call
    /// is a best-effort notification: payment already succeeded at the
    /// provider, so a failure here is logged and absorbed, never rolled back
    /// into the success the user has seen.
    pub async fn finalize(&self, session: &PaymentSession, details: &BookingDetails) -> Result<()> {
        let outcome = session.outcome().ok_or_else(|| {
            BookingError::InvalidState("payment session is not resolved yet".to_string())
        })?;
        let reference = match outcome {
            PaymentOutcome::Succeeded { reference } => reference,
            PaymentOutcome::Cancelled => {
                return Err(BookingError::InvalidState(
                    "a cancelled payment cannot be finalized".to_string(),
                ));
            }
        };
        if !session.begin_finalize() {
            debug!(session = %session.id(), "already finalized; skipping");
            return Ok(());
        }
        match session.source() {
            PaymentSource::RequestResponse(_) => {
                // The origin submission already confirmed this booking
                // server-side; calling the endpoint again would be redundant.
            }
            PaymentSource::Reservation { reservation_id, .. } => {
                let request = BookAndPayRequest {
                    reservation_id: reservation_id.clone(),
                    details: details.clone(),
                    payment_status: Some("success".to_string()),
                    payment_reference: Some(
                        reference
                            .clone()
                            .unwrap_or_else(|| FALLBACK_PAYMENT_REFERENCE.to_string()),
                    ),
                };
                if let Err(err) = self.api.book_and_pay(request).await {
                    warn!(
                        session = %session.id(),
                        reference = ?reference,
                        %err,
                        "post-payment confirmation call failed"
                    );
                }
            }
        }
        self.store
            .mark_payment_completed(session.source().apartment_id())
            .await?;
        info!(session = %session.id(), "booking confirmed");
        Ok(())
    }

    /// Discards a session the user backed out of. Channels are torn down and
    /// the finalizer is never involved.
    pub async fn discard(&self, session: &PaymentSession) {
        session.cancel();
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|a| a.id() == session.id()) {
            *active = None;
        }
    }

    pub async fn active_session(&self) -> Option<Arc<PaymentSession>> {
        self.active.lock().await.clone()
    }

    async fn install(&self, session: Arc<PaymentSession>) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            if !previous.is_resolved() {
                warn!(session = %previous.id(), "replacing an unresolved payment session");
            }
            previous.teardown();
        }
        *active = Some(session);
    }
}

fn authorization_url(initiation: PaymentInitiation) -> Result<String> {
    match initiation {
        PaymentInitiation::Authorization { url } => Ok(url),
        // The initial submission always drives an external interaction; a
        // direct confirmation only answers the tagged re-submission.
        PaymentInitiation::Confirmed => Err(BookingError::InvalidState(
            "backend confirmed without a payment step".to_string(),
        )),
    }
}
