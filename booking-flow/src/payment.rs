use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};
use uuid::Uuid;

use crate::reservation::RequestResponseBooking;

/// Where a payment session originated from.
#[derive(Debug, Clone)]
pub enum PaymentSource {
    Reservation {
        reservation_id: String,
        apartment_id: String,
    },
    RequestResponse(RequestResponseBooking),
}

impl PaymentSource {
    pub fn apartment_id(&self) -> &str {
        match self {
            PaymentSource::Reservation { apartment_id, .. } => apartment_id,
            PaymentSource::RequestResponse(booking) => &booking.apartment_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded { reference: Option<String> },
    Cancelled,
}

/// A message posted by the payment provider into the client context, either
/// already structured or as a JSON-encoded string.
#[derive(Debug, Clone)]
pub enum ProviderMessage {
    Structured(Value),
    Text(String),
}

/// The embedded payment surface whose current location can be inspected.
#[async_trait]
pub trait PaymentSurface: Send + Sync {
    async fn current_url(&self) -> std::result::Result<String, SurfaceError>;
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    /// The surface navigated to the provider's origin; inspection is expected
    /// to fail there and the poll simply tries again.
    #[error("cross-origin navigation")]
    CrossOrigin,
    /// The surface no longer exists.
    #[error("payment surface closed")]
    Gone,
}

/// Timing of the URL-inspection channel.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Grace period before the first URL inspection, letting the initial
    /// navigation to the provider complete.
    pub arm_delay: Duration,
    pub inspect_period: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            arm_delay: Duration::from_secs(2),
            inspect_period: Duration::from_secs(1),
        }
    }
}

/// Extracts an outcome from a provider message: `status == "success"` or a
/// `reference`/`trxref` field means the payment went through. Anything else
/// is not this session's business and is ignored.
pub fn parse_provider_message(message: &ProviderMessage) -> Option<PaymentOutcome> {
    let value: Value = match message {
        ProviderMessage::Structured(value) => value.clone(),
        ProviderMessage::Text(raw) => serde_json::from_str(raw).ok()?,
    };
    let reference = value
        .get("reference")
        .or_else(|| value.get("trxref"))
        .and_then(Value::as_str)
        .map(str::to_owned);
    let success = value.get("status").and_then(Value::as_str) == Some("success");
    if success || reference.is_some() {
        Some(PaymentOutcome::Succeeded { reference })
    } else {
        None
    }
}

/// Classifies the embedded surface's current URL. Cancel markers are checked
/// first so a provider cancel page under a callback path is not misread as
/// success.
pub fn classify_callback_url(url: &str) -> Option<PaymentOutcome> {
    let lowered = url.to_ascii_lowercase();
    if lowered.contains("cancel") || lowered.contains("close") {
        return Some(PaymentOutcome::Cancelled);
    }
    if lowered.contains("success")
        || lowered.contains("callback")
        || lowered.contains("reference")
        || lowered.contains("trxref")
    {
        let reference = query_param(url, "reference").or_else(|| query_param(url, "trxref"));
        return Some(PaymentOutcome::Succeeded { reference });
    }
    None
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

/// Single-resolution guard shared with the detector task. The first channel
/// to fire wins; later attempts are no-ops.
#[derive(Debug)]
struct Resolution {
    tx: watch::Sender<Option<PaymentOutcome>>,
}

impl Resolution {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    fn get(&self) -> Option<PaymentOutcome> {
        self.tx.borrow().clone()
    }

    fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    fn try_resolve(&self, session: Uuid, outcome: PaymentOutcome) -> bool {
        let mut slot = Some(outcome.clone());
        let won = self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = slot.take();
                true
            } else {
                false
            }
        });
        if won {
            info!(session = %session, ?outcome, "payment session resolved");
        } else {
            debug!(session = %session, "channel fired after resolution; ignored");
        }
        won
    }
}

/// One supervised payment interaction. Owns its resolution guard and the
/// detector task; tearing the session down clears every outstanding listener
/// and timer, so nothing can fire into discarded state afterwards.
#[derive(Debug)]
pub struct PaymentSession {
    id: Uuid,
    source: PaymentSource,
    authorization_url: String,
    resolution: Arc<Resolution>,
    detector: Mutex<Option<JoinHandle<()>>>,
    finalized: std::sync::atomic::AtomicBool,
}

impl PaymentSession {
    pub(crate) fn new(source: PaymentSource, authorization_url: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            authorization_url,
            resolution: Arc::new(Resolution::new()),
            detector: Mutex::new(None),
            finalized: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source(&self) -> &PaymentSource {
        &self.source
    }

    pub fn authorization_url(&self) -> &str {
        &self.authorization_url
    }

    pub fn outcome(&self) -> Option<PaymentOutcome> {
        self.resolution.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_resolved()
    }

    /// Watch the resolution; yields `Some(outcome)` once a channel fires.
    pub fn subscribe(&self) -> watch::Receiver<Option<PaymentOutcome>> {
        self.resolution.tx.subscribe()
    }

    /// Arms the message and URL-inspection channels against this session.
    /// Any previously armed detector for the session is replaced.
    pub fn arm(
        &self,
        surface: Arc<dyn PaymentSurface>,
        mut messages: mpsc::UnboundedReceiver<ProviderMessage>,
        config: DetectorConfig,
    ) {
        self.teardown();
        let resolution = Arc::clone(&self.resolution);
        let id = self.id;
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + config.arm_delay, config.inspect_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut messages_open = true;
            while !resolution.is_resolved() {
                tokio::select! {
                    message = messages.recv(), if messages_open => {
                        match message {
                            Some(message) => {
                                if let Some(outcome) = parse_provider_message(&message) {
                                    resolution.try_resolve(id, outcome);
                                    break;
                                }
                            }
                            // Sender dropped; URL inspection keeps running.
                            None => messages_open = false,
                        }
                    }
                    _ = ticker.tick() => {
                        match surface.current_url().await {
                            Ok(url) => {
                                if let Some(outcome) = classify_callback_url(&url) {
                                    resolution.try_resolve(id, outcome);
                                    break;
                                }
                            }
                            Err(SurfaceError::CrossOrigin) => {
                                debug!(session = %id, "surface on provider origin; inspection skipped");
                            }
                            Err(SurfaceError::Gone) => {
                                resolution.try_resolve(id, PaymentOutcome::Cancelled);
                                break;
                            }
                        }
                    }
                }
            }
        });
        *self.detector.lock().unwrap() = Some(handle);
    }

    /// Message-channel entry point for embeddings that deliver provider
    /// messages synchronously. Returns the outcome if this message resolved
    /// the session.
    pub fn on_provider_message(&self, message: &ProviderMessage) -> Option<PaymentOutcome> {
        let outcome = parse_provider_message(message)?;
        self.resolution
            .try_resolve(self.id, outcome.clone())
            .then(|| {
                self.teardown();
                outcome
            })
    }

    /// URL-inspection entry point for synchronous embeddings.
    pub fn inspect_url(&self, url: &str) -> Option<PaymentOutcome> {
        let outcome = classify_callback_url(url)?;
        self.resolution
            .try_resolve(self.id, outcome.clone())
            .then(|| {
                self.teardown();
                outcome
            })
    }

    /// Explicit "I completed payment" affordance; succeeds with no reference.
    pub fn confirm_manual(&self) -> bool {
        let won = self
            .resolution
            .try_resolve(self.id, PaymentOutcome::Succeeded { reference: None });
        if won {
            self.teardown();
        }
        won
    }

    /// User-initiated cancel. Idempotent: resolves the session as cancelled
    /// if still open and tears the channels down either way.
    pub fn cancel(&self) {
        self.resolution.try_resolve(self.id, PaymentOutcome::Cancelled);
        self.teardown();
    }

    /// Clears the detector task. Safe to call repeatedly.
    pub fn teardown(&self) {
        if let Some(handle) = self.detector.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Claims the one finalization slot; the first caller gets `true`.
    pub(crate) fn begin_finalize(&self) -> bool {
        !self
            .finalized
            .swap(true, std::sync::atomic::Ordering::SeqCst)
    }
}

impl Drop for PaymentSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
