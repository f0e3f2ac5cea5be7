use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{Months, NaiveDate, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::{BookingApi, DateWindow, StatusBreakdown};
use crate::error::{BookingError, Result};
use crate::reservation::{ReservationRecord, ReservationStatus};
use crate::store::SessionStore;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    /// A refresh must finish (or hit this timeout) before the next tick fires.
    pub refresh_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            refresh_timeout: Duration::from_secs(10),
        }
    }
}

/// Keeps the client's belief about reservation status converged with backend
/// truth, self-healing missing identifiers from booking history.
pub struct ReservationSync {
    api: Arc<dyn BookingApi>,
    store: SessionStore,
    refresh_seq: AtomicU64,
    /// Newest applied refresh sequence per apartment. A response for an older
    /// request than the last applied one is discarded, so a delayed reply
    /// cannot roll the status backwards.
    applied: DashMap<String, u64>,
}

impl ReservationSync {
    pub fn new(api: Arc<dyn BookingApi>, store: SessionStore) -> Self {
        Self {
            api,
            store,
            refresh_seq: AtomicU64::new(0),
            applied: DashMap::new(),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Reads the cached record for an apartment. A "payment completed" marker
    /// left by the finalizer resets the whole cycle: marker and record are
    /// cleared so the user can start a fresh reservation.
    pub async fn load_cached(&self, apartment_id: &str) -> Result<Option<ReservationRecord>> {
        if self.store.payment_completed(apartment_id).await? {
            info!(apartment_id, "payment completed on a previous visit; resetting booking cycle");
            self.store.clear_payment_completed(apartment_id).await?;
            self.store.remove_record(apartment_id).await?;
            return Ok(None);
        }
        self.store.load_record(apartment_id).await
    }

    /// Best-effort recovery of a reservation id that was never persisted:
    /// searches booking history for the coming year and matches on
    /// `(apartment_id, check_in)`. Unauthenticated or no match yields
    /// `Ok(None)`; this is a repair, not a guarantee.
    pub async fn resolve_missing_id(
        &self,
        apartment_id: &str,
        check_in: NaiveDate,
    ) -> Result<Option<String>> {
        let today = Utc::now().date_naive();
        let window = DateWindow {
            from: today,
            to: today + Months::new(12),
        };
        let statuses = [
            ReservationStatus::Pending,
            ReservationStatus::Accepted,
            ReservationStatus::Declined,
        ];
        let entries = match self.api.search_booking_history(&statuses, window).await {
            Ok(entries) => entries,
            Err(BookingError::Unauthorized) => {
                debug!(apartment_id, "not authenticated; skipping id recovery");
                return Ok(None);
            }
            Err(err) => {
                debug!(apartment_id, %err, "booking history lookup failed; skipping id recovery");
                return Ok(None);
            }
        };
        let Some(entry) = entries
            .into_iter()
            .find(|e| e.apartment_id == apartment_id && e.check_in == check_in)
        else {
            return Ok(None);
        };
        if let Some(mut record) = self.store.load_record(apartment_id).await? {
            record.reservation_id = Some(entry.reservation_id.clone());
            self.store.save_record(&record).await?;
        }
        info!(apartment_id, reservation_id = %entry.reservation_id, "recovered missing reservation id");
        Ok(Some(entry.reservation_id))
    }

    /// Takes a sequence number for a refresh about to be issued.
    pub fn begin_refresh(&self) -> u64 {
        self.refresh_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Fetches the authoritative status and applies it to the record and the
    /// store.
    pub async fn refresh(&self, record: &mut ReservationRecord) -> Result<ReservationStatus> {
        let reservation_id = record.reservation_id.clone().ok_or_else(|| {
            BookingError::InvalidState("cannot refresh a reservation without an id".to_string())
        })?;
        let seq = self.begin_refresh();
        let breakdown = self.api.reservation_status(&reservation_id).await?;
        self.apply_refresh(seq, record, &breakdown).await
    }

    /// Applies a status response issued at `seq`. Last-requested wins: if a
    /// newer request's response was already applied, this one is stale and
    /// the current status is kept.
    pub async fn apply_refresh(
        &self,
        seq: u64,
        record: &mut ReservationRecord,
        breakdown: &StatusBreakdown,
    ) -> Result<ReservationStatus> {
        let stale = {
            let mut newest = self.applied.entry(record.apartment_id.clone()).or_insert(0);
            if seq <= *newest {
                true
            } else {
                *newest = seq;
                false
            }
        };
        if stale {
            debug!(apartment_id = %record.apartment_id, seq, "discarding stale status response");
            return Ok(record.status);
        }
        if breakdown.status == ReservationStatus::Accepted
            && record.status != ReservationStatus::Accepted
        {
            // Bedroom selection is immutable once accepted; lock in what the
            // backend reports at the moment of acceptance.
            record.selected_bedrooms = breakdown.selected_bedrooms;
        }
        if record.status != breakdown.status {
            info!(
                apartment_id = %record.apartment_id,
                from = %record.status,
                to = %breakdown.status,
                "reservation status changed"
            );
        }
        record.status = breakdown.status;
        self.store.save_record(record).await?;
        Ok(record.status)
    }

    /// Starts the single owned poll task for an apartment's reservation.
    /// The poll is serialized: each cycle awaits the refresh (bounded by
    /// `refresh_timeout`) before the next tick can fire. Stops itself on a
    /// terminal status or when the handle is stopped/dropped.
    pub fn start_polling(self: &Arc<Self>, apartment_id: &str, config: SyncConfig) -> PollHandle {
        let sync = Arc::clone(self);
        let apartment_id = apartment_id.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut record = match sync.store.load_record(&apartment_id).await {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        debug!(apartment_id, "no cached reservation; stopping poll");
                        break;
                    }
                    Err(err) => {
                        warn!(apartment_id, %err, "store read failed during poll");
                        continue;
                    }
                };
                if record.status.is_terminal() {
                    info!(apartment_id, status = %record.status, "reservation terminal; stopping poll");
                    break;
                }
                if record.reservation_id.is_none() {
                    let _ = sync.resolve_missing_id(&apartment_id, record.check_in).await;
                    continue;
                }
                match tokio::time::timeout(config.refresh_timeout, sync.refresh(&mut record)).await
                {
                    Ok(Ok(status)) if status.is_terminal() => {
                        info!(apartment_id, %status, "reservation terminal; stopping poll");
                        break;
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(BookingError::Unauthorized)) => {
                        debug!(apartment_id, "not authenticated; stopping poll");
                        break;
                    }
                    Ok(Err(err)) => {
                        warn!(apartment_id, %err, "status refresh failed; keeping cached status");
                    }
                    Err(_) => {
                        warn!(apartment_id, "status refresh timed out");
                    }
                }
            }
        });
        PollHandle { handle }
    }
}

/// Handle to a running poll task; stopping (or dropping) it clears the timer
/// synchronously so nothing fires after teardown.
pub struct PollHandle {
    handle: JoinHandle<()>,
}

impl PollHandle {
    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::testutil::{RecordingApi, breakdown, date};

    fn record() -> ReservationRecord {
        ReservationRecord {
            reservation_id: Some("res-1".to_string()),
            apartment_id: "apt-1".to_string(),
            check_in: date(2026, 9, 1),
            check_out: date(2026, 9, 5),
            reservation_type: "full".to_string(),
            selected_bedrooms: None,
            status: ReservationStatus::Pending,
        }
    }

    fn sync_with(api: Arc<RecordingApi>) -> ReservationSync {
        let store = SessionStore::new(Arc::new(InMemoryStore::new()));
        ReservationSync::new(api, store)
    }

    #[tokio::test]
    async fn refresh_applies_backend_status_and_persists_it() {
        let api = Arc::new(RecordingApi::new());
        api.push_status(breakdown(ReservationStatus::Accepted));
        let sync = sync_with(api);
        let mut rec = record();
        sync.store.save_record(&rec).await.unwrap();

        let status = sync.refresh(&mut rec).await.unwrap();
        assert_eq!(status, ReservationStatus::Accepted);
        // bedrooms locked in from the backend at acceptance
        assert_eq!(rec.selected_bedrooms, Some(2));
        let stored = sync.store.load_record("apt-1").await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Accepted);
    }

    #[tokio::test]
    async fn late_response_cannot_roll_status_backwards() {
        let api = Arc::new(RecordingApi::new());
        let sync = sync_with(api);
        let mut rec = record();
        sync.store.save_record(&rec).await.unwrap();

        // two refreshes issued in order; the newer response lands first
        let early = sync.begin_refresh();
        let late = sync.begin_refresh();
        let status = sync
            .apply_refresh(late, &mut rec, &breakdown(ReservationStatus::Accepted))
            .await
            .unwrap();
        assert_eq!(status, ReservationStatus::Accepted);

        // the slow early response resolves afterwards with the older status
        let status = sync
            .apply_refresh(early, &mut rec, &breakdown(ReservationStatus::Pending))
            .await
            .unwrap();
        assert_eq!(status, ReservationStatus::Accepted);
        let stored = sync.store.load_record("apt-1").await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Accepted);
    }

    #[tokio::test]
    async fn missing_id_is_recovered_from_booking_history() {
        let api = Arc::new(RecordingApi::new());
        api.push_history(crate::api::HistoryEntry {
            apartment_id: "apt-1".to_string(),
            check_in: date(2026, 9, 1),
            reservation_id: "res-found".to_string(),
        });
        let sync = sync_with(api);
        let mut rec = record();
        rec.reservation_id = None;
        sync.store.save_record(&rec).await.unwrap();

        let id = sync
            .resolve_missing_id("apt-1", date(2026, 9, 1))
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("res-found"));
        let stored = sync.store.load_record("apt-1").await.unwrap().unwrap();
        assert_eq!(stored.reservation_id.as_deref(), Some("res-found"));
    }

    #[tokio::test]
    async fn id_recovery_fails_silently_without_a_match_or_auth() {
        let api = Arc::new(RecordingApi::new());
        let sync = sync_with(api.clone());
        assert!(sync
            .resolve_missing_id("apt-1", date(2026, 9, 1))
            .await
            .unwrap()
            .is_none());

        api.set_unauthorized(true);
        assert!(sync
            .resolve_missing_id("apt-1", date(2026, 9, 1))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn completed_marker_resets_the_booking_cycle() {
        let api = Arc::new(RecordingApi::new());
        let sync = sync_with(api);
        sync.store.save_record(&record()).await.unwrap();
        sync.store.mark_payment_completed("apt-1").await.unwrap();

        assert!(sync.load_cached("apt-1").await.unwrap().is_none());
        // marker and record are both gone; a fresh cycle can start
        assert!(!sync.store.payment_completed("apt-1").await.unwrap());
        assert!(sync.store.load_record("apt-1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn polling_stops_on_terminal_status() {
        let api = Arc::new(RecordingApi::new());
        api.push_status(breakdown(ReservationStatus::Pending));
        api.push_status(breakdown(ReservationStatus::Declined));
        let sync = Arc::new(sync_with(api));
        sync.store.save_record(&record()).await.unwrap();

        let handle = sync.start_polling("apt-1", SyncConfig::default());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(handle.is_finished());
        let stored = sync.store.load_record("apt-1").await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Declined);
    }
}
