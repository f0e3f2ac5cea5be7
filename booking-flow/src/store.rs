use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::error::{BookingError, Result};
use crate::reservation::ReservationRecord;

/// Schema version of the persisted reservation envelope. Entries written by
/// an unknown version are discarded, never parsed on a best-guess basis.
pub const STORE_VERSION: u32 = 1;

/// Raw durable key-value backend, scoped to the browsing session/device.
/// Survives page reloads; the embedding application supplies the real one.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: String) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory implementation of StoreBackend
pub struct InMemoryStore {
    entries: Arc<DashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.clone()))
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredReservation {
    version: u32,
    record: ReservationRecord,
}

/// Typed accessor over the raw backend: one reservation record and one
/// "payment completed" marker per apartment key.
///
/// Corrupt or unknown-version entries are logged, removed and treated as
/// absent; a bad entry must never take the page down.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn StoreBackend>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    fn record_key(apartment_id: &str) -> String {
        format!("booking.v1.{apartment_id}")
    }

    fn marker_key(apartment_id: &str) -> String {
        format!("booking.completed.{apartment_id}")
    }

    pub async fn load_record(&self, apartment_id: &str) -> Result<Option<ReservationRecord>> {
        let key = Self::record_key(apartment_id);
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<StoredReservation>(&raw) {
            Ok(stored) if stored.version == STORE_VERSION => Ok(Some(stored.record)),
            Ok(stored) => {
                warn!(
                    apartment_id,
                    version = stored.version,
                    "discarding reservation record with unknown schema version"
                );
                self.backend.remove(&key).await?;
                Ok(None)
            }
            Err(err) => {
                warn!(apartment_id, %err, "discarding corrupt reservation record");
                self.backend.remove(&key).await?;
                Ok(None)
            }
        }
    }

    pub async fn save_record(&self, record: &ReservationRecord) -> Result<()> {
        let stored = StoredReservation {
            version: STORE_VERSION,
            record: record.clone(),
        };
        let raw = serde_json::to_string(&stored).map_err(|e| BookingError::Store(e.to_string()))?;
        self.backend.put(&Self::record_key(&record.apartment_id), raw).await
    }

    pub async fn remove_record(&self, apartment_id: &str) -> Result<()> {
        self.backend.remove(&Self::record_key(apartment_id)).await
    }

    /// Marks the apartment's booking cycle as paid; consumed and cleared by
    /// the synchronizer on the next visit.
    pub async fn mark_payment_completed(&self, apartment_id: &str) -> Result<()> {
        self.backend
            .put(&Self::marker_key(apartment_id), "true".to_string())
            .await
    }

    pub async fn payment_completed(&self, apartment_id: &str) -> Result<bool> {
        Ok(self.backend.get(&Self::marker_key(apartment_id)).await?.is_some())
    }

    pub async fn clear_payment_completed(&self, apartment_id: &str) -> Result<()> {
        self.backend.remove(&Self::marker_key(apartment_id)).await
    }
}
