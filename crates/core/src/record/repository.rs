//! Record store collaborator.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::error::RecordError;

/// Field name to stored value, e.g. `photo_field -> "key1,key2"`.
pub type FieldValues = BTreeMap<String, String>;

/// Where a set of field values lives in a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordSlot {
    /// Record id.
    pub record_id: String,
    /// Event id.
    pub event_id: Option<u64>,
    /// Repeat instance, only for repeating instruments.
    pub instance_id: Option<u32>,
}

/// Repository trait for the host's record data.
pub trait RecordRepository: Send + Sync {
    /// Reserve an id for a record that has not been saved yet.
    fn reserve_record_id(
        &self,
    ) -> impl std::future::Future<Output = Result<String, RecordError>> + Send;

    /// Merge `values` into the record slot.
    fn save_data(
        &self,
        slot: RecordSlot,
        values: FieldValues,
    ) -> impl std::future::Future<Output = Result<(), RecordError>> + Send;

    /// Read the values stored in a record slot.
    fn get_data(
        &self,
        slot: RecordSlot,
    ) -> impl std::future::Future<Output = Result<FieldValues, RecordError>> + Send;
}

/// Process-local record store.
#[derive(Debug, Default)]
pub struct InMemoryRecordRepository {
    slots: DashMap<RecordSlot, FieldValues>,
    last_id: AtomicU64,
}

impl InMemoryRecordRepository {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordRepository for InMemoryRecordRepository {
    async fn reserve_record_id(&self) -> Result<String, RecordError> {
        loop {
            let id = (self.last_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
            if !self.slots.iter().any(|slot| slot.key().record_id == id) {
                return Ok(id);
            }
        }
    }

    async fn save_data(&self, slot: RecordSlot, values: FieldValues) -> Result<(), RecordError> {
        self.slots.entry(slot).or_default().extend(values);
        Ok(())
    }

    async fn get_data(&self, slot: RecordSlot) -> Result<FieldValues, RecordError> {
        Ok(self
            .slots
            .get(&slot)
            .map(|values| values.clone())
            .unwrap_or_default())
    }
}
