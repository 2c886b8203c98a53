//! Service store contract and the in-memory implementation.

use crate::error::StoreError;
use crate::types::ServiceRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Persistence contract for service configuration.
///
/// `save` and `delete` are atomic per service ID. Enumerations are sorted by
/// service ID.
#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Load the record for a service ID.
    async fn load(&self, service_id: &str) -> Result<Option<ServiceRecord>, StoreError>;

    /// Load every record of the given service type.
    async fn load_all_by_type(&self, service_type: &str) -> Result<Vec<ServiceRecord>, StoreError> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| r.service_type == service_type)
            .collect())
    }

    /// Load every record.
    async fn load_all(&self) -> Result<Vec<ServiceRecord>, StoreError>;

    /// Insert or replace a record.
    async fn save(&self, record: &ServiceRecord) -> Result<(), StoreError>;

    /// Delete a record. Deleting an absent ID is not an error.
    async fn delete(&self, service_id: &str) -> Result<(), StoreError>;
}

/// In-memory store.
///
/// Backed by a sharded map so writers to different service IDs do not
/// contend on a single lock.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<String, ServiceRecord>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl ServiceStore for MemoryStore {
    async fn load(&self, service_id: &str) -> Result<Option<ServiceRecord>, StoreError> {
        Ok(self.records.get(service_id).map(|r| r.value().clone()))
    }

    async fn load_all(&self) -> Result<Vec<ServiceRecord>, StoreError> {
        let mut records: Vec<ServiceRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        Ok(records)
    }

    #[instrument(skip(self, record), fields(service_id = %record.service_id))]
    async fn save(&self, record: &ServiceRecord) -> Result<(), StoreError> {
        self.records
            .insert(record.service_id.clone(), record.clone());
        debug!("Saved service record");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, service_id: &str) -> Result<(), StoreError> {
        if self.records.remove(service_id).is_some() {
            debug!("Deleted service record");
        }
        Ok(())
    }
}
