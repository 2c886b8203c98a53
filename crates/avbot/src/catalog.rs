//! Live service instances rebuilt from persisted records.

use crate::error::ServiceError;
use crate::registry::ServiceRegistry;
use crate::service::Service;
use service_store::{ServiceRecord, ServiceStore};
use std::sync::Arc;
use tracing::warn;

/// The store paired with the registry that knows how to revive its records.
#[derive(Clone)]
pub struct ServiceCatalog {
    store: Arc<dyn ServiceStore>,
    registry: Arc<ServiceRegistry>,
}

impl ServiceCatalog {
    pub fn new(store: Arc<dyn ServiceStore>, registry: Arc<ServiceRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<dyn ServiceStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Recreate an instance from its record and decode its configuration.
    pub fn instantiate(&self, record: &ServiceRecord) -> Result<Box<dyn Service>, ServiceError> {
        let mut service = self.registry.create_instance(
            &record.service_type,
            &record.service_id,
            &record.service_user_id,
            &record.webhook_endpoint_url,
        )?;
        service
            .load_config(record.config.clone())
            .map_err(|e| ServiceError::InvalidConfig(e.to_string()))?;
        Ok(service)
    }

    pub async fn load(&self, service_id: &str) -> Result<Option<Arc<dyn Service>>, ServiceError> {
        match self.store.load(service_id).await? {
            Some(record) => Ok(Some(Arc::from(self.instantiate(&record)?))),
            None => Ok(None),
        }
    }

    /// Every stored service in ID order. Records that no longer decode are
    /// logged and skipped.
    pub async fn load_all(&self) -> Result<Vec<Arc<dyn Service>>, ServiceError> {
        let records = self.store.load_all().await?;
        Ok(self.instantiate_all(&records))
    }

    pub async fn load_all_by_type(
        &self,
        service_type: &str,
    ) -> Result<Vec<Arc<dyn Service>>, ServiceError> {
        let records = self.store.load_all_by_type(service_type).await?;
        Ok(self.instantiate_all(&records))
    }

    fn instantiate_all(&self, records: &[ServiceRecord]) -> Vec<Arc<dyn Service>> {
        records
            .iter()
            .filter_map(|record| match self.instantiate(record) {
                Ok(service) => Some(Arc::from(service)),
                Err(e) => {
                    warn!(
                        service_id = %record.service_id,
                        service_type = %record.service_type,
                        "Skipping stored service: {}",
                        e
                    );
                    None
                }
            })
            .collect()
    }
}
