//! Configure and remove services: Register, persist, PostRegister, and
//! ownership of each service's background task.

use crate::catalog::ServiceCatalog;
use crate::clients::ClientSet;
use crate::error::ServiceError;
use crate::service::{BackgroundTask, PostRegister, Service};
use crate::webhook::endpoint_url;
use dashmap::DashMap;
use service_store::{KeyedLocks, ServiceRecord};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// A request to create or update a service.
#[derive(Debug, Clone)]
pub struct ConfigureRequest {
    pub service_type: String,
    pub service_id: String,
    pub service_user_id: String,
    pub config: serde_json::Value,
}

/// Result of a successful configure call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigureOutcome {
    pub service_id: String,
    pub service_type: String,
    pub old_config: Option<serde_json::Value>,
    pub new_config: serde_json::Value,
    /// The service asked to be deleted after registering.
    pub removed: bool,
}

/// Orchestrates service configuration.
pub struct LifecycleManager {
    catalog: ServiceCatalog,
    clients: ClientSet,
    base_url: String,
    tasks: DashMap<String, BackgroundTask>,
    locks: KeyedLocks,
}

impl LifecycleManager {
    pub fn new(catalog: ServiceCatalog, clients: ClientSet, base_url: impl Into<String>) -> Self {
        Self {
            catalog,
            clients,
            base_url: base_url.into(),
            tasks: DashMap::new(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    /// Number of running background tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of service IDs with an operation in flight.
    pub fn busy_count(&self) -> usize {
        self.locks.len()
    }

    #[instrument(skip(self, request), fields(service_id = %request.service_id, service_type = %request.service_type))]
    pub async fn configure(&self, request: ConfigureRequest) -> Result<ConfigureOutcome, ServiceError> {
        let _guard = self.locks.lock(&request.service_id).await;

        let old_record = self.catalog.store().load(&request.service_id).await?;
        let old: Option<Arc<dyn Service>> = match &old_record {
            Some(record) => match self.catalog.instantiate(record) {
                Ok(service) => Some(Arc::from(service)),
                Err(e) => {
                    warn!("Previous configuration no longer loads: {}", e);
                    None
                }
            },
            None => None,
        };

        let client = self
            .clients
            .get(&request.service_user_id)
            .ok_or_else(|| ServiceError::UnknownClient(request.service_user_id.clone()))?;

        let webhook_url = endpoint_url(&self.base_url, &request.service_id);
        let mut service = self.catalog.registry().create_instance(
            &request.service_type,
            &request.service_id,
            &request.service_user_id,
            &webhook_url,
        )?;

        if let Some(record) = &old_record {
            if record.service_type != request.service_type {
                return Err(ServiceError::TypeMismatch {
                    service_id: request.service_id.clone(),
                    existing: record.service_type.clone(),
                    requested: request.service_type.clone(),
                });
            }
        }

        service
            .load_config(request.config)
            .map_err(|e| ServiceError::InvalidConfig(e.to_string()))?;

        let task = service
            .register(old.as_deref(), client)
            .await
            .map_err(|e| ServiceError::RegisterFailed(format!("{:#}", e)))?;

        let new_config = match service.config() {
            Ok(config) => config,
            Err(e) => {
                if let Some(task) = task {
                    task.stop().await;
                }
                return Err(ServiceError::InvalidConfig(e.to_string()));
            }
        };

        let record = ServiceRecord::new(
            &request.service_id,
            &request.service_type,
            &request.service_user_id,
            webhook_url,
            new_config.clone(),
        );
        if let Err(e) = self.catalog.store().save(&record).await {
            if let Some(task) = task {
                task.stop().await;
            }
            return Err(e.into());
        }

        self.replace_task(&request.service_id, task).await;

        let service: Arc<dyn Service> = Arc::from(service);
        let removed = match service.post_register(old.as_deref()).await {
            PostRegister::Keep => false,
            PostRegister::Delete => {
                info!("Service removed itself after registering");
                self.delete_and_stop(&request.service_id).await;
                true
            }
        };

        info!("Service configured");
        Ok(ConfigureOutcome {
            service_id: request.service_id,
            service_type: request.service_type,
            old_config: old_record.map(|r| r.config),
            new_config,
            removed,
        })
    }

    /// Delete a service and stop its background task. Removing an absent
    /// service is not an error.
    #[instrument(skip(self))]
    pub async fn remove(&self, service_id: &str) -> Result<(), ServiceError> {
        let _guard = self.locks.lock(service_id).await;

        self.catalog.store().delete(service_id).await?;
        if let Some((_, task)) = self.tasks.remove(service_id) {
            task.stop().await;
        }
        info!("Service removed");
        Ok(())
    }

    /// Re-run Register for every stored service so rooms are re-joined and
    /// background tasks restarted. Returns how many services started.
    pub async fn start_persisted(&self) -> Result<usize, ServiceError> {
        let records = self.catalog.store().load_all().await?;
        let mut started = 0;

        for record in records {
            let _guard = self.locks.lock(&record.service_id).await;

            let Some(client) = self.clients.get(&record.service_user_id) else {
                warn!(
                    service_id = %record.service_id,
                    user_id = %record.service_user_id,
                    "No chat client for stored service"
                );
                continue;
            };

            let mut service = match self.catalog.instantiate(&record) {
                Ok(service) => service,
                Err(e) => {
                    warn!(service_id = %record.service_id, "Skipping stored service: {}", e);
                    continue;
                }
            };

            match service.register(None, client).await {
                Ok(task) => {
                    self.replace_task(&record.service_id, task).await;
                    started += 1;
                }
                Err(e) => error!(
                    service_id = %record.service_id,
                    service_type = %record.service_type,
                    "Failed to start stored service: {:#}",
                    e
                ),
            }
        }

        info!("Started {} stored services", started);
        Ok(started)
    }

    /// Cancel and join every background task.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, task)) = self.tasks.remove(&id) {
                task.stop().await;
            }
        }
    }

    async fn replace_task(&self, service_id: &str, task: Option<BackgroundTask>) {
        let previous = match task {
            Some(task) => self.tasks.insert(service_id.to_string(), task),
            None => self.tasks.remove(service_id).map(|(_, t)| t),
        };
        if let Some(previous) = previous {
            previous.stop().await;
        }
    }

    async fn delete_and_stop(&self, service_id: &str) {
        if let Err(e) = self.catalog.store().delete(service_id).await {
            error!(service_id = %service_id, "Failed to delete service: {}", e);
        }
        if let Some((_, task)) = self.tasks.remove(service_id) {
            task.stop().await;
        }
    }
}
