//! Service type registry: type name to factory.

use crate::error::{RegistryError, ServiceError};
use crate::service::{Service, ServiceMeta};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds an unconfigured service instance from its identity.
pub type ServiceFactory = Arc<dyn Fn(ServiceMeta) -> Box<dyn Service> + Send + Sync>;

/// Collects factories at startup. Consumed by [`RegistryBuilder::build`].
#[derive(Default)]
pub struct RegistryBuilder {
    factories: BTreeMap<String, ServiceFactory>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, service_type: &str, factory: F) -> Result<&mut Self, RegistryError>
    where
        F: Fn(ServiceMeta) -> Box<dyn Service> + Send + Sync + 'static,
    {
        if service_type.is_empty() {
            return Err(RegistryError::EmptyType);
        }
        if self.factories.contains_key(service_type) {
            return Err(RegistryError::Duplicate(service_type.to_string()));
        }
        self.factories
            .insert(service_type.to_string(), Arc::new(factory));
        Ok(self)
    }

    pub fn build(self) -> ServiceRegistry {
        ServiceRegistry {
            factories: self.factories,
        }
    }
}

/// Immutable registry shared by reference after startup.
pub struct ServiceRegistry {
    factories: BTreeMap<String, ServiceFactory>,
}

impl ServiceRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Create an unconfigured instance of `service_type`.
    pub fn create_instance(
        &self,
        service_type: &str,
        service_id: &str,
        service_user_id: &str,
        webhook_endpoint_url: &str,
    ) -> Result<Box<dyn Service>, ServiceError> {
        let factory = self
            .factories
            .get(service_type)
            .ok_or_else(|| ServiceError::UnknownServiceType(service_type.to_string()))?;

        Ok(factory(ServiceMeta::new(
            service_id,
            service_type,
            service_user_id,
            webhook_endpoint_url,
        )))
    }

    /// Registered types in sorted order.
    pub fn service_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("types", &self.service_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        meta: ServiceMeta,
    }

    #[async_trait::async_trait]
    impl Service for Dummy {
        fn meta(&self) -> &ServiceMeta {
            &self.meta
        }

        fn load_config(&mut self, _config: serde_json::Value) -> Result<(), serde_json::Error> {
            Ok(())
        }

        fn config(&self) -> Result<serde_json::Value, serde_json::Error> {
            Ok(serde_json::json!({}))
        }
    }

    fn dummy(meta: ServiceMeta) -> Box<dyn Service> {
        Box::new(Dummy { meta })
    }

    #[test]
    fn test_register_and_create() {
        let mut builder = ServiceRegistry::builder();
        builder.register("dummy", dummy).unwrap();
        let registry = builder.build();

        let instance = registry
            .create_instance("dummy", "svc1", "@bot:x", "http://h/services/hooks/c3ZjMQ")
            .unwrap();
        assert_eq!(instance.service_id(), "svc1");
        assert_eq!(instance.service_type(), "dummy");
        assert_eq!(instance.service_user_id(), "@bot:x");
        assert_eq!(
            instance.meta().webhook_endpoint_url,
            "http://h/services/hooks/c3ZjMQ"
        );
        assert_eq!(registry.service_types(), vec!["dummy"]);
    }

    #[test]
    fn test_unknown_type() {
        let registry = ServiceRegistry::builder().build();
        let err = registry.create_instance("nope", "a", "b", "c").err().unwrap();
        assert!(matches!(err, ServiceError::UnknownServiceType(t) if t == "nope"));
    }

    #[test]
    fn test_register_rejects_empty_and_duplicate() {
        let mut builder = ServiceRegistry::builder();
        assert_eq!(
            builder.register("", dummy).err(),
            Some(RegistryError::EmptyType)
        );
        builder.register("dummy", dummy).unwrap();
        assert_eq!(
            builder.register("dummy", dummy).err(),
            Some(RegistryError::Duplicate("dummy".into()))
        );
    }
}
