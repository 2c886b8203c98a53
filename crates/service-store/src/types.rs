//! Persisted service record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration of one service instance as it is persisted.
///
/// `config` is opaque to the store; only the owning service type knows its
/// shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub service_id: String,
    pub service_type: String,
    pub service_user_id: String,
    pub webhook_endpoint_url: String,
    pub config: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRecord {
    pub fn new(
        service_id: impl Into<String>,
        service_type: impl Into<String>,
        service_user_id: impl Into<String>,
        webhook_endpoint_url: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            service_type: service_type.into(),
            service_user_id: service_user_id.into(),
            webhook_endpoint_url: webhook_endpoint_url.into(),
            config,
            updated_at: Utc::now(),
        }
    }
}
