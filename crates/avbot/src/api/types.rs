//! Admin API request and response bodies. Field names follow the
//! capitalized wire format admin tooling already sends.

use serde::{Deserialize, Serialize};

/// Create or update a service.
#[derive(Debug, Deserialize)]
pub struct ConfigureServiceRequest {
    #[serde(rename = "Type")]
    pub service_type: String,

    #[serde(rename = "Id")]
    pub id: String,

    #[serde(rename = "UserID")]
    pub user_id: String,

    #[serde(rename = "Config", default = "empty_object")]
    pub config: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ConfigureServiceResponse {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Type")]
    pub service_type: String,

    #[serde(rename = "OldConfig")]
    pub old_config: Option<serde_json::Value>,

    #[serde(rename = "NewConfig")]
    pub new_config: serde_json::Value,
}

/// Look up or remove a service by ID.
#[derive(Debug, Deserialize)]
pub struct ServiceIdRequest {
    #[serde(rename = "Id")]
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct GetServiceResponse {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Type")]
    pub service_type: String,

    #[serde(rename = "Config")]
    pub config: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}
