//! Wire types for the manager <-> node daemon HTTP API.

use serde::{Deserialize, Serialize};

use crate::state::{NodeProperties, ServiceStatus};

/// A user as it travels over the wire. The manager keeps richer records; the
/// node only ever needs the account name and credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiUser {
    pub name: String,
    pub uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub users: Vec<ApiUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    #[serde(flatten)]
    pub properties: NodeProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub service_status: ServiceStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditUsersRequest {
    #[serde(default)]
    pub add: Vec<ApiUser>,
    #[serde(default)]
    pub remove: Vec<ApiUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
