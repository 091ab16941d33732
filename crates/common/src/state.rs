use std::fmt::Display;

use serde::{Deserialize, Serialize};

pub type UserId = u64;

/// A proxy user. Identity is immutable after creation; enablement is tracked
/// separately as a [`UserStatus`] pair (desired, actual) in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Display name, unique within a node. Used as the account email on the
    /// proxy side.
    pub name: String,
    pub vless_uuid: String,
}

/// Store-side user enablement. `Unknown` is an intent marker written while a
/// mutation on the user is in flight, never a terminal desired value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Unknown,
    Disabled,
    Enabled,
}

impl Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserStatus::Unknown => write!(f, "unknown"),
            UserStatus::Disabled => write!(f, "disabled"),
            UserStatus::Enabled => write!(f, "enabled"),
        }
    }
}

/// Store-side node power state. Same discipline as [`UserStatus`]: `Unknown`
/// only ever appears as an in-flight intent marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Unknown,
    Stopped,
    Running,
}

impl Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Unknown => write!(f, "unknown"),
            NodeStatus::Stopped => write!(f, "stopped"),
            NodeStatus::Running => write!(f, "running"),
        }
    }
}

/// Process-level liveness as reported by the host service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Unknown,
    Stopped,
    Running,
}

impl Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Unknown => write!(f, "unknown"),
            ServiceStatus::Stopped => write!(f, "stopped"),
            ServiceStatus::Running => write!(f, "running"),
        }
    }
}

impl From<ServiceStatus> for NodeStatus {
    fn from(s: ServiceStatus) -> Self {
        match s {
            ServiceStatus::Unknown => NodeStatus::Unknown,
            ServiceStatus::Stopped => NodeStatus::Stopped,
            ServiceStatus::Running => NodeStatus::Running,
        }
    }
}

/// One entry point of the proxy, derived from the server config at daemon
/// startup and immutable for the daemon's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundType {
    Unsupported,
    VlessTcpReality,
    VlessXhttp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inbound {
    pub tag: String,
    pub ty: InboundType,
}

impl Inbound {
    pub fn is_supported(&self) -> bool {
        self.ty != InboundType::Unsupported
    }
}

/// Client-config template plus the names of its user fields, served back to
/// the manager on a successful start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub template: String,
    pub user_name_field: String,
    pub vless_uuid_field: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProperties {
    pub client_cfg: ClientConfig,
}
