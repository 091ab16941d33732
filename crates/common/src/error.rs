use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;
use thiserror::Error;

/// Error categories shared by the agent and the controlplane.
///
/// Layers wrap messages with context but never translate the category; the
/// reconciler hands categories to its driver verbatim, and the agent's HTTP
/// layer maps them to status codes at the very edge.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize, AsRefStr)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),
    #[error("access error: {0}")]
    Access(String),
    #[error("exec error: {0}")]
    Exec(String),
    #[error("unsupported platform")]
    UnsupportedPlatform,
    #[error("service error: {0}")]
    Service(String),
    #[error("service not ready")]
    NotReady,
    #[error("grpc error: {0}")]
    Grpc(String),
    #[error("internal program error: {0}")]
    Internal(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Failures the next reconcile tick is expected to recover from.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Access(_)
                | Error::Service(_)
                | Error::NotReady
                | Error::Grpc(_)
                | Error::Cancelled(_)
        )
    }
}
