//! Fallback for hosts without a supported service manager.

use std::path::PathBuf;

use proxops_common::{error::Error, state::ServiceStatus};

use super::Supervisor;

pub struct UnsupportedSupervisor {}

impl UnsupportedSupervisor {
    pub fn new(
        _service_name: &str,
        _command: Vec<String>,
        _unit_dir: PathBuf,
    ) -> Result<Self, Error> {
        Err(Error::UnsupportedPlatform)
    }
}

impl Supervisor for UnsupportedSupervisor {
    async fn start(&self) -> Result<(), Error> {
        Err(Error::UnsupportedPlatform)
    }

    async fn stop(&self) -> Result<(), Error> {
        Err(Error::UnsupportedPlatform)
    }

    async fn status(&self) -> Result<ServiceStatus, Error> {
        Err(Error::UnsupportedPlatform)
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}
