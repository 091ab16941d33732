//! Host service-manager abstraction.
//!
//! Exactly four operations; everything else is backend detail. Construction
//! is non-blocking: a background task installs the service unit and retries
//! until it sticks, so the daemon can come up while the service manager is
//! still unavailable. Until installation completes every operation fails
//! fast with `NotReady`.

pub mod exec;
#[cfg(target_os = "macos")]
pub mod launchd;
#[cfg(target_os = "linux")]
pub mod systemd;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub mod unsupported;

use std::path::PathBuf;

use proxops_common::{error::Error, state::ServiceStatus};

#[allow(async_fn_in_trait)]
pub trait Supervisor {
    async fn start(&self) -> Result<(), Error>;
    async fn stop(&self) -> Result<(), Error>;
    async fn status(&self) -> Result<ServiceStatus, Error>;
    async fn close(&self) -> Result<(), Error>;
}

#[cfg(target_os = "linux")]
pub type PlatformSupervisor = systemd::SystemdSupervisor;
#[cfg(target_os = "macos")]
pub type PlatformSupervisor = launchd::LaunchdSupervisor;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub type PlatformSupervisor = unsupported::UnsupportedSupervisor;

/// Build the supervisor for this host. `command` is the full command line
/// the service runs (executable first).
pub fn platform(service_name: &str, command: Vec<String>) -> Result<PlatformSupervisor, Error> {
    PlatformSupervisor::new(service_name, command, default_unit_dir()?)
}

#[cfg(target_os = "linux")]
fn default_unit_dir() -> Result<PathBuf, Error> {
    Ok(PathBuf::from("/run/systemd/system"))
}

#[cfg(target_os = "macos")]
fn default_unit_dir() -> Result<PathBuf, Error> {
    let home = std::env::var_os("HOME")
        .ok_or_else(|| Error::Access("HOME is not set".into()))?;
    Ok(PathBuf::from(home).join("Library/LaunchAgents"))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn default_unit_dir() -> Result<PathBuf, Error> {
    Err(Error::UnsupportedPlatform)
}
