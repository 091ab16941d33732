//! systemd backend, driven through `systemctl`.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use proxops_common::{error::Error, retry::retry_infinite, state::ServiceStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{exec, Supervisor};

const INSTALL_RETRY_DELAY: Duration = Duration::from_millis(250);
const START_POLL_DELAY: Duration = Duration::from_millis(250);

pub struct SystemdSupervisor {
    service_name: String,
    unit_path: PathBuf,

    initialized: Arc<AtomicBool>,
    cancel: CancellationToken,
    install_task: Mutex<Option<JoinHandle<()>>>,
}

impl SystemdSupervisor {
    pub fn new(
        service_name: &str,
        command: Vec<String>,
        unit_dir: PathBuf,
    ) -> Result<Self, Error> {
        let service_name = format!("{service_name}.service");
        let unit_path = unit_dir.join(&service_name);
        let unit = render_unit(&command);

        let initialized = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(install_loop(
            unit_path.clone(),
            unit,
            Arc::clone(&initialized),
            cancel.clone(),
        ));

        Ok(Self {
            service_name,
            unit_path,
            initialized,
            cancel,
            install_task: Mutex::new(Some(task)),
        })
    }

    fn check_ready(&self) -> Result<(), Error> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(Error::NotReady);
        }
        Ok(())
    }

    async fn query_status(&self) -> Result<ServiceStatus, Error> {
        let out = exec::run("systemctl", &["is-active", &self.service_name]).await?;
        // is-active exits non-zero for anything but "active"; the state name
        // on stdout is what matters
        Ok(match out.stdout.trim() {
            "active" => ServiceStatus::Running,
            "inactive" | "failed" => ServiceStatus::Stopped,
            _ => ServiceStatus::Unknown,
        })
    }
}

impl Supervisor for SystemdSupervisor {
    async fn start(&self) -> Result<(), Error> {
        self.check_ready()?;

        exec::run("systemctl", &["restart", "--no-block", &self.service_name])
            .await?
            .check("systemctl restart")
            .map_err(|e| Error::Service(format!("start service: {e}")))?;

        // poll until the unit settles
        loop {
            match self.query_status().await? {
                ServiceStatus::Running => return Ok(()),
                ServiceStatus::Stopped => {
                    return Err(Error::Service("failed to start service".into()));
                }
                ServiceStatus::Unknown => {
                    tokio::time::sleep(START_POLL_DELAY).await;
                }
            }
        }
    }

    async fn stop(&self) -> Result<(), Error> {
        self.check_ready()?;

        let out = exec::run("systemctl", &["stop", &self.service_name]).await?;
        // stopping a unit that is not running or not loaded is fine
        if !out.success && !out.stderr.contains("not loaded") {
            return Err(Error::Service(format!(
                "stop service: {}",
                out.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn status(&self) -> Result<ServiceStatus, Error> {
        self.check_ready()?;
        self.query_status().await
    }

    async fn close(&self) -> Result<(), Error> {
        self.cancel.cancel();
        let task = self.install_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let mut close_errs = Vec::new();

        if self.initialized.swap(false, Ordering::AcqRel) {
            let out = exec::run("systemctl", &["stop", &self.service_name]).await?;
            if !out.success && !out.stderr.contains("not loaded") {
                close_errs.push(format!("stop: {}", out.stderr.trim()));
            }
        }

        match tokio::fs::remove_file(&self.unit_path).await {
            Ok(()) => {
                // best effort; a stale unit definition is harmless
                let _ = exec::run("systemctl", &["daemon-reload"]).await;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => close_errs.push(format!("remove unit file: {e}")),
        }

        if close_errs.is_empty() {
            Ok(())
        } else {
            Err(Error::Service(format!(
                "close service: {}",
                close_errs.join("; ")
            )))
        }
    }
}

async fn install_loop(
    unit_path: PathBuf,
    unit: String,
    initialized: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let install = || {
        let unit_path = unit_path.clone();
        let unit = unit.clone();
        let initialized = Arc::clone(&initialized);
        async move {
            tokio::fs::write(&unit_path, &unit)
                .await
                .map_err(|e| Error::Access(format!("write unit file: {e}")))
                .inspect_err(|e| warn!("retry: install service: {e}"))?;

            exec::run("systemctl", &["daemon-reload"])
                .await?
                .check("daemon-reload")
                .map_err(|e| Error::Service(e.to_string()))
                .inspect_err(|e| warn!("retry: install service: {e}"))?;

            initialized.store(true, Ordering::Release);
            Ok(())
        }
    };

    let _ = retry_infinite(&cancel, install, INSTALL_RETRY_DELAY).await;
}

pub fn render_unit(command: &[String]) -> String {
    format!(
        "[Unit]\n\
         Description=xray service\n\
         After=network.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={}\n",
        command.join(" ")
    )
}
