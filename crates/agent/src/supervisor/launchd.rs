//! launchd backend, driven through `launchctl` in the user's GUI domain.

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

const LAUNCHCTL: &str = "/bin/launchctl";
const INSTALL_RETRY_DELAY: Duration = Duration::from_millis(250);
const START_POLL_DELAY: Duration = Duration::from_millis(250);

const NOT_EXISTS_STDERR: &str = "No such process";
const ALREADY_STOPPED_STDERR: &str = "No process to signal.";

pub struct LaunchdSupervisor {
    service_name: String,
    user_domain: String,
    plist_path: PathBuf,

    initialized: Arc<AtomicBool>,
    cancel: CancellationToken,
    install_task: Mutex<Option<JoinHandle<()>>>,
}

impl LaunchdSupervisor {
    pub fn new(service_name: &str, command: Vec<String>, plist_dir: PathBuf) -> Result<Self, Error> {
        let plist_path = plist_dir.join(format!("{service_name}.plist"));
        let service_name = format!("{service_name}.service");
        let user_domain = format!("gui/{}", nix::unistd::Uid::current());

        let plist = render_plist(&service_name, &command);
        std::fs::write(&plist_path, plist)
            .map_err(|e| Error::Access(format!("write service plist: {e}")))?;

        let initialized = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(install_loop(
            user_domain.clone(),
            service_name.clone(),
            plist_path.clone(),
            Arc::clone(&initialized),
            cancel.clone(),
        ));

        Ok(Self {
            service_name,
            user_domain,
            plist_path,
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

    fn service_target(&self) -> String {
        format!("{}/{}", self.user_domain, self.service_name)
    }

    async fn query_status(&self) -> Result<ServiceStatus, Error> {
        let out = exec::run(LAUNCHCTL, &["print", &self.service_target()])
            .await?
            .check("launchctl print")
            .map_err(|e| Error::Service(e.to_string()))?;

        match extract_state_line(&out.stdout) {
            Some("running") => Ok(ServiceStatus::Running),
            Some("not running") => Ok(ServiceStatus::Stopped),
            other => Err(Error::Service(format!(
                "unknown service state {other:?}"
            ))),
        }
    }
}

impl Supervisor for LaunchdSupervisor {
    async fn start(&self) -> Result<(), Error> {
        self.check_ready()?;

        exec::run(LAUNCHCTL, &["kickstart", "-k", &self.service_target()])
            .await?
            .check("launchctl kickstart")
            .map_err(|e| Error::Service(e.to_string()))?;

        // wait until launchd reports a settled state
        loop {
            match self.query_status().await {
                Ok(ServiceStatus::Running) => return Ok(()),
                Ok(ServiceStatus::Stopped) => {
                    return Err(Error::Service("failed to start service".into()));
                }
                Ok(ServiceStatus::Unknown) | Err(_) => {
                    tokio::time::sleep(START_POLL_DELAY).await;
                }
            }
        }
    }

    async fn stop(&self) -> Result<(), Error> {
        self.check_ready()?;
        stop_service(&self.service_target()).await
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
            if let Err(e) = stop_service(&self.service_target()).await {
                close_errs.push(e.to_string());
            }
            if let Err(e) = remove_service(&self.service_target()).await {
                close_errs.push(e.to_string());
            }
        }

        match std::fs::remove_file(&self.plist_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => close_errs.push(format!("remove service plist: {e}")),
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

/// "not running" is success.
async fn stop_service(target: &str) -> Result<(), Error> {
    let out = exec::run(LAUNCHCTL, &["kill", "TERM", target]).await?;
    if !out.success && !out.stderr.contains(ALREADY_STOPPED_STDERR) {
        return Err(Error::Service(format!("kill: {}", out.stderr.trim())));
    }
    Ok(())
}

/// Removing a service that does not exist is success.
async fn remove_service(target: &str) -> Result<(), Error> {
    let out = exec::run(LAUNCHCTL, &["bootout", target]).await?;
    if !out.success && !out.stderr.contains(NOT_EXISTS_STDERR) {
        return Err(Error::Service(format!("bootout: {}", out.stderr.trim())));
    }
    Ok(())
}

async fn install_loop(
    user_domain: String,
    service_name: String,
    plist_path: PathBuf,
    initialized: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let target = format!("{user_domain}/{service_name}");
    let plist = plist_path.to_string_lossy().into_owned();

    let install = || {
        let (target, user_domain, plist) = (target.clone(), user_domain.clone(), plist.clone());
        let initialized = Arc::clone(&initialized);
        async move {
            // a leftover registration must go first
            remove_service(&target)
                .await
                .inspect_err(|e| warn!("retry: init service: {e}"))?;

            exec::run(LAUNCHCTL, &["bootstrap", &user_domain, &plist])
                .await?
                .check("launchctl bootstrap")
                .map_err(|e| Error::Service(e.to_string()))
                .inspect_err(|e| warn!("retry: init service: {e}"))?;

            initialized.store(true, Ordering::Release);
            Ok(())
        }
    };

    let _ = retry_infinite(&cancel, install, INSTALL_RETRY_DELAY).await;
}

fn render_plist(service_name: &str, command: &[String]) -> String {
    let args: String = command
        .iter()
        .map(|arg| format!("      <string>{arg}</string>\n"))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <plist version=\"1.0\">\n\
         \x20 <dict>\n\
         \x20   <key>Label</key>\n\
         \x20   <string>{service_name}</string>\n\
         \x20   <key>ProgramArguments</key>\n\
         \x20   <array>\n\
         {args}\
         \x20   </array>\n\
         \x20   <key>RunAtLoad</key>\n\
         \x20   <false/>\n\
         \x20   <key>ProcessType</key>\n\
         \x20   <string>Background</string>\n\
         \x20 </dict>\n\
         </plist>\n"
    )
}

fn extract_state_line(output: &str) -> Option<&str> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("state = "))
        .map(str::trim)
}
