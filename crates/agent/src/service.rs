//! Orchestration of the four daemon operations against the local proxy.

use std::{path::PathBuf, sync::Arc};

use proxops_common::{
    api::ApiUser,
    error::Error,
    state::{ClientConfig, NodeProperties, ServiceStatus},
};
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    supervisor::Supervisor,
    xray::{admin::AdminClient, config::server::ServerConfig},
};

/// All four operations serialize on one mutex: the proxy's admin protocol
/// does not survive concurrent `AlterInbound` calls on the same inbound, and
/// the rendered config file must never be written concurrently.
pub struct NodeService<S> {
    server_cfg: ServerConfig,
    client_cfg: ClientConfig,
    run_config_path: PathBuf,
    supervisor: Arc<S>,
    admin: Arc<AdminClient>,
    lock: Mutex<()>,
}

impl<S: Supervisor> NodeService<S> {
    pub fn new(
        server_cfg: ServerConfig,
        client_cfg: ClientConfig,
        run_config_path: PathBuf,
        supervisor: Arc<S>,
        admin: Arc<AdminClient>,
    ) -> Self {
        Self {
            server_cfg,
            client_cfg,
            run_config_path,
            supervisor,
            admin,
            lock: Mutex::new(()),
        }
    }

    pub async fn start(&self, users: Vec<ApiUser>) -> Result<NodeProperties, Error> {
        let _guard = self.lock.lock().await;
        info!("starting node with {} users", users.len());

        let config = self.server_cfg.render_with_users(&users)?;
        tokio::fs::write(&self.run_config_path, config).await.map_err(|e| {
            Error::Access(format!(
                "write runtime config {}: {e}",
                self.run_config_path.display()
            ))
        })?;

        self.supervisor.start().await?;
        self.admin.connect().await?;

        Ok(NodeProperties {
            client_cfg: self.client_cfg.clone(),
        })
    }

    pub async fn stop(&self) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        info!("stopping node");

        self.admin.disconnect().await?;
        self.supervisor.stop().await
    }

    pub async fn status(&self) -> Result<ServiceStatus, Error> {
        let _guard = self.lock.lock().await;
        // process-level liveness; faster and more reliable than probing the
        // admin socket
        self.supervisor.status().await
    }

    pub async fn edit_users(&self, add: &[ApiUser], remove: &[ApiUser]) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        info!("editing users: {} to add, {} to remove", add.len(), remove.len());

        self.admin.edit_users(add, remove).await
    }
}
