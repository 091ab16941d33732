//! Per-node reconciliation.
//!
//! The controller brings a node's observed reality into agreement with the
//! desired state held in the store. Three independently failing subsystems
//! are involved (store, node API, the node itself) with no transaction
//! spanning them, so every mutating branch follows the same three-phase
//! protocol: write an `Unknown` intent marker to the fields about to change,
//! mutate the node, then settle the store with the values that now hold. A
//! failure at any point leaves either the previous value or the marker in the
//! store, never a claim that does not hold on the node; the next reconcile
//! pass resolves markers by re-observing.

pub mod driver;

#[cfg(test)]
mod api_mock;
#[cfg(test)]
mod storage_mock;
#[cfg(test)]
mod tests;

use proxops_common::{
    error::Error,
    state::{NodeProperties, NodeStatus, User, UserStatus},
};
use tracing::warn;

use crate::storage::{Storage, UserState, UserStatusUpdate, WriteUow};

/// Node-facing side of the controller: the four daemon RPCs as the
/// reconciler consumes them.
#[allow(async_fn_in_trait)]
pub trait NodeApi {
    async fn start(&self, users: Vec<User>) -> Result<NodeProperties, Error>;
    async fn stop(&self) -> Result<(), Error>;
    async fn status(&self) -> Result<NodeStatus, Error>;
    async fn edit_users(&self, add: Vec<User>, remove: Vec<User>) -> Result<(), Error>;
}

pub struct NodeController<S, A> {
    storage: S,
    api: A,
}

impl<S: Storage, A: NodeApi> NodeController<S, A> {
    pub fn new(storage: S, api: A) -> Self {
        Self { storage, api }
    }

    /// Advance the node by at most one major step (start, stop, or one batch
    /// of user edits). Errors are returned as-is; the driver retries by
    /// calling again later. Safe to re-run indefinitely.
    pub async fn reconcile(&mut self) -> Result<(), Error> {
        let (desired, previous) = self.storage.node_state().await?;
        if desired != NodeStatus::Running && desired != NodeStatus::Stopped {
            return Err(Error::Internal(format!(
                "invalid desired node status {desired}"
            )));
        }

        // Probe live status only when it can differ from the store: a node
        // that should be running can die or lose connectivity on its own,
        // but the only way out of Stopped is through this controller.
        let mut current = previous;
        if desired == NodeStatus::Running && previous != NodeStatus::Stopped {
            current = self.api.status().await?;
        }

        match (desired, current) {
            (NodeStatus::Running, NodeStatus::Stopped) | (NodeStatus::Running, NodeStatus::Unknown) => {
                self.start_node().await
            }
            (NodeStatus::Running, NodeStatus::Running) => self.sync_users(current != previous).await,
            (NodeStatus::Stopped, NodeStatus::Running) => self.stop_node().await,
            (NodeStatus::Stopped, _) => Ok(()),
            (NodeStatus::Unknown, _) => unreachable!("desired status validated above"),
        }
    }

    async fn start_node(&mut self) -> Result<(), Error> {
        let all_users = self.storage.list_users().await?;

        // A start redefines the node's whole user reality, so the intent
        // marker covers the node status and every user's actual status.
        let mut uow = self.storage.write();
        uow.set_actual_status(NodeStatus::Unknown);
        uow.set_actual_user_status(
            all_users
                .iter()
                .map(|u| UserStatusUpdate {
                    id: u.user.id,
                    actual: UserStatus::Unknown,
                })
                .collect(),
        );
        uow.commit().await?;

        if let Err(e) = self.try_start(all_users).await {
            // Compensate: the store must not keep claiming an in-flight
            // start. If even this write fails the marker stays behind and
            // the next pass re-resolves it.
            if let Err(settle) = self.update_stored_status(NodeStatus::Stopped).await {
                warn!("settle after failed start also failed: {settle}");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn try_start(&mut self, all_users: Vec<UserState>) -> Result<(), Error> {
        let enabled: Vec<User> = all_users
            .iter()
            .filter(|u| u.status == UserStatus::Enabled)
            .map(|u| u.user.clone())
            .collect();

        let properties = self.api.start(enabled).await?;

        // A successful start defines the node's user reality as exactly the
        // set passed in, so every user settles to its desired status.
        let mut uow = self.storage.write();
        uow.set_actual_status(NodeStatus::Running);
        uow.set_node_properties(properties);
        uow.set_actual_user_status(
            all_users
                .iter()
                .map(|u| UserStatusUpdate {
                    id: u.user.id,
                    actual: u.status,
                })
                .collect(),
        );
        uow.commit().await
    }

    async fn stop_node(&mut self) -> Result<(), Error> {
        self.update_stored_status(NodeStatus::Unknown).await?;

        let result = self.try_stop().await;
        if let Err(e) = result {
            if let Err(settle) = self.update_stored_status(NodeStatus::Running).await {
                warn!("settle after failed stop also failed: {settle}");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn try_stop(&mut self) -> Result<(), Error> {
        self.api.stop().await?;

        // User actual-statuses are left alone: they are re-established by the
        // next start, and keeping them lets the next pass recompute the
        // out-of-sync set.
        self.update_stored_status(NodeStatus::Stopped).await
    }

    async fn sync_users(&mut self, status_changed: bool) -> Result<(), Error> {
        let out_of_sync = self.storage.out_of_sync_users().await?;

        if out_of_sync.is_empty() {
            // Nothing to edit; still settle the node status if the probe
            // moved it (e.g. the store held a leftover Unknown marker).
            if status_changed {
                self.update_stored_status(NodeStatus::Running).await?;
            }
            return Ok(());
        }

        let mut intent = Vec::with_capacity(out_of_sync.len());
        let mut settle = Vec::with_capacity(out_of_sync.len());
        let mut add = Vec::new();
        let mut remove = Vec::new();
        for u in &out_of_sync {
            intent.push(UserStatusUpdate {
                id: u.user.id,
                actual: UserStatus::Unknown,
            });
            settle.push(UserStatusUpdate {
                id: u.user.id,
                actual: u.desired,
            });
            match u.desired {
                UserStatus::Enabled => add.push(u.user.clone()),
                _ => remove.push(u.user.clone()),
            }
        }

        self.update_stored_users(intent, status_changed).await?;
        self.api.edit_users(add, remove).await?;
        self.update_stored_users(settle, false).await?;
        Ok(())
    }

    async fn update_stored_status(&mut self, status: NodeStatus) -> Result<(), Error> {
        let mut uow = self.storage.write();
        uow.set_actual_status(status);
        uow.commit().await
    }

    async fn update_stored_users(
        &mut self,
        updates: Vec<UserStatusUpdate>,
        set_running: bool,
    ) -> Result<(), Error> {
        let mut uow = self.storage.write();
        uow.set_actual_user_status(updates);
        if set_running {
            uow.set_actual_status(NodeStatus::Running);
        }
        uow.commit().await
    }
}
