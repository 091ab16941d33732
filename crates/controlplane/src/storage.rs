//! Storage capability interfaces and the file-backed store.
//!
//! The reconciler only ever sees the two narrow traits below; concrete
//! backends live behind them. The in-tree [`FileStorage`] keeps the node
//! record in memory and flushes every committed write to a JSON file.

use std::{path::PathBuf, sync::Arc};

use proxops_common::{
    error::Error,
    state::{NodeProperties, NodeStatus, User, UserId, UserStatus},
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// A user together with its desired enablement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserState {
    pub user: User,
    pub status: UserStatus,
}

/// A user whose stored actual status disagrees with its desired one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutOfSyncUser {
    pub user: User,
    pub desired: UserStatus,
    pub actual: UserStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStatusUpdate {
    pub id: UserId,
    pub actual: UserStatus,
}

/// Unit of work for one atomic store write. Staged values are applied
/// together on commit; an uncommitted unit changes nothing.
#[allow(async_fn_in_trait)]
pub trait WriteUow {
    fn set_actual_status(&mut self, status: NodeStatus);
    fn set_node_properties(&mut self, properties: NodeProperties);
    fn set_actual_user_status(&mut self, updates: Vec<UserStatusUpdate>);
    async fn commit(self) -> Result<(), Error>;
}

#[allow(async_fn_in_trait)]
pub trait Storage {
    type Uow: WriteUow;

    /// Returns `(desired, actual)` node status.
    async fn node_state(&self) -> Result<(NodeStatus, NodeStatus), Error>;
    /// All users of the node with their desired statuses.
    async fn list_users(&self) -> Result<Vec<UserState>, Error>;
    /// Users whose actual status differs from their desired one.
    async fn out_of_sync_users(&self) -> Result<Vec<OutOfSyncUser>, Error>;
    fn write(&self) -> Self::Uow;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user: User,
    pub desired_status: UserStatus,
    pub actual_status: UserStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub desired_status: NodeStatus,
    pub actual_status: NodeStatus,
    #[serde(default)]
    pub properties: NodeProperties,
    #[serde(default)]
    pub users: Vec<UserRecord>,
}

/// JSON-file-backed store for a single node record.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    record: Arc<Mutex<NodeRecord>>,
}

impl FileStorage {
    pub async fn load(path: PathBuf) -> Result<Self, Error> {
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Access(format!("read state file {}: {e}", path.display())))?;
        let record: NodeRecord = serde_json::from_slice(&raw)
            .map_err(|e| Error::Config(format!("parse state file {}: {e}", path.display())))?;
        Ok(Self {
            path,
            record: Arc::new(Mutex::new(record)),
        })
    }

    async fn flush(&self, record: &NodeRecord) -> Result<(), Error> {
        let raw = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::Internal(format!("serialize node record: {e}")))?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|e| Error::Access(format!("write state file {}: {e}", self.path.display())))
    }
}

impl Storage for FileStorage {
    type Uow = FileUow;

    async fn node_state(&self) -> Result<(NodeStatus, NodeStatus), Error> {
        let record = self.record.lock().await;
        Ok((record.desired_status, record.actual_status))
    }

    async fn list_users(&self) -> Result<Vec<UserState>, Error> {
        let record = self.record.lock().await;
        Ok(record
            .users
            .iter()
            .map(|u| UserState {
                user: u.user.clone(),
                status: u.desired_status,
            })
            .collect())
    }

    async fn out_of_sync_users(&self) -> Result<Vec<OutOfSyncUser>, Error> {
        let record = self.record.lock().await;
        Ok(record
            .users
            .iter()
            .filter(|u| u.actual_status != u.desired_status)
            .map(|u| OutOfSyncUser {
                user: u.user.clone(),
                desired: u.desired_status,
                actual: u.actual_status,
            })
            .collect())
    }

    fn write(&self) -> FileUow {
        FileUow {
            storage: self.clone(),
            status: None,
            properties: None,
            users: Vec::new(),
        }
    }
}

pub struct FileUow {
    storage: FileStorage,
    status: Option<NodeStatus>,
    properties: Option<NodeProperties>,
    users: Vec<UserStatusUpdate>,
}

impl WriteUow for FileUow {
    fn set_actual_status(&mut self, status: NodeStatus) {
        self.status = Some(status);
    }

    fn set_node_properties(&mut self, properties: NodeProperties) {
        self.properties = Some(properties);
    }

    fn set_actual_user_status(&mut self, updates: Vec<UserStatusUpdate>) {
        self.users.extend(updates);
    }

    async fn commit(self) -> Result<(), Error> {
        let mut record = self.storage.record.lock().await;
        if let Some(status) = self.status {
            record.actual_status = status;
        }
        if let Some(properties) = self.properties {
            record.properties = properties;
        }
        for update in &self.users {
            if let Some(user) = record.users.iter_mut().find(|u| u.user.id == update.id) {
                user.actual_status = update.actual;
            }
        }
        self.storage.flush(&record).await
    }
}
