//! Storage emulator with seeded faults and external modifications.

use std::sync::{Arc, Mutex};

use proxops_common::{
    error::Error,
    state::{NodeProperties, NodeStatus, User, UserId, UserStatus},
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::storage::{OutOfSyncUser, Storage, UserState, UserStatusUpdate, WriteUow};

#[derive(Debug, Clone)]
pub struct MockUser {
    pub user: User,
    pub desired: UserStatus,
    pub actual: UserStatus,
}

pub struct MockState {
    pub desired: NodeStatus,
    pub actual: NodeStatus,
    pub properties: NodeProperties,
    pub users: Vec<MockUser>,

    rng: ChaCha8Rng,
    fail_prob: f32,
    external_modification_prob: f32,
    pub unstable: bool,

    fail_at_call: Option<u32>,
}

#[derive(Clone)]
pub struct StorageMock {
    pub state: Arc<Mutex<MockState>>,
}

impl StorageMock {
    pub fn new(n_users: usize, seed: u64) -> Self {
        let users = (0..n_users)
            .map(|i| MockUser {
                user: User {
                    id: i as UserId,
                    name: format!("user-{i}"),
                    vless_uuid: format!("uuid-{i}"),
                },
                desired: if i % 2 == 0 {
                    UserStatus::Disabled
                } else {
                    UserStatus::Enabled
                },
                actual: UserStatus::Unknown,
            })
            .collect();

        Self {
            state: Arc::new(Mutex::new(MockState {
                desired: NodeStatus::Running,
                actual: NodeStatus::Unknown,
                properties: NodeProperties::default(),
                users,
                rng: ChaCha8Rng::seed_from_u64(seed),
                fail_prob: 0.25,
                external_modification_prob: 0.25,
                unstable: true,
                fail_at_call: None,
            })),
        }
    }

    pub fn set_unstable(&self, unstable: bool) {
        self.state.lock().unwrap().unstable = unstable;
    }

    pub fn apply_external_modifications(&self) {
        self.state.lock().unwrap().apply_external_modifications();
    }

    /// Fail the call made after skipping `calls_before` calls, regardless of
    /// stability.
    pub fn fail_at_call(&self, calls_before: u32) {
        self.state.lock().unwrap().fail_at_call = Some(calls_before);
    }

    fn apply_unstability(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(n) = state.fail_at_call.as_mut() {
            if *n == 0 {
                state.fail_at_call = None;
                return Err(Error::Service("injected storage failure".into()));
            }
            *n -= 1;
        }
        if !state.unstable {
            return Ok(());
        }
        if state.rng.gen::<f32>() < state.fail_prob {
            return Err(Error::Service("storage mock fail".into()));
        }
        state.apply_external_modifications();
        Ok(())
    }
}

impl MockState {
    pub fn apply_external_modifications(&mut self) {
        if self.rng.gen::<f32>() < self.external_modification_prob {
            self.flip_random_user(UserStatus::Enabled);
        }
        if self.rng.gen::<f32>() < self.external_modification_prob {
            self.flip_random_user(UserStatus::Disabled);
        }
        if self.rng.gen::<f32>() < self.external_modification_prob {
            self.desired = NodeStatus::Running;
        }
        if self.rng.gen::<f32>() < self.external_modification_prob {
            self.desired = NodeStatus::Stopped;
        }
    }

    fn flip_random_user(&mut self, desired: UserStatus) {
        if self.users.is_empty() {
            return;
        }
        let idx = self.rng.gen_range(0..self.users.len());
        self.users[idx].desired = desired;
    }
}

impl Storage for StorageMock {
    type Uow = MockUow;

    async fn node_state(&self) -> Result<(NodeStatus, NodeStatus), Error> {
        self.apply_unstability()?;
        let state = self.state.lock().unwrap();
        Ok((state.desired, state.actual))
    }

    async fn list_users(&self) -> Result<Vec<UserState>, Error> {
        self.apply_unstability()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .map(|u| UserState {
                user: u.user.clone(),
                status: u.desired,
            })
            .collect())
    }

    async fn out_of_sync_users(&self) -> Result<Vec<OutOfSyncUser>, Error> {
        self.apply_unstability()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .filter(|u| u.actual != u.desired)
            .map(|u| OutOfSyncUser {
                user: u.user.clone(),
                desired: u.desired,
                actual: u.actual,
            })
            .collect())
    }

    fn write(&self) -> MockUow {
        MockUow {
            parent: self.clone(),
            status: None,
            properties: None,
            users: Vec::new(),
        }
    }
}

pub struct MockUow {
    parent: StorageMock,
    status: Option<NodeStatus>,
    properties: Option<NodeProperties>,
    users: Vec<UserStatusUpdate>,
}

impl WriteUow for MockUow {
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
        self.parent.apply_unstability()?;
        let mut state = self.parent.state.lock().unwrap();
        if let Some(status) = self.status {
            state.actual = status;
        }
        if let Some(properties) = self.properties {
            state.properties = properties;
        }
        for update in &self.users {
            if let Some(user) = state.users.iter_mut().find(|u| u.user.id == update.id) {
                user.actual = update.actual;
            }
        }
        Ok(())
    }
}
