//! Node API emulator with seeded faults and spontaneous shutdowns.
//!
//! When wired with a storage handle it also checks the intent-marker
//! discipline: any mutating call must observe `Unknown` markers on the store
//! fields it is about to change.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use proxops_common::{
    error::Error,
    state::{NodeProperties, NodeStatus, User, UserId, UserStatus},
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::NodeApi;
use crate::reconcile::storage_mock::MockState;

pub struct ApiState {
    pub status: NodeStatus,
    pub users: HashSet<UserId>,

    rng: ChaCha8Rng,
    fail_prob: f32,
    turn_off_prob: f32,
    pub unstable: bool,

    pub start_calls: usize,
    pub stop_calls: usize,
    pub status_calls: usize,
    pub edit_calls: usize,

    fail_at_call: Option<u32>,
}

#[derive(Clone)]
pub struct ApiMock {
    pub state: Arc<Mutex<ApiState>>,
    /// Storage view for intent-marker assertions; `None` disables them.
    storage_view: Option<Arc<Mutex<MockState>>>,
}

impl ApiMock {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ApiState {
                status: NodeStatus::Stopped,
                users: HashSet::new(),
                rng: ChaCha8Rng::seed_from_u64(seed),
                fail_prob: 0.25,
                turn_off_prob: 0.25,
                unstable: true,
                start_calls: 0,
                stop_calls: 0,
                status_calls: 0,
                edit_calls: 0,
                fail_at_call: None,
            })),
            storage_view: None,
        }
    }

    pub fn with_storage_view(mut self, view: Arc<Mutex<MockState>>) -> Self {
        self.storage_view = Some(view);
        self
    }

    pub fn set_unstable(&self, unstable: bool) {
        self.state.lock().unwrap().unstable = unstable;
    }

    pub fn total_calls(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.start_calls + state.stop_calls + state.status_calls + state.edit_calls
    }

    /// Fail the call made after skipping `calls_before` calls, regardless of
    /// stability.
    pub fn fail_at_call(&self, calls_before: u32) {
        self.state.lock().unwrap().fail_at_call = Some(calls_before);
    }

    fn apply_unstability(&self) -> Result<bool, Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(n) = state.fail_at_call.as_mut() {
            if *n == 0 {
                state.fail_at_call = None;
                return Err(Error::Grpc("injected node api failure".into()));
            }
            *n -= 1;
        }
        if !state.unstable {
            return Ok(true);
        }
        if state.rng.gen::<f32>() < state.turn_off_prob {
            return Ok(false);
        }
        if state.rng.gen::<f32>() < state.turn_off_prob {
            state.status = NodeStatus::Stopped;
            state.users.clear();
        }
        if state.rng.gen::<f32>() < state.fail_prob {
            return Err(Error::Grpc("node api failed".into()));
        }
        Ok(true)
    }

    fn assert_node_marker(&self) {
        if let Some(view) = &self.storage_view {
            let store = view.lock().unwrap();
            assert_eq!(
                store.actual,
                NodeStatus::Unknown,
                "node mutation in flight without an intent marker"
            );
        }
    }

    fn assert_user_markers(&self, ids: impl Iterator<Item = UserId>) {
        if let Some(view) = &self.storage_view {
            let store = view.lock().unwrap();
            for id in ids {
                let user = store.users.iter().find(|u| u.user.id == id);
                assert_eq!(
                    user.map(|u| u.actual),
                    Some(UserStatus::Unknown),
                    "user {id} mutation in flight without an intent marker"
                );
            }
        }
    }
}

impl NodeApi for ApiMock {
    async fn start(&self, users: Vec<User>) -> Result<NodeProperties, Error> {
        self.state.lock().unwrap().start_calls += 1;
        self.assert_node_marker();
        self.assert_user_markers(users.iter().map(|u| u.id));
        self.apply_unstability()?;

        let mut state = self.state.lock().unwrap();
        state.users = users.iter().map(|u| u.id).collect();
        state.status = NodeStatus::Running;
        Ok(NodeProperties::default())
    }

    async fn stop(&self) -> Result<(), Error> {
        self.state.lock().unwrap().stop_calls += 1;
        self.assert_node_marker();
        self.apply_unstability()?;

        let mut state = self.state.lock().unwrap();
        state.users.clear();
        state.status = NodeStatus::Stopped;
        Ok(())
    }

    async fn status(&self) -> Result<NodeStatus, Error> {
        self.state.lock().unwrap().status_calls += 1;
        let available = self.apply_unstability()?;
        if !available {
            return Ok(NodeStatus::Unknown);
        }
        Ok(self.state.lock().unwrap().status)
    }

    async fn edit_users(&self, add: Vec<User>, remove: Vec<User>) -> Result<(), Error> {
        self.state.lock().unwrap().edit_calls += 1;
        self.assert_user_markers(add.iter().chain(remove.iter()).map(|u| u.id));
        self.apply_unstability()?;

        let mut state = self.state.lock().unwrap();
        for user in &add {
            state.users.insert(user.id);
        }
        for user in &remove {
            state.users.remove(&user.id);
        }
        Ok(())
    }
}
