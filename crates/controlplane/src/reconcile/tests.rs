use std::{collections::HashSet, sync::Arc};

use proxops_common::{
    error::Error,
    state::{NodeStatus, UserId, UserStatus},
};

use super::{api_mock::ApiMock, storage_mock::StorageMock, NodeController};

fn stable_harness(n_users: usize) -> (StorageMock, ApiMock, NodeController<StorageMock, ApiMock>) {
    let storage = StorageMock::new(n_users, 0);
    let api = ApiMock::new(1).with_storage_view(Arc::clone(&storage.state));
    storage.set_unstable(false);
    api.set_unstable(false);
    let controller = NodeController::new(storage.clone(), api.clone());
    (storage, api, controller)
}

fn set_node(storage: &StorageMock, desired: NodeStatus, actual: NodeStatus) {
    let mut state = storage.state.lock().unwrap();
    state.desired = desired;
    state.actual = actual;
}

fn set_user(storage: &StorageMock, id: UserId, desired: UserStatus, actual: UserStatus) {
    let mut state = storage.state.lock().unwrap();
    let user = state
        .users
        .iter_mut()
        .find(|u| u.user.id == id)
        .expect("user exists");
    user.desired = desired;
    user.actual = actual;
}

fn user_actual(storage: &StorageMock, id: UserId) -> UserStatus {
    let state = storage.state.lock().unwrap();
    state
        .users
        .iter()
        .find(|u| u.user.id == id)
        .expect("user exists")
        .actual
}

fn api_users(api: &ApiMock) -> HashSet<UserId> {
    api.state.lock().unwrap().users.clone()
}

#[tokio::test]
async fn cold_start_reconciles_node_and_users() {
    let (storage, api, mut controller) = stable_harness(2);
    set_node(&storage, NodeStatus::Running, NodeStatus::Stopped);
    set_user(&storage, 0, UserStatus::Enabled, UserStatus::Disabled);
    set_user(&storage, 1, UserStatus::Disabled, UserStatus::Disabled);

    controller.reconcile().await.unwrap();

    let state = storage.state.lock().unwrap();
    assert_eq!(state.actual, NodeStatus::Running);
    assert_eq!(state.users[0].actual, UserStatus::Enabled);
    assert_eq!(state.users[1].actual, UserStatus::Disabled);
    drop(state);

    assert_eq!(api_users(&api), HashSet::from([0]));
    let api_state = api.state.lock().unwrap();
    assert_eq!(api_state.start_calls, 1);
    // the store said Stopped, so the live status is trusted and not probed
    assert_eq!(api_state.status_calls, 0);
}

#[tokio::test]
async fn user_flip_syncs_through_edit() {
    let (storage, api, mut controller) = stable_harness(2);
    set_node(&storage, NodeStatus::Running, NodeStatus::Running);
    set_user(&storage, 0, UserStatus::Enabled, UserStatus::Enabled);
    set_user(&storage, 1, UserStatus::Enabled, UserStatus::Disabled);
    {
        let mut api_state = api.state.lock().unwrap();
        api_state.status = NodeStatus::Running;
        api_state.users.insert(0);
    }

    controller.reconcile().await.unwrap();

    assert_eq!(user_actual(&storage, 1), UserStatus::Enabled);
    assert_eq!(api_users(&api), HashSet::from([0, 1]));
    let api_state = api.state.lock().unwrap();
    assert_eq!(api_state.start_calls, 0);
    assert_eq!(api_state.edit_calls, 1);
}

#[tokio::test]
async fn restarts_after_node_crash() {
    let (storage, api, mut controller) = stable_harness(2);
    set_node(&storage, NodeStatus::Running, NodeStatus::Running);
    set_user(&storage, 0, UserStatus::Enabled, UserStatus::Enabled);
    set_user(&storage, 1, UserStatus::Enabled, UserStatus::Enabled);
    // node died behind the manager's back
    {
        let mut api_state = api.state.lock().unwrap();
        api_state.status = NodeStatus::Stopped;
        api_state.users.clear();
    }

    controller.reconcile().await.unwrap();

    let state = storage.state.lock().unwrap();
    assert_eq!(state.actual, NodeStatus::Running);
    drop(state);
    assert_eq!(api_users(&api), HashSet::from([0, 1]));
    let api_state = api.state.lock().unwrap();
    assert_eq!(api_state.status_calls, 1);
    assert_eq!(api_state.start_calls, 1);
}

#[tokio::test]
async fn stop_request_preserves_user_statuses() {
    let (storage, api, mut controller) = stable_harness(2);
    set_node(&storage, NodeStatus::Stopped, NodeStatus::Running);
    set_user(&storage, 0, UserStatus::Enabled, UserStatus::Enabled);
    set_user(&storage, 1, UserStatus::Disabled, UserStatus::Disabled);
    {
        let mut api_state = api.state.lock().unwrap();
        api_state.status = NodeStatus::Running;
        api_state.users.insert(0);
    }

    controller.reconcile().await.unwrap();

    let state = storage.state.lock().unwrap();
    assert_eq!(state.actual, NodeStatus::Stopped);
    // user actual statuses are re-established by the next start, not zeroed
    assert_eq!(state.users[0].actual, UserStatus::Enabled);
    drop(state);

    let api_state = api.state.lock().unwrap();
    assert_eq!(api_state.stop_calls, 1);
    assert!(api_state.users.is_empty());
}

#[tokio::test]
async fn stopped_node_skips_network_io() {
    let (storage, api, mut controller) = stable_harness(1);
    set_node(&storage, NodeStatus::Stopped, NodeStatus::Stopped);

    controller.reconcile().await.unwrap();

    assert_eq!(api.total_calls(), 0);
}

#[tokio::test]
async fn already_present_user_settles_enabled() {
    let (storage, api, mut controller) = stable_harness(1);
    set_node(&storage, NodeStatus::Running, NodeStatus::Running);
    set_user(&storage, 0, UserStatus::Enabled, UserStatus::Disabled);
    {
        let mut api_state = api.state.lock().unwrap();
        api_state.status = NodeStatus::Running;
        // the user is already present on the node
        api_state.users.insert(0);
    }

    controller.reconcile().await.unwrap();

    assert_eq!(user_actual(&storage, 0), UserStatus::Enabled);
    assert_eq!(api_users(&api), HashSet::from([0]));
}

#[tokio::test]
async fn rejects_invalid_desired_status() {
    let (storage, _api, mut controller) = stable_harness(1);
    set_node(&storage, NodeStatus::Unknown, NodeStatus::Stopped);

    let err = controller.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
}

#[tokio::test]
async fn failed_start_settles_back_to_stopped() {
    let (storage, api, mut controller) = stable_harness(1);
    set_node(&storage, NodeStatus::Running, NodeStatus::Stopped);
    set_user(&storage, 0, UserStatus::Enabled, UserStatus::Disabled);
    // the store says Stopped so there is no probe; start is the first call
    api.fail_at_call(0);

    let err = controller.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::Grpc(_)));

    // the compensating settle restored the last confirmed status
    let state = storage.state.lock().unwrap();
    assert_eq!(state.actual, NodeStatus::Stopped);
}

#[tokio::test]
async fn marker_survives_failed_settle_and_resolves_next_pass() {
    let (storage, api, mut controller) = stable_harness(1);
    set_node(&storage, NodeStatus::Running, NodeStatus::Stopped);
    set_user(&storage, 0, UserStatus::Enabled, UserStatus::Disabled);

    // fail the compensating settle write: calls are node_state, list_users,
    // intent commit, then the settle after the injected api failure
    api.fail_at_call(0);
    storage.fail_at_call(3);

    let err = controller.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::Grpc(_)));

    // both settle paths failed, so the intent marker is still visible
    {
        let state = storage.state.lock().unwrap();
        assert_eq!(state.actual, NodeStatus::Unknown);
        assert_eq!(state.users[0].actual, UserStatus::Unknown);
    }

    // the next pass resolves the marker by re-observing and restarting
    controller.reconcile().await.unwrap();
    let state = storage.state.lock().unwrap();
    assert_eq!(state.actual, NodeStatus::Running);
    assert_eq!(state.users[0].actual, UserStatus::Enabled);
    drop(state);
    assert_eq!(api_users(&api), HashSet::from([0]));
}

#[tokio::test]
async fn failed_edit_leaves_user_markers() {
    let (storage, api, mut controller) = stable_harness(2);
    set_node(&storage, NodeStatus::Running, NodeStatus::Running);
    set_user(&storage, 0, UserStatus::Enabled, UserStatus::Enabled);
    set_user(&storage, 1, UserStatus::Enabled, UserStatus::Disabled);
    {
        let mut api_state = api.state.lock().unwrap();
        api_state.status = NodeStatus::Running;
        api_state.users.insert(0);
    }

    // probe is the first api call, the edit is the second
    api.fail_at_call(1);

    let err = controller.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::Grpc(_)));

    // the affected user keeps its intent marker for the next pass to resolve
    assert_eq!(user_actual(&storage, 1), UserStatus::Unknown);
    assert_eq!(user_actual(&storage, 0), UserStatus::Enabled);

    controller.reconcile().await.unwrap();
    assert_eq!(user_actual(&storage, 1), UserStatus::Enabled);
    assert_eq!(api_users(&api), HashSet::from([0, 1]));
}

/// Interleave external desired-state writes with faulty reconciles, then
/// check that one clean pass lands the store and the node on the desired
/// state exactly.
#[tokio::test]
async fn converges_after_interleaved_faults_and_writes() {
    let storage = StorageMock::new(10, 7);
    let api = ApiMock::new(11).with_storage_view(Arc::clone(&storage.state));
    let mut controller = NodeController::new(storage.clone(), api.clone());

    for _ in 0..250 {
        storage.set_unstable(true);
        api.set_unstable(true);

        for _ in 0..100 {
            storage.apply_external_modifications();
            let _ = controller.reconcile().await;
        }

        storage.set_unstable(false);
        api.set_unstable(false);
        controller.reconcile().await.unwrap();

        let state = storage.state.lock().unwrap();
        if state.desired != NodeStatus::Running {
            continue;
        }
        assert_eq!(state.actual, NodeStatus::Running);

        let api_state = api.state.lock().unwrap();
        assert_eq!(api_state.status, NodeStatus::Running);

        let enabled: HashSet<UserId> = state
            .users
            .iter()
            .filter(|u| u.desired == UserStatus::Enabled)
            .map(|u| u.user.id)
            .collect();
        assert_eq!(api_state.users, enabled);

        for (i, u) in state.users.iter().enumerate() {
            assert_eq!(u.actual, u.desired, "user {i}");
        }
    }
}
