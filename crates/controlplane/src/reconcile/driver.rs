use std::time::Duration;

use tokio::{
    select,
    sync::mpsc::Receiver,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use super::{NodeApi, NodeController};
use crate::storage::Storage;

/// Per-node reconcile loop: wakes on a timer or on request, never overlaps
/// two passes for the same node (it owns the controller), and backs off
/// additively on errors.
pub struct ReconcileDriver<S, A> {
    controller: NodeController<S, A>,
    interval: Duration,
}

impl<S: Storage, A: NodeApi> ReconcileDriver<S, A> {
    pub fn new(controller: NodeController<S, A>, interval: Duration) -> Self {
        Self {
            controller,
            interval,
        }
    }

    pub async fn run(
        mut self,
        cancel: CancellationToken,
        mut reconcile_requests: Receiver<Instant>,
    ) {
        let mut err_backoff = 0;

        // The first reconcile is scheduled shortly after startup; requests
        // from the management surface can move it up.
        let mut next_reconcile_at = Instant::now() + Duration::from_secs(5);

        loop {
            select! {
                _ = cancel.cancelled() => return,
                Some(new_reconcile_at) = reconcile_requests.recv() => {
                    next_reconcile_at = next_reconcile_at.min(new_reconcile_at);
                    continue;
                }
                _ = sleep_until(next_reconcile_at) => {}
            }

            // Drain queued requests; this pass covers them all.
            while reconcile_requests.try_recv().is_ok() {}
            next_reconcile_at = Instant::now() + self.interval;

            trace!("reconciling node state...");
            match self.controller.reconcile().await {
                Ok(()) => {
                    err_backoff = 0;
                    trace!("reconcile completed");
                }
                Err(e) => {
                    error!("failed to reconcile node state: {e}");
                    err_backoff = (err_backoff + 5).min(30);
                    next_reconcile_at = Instant::now() + Duration::from_secs(err_backoff);
                }
            }
        }
    }
}
