use std::{future::Future, pin::Pin, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::Error;

pub type OpFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;
type OpFn = Box<dyn FnOnce() -> OpFuture + Send + 'static>;

const DEFAULT_ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Ordered list of (do, undo) pairs executed as one all-or-rolled-back unit.
///
/// `run` executes the `do`s in declared order. On the first failure the
/// `undo`s of the committed items run in reverse, on a spawned task bounded
/// by the rollback timeout. The rollback never inherits the caller's
/// cancellation: a caller that gives up mid-commit still gets its committed
/// steps undone.
pub struct Tx {
    items: Vec<TxItem>,
    rollback_timeout: Duration,
}

struct TxItem {
    run: OpFn,
    undo: Option<OpFn>,
}

impl Default for Tx {
    fn default() -> Self {
        Self::new()
    }
}

impl Tx {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            rollback_timeout: DEFAULT_ROLLBACK_TIMEOUT,
        }
    }

    pub fn with_rollback_timeout(mut self, timeout: Duration) -> Self {
        self.rollback_timeout = timeout;
        self
    }

    pub fn add<D, DF>(&mut self, run: D)
    where
        D: FnOnce() -> DF + Send + 'static,
        DF: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.items.push(TxItem {
            run: Box::new(move || Box::pin(run())),
            undo: None,
        });
    }

    pub fn add_with_undo<D, DF, U, UF>(&mut self, run: D, undo: U)
    where
        D: FnOnce() -> DF + Send + 'static,
        DF: Future<Output = Result<(), Error>> + Send + 'static,
        U: FnOnce() -> UF + Send + 'static,
        UF: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.items.push(TxItem {
            run: Box::new(move || Box::pin(run())),
            undo: Some(Box::new(move || Box::pin(undo()))),
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub async fn run(self, cancel: &CancellationToken) -> Result<(), Error> {
        let rollback_timeout = self.rollback_timeout;
        let mut committed: Vec<OpFn> = Vec::with_capacity(self.items.len());

        for (step, item) in self.items.into_iter().enumerate() {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    Err(Error::Cancelled(format!("tx commit at step {step}")))
                }
                r = (item.run)() => r,
            };

            match result {
                Ok(()) => {
                    if let Some(undo) = item.undo {
                        committed.push(undo);
                    }
                }
                Err(e) => {
                    rollback(committed, rollback_timeout).await;
                    return Err(e);
                }
            }
        }

        Ok(())
    }
}

/// Undo committed steps in reverse order. Runs on its own task with its own
/// deadline so neither caller cancellation nor caller drop can skip it;
/// rollback failures are logged, the commit error stays the caller's result.
async fn rollback(committed: Vec<OpFn>, timeout: Duration) {
    if committed.is_empty() {
        return;
    }

    let handle = tokio::spawn(async move {
        let rolled_back = tokio::time::timeout(timeout, async move {
            for undo in committed.into_iter().rev() {
                if let Err(e) = undo().await {
                    error!("tx rollback step failed: {e}");
                }
            }
        })
        .await;

        if rolled_back.is_err() {
            error!("tx rollback timed out after {timeout:?}");
        }
    });

    if let Err(e) = handle.await {
        error!("tx rollback task failed: {e}");
    }
}
