//! Ordered component wiring.
//!
//! Components register a named close hook as soon as they are initialized.
//! On shutdown (or on a failed init, which makes the startup sequence a
//! rolled-back transaction) the hooks run in reverse registration order,
//! each under its own bounded context.

use std::{future::Future, pin::Pin, time::Duration};

use proxops_common::error::Error;
use tracing::{error, info};

type CloseFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;
type CloserFn = Box<dyn FnOnce() -> CloseFuture + Send>;

const COMPONENT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct App {
    closers: Vec<(&'static str, CloserFn)>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn component<F, Fut>(&mut self, name: &'static str, close: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.closers.push((name, Box::new(move || Box::pin(close()))));
    }

    /// Close every registered component in reverse order. Failures are
    /// logged, not propagated: shutdown keeps going.
    pub async fn close(self) {
        for (name, close) in self.closers.into_iter().rev() {
            match tokio::time::timeout(COMPONENT_CLOSE_TIMEOUT, close()).await {
                Ok(Ok(())) => info!("closed {name}"),
                Ok(Err(e)) => error!("close {name}: {e}"),
                Err(_) => error!("close {name}: timed out"),
            }
        }
    }
}
