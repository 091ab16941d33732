use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Run `f`, sleeping `delays[i]` before each retry. Returns the first success
/// or the last error seen; cancellation cuts the wait short and surfaces the
/// last error.
pub async fn retry<T, F, Fut>(
    cancel: &CancellationToken,
    mut f: F,
    delays: &[Duration],
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut last = match f().await {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };

    for delay in delays {
        tokio::select! {
            _ = cancel.cancelled() => return Err(last),
            _ = tokio::time::sleep(*delay) => {}
        }
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => last = e,
        }
    }

    Err(last)
}

/// Like [`retry`], but with a fixed delay and no attempt limit. Ends only on
/// success or cancellation.
pub async fn retry_infinite<T, F, Fut>(
    cancel: &CancellationToken,
    mut f: F,
    delay: Duration,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut last = match f().await {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled(format!("retrying cancelled, last error: {last}")));
            }
            _ = tokio::time::sleep(delay) => {}
        }
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => last = e,
        }
    }
}
