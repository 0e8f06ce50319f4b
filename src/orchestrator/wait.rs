//! Bounded convergence waits.
//!
//! Every mutation is followed by a wait that polls one predicate per target
//! node. Pollers run concurrently up to a ceiling; the first error ends the
//! whole wait and drops the remaining pollers.

use std::future::Future;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt, stream};
use tokio::time::{sleep, timeout};
use tracing::debug;

use super::error::{Error, Result};

/// Default upper bound for a single convergence wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default delay between two polls of the same target.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default number of targets polled concurrently.
pub const DEFAULT_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub interval: Duration,
    pub concurrency: usize,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl WaitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Poll `check` for every target until all of them return `true`.
///
/// Fails with [`Error::Timeout`] once `options.timeout` has elapsed, or with
/// the first error any check returns.
pub async fn wait_for_all<T, F, Fut>(
    operation: &str,
    targets: Vec<T>,
    options: &WaitOptions,
    check: F,
) -> Result<()>
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    debug!(operation, targets = targets.len(), "waiting for convergence");
    let check = &check;
    let interval = options.interval;
    let pollers = stream::iter(targets)
        .map(|target| poll_until(check, target, interval))
        .buffer_unordered(options.concurrency.max(1))
        .try_collect::<Vec<()>>();

    timeout(options.timeout, pollers)
        .await
        .map_err(|_| Error::Timeout {
            operation: operation.to_string(),
            duration: options.timeout,
        })??;
    Ok(())
}

/// Poll a single predicate until it holds.
pub async fn wait_until<F, Fut>(operation: &str, options: &WaitOptions, check: F) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    wait_for_all(operation, vec![()], options, |()| check()).await
}

async fn poll_until<T, F, Fut>(check: &F, target: T, interval: Duration) -> Result<()>
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    loop {
        if check(target.clone()).await? {
            return Ok(());
        }
        sleep(interval).await;
    }
}
