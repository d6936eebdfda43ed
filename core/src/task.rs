//!
//! [`task`](self) module provides helper functions for async task
//! management backed by the tokio runtime:
//!
//! - [`spawn()`] - non-blocking spawn of the supplied async closure
//! - [`sleep()`] - suspends the task for a given Duration
//! - [`yield_now()`] - yields to the executor
//! - [`blocking()`] - offloads a blocking closure to the runtime's
//!   worker thread pool and awaits its completion
//!
//! The worker pool is the process-wide tokio multi-thread runtime; the
//! host constructs it once at startup (thread count defaults to the
//! number of CPUs) and tears it down on exit.
//!

use futures::Future;

pub use tokio::task::yield_now;
pub use tokio::time::sleep;

pub fn spawn<F, T>(future: F)
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn(future);
}

/// Run `f` on the blocking worker pool. Disk and crypto work that would
/// otherwise stall a connection's executor belongs here.
pub async fn blocking<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("blocking task panicked")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::oneshot;

    #[tokio::test(flavor = "multi_thread")]
    async fn spawn_and_blocking() {
        let (sender, receiver) = oneshot::<u64>();
        spawn(async move {
            let value = blocking(|| 6u64 * 7).await;
            sender.send(value).await.unwrap();
        });
        assert_eq!(receiver.recv().await.unwrap(), 42);
    }
}
