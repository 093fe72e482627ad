//! Awaitable handle for work submitted to the cache's background contexts.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::CacheError;

/// Result of asynchronous disk work.
///
/// The work runs whether or not this handle is awaited; dropping it only
/// discards the result. Resolves to [`CacheError::QueueClosed`] if the work
/// was dropped without running (cache shut down).
#[must_use = "dropping a DiskTask does not cancel it, but its result is lost"]
#[derive(Debug)]
pub struct DiskTask<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> DiskTask<T> {
    pub(crate) fn new(rx: oneshot::Receiver<T>) -> Self {
        Self { rx }
    }

    /// A task that has already finished with `value`.
    pub fn ready(value: T) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        Self { rx }
    }

    /// Block the current thread until the work completes.
    ///
    /// Must not be called from inside an async context.
    pub fn wait(self) -> Result<T, CacheError> {
        self.rx.blocking_recv().map_err(|_| CacheError::QueueClosed)
    }
}

impl<T> Future for DiskTask<T> {
    type Output = Result<T, CacheError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| CacheError::QueueClosed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_task_resolves() {
        assert!(DiskTask::ready(true).await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_sender_is_queue_closed() {
        let (tx, rx) = oneshot::channel::<bool>();
        drop(tx);
        let result = DiskTask::new(rx).await;
        assert!(matches!(result, Err(CacheError::QueueClosed)));
    }

    #[test]
    fn test_wait_blocks_until_sent() {
        let (tx, rx) = oneshot::channel();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            let _ = tx.send(7u32);
        });
        assert_eq!(DiskTask::new(rx).wait().unwrap(), 7);
        handle.join().unwrap();
    }
}
