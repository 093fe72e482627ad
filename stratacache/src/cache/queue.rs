//! Serial disk I/O context.
//!
//! Every disk operation the orchestrator performs is a job on this queue. A
//! single named OS thread drains the jobs in submission order, so two jobs
//! never touch the store at the same time and same-key operations apply in
//! the order they were submitted.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::task::DiskTask;
use crate::disk::DiskStore;
use crate::error::CacheError;

type Job = Box<dyn FnOnce(&DiskStore) + Send>;

/// Handle to the disk I/O thread.
///
/// Cloning the queue shares the same thread. The thread exits once
/// [`close`](Self::close) has been called and every queued job has run.
#[derive(Clone)]
pub struct DiskQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DiskQueue {
    /// Spawn the I/O thread, which takes ownership of `store`.
    pub fn spawn(store: DiskStore, thread_name: &str) -> Result<Self, CacheError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let worker = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                debug!(root = %store.root().display(), "Disk I/O thread started");
                while let Some(job) = rx.blocking_recv() {
                    job(&store);
                }
                debug!(root = %store.root().display(), "Disk I/O thread stopped");
            })?;

        Ok(Self {
            inner: Arc::new(QueueInner {
                tx: Mutex::new(Some(tx)),
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// Queue `job` and return a handle to its result.
    ///
    /// After [`close`](Self::close) the job is dropped and the handle resolves
    /// to [`CacheError::QueueClosed`].
    pub fn submit<T, F>(&self, job: F) -> DiskTask<T>
    where
        T: Send + 'static,
        F: FnOnce(&DiskStore) -> T + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = Box::new(move |store: &DiskStore| {
            let _ = result_tx.send(job(store));
        });

        match self.inner.tx.lock().as_ref() {
            Some(tx) => {
                if tx.send(job).is_err() {
                    error!("Disk I/O thread has exited, dropping job");
                }
            }
            None => debug!("Disk I/O queue closed, dropping job"),
        }

        DiskTask::new(result_rx)
    }

    /// Resolves once every job submitted before this call has run.
    pub fn flush(&self) -> DiskTask<()> {
        self.submit(|_| ())
    }

    /// Stop accepting jobs. Already queued jobs still run.
    pub fn close(&self) {
        self.inner.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.tx.lock().is_none()
    }

    /// Close the queue and block until the I/O thread has drained it.
    ///
    /// Must not be called from the I/O thread itself.
    pub fn join(&self) {
        self.close();
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Disk I/O thread panicked");
            }
        }
    }
}
