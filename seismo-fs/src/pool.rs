//! Bounded pool for blocking work
//!
//! Model preparation and seismogram extraction are CPU/IO heavy and run on
//! tokio's blocking threads. A semaphore caps how many of them run at once
//! across all requests.

use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::{FsError, FsResult};

/// Handle to the shared blocking pool
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs that could start right now without waiting
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on a blocking thread once a slot is free
    ///
    /// The slot is owned by the job itself: if the caller stops awaiting, the
    /// job still finishes before its slot is handed to someone else.
    pub async fn run<F, T>(&self, job: F) -> FsResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FsError::Internal("worker pool closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| FsError::Internal(format!("worker task failed: {}", e)))
    }
}
