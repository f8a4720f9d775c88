//! Launching background generation tasks.
//!
//! Request handlers never await a generation. They hand a boxed future to a
//! [`TaskSpawner`]; the default [`TokioTaskSpawner`] runs it with `tokio::spawn` and keeps
//! the `JoinHandle` keyed by job id so tests and shutdown can wait for in-flight work.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use counsel_core::JobId;

pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub trait TaskSpawner: Send + Sync {
    /// Start `task` detached from the caller. Must not block.
    fn spawn(&self, job_id: JobId, task: BoxedTask);
}

#[derive(Debug, Default)]
pub struct TokioTaskSpawner {
    handles: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl TokioTaskSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    fn take(&self, job_id: Option<JobId>) -> Vec<(JobId, JoinHandle<()>)> {
        let Ok(mut handles) = self.handles.lock() else {
            warn!("task registry lock poisoned");
            return Vec::new();
        };
        match job_id {
            Some(id) => handles.remove(&id).map(|h| (id, h)).into_iter().collect(),
            None => handles.drain().collect(),
        }
    }

    /// Wait for the task of `job_id`. Returns `false` if no such task is registered.
    pub async fn wait(&self, job_id: JobId) -> bool {
        let mut found = false;
        for (id, handle) in self.take(Some(job_id)) {
            found = true;
            if let Err(e) = handle.await {
                warn!(job_id = %id, error = %e, "background task ended abnormally");
            }
        }
        found
    }

    /// Wait for every registered task.
    pub async fn wait_all(&self) {
        for (id, handle) in self.take(None) {
            if let Err(e) = handle.await {
                warn!(job_id = %id, error = %e, "background task ended abnormally");
            }
        }
    }

    /// Tasks that are registered and still running.
    pub fn in_flight(&self) -> usize {
        self.handles
            .lock()
            .map(|h| h.values().filter(|t| !t.is_finished()).count())
            .unwrap_or(0)
    }
}

impl TaskSpawner for TokioTaskSpawner {
    fn spawn(&self, job_id: JobId, task: BoxedTask) {
        let handle = tokio::spawn(task);
        match self.handles.lock() {
            Ok(mut handles) => {
                handles.retain(|_, h| !h.is_finished());
                handles.insert(job_id, handle);
                debug!(%job_id, registered = handles.len(), "spawned generation task");
            }
            // The task still runs; it just cannot be awaited later.
            Err(_) => warn!(%job_id, "task registry lock poisoned; task not tracked"),
        }
    }
}
