//! Generation jobs: record store, background runner and status resolution.
//!
//! ## Lifecycle
//!
//! - `start_generation` creates a `generating` record and spawns the pipeline
//! - the background task heartbeats, runs the pipeline and writes exactly one terminal state
//! - status polls pick the latest record and time out stale `generating` ones
//! - terminal writes are guarded on `status = generating`, so a record never changes again
//!   once it is `completed` or `failed`
//!
//! ## Components
//!
//! - `GenerationJobStore`: persistence (in-memory or Postgres)
//! - `TaskSpawner`: launches detached tasks and tracks their handles
//! - `GenerationRunner`: the start operation and the task body
//! - `StatusResolver`: status, latest result, history and deletion

pub mod postgres;
pub mod runner;
pub mod spawner;
pub mod status;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use postgres::PostgresGenerationJobStore;
pub use runner::{GenerationRunner, StartOutcome};
pub use spawner::{BoxedTask, TaskSpawner, TokioTaskSpawner};
pub use status::{latest, timeout_message, GenerationStatus, StatusResolver};
pub use store::{GenerationJobStore, InMemoryGenerationJobStore, JobStoreError};
pub use types::{GenerationJob, JobFilter, JobKind, JobStatus, JobUpdate};
