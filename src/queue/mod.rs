//! Deferred execution: a queue that accepts [`OptimizeTablesJob`]s and a worker that runs them.

use crate::job::OptimizeTablesJob;
use async_trait::async_trait;
use snafu::Snafu;
use std::path::PathBuf;

pub mod spool;
pub mod worker;

pub use spool::{JobEnvelope, SpoolQueue};
pub use worker::{JobOutcome, Worker, WorkerReport};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueueError {
    #[snafu(display("Queue I/O failed at {}: {}", path.display(), source))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to encode queue entry: {}", source))]
    Encode { source: serde_json::Error },
}

type Result<T, E = QueueError> = std::result::Result<T, E>;

/// Result of handing a job to a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Queued { id: String },
    /// A job with the same uniqueness key is still queued or running.
    AlreadyQueued { unique_id: String },
}

/// Accepts units of work for asynchronous execution, at most one in flight per
/// [`OptimizeTablesJob::unique_id`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn dispatch(&self, job: OptimizeTablesJob) -> Result<Dispatch>;
}
