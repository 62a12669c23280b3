//! The two ways a caller can run an optimization: inline with a progress bar,
//! or handed to a queue for a worker to pick up.

use crate::backend::Backend;
use crate::job::OptimizeTablesJob;
use crate::models::OptimizationSummary;
use crate::optimizer::{OptimizeError, TableOptimizer};
use crate::progress::OptimizationProgress;
use crate::queue::{Dispatch, JobQueue, QueueError};
use crate::reporter::{already_queued_notice, queued_confirmation};

/// Sizes the progress bar, runs every table inline and summarizes the results.
pub async fn run_synchronous<B: Backend>(
    optimizer: &mut TableOptimizer<B>,
    database: Option<&str>,
    tables: &[String],
    progress: &OptimizationProgress,
) -> Result<OptimizationSummary, OptimizeError> {
    let total = optimizer.get_count(database, tables).await?;
    progress.start(total);

    let mut advance = |table: &str, success: bool| progress.record(table, success);
    let results = optimizer
        .execute(database, tables, Some(&mut advance))
        .await;
    progress.finish();

    Ok(OptimizationSummary::from_results(results?))
}

/// Submits the job and returns the line to show the caller.
pub async fn dispatch_deferred<Q: JobQueue + ?Sized>(
    queue: &Q,
    job: OptimizeTablesJob,
) -> Result<String, QueueError> {
    let message = queued_confirmation(&job);
    let notice = already_queued_notice(&job);

    match queue.dispatch(job).await? {
        Dispatch::Queued { .. } => Ok(message),
        Dispatch::AlreadyQueued { .. } => Ok(notice),
    }
}
