use super::{Result, SpoolQueue};
use crate::backend::Backend;
use crate::config::QueueConfig;
use crate::job::JobContext;
use crate::models::OptimizationSummary;
use crate::optimizer::TableOptimizer;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(OptimizationSummary),
    /// Released for another attempt after the backoff.
    Retrying { error: String },
    /// Attempts exhausted; the job was moved to `failed/`.
    Failed { error: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Pulls jobs off a [`SpoolQueue`] and runs them with the configured retry and timeout policy.
pub struct Worker {
    queue: SpoolQueue,
    config: QueueConfig,
}

impl Worker {
    pub fn new(queue: SpoolQueue, config: QueueConfig) -> Self {
        Self { queue, config }
    }

    /// Runs every job that is currently available, then returns.
    pub async fn drain<B: Backend>(&self, optimizer: &mut TableOptimizer<B>) -> Result<WorkerReport> {
        let recovered = self.queue.recover_abandoned(self.config.timeout()).await?;
        if recovered > 0 {
            info!("Recovered {} abandoned jobs", recovered);
        }

        let mut report = WorkerReport::default();
        while let Some(outcome) = self.process_next(optimizer).await? {
            match outcome {
                JobOutcome::Completed(_) => report.completed += 1,
                JobOutcome::Retrying { .. } => report.retried += 1,
                JobOutcome::Failed { .. } => report.failed += 1,
            }
        }
        Ok(report)
    }

    /// Runs one attempt of the next available job, if any.
    pub async fn process_next<B: Backend>(
        &self,
        optimizer: &mut TableOptimizer<B>,
    ) -> Result<Option<JobOutcome>> {
        let Some(envelope) = self.queue.reserve().await? else {
            return Ok(None);
        };

        let ctx = JobContext {
            id: envelope.id.clone(),
            attempts: envelope.attempts,
            timeout: self.config.timeout(),
        };

        // Attempts that never reported back, e.g. a worker that crashed mid-run
        if envelope.attempts > self.config.tries {
            let error = format!(
                "Job has been attempted too many times ({} of {})",
                envelope.attempts - 1,
                self.config.tries
            );
            warn!("Job {}: {}", ctx.id, error);
            envelope.job.failed(&ctx, &error);
            self.queue.bury(envelope, error.clone()).await?;
            return Ok(Some(JobOutcome::Failed { error }));
        }

        let attempt = tokio::time::timeout(ctx.timeout, envelope.job.handle(optimizer, &ctx)).await;
        let error = match attempt {
            Ok(Ok(summary)) => {
                self.queue.complete(&envelope).await?;
                return Ok(Some(JobOutcome::Completed(summary)));
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => {
                let error = format!("Job timed out after {} seconds", ctx.timeout.as_secs());
                warn!("Job {}: {}", ctx.id, error);
                error
            }
        };

        if envelope.attempts < self.config.tries {
            warn!(
                "Job {} failed on attempt {}/{}, retrying in {}s",
                ctx.id,
                envelope.attempts,
                self.config.tries,
                self.config.backoff_secs
            );
            self.queue
                .release(envelope, error.clone(), self.config.backoff())
                .await?;
            Ok(Some(JobOutcome::Retrying { error }))
        } else {
            envelope.job.failed(&ctx, &error);
            self.queue.bury(envelope, error.clone()).await?;
            Ok(Some(JobOutcome::Failed { error }))
        }
    }
}
