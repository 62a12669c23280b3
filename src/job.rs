//! Deferred optimization runs.
//!
//! An [`OptimizeTablesJob`] is the serializable unit of work handed to a
//! [`JobQueue`](crate::queue::JobQueue). A worker later calls [`OptimizeTablesJob::handle`]
//! once per attempt and [`OptimizeTablesJob::failed`] when the attempts are used up.

use crate::backend::Backend;
use crate::catalog::DEFAULT_DATABASE_SENTINEL;
use crate::models::OptimizationSummary;
use crate::optimizer::{OptimizeError, TableOptimizer};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Prefix of the key that keeps two runs against one database from overlapping.
pub const UNIQUE_ID_PREFIX: &str = "optimize-tables:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizeTablesJob {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default = "default_should_log")]
    pub should_log: bool,
}

fn default_should_log() -> bool {
    true
}

impl Default for OptimizeTablesJob {
    fn default() -> Self {
        Self {
            database: None,
            tables: Vec::new(),
            should_log: true,
        }
    }
}

/// Attempt metadata attached to every log event of a job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub id: String,
    pub attempts: u32,
    pub timeout: Duration,
}

impl OptimizeTablesJob {
    pub fn new(database: Option<String>, tables: Vec<String>, should_log: bool) -> Self {
        Self {
            database,
            tables,
            should_log,
        }
    }

    pub fn unique_id(&self) -> String {
        format!("{}{}", UNIQUE_ID_PREFIX, self.database_label())
    }

    fn database_label(&self) -> &str {
        self.database.as_deref().unwrap_or(DEFAULT_DATABASE_SENTINEL)
    }

    /// Runs one attempt. Errors are logged (when enabled) and handed back so the
    /// worker can schedule a retry.
    pub async fn handle<B: Backend>(
        &self,
        optimizer: &mut TableOptimizer<B>,
        ctx: &JobContext,
    ) -> Result<OptimizationSummary, OptimizeError> {
        if self.should_log {
            info!(
                database = self.database_label(),
                tables = ?self.tables,
                job.id = %ctx.id,
                job.attempts = ctx.attempts,
                job.timeout = ctx.timeout.as_secs(),
                "Optimization job started"
            );
        }

        let mut log_table = |table: &str, success: bool| {
            if self.should_log {
                let status = if success { "SUCCESS" } else { "FAILED" };
                info!(
                    table,
                    status,
                    job.id = %ctx.id,
                    job.attempts = ctx.attempts,
                    job.timeout = ctx.timeout.as_secs(),
                    "Table optimization {}: {}",
                    status,
                    table
                );
            }
        };

        let results = match optimizer
            .execute(self.database.as_deref(), &self.tables, Some(&mut log_table))
            .await
        {
            Ok(results) => results,
            Err(err) => {
                if self.should_log {
                    error!(
                        error = %err,
                        database = self.database_label(),
                        tables = ?self.tables,
                        job.id = %ctx.id,
                        job.attempts = ctx.attempts,
                        job.timeout = ctx.timeout.as_secs(),
                        "Optimization job failed"
                    );
                }
                return Err(err);
            }
        };

        let summary = OptimizationSummary::from_results(results);
        if self.should_log {
            info!(
                total_tables = summary.total,
                successful = summary.successful,
                failed = summary.failed,
                database = self.database_label(),
                job.id = %ctx.id,
                job.attempts = ctx.attempts,
                job.timeout = ctx.timeout.as_secs(),
                "Optimization job completed"
            );
        }

        Ok(summary)
    }

    /// Called once every attempt has failed.
    pub fn failed(&self, ctx: &JobContext, error: &str) {
        if self.should_log {
            error!(
                error,
                database = self.database_label(),
                tables = ?self.tables,
                job.id = %ctx.id,
                job.attempts = ctx.attempts,
                job.timeout = ctx.timeout.as_secs(),
                "Optimization job permanently failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use crate::testing::{capture_logs, FakeBackend};

    fn ctx() -> JobContext {
        JobContext {
            id: "01HZX3J9V7".into(),
            attempts: 1,
            timeout: Duration::from_secs(3600),
        }
    }

    #[test]
    fn defaults_match_an_unconfigured_job() {
        let job = OptimizeTablesJob::default();
        assert_eq!(job.database, None);
        assert!(job.tables.is_empty());
        assert!(job.should_log);
    }

    #[test]
    fn unique_id_is_keyed_by_database() {
        let job = OptimizeTablesJob::new(Some("my_database".into()), vec![], true);
        assert_eq!(job.unique_id(), "optimize-tables:my_database");
        assert_eq!(OptimizeTablesJob::default().unique_id(), "optimize-tables:default");
    }

    #[test]
    fn deserializes_with_defaults() {
        let job: OptimizeTablesJob = serde_json::from_str(r#"{"tables":["users","posts"]}"#).unwrap();
        assert_eq!(job.database, None);
        assert_eq!(job.tables, vec!["users", "posts"]);
        assert!(job.should_log);
    }

    #[tokio::test]
    async fn handle_logs_start_tables_and_completion() {
        let mut optimizer = TableOptimizer::new(
            FakeBackend::new()
                .with_schema("shop", &["users", "posts"])
                .respond("posts", &["Table does not support optimize"]),
            ResolverConfig::new("shop"),
        );
        let job = OptimizeTablesJob::default();

        let (summary, logs) = capture_logs(job.handle(&mut optimizer, &ctx())).await;
        let summary = summary.unwrap();

        assert_eq!((summary.total, summary.successful, summary.failed), (2, 1, 1));
        assert!(logs.contains("Optimization job started"));
        assert!(logs.contains("Table optimization SUCCESS: users"));
        assert!(logs.contains("Table optimization FAILED: posts"));
        assert!(logs.contains("Optimization job completed"));
        assert!(logs.contains("total_tables=2"));
        assert!(logs.contains("job.id=01HZX3J9V7"));
    }

    #[tokio::test]
    async fn handle_stays_quiet_when_logging_disabled() {
        let mut optimizer = TableOptimizer::new(
            FakeBackend::new().with_schema("shop", &["users"]),
            ResolverConfig::new("shop"),
        );
        let job = OptimizeTablesJob::new(None, vec![], false);

        let (summary, logs) = capture_logs(job.handle(&mut optimizer, &ctx())).await;

        assert_eq!(summary.unwrap().successful, 1);
        assert!(!logs.contains("Optimization job"));
    }

    #[tokio::test]
    async fn handle_logs_and_returns_resolution_failure() {
        let mut optimizer = TableOptimizer::new(
            FakeBackend::new().with_schema("shop", &["users"]),
            ResolverConfig::new("shop"),
        );
        let job = OptimizeTablesJob::new(Some("nonexistent_db".into()), vec![], true);

        let (result, logs) = capture_logs(job.handle(&mut optimizer, &ctx())).await;

        assert!(result.is_err());
        assert!(logs.contains("Optimization job failed"));
        assert!(logs.contains("nonexistent_db"));
    }
}
