use crate::backend::Backend;
use crate::catalog::{CatalogError, CatalogResolver};
use crate::config::ResolverConfig;
use crate::executor::{self, ExecutorError};
use crate::models::OptimizationResult;
use snafu::{ResultExt, Snafu};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Snafu)]
pub enum OptimizeError {
    #[snafu(display("{}", source))]
    Resolution { source: CatalogError },

    #[snafu(display("Failed to optimize table {}: {}", table, source))]
    Execution { table: String, source: ExecutorError },
}

type Result<T, E = OptimizeError> = std::result::Result<T, E>;

/// Observer invoked once per processed table with `(table, success)`.
pub type ProgressCallback<'a> = &'a mut (dyn FnMut(&str, bool) + Send);

/// Resolves the target tables and optimizes them one after another on a single backend session.
pub struct TableOptimizer<B> {
    backend: B,
    resolver: CatalogResolver,
}

impl<B: Backend> TableOptimizer<B> {
    pub fn new(backend: B, config: ResolverConfig) -> Self {
        Self {
            backend,
            resolver: CatalogResolver::new(config),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of tables `execute` would process, without running anything.
    pub async fn get_count(&mut self, database: Option<&str>, tables: &[String]) -> Result<usize> {
        let (_, tables) = self.resolve(database, tables).await?;
        Ok(tables.len())
    }

    /// Optimizes every resolved table in order. A table the server could not
    /// optimize is recorded with `success = false` and the run continues.
    pub async fn execute(
        &mut self,
        database: Option<&str>,
        tables: &[String],
        mut on_progress: Option<ProgressCallback<'_>>,
    ) -> Result<Vec<OptimizationResult>> {
        let (database, tables) = self.resolve(database, tables).await?;
        info!("Optimizing {} tables in {}", tables.len(), database);

        let mut results = Vec::with_capacity(tables.len());
        for table in tables {
            let started = Instant::now();
            let success = executor::optimize_table(&mut self.backend, &database, &table)
                .await
                .context(ExecutionSnafu { table: &table })?;
            let result = OptimizationResult::new(table, success, started.elapsed());

            if success {
                debug!("Optimized {}.{} in {:?}", database, result.table, result.duration);
            } else {
                warn!("Optimization of {}.{} did not report OK", database, result.table);
            }

            if let Some(callback) = on_progress.as_deref_mut() {
                callback(&result.table, result.success);
            }
            results.push(result);
        }

        Ok(results)
    }

    async fn resolve(
        &mut self,
        database: Option<&str>,
        tables: &[String],
    ) -> Result<(String, Vec<String>)> {
        let database = self
            .resolver
            .resolve_database(&mut self.backend, database)
            .await
            .context(ResolutionSnafu)?;
        let tables = self
            .resolver
            .resolve_tables(&mut self.backend, &database, tables)
            .await
            .context(ResolutionSnafu)?;
        Ok((database, tables))
    }
}
