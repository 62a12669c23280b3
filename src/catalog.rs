use crate::backend::{Backend, BackendError};
use crate::config::ResolverConfig;
use itertools::Itertools;
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use tracing::debug;

/// Database name that stands for the configured default.
pub const DEFAULT_DATABASE_SENTINEL: &str = "default";

#[derive(Debug, Snafu)]
pub enum CatalogError {
    #[snafu(display("This database {} doesn't exist.", name))]
    DatabaseNotFound { name: String },

    #[snafu(display(
        "One or more tables provided doesn't exist in {}: {}",
        database,
        tables.join(", ")
    ))]
    TableNotFound {
        database: String,
        tables: Vec<String>,
    },

    #[snafu(display(
        "No default database configured; set `database` in the config file, MYSQL_DATABASE or --default-database"
    ))]
    MissingDefaultDatabase,

    #[snafu(display("Catalog lookup failed: {}", source))]
    Lookup { source: BackendError },
}

type Result<T, E = CatalogError> = std::result::Result<T, E>;

/// Turns caller-supplied database and table names into a validated target set.
#[derive(Debug, Clone)]
pub struct CatalogResolver {
    config: ResolverConfig,
}

impl CatalogResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// `None` and `"default"` map to the configured database without touching the catalog.
    pub async fn resolve_database<B>(&self, backend: &mut B, name: Option<&str>) -> Result<String>
    where
        B: Backend + ?Sized,
    {
        let name = match name {
            None | Some(DEFAULT_DATABASE_SENTINEL) => {
                return self
                    .config
                    .default_database
                    .clone()
                    .context(MissingDefaultDatabaseSnafu)
            }
            Some(name) => name,
        };

        let exists = backend.schema_exists(name).await.context(LookupSnafu)?;
        ensure!(exists, DatabaseNotFoundSnafu { name });

        Ok(name.to_string())
    }

    /// An empty request expands to every table of `database` in catalog order.
    /// Otherwise the request is returned verbatim once every name is known to exist.
    pub async fn resolve_tables<B>(
        &self,
        backend: &mut B,
        database: &str,
        requested: &[String],
    ) -> Result<Vec<String>>
    where
        B: Backend + ?Sized,
    {
        if requested.is_empty() {
            return backend.list_tables(database).await.context(LookupSnafu);
        }

        // Duplicates would otherwise inflate the expected count
        let distinct: Vec<String> = requested.iter().unique().cloned().collect();
        let found = backend
            .count_tables(database, &distinct)
            .await
            .context(LookupSnafu)?;

        debug!(
            "Found {} of {} requested tables in {}",
            found,
            distinct.len(),
            database
        );

        ensure!(
            found >= distinct.len() as u64,
            TableNotFoundSnafu {
                database,
                tables: requested.to_vec(),
            }
        );

        Ok(requested.to_vec())
    }
}
