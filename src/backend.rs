use async_trait::async_trait;
use itertools::Itertools;
use snafu::{ResultExt, Snafu};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{query_scalar, ConnectOptions, Row};
use tracing::{debug, info};

#[derive(Debug, Snafu)]
pub enum BackendError {
    #[snafu(display("Failed to connect to database: {}", source))]
    ConnectionError { source: sqlx::Error },

    #[snafu(display("Failed to execute query: {}: {}", query, source))]
    QueryError { query: String, source: sqlx::Error },
}

type Result<T, E = BackendError> = std::result::Result<T, E>;

/// The single session used for both catalog lookups and maintenance commands.
///
/// Every schema and table name handed to the catalog methods is sent as a bound
/// parameter. `run_maintenance` receives a finished statement whose identifiers
/// have already been quoted by the caller.
#[async_trait]
pub trait Backend: Send {
    async fn schema_exists(&mut self, schema: &str) -> Result<bool>;

    /// Counts catalog rows in `schema` whose table name is one of `tables`.
    async fn count_tables(&mut self, schema: &str, tables: &[String]) -> Result<u64>;

    /// All table names of `schema`, in the order the catalog returns them.
    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>>;

    /// Runs a maintenance statement and returns the text of each status message.
    async fn run_maintenance(&mut self, statement: &str) -> Result<Vec<String>>;
}

pub struct MySqlBackend {
    conn: MySqlConnection,
}

impl MySqlBackend {
    pub async fn connect(options: &MySqlConnectOptions) -> Result<Self> {
        info!(
            "Connecting to MySQL at {}:{}",
            options.get_host(),
            options.get_port()
        );

        let conn = options.connect().await.context(ConnectionSnafu)?;

        info!("Successfully connected to MySQL");
        Ok(Self { conn })
    }
}

#[async_trait]
impl Backend for MySqlBackend {
    async fn schema_exists(&mut self, schema: &str) -> Result<bool> {
        let query = "SELECT COUNT(*) FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = ?";
        let count = query_scalar::<_, i64>(query)
            .bind(schema)
            .fetch_one(&mut self.conn)
            .await
            .context(QuerySnafu { query })?;
        Ok(count > 0)
    }

    async fn count_tables(&mut self, schema: &str, tables: &[String]) -> Result<u64> {
        if tables.is_empty() {
            return Ok(0);
        }

        let placeholders = std::iter::repeat("?").take(tables.len()).join(", ");
        let query = format!(
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = ? AND TABLE_NAME IN ({placeholders})"
        );

        let mut statement = query_scalar::<_, i64>(&query).bind(schema);
        for table in tables {
            statement = statement.bind(table.as_str());
        }

        let count = statement
            .fetch_one(&mut self.conn)
            .await
            .context(QuerySnafu { query: query.clone() })?;
        Ok(count.max(0) as u64)
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        // INFORMATION_SCHEMA columns come back as binary strings on some servers
        let query = "SELECT CAST(TABLE_NAME AS CHAR) AS table_name FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = ?";
        let tables = query_scalar::<_, String>(query)
            .bind(schema)
            .fetch_all(&mut self.conn)
            .await
            .context(QuerySnafu { query })?;

        debug!("Found {} tables in schema {}", tables.len(), schema);
        Ok(tables)
    }

    async fn run_maintenance(&mut self, statement: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(statement)
            .fetch_all(&mut self.conn)
            .await
            .context(QuerySnafu { query: statement })?;

        Ok(rows.iter().filter_map(message_text).collect())
    }
}

fn message_text(row: &MySqlRow) -> Option<String> {
    if let Ok(text) = row.try_get::<String, _>("Msg_text") {
        return Some(text);
    }
    row.try_get::<Vec<u8>, _>("Msg_text")
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}
