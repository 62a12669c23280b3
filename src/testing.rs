//! In-memory backend for unit tests.

use crate::backend::{Backend, BackendError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct FakeBackend {
    schemas: Vec<String>,
    /// (schema, table) in catalog order
    tables: Vec<(String, String)>,
    responses: HashMap<String, Vec<String>>,
    broken_table: Option<String>,
    delays: HashMap<String, Duration>,
    pub catalog_queries: usize,
    pub statements: Vec<String>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: &str, tables: &[&str]) -> Self {
        self.schemas.push(schema.to_string());
        self.tables
            .extend(tables.iter().map(|t| (schema.to_string(), t.to_string())));
        self
    }

    /// Overrides the status messages returned for `table` (default is a single "OK").
    pub fn respond(mut self, table: &str, messages: &[&str]) -> Self {
        self.responses.insert(
            table.to_string(),
            messages.iter().map(|m| m.to_string()).collect(),
        );
        self
    }

    /// Makes the maintenance command for `table` fail at the transport level.
    pub fn break_on(mut self, table: &str) -> Self {
        self.broken_table = Some(table.to_string());
        self
    }

    /// Makes the maintenance command for `table` take `delay` before answering.
    pub fn delay_on(mut self, table: &str, delay: Duration) -> Self {
        self.delays.insert(table.to_string(), delay);
        self
    }

    pub fn optimized_tables(&self) -> Vec<String> {
        self.statements.iter().map(|s| table_of(s)).collect()
    }
}

fn table_of(statement: &str) -> String {
    let quoted = statement
        .rsplit_once("`.`")
        .map(|(_, table)| table)
        .unwrap_or(statement);
    quoted.trim_end_matches('`').replace("``", "`")
}

fn transport_error(query: &str) -> BackendError {
    BackendError::QueryError {
        query: query.to_string(),
        source: sqlx::Error::Protocol("connection lost".into()),
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn schema_exists(&mut self, schema: &str) -> Result<bool, BackendError> {
        self.catalog_queries += 1;
        Ok(self.schemas.iter().any(|s| s == schema))
    }

    async fn count_tables(&mut self, schema: &str, tables: &[String]) -> Result<u64, BackendError> {
        self.catalog_queries += 1;
        let count = self
            .tables
            .iter()
            .filter(|(s, t)| s == schema && tables.contains(t))
            .count();
        Ok(count as u64)
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>, BackendError> {
        self.catalog_queries += 1;
        Ok(self
            .tables
            .iter()
            .filter(|(s, _)| s == schema)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn run_maintenance(&mut self, statement: &str) -> Result<Vec<String>, BackendError> {
        self.statements.push(statement.to_string());
        let table = table_of(statement);

        if let Some(delay) = self.delays.get(&table) {
            tokio::time::sleep(*delay).await;
        }

        if self.broken_table.as_deref() == Some(table.as_str()) {
            return Err(transport_error(statement));
        }

        Ok(self
            .responses
            .get(&table)
            .cloned()
            .unwrap_or_else(|| vec!["OK".to_string()]))
    }
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Awaits `future` with a thread-local subscriber and returns everything it logged.
pub(crate) async fn capture_logs<F: Future>(future: F) -> (F::Output, String) {
    let buffer = SharedBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();

    let output = {
        let _guard = tracing::subscriber::set_default(subscriber);
        future.await
    };

    let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (output, logs)
}
