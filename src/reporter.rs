use crate::catalog::DEFAULT_DATABASE_SENTINEL;
use crate::job::OptimizeTablesJob;
use crate::models::OptimizationSummary;
use clap::ValueEnum;
use snafu::{ResultExt, Snafu};
use std::fmt::Write as _;
use std::io::Write;

#[derive(Debug, Snafu)]
pub enum ReporterError {
    #[snafu(display("Failed to write output: {}", source))]
    OutputError { source: std::io::Error },

    #[snafu(display("Failed to encode JSON report: {}", source))]
    JsonError { source: serde_json::Error },
}

type Result<T, E = ReporterError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Per-table lines followed by a summary
    #[default]
    Text,
    /// JSON document with counts and every result record
    Json,
}

pub struct Reporter {
    format: ReportFormat,
}

impl Reporter {
    pub fn new(format: ReportFormat) -> Self {
        Self { format }
    }

    /// Progress chatter goes to stderr when stdout carries JSON.
    pub fn status(&self, message: &str) {
        match self.format {
            ReportFormat::Text => println!("{}", message),
            ReportFormat::Json => eprintln!("{}", message),
        }
    }

    pub fn report(&self, summary: &OptimizationSummary) -> Result<()> {
        let rendered = self.render(summary)?;

        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", rendered).context(OutputSnafu)?;
        Ok(())
    }

    pub fn render(&self, summary: &OptimizationSummary) -> Result<String> {
        match self.format {
            ReportFormat::Text => Ok(render_text(summary)),
            ReportFormat::Json => serde_json::to_string_pretty(summary).context(JsonSnafu),
        }
    }
}

fn render_text(summary: &OptimizationSummary) -> String {
    let width = summary
        .results
        .iter()
        .map(|r| r.table.len())
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for result in &summary.results {
        let status = if result.success { "OK" } else { "FAILED" };
        let _ = writeln!(
            out,
            "  {:<6}  {:<width$}  {}  ({} ms)",
            status,
            result.table,
            result.formatted_timestamp(),
            result.duration.as_millis(),
            width = width
        );
    }
    out.push_str(&completion_line(summary));
    out
}

pub fn completion_line(summary: &OptimizationSummary) -> String {
    format!(
        "Optimization Completed: {}/{} tables optimized successfully",
        summary.successful, summary.total
    )
}

pub fn failure_line(error: &dyn std::fmt::Display) -> String {
    format!("Optimization failed: {}", error)
}

fn database_description(job: &OptimizeTablesJob) -> String {
    match job.database.as_deref() {
        None | Some(DEFAULT_DATABASE_SENTINEL) => "default database".to_string(),
        Some(name) => format!("database '{}'", name),
    }
}

fn tables_description(job: &OptimizeTablesJob) -> String {
    if job.tables.is_empty() {
        "all tables".to_string()
    } else {
        format!("specified tables ({})", job.tables.join(", "))
    }
}

pub fn queued_confirmation(job: &OptimizeTablesJob) -> String {
    format!(
        "Optimization job queued for {} in {}",
        tables_description(job),
        database_description(job)
    )
}

pub fn already_queued_notice(job: &OptimizeTablesJob) -> String {
    format!(
        "An optimization job for {} is already queued or running; nothing was queued",
        database_description(job)
    )
}
