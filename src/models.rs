use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Format used for every timestamp the optimizer reports.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of optimizing a single table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub table: String,
    pub success: bool,
    /// Local wall-clock time at which the record was produced
    #[serde(with = "timestamp")]
    pub timestamp: NaiveDateTime,
    /// Time spent in the maintenance command for this table
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
}

impl OptimizationResult {
    pub fn new(table: impl Into<String>, success: bool, duration: Duration) -> Self {
        Self {
            table: table.into(),
            success,
            timestamp: Local::now().naive_local(),
            duration,
        }
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Aggregate view over the records of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<OptimizationResult>,
}

impl OptimizationSummary {
    pub fn from_results(results: Vec<OptimizationResult>) -> Self {
        let total = results.len();
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total,
            successful,
            failed: total - successful,
            results,
        }
    }
}

mod timestamp {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
