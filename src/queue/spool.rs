//! File-backed job queue.
//!
//! Layout under the spool directory:
//!
//! ```text
//! pending/{id}.json    waiting for a worker (possibly delayed by `available_at`)
//! reserved/{id}.json   claimed by a worker
//! failed/{id}.json     attempts exhausted
//! locks/{key}.lock     uniqueness lock for one database
//! ```
//!
//! Entries are served in dispatch order. Workers claim a job by renaming it
//! out of `pending/`, which only one of them can win.

use super::{Dispatch, EncodeSnafu, IoSnafu, JobQueue, Result};
use crate::config::QueueConfig;
use crate::job::OptimizeTablesJob;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use ulid::Ulid;

const PENDING: &str = "pending";
const RESERVED: &str = "reserved";
const FAILED: &str = "failed";
const LOCKS: &str = "locks";

/// A queued job plus its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: String,
    pub unique_id: String,
    pub job: OptimizeTablesJob,
    pub attempts: u32,
    pub queued_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    job_id: String,
    unique_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SpoolQueue {
    root: PathBuf,
    unique_for: Duration,
}

impl SpoolQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            root: config.spool_dir.clone(),
            unique_for: config.unique_for(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Claims the oldest job whose `available_at` has passed and counts the attempt.
    pub async fn reserve(&self) -> Result<Option<JobEnvelope>> {
        self.ensure_layout().await?;
        let now = Utc::now();

        for mut envelope in self.pending().await? {
            if envelope.available_at > now {
                continue;
            }

            let from = self.entry_path(PENDING, &envelope.id);
            let to = self.entry_path(RESERVED, &envelope.id);
            match fs::rename(&from, &to).await {
                Ok(()) => {}
                // Another worker got there first
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(source) => return Err(source).context(IoSnafu { path: from }),
            }

            envelope.attempts += 1;
            envelope.reserved_at = Some(now);
            write_json(&to, &envelope).await?;

            debug!("Reserved job {} (attempt {})", envelope.id, envelope.attempts);
            return Ok(Some(envelope));
        }

        Ok(None)
    }

    /// Drops a finished job and frees its uniqueness lock.
    pub async fn complete(&self, envelope: &JobEnvelope) -> Result<()> {
        remove_if_exists(&self.entry_path(RESERVED, &envelope.id)).await?;
        self.release_lock(&envelope.unique_id, &envelope.id).await
    }

    /// Puts a job back for another attempt once `delay` has passed. The lock stays held.
    pub async fn release(&self, mut envelope: JobEnvelope, error: String, delay: Duration) -> Result<()> {
        envelope.last_error = Some(error);
        envelope.reserved_at = None;
        envelope.available_at = Utc::now() + to_chrono(delay);

        write_json(&self.entry_path(PENDING, &envelope.id), &envelope).await?;
        remove_if_exists(&self.entry_path(RESERVED, &envelope.id)).await
    }

    /// Moves a job to `failed/` and frees its uniqueness lock.
    pub async fn bury(&self, mut envelope: JobEnvelope, error: String) -> Result<()> {
        envelope.last_error = Some(error);
        envelope.reserved_at = None;

        write_json(&self.entry_path(FAILED, &envelope.id), &envelope).await?;
        remove_if_exists(&self.entry_path(RESERVED, &envelope.id)).await?;
        self.release_lock(&envelope.unique_id, &envelope.id).await
    }

    /// Returns reserved jobs older than `timeout` to `pending/`; their worker is gone.
    pub async fn recover_abandoned(&self, timeout: Duration) -> Result<usize> {
        self.ensure_layout().await?;
        let cutoff = Utc::now() - to_chrono(timeout);
        let mut recovered = 0;

        for mut envelope in self.list(RESERVED).await? {
            if envelope.reserved_at.is_some_and(|at| at > cutoff) {
                continue;
            }

            warn!(
                "Requeueing job {} abandoned during attempt {}",
                envelope.id, envelope.attempts
            );
            envelope.reserved_at = None;
            envelope.available_at = Utc::now();
            write_json(&self.entry_path(PENDING, &envelope.id), &envelope).await?;
            remove_if_exists(&self.entry_path(RESERVED, &envelope.id)).await?;
            recovered += 1;
        }

        Ok(recovered)
    }

    /// Jobs waiting in `pending/`, oldest first.
    pub async fn pending(&self) -> Result<Vec<JobEnvelope>> {
        self.list(PENDING).await
    }

    pub async fn failed(&self) -> Result<Vec<JobEnvelope>> {
        self.list(FAILED).await
    }

    async fn list(&self, state: &str) -> Result<Vec<JobEnvelope>> {
        let dir = self.root.join(state);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(source).context(IoSnafu { path: dir }),
        };

        let mut envelopes = Vec::new();
        while let Some(entry) = entries.next_entry().await.context(IoSnafu { path: &dir })? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_json::<JobEnvelope>(&path).await {
                Ok(Some(envelope)) => envelopes.push(envelope),
                Ok(None) => {}
                Err(err) => warn!("Skipping unreadable queue entry {}: {}", path.display(), err),
            }
        }

        envelopes.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then_with(|| a.id.cmp(&b.id)));
        Ok(envelopes)
    }

    async fn ensure_layout(&self) -> Result<()> {
        for state in [PENDING, RESERVED, FAILED, LOCKS] {
            let dir = self.root.join(state);
            fs::create_dir_all(&dir).await.context(IoSnafu { path: dir })?;
        }
        Ok(())
    }

    fn entry_path(&self, state: &str, id: &str) -> PathBuf {
        self.root.join(state).join(format!("{id}.json"))
    }

    fn lock_path(&self, unique_id: &str) -> PathBuf {
        // Hex keeps arbitrary database names safe as file names
        let key: String = unique_id.bytes().map(|b| format!("{b:02x}")).collect();
        self.root.join(LOCKS).join(format!("{key}.lock"))
    }

    async fn acquire_lock(&self, unique_id: &str, job_id: &str) -> Result<bool> {
        let path = self.lock_path(unique_id);
        let info = LockInfo {
            job_id: job_id.to_string(),
            unique_id: unique_id.to_string(),
            expires_at: Utc::now() + to_chrono(self.unique_for),
        };
        let body = serde_json::to_vec_pretty(&info).context(EncodeSnafu)?;

        let created = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;

        match created {
            Ok(mut file) => {
                file.write_all(&body).await.context(IoSnafu { path: &path })?;
                file.flush().await.context(IoSnafu { path: &path })?;
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if let Some(held) = live_lock(&path).await {
                    debug!("Lock {} held by job {}", held.unique_id, held.job_id);
                    return Ok(false);
                }
                self.take_over_lock(&path, job_id, &body).await
            }
            Err(source) => Err(source).context(IoSnafu { path }),
        }
    }

    /// Replaces an expired lock. The new holder is staged in its own file and
    /// renamed over the lock only if no other dispatcher has refreshed it meanwhile.
    async fn take_over_lock(&self, path: &Path, job_id: &str, body: &[u8]) -> Result<bool> {
        let staged = path.with_extension(format!("{job_id}.tmp"));
        fs::write(&staged, body).await.context(IoSnafu { path: &staged })?;

        if live_lock(path).await.is_some() {
            remove_if_exists(&staged).await?;
            return Ok(false);
        }
        fs::rename(&staged, path).await.context(IoSnafu { path })?;

        // Two takeovers can pass the check together; the last rename wins
        let owned = matches!(read_json::<LockInfo>(path).await, Ok(Some(held)) if held.job_id == job_id);
        if owned {
            warn!("Took over expired lock {}", path.display());
        }
        Ok(owned)
    }

    /// Removes the lock only while `job_id` still holds it.
    async fn release_lock(&self, unique_id: &str, job_id: &str) -> Result<()> {
        let path = self.lock_path(unique_id);
        match read_json::<LockInfo>(&path).await {
            Ok(Some(held)) if held.job_id != job_id => {
                debug!(
                    "Leaving lock {} in place, it now belongs to job {}",
                    held.unique_id, held.job_id
                );
                Ok(())
            }
            Ok(None) => Ok(()),
            _ => remove_if_exists(&path).await,
        }
    }
}

#[async_trait]
impl JobQueue for SpoolQueue {
    async fn dispatch(&self, job: OptimizeTablesJob) -> Result<Dispatch> {
        self.ensure_layout().await?;

        let unique_id = job.unique_id();
        let id = Ulid::new().to_string();
        if !self.acquire_lock(&unique_id, &id).await? {
            info!("Skipping dispatch, {} is already queued", unique_id);
            return Ok(Dispatch::AlreadyQueued { unique_id });
        }

        let now = Utc::now();
        let envelope = JobEnvelope {
            id: id.clone(),
            unique_id,
            job,
            attempts: 0,
            queued_at: now,
            available_at: now,
            reserved_at: None,
            last_error: None,
        };
        write_json(&self.entry_path(PENDING, &id), &envelope).await?;

        info!("Queued job {} ({})", id, envelope.unique_id);
        Ok(Dispatch::Queued { id })
    }
}

/// The lock at `path` if it exists and has not expired yet.
async fn live_lock(path: &Path) -> Option<LockInfo> {
    match read_json::<LockInfo>(path).await {
        Ok(Some(held)) if held.expires_at > Utc::now() => Some(held),
        _ => None,
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Writes through a temporary file so readers never see a partial entry.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value).context(EncodeSnafu)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &body).await.context(IoSnafu { path: &tmp })?;
    fs::rename(&tmp, path).await.context(IoSnafu { path })
}

/// `Ok(None)` when the file vanished in between, e.g. claimed by another worker.
async fn read_json<T: DeserializeOwned>(path: &Path) -> std::io::Result<Option<T>> {
    match fs::read(path).await {
        Ok(body) => serde_json::from_slice(&body)
            .map(Some)
            .map_err(|err| std::io::Error::new(ErrorKind::InvalidData, err)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(source).context(IoSnafu { path }),
    }
}
