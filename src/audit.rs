// propagate-rs/src/audit.rs
// Append-only audit log of job state transitions.
//
// One serialized entry per line. Entries are flushed and synced before the
// caller proceeds, so a transition is durable before the next transition
// for the same job can be observed. Entries are never mutated or deleted.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::job::JobState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub job_id: Uuid,
    /// None for the entry that records job creation.
    pub from_state: Option<JobState>,
    pub to_state: JobState,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

impl AuditEntry {
    pub fn new(
        job_id: Uuid,
        from_state: Option<JobState>,
        to_state: JobState,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            from_state,
            to_state,
            timestamp: Utc::now(),
            detail: detail.into(),
        }
    }
}

pub struct AuditLog {
    path: PathBuf,
    // Serializes appends so interleaved writers cannot tear lines.
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and make it durable before returning.
    pub async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;

        tracing::debug!(
            job_id = %entry.job_id,
            from = ?entry.from_state,
            to = %entry.to_state,
            detail = %entry.detail,
            "audit entry recorded"
        );
        Ok(())
    }

    /// Every entry in append order. Unparseable lines are skipped with a
    /// warning rather than failing reads of the surviving history.
    pub async fn read_all(&self) -> Result<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let mut entries = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => tracing::warn!(error = %err, "skipping unparseable audit line"),
            }
        }
        Ok(entries)
    }

    pub async fn entries_for_job(&self, job_id: Uuid) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| e.job_id == job_id)
            .collect())
    }
}
