// propagate-rs/src/store.rs
// File-backed persistence for the pipeline's logical tables.
//
// Each table is an append-only NDJSON journal under the data directory:
//
//   snapshots.ndjson  last-known contract per producer (last line wins)
//   changes.ndjson    one classified change set per run
//   impacts.ndjson    impact records referencing a change id
//   jobs.ndjson       job journal; the latest record per job id is current
//   audit.ndjson      append-only state-transition audit log
//
// Unknown fields are ignored on read and new fields are optional, which
// keeps migrations additive-only. The job table is the only cross-task
// mutable state; all mutation happens under one lock so the fingerprint
// check-then-insert and the transition/audit ordering are race-free.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLog};
use crate::classifier::ChangeSet;
use crate::contract::ContractVersion;
use crate::error::{EngineError, Result};
use crate::impact::Impact;
use crate::job::{validate_transition, Job, JobState};

/// A persisted change set with its run-scoped identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChange {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub change_set: ChangeSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredImpact {
    pub change_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub impact: Impact,
}

/// Outcome of the guarded fingerprint check-then-insert.
#[derive(Debug, Clone)]
pub enum DispatchDecision {
    /// A fresh job was created in `queued`.
    Created(Job),
    /// A non-terminal job already holds this fingerprint; the new record is
    /// terminal `skipped_duplicate`.
    Skipped(Job),
}

pub struct DataStore {
    dir: PathBuf,
    audit: AuditLog,
    jobs: Mutex<HashMap<Uuid, Job>>,
}

async fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = tokio::fs::read_to_string(path).await?;
    let mut out = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(value) => out.push(value),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unparseable journal line");
            }
        }
    }
    Ok(out)
}

impl DataStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineError::persistence(format!("cannot create data dir {}: {e}", dir.display())))?;

        let records: Vec<Job> = read_lines(&dir.join("jobs.ndjson")).await?;
        let mut jobs = HashMap::new();
        for job in records {
            jobs.insert(job.id, job);
        }

        Ok(Self {
            audit: AuditLog::new(dir.join("audit.ndjson")),
            jobs: Mutex::new(jobs),
            dir,
        })
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    // --- contract snapshots ---

    pub async fn latest_snapshot(&self, service_id: &str) -> Result<Option<ContractVersion>> {
        let snapshots: Vec<ContractVersion> = read_lines(&self.dir.join("snapshots.ndjson")).await?;
        Ok(snapshots
            .into_iter()
            .filter(|s| s.service_id == service_id)
            .last())
    }

    pub async fn insert_snapshot(&self, snapshot: &ContractVersion) -> Result<()> {
        append_line(&self.dir.join("snapshots.ndjson"), snapshot).await
    }

    // --- change sets ---

    pub async fn insert_change(&self, change_set: &ChangeSet) -> Result<StoredChange> {
        let stored = StoredChange {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            change_set: change_set.clone(),
        };
        append_line(&self.dir.join("changes.ndjson"), &stored).await?;
        Ok(stored)
    }

    // --- impact sets ---

    pub async fn insert_impacts(&self, change_id: Uuid, impacts: &[Impact]) -> Result<()> {
        let path = self.dir.join("impacts.ndjson");
        for impact in impacts {
            let stored = StoredImpact {
                change_id,
                recorded_at: Utc::now(),
                impact: impact.clone(),
            };
            append_line(&path, &stored).await?;
        }
        Ok(())
    }

    // --- jobs ---

    async fn journal_job(&self, job: &Job) -> Result<()> {
        append_line(&self.dir.join("jobs.ndjson"), job).await
    }

    /// Guarded check-then-insert keyed by bundle fingerprint: at most one
    /// non-terminal job may exist per fingerprint at any instant.
    pub async fn create_dispatch_job(&self, template: Job) -> Result<DispatchDecision> {
        let mut jobs = self.jobs.lock().await;

        let duplicate_of = jobs
            .values()
            .find(|j| j.bundle_fingerprint == template.bundle_fingerprint && !j.state.is_terminal())
            .map(|j| j.id);

        if let Some(existing_id) = duplicate_of {
            let mut skip = template;
            skip.state = JobState::SkippedDuplicate;
            skip.last_detail = format!("duplicate of non-terminal job {existing_id}");
            self.audit
                .append(&AuditEntry::new(
                    skip.id,
                    None,
                    JobState::SkippedDuplicate,
                    skip.last_detail.clone(),
                ))
                .await?;
            self.journal_job(&skip).await?;
            jobs.insert(skip.id, skip.clone());
            return Ok(DispatchDecision::Skipped(skip));
        }

        let job = template;
        self.audit
            .append(&AuditEntry::new(
                job.id,
                None,
                job.state,
                job.last_detail.clone(),
            ))
            .await?;
        self.journal_job(&job).await?;
        jobs.insert(job.id, job.clone());
        Ok(DispatchDecision::Created(job))
    }

    /// Validated state transition. The audit entry is durable before the
    /// updated job record is journaled or visible to other tasks.
    pub async fn transition_with<F>(
        &self,
        job_id: Uuid,
        to: JobState,
        detail: impl Into<String>,
        update: F,
    ) -> Result<Job>
    where
        F: FnOnce(&mut Job),
    {
        let detail = detail.into();
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get(&job_id)
            .ok_or_else(|| EngineError::persistence(format!("unknown job {job_id}")))?;

        validate_transition(job.state, to)?;

        let mut updated = job.clone();
        let from = updated.state;
        update(&mut updated);
        updated.state = to;
        updated.updated_at = Utc::now();
        updated.last_detail = detail.clone();

        self.audit
            .append(&AuditEntry::new(job_id, Some(from), to, detail))
            .await?;
        self.journal_job(&updated).await?;
        jobs.insert(job_id, updated.clone());

        metrics::counter!("propagate.jobs.transitions", 1);
        if to.is_terminal() {
            metrics::counter!("propagate.jobs.terminal", 1);
        }

        Ok(updated)
    }

    pub async fn transition(
        &self,
        job_id: Uuid,
        to: JobState,
        detail: impl Into<String>,
    ) -> Result<Job> {
        self.transition_with(job_id, to, detail, |_| {}).await
    }

    /// Record a completed poll attempt. Not a state transition, so no audit
    /// entry is written.
    pub async fn record_poll_attempt(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            job.attempts += 1;
            job.updated_at = Utc::now();
            let snapshot = job.clone();
            drop(jobs);
            self.journal_job(&snapshot).await?;
        }
        Ok(())
    }

    pub async fn get(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.lock().await.get(&job_id).cloned()
    }

    pub async fn all_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub async fn non_terminal_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .await
            .values()
            .filter(|j| !j.state.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub async fn find_by_session(&self, session_id: &str) -> Option<Job> {
        self.jobs
            .lock()
            .await
            .values()
            .find(|j| j.session_id.as_deref() == Some(session_id))
            .cloned()
    }
}
