// propagate-rs/src/job.rs
// Remediation job records and their state machine.
//
// States advance only along the allowed-transition table; every transition
// is recorded as exactly one audit entry by the job store before the next
// transition is observable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::providers::CiStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    PrOpened,
    Green,
    NeedsHuman,
    Failed,
    SkippedDuplicate,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::PrOpened => "pr_opened",
            JobState::Green => "green",
            JobState::NeedsHuman => "needs_human",
            JobState::Failed => "failed",
            JobState::SkippedDuplicate => "skipped_duplicate",
        }
    }

    /// Terminal states admit no further automated transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Green | JobState::NeedsHuman | JobState::Failed | JobState::SkippedDuplicate
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub fn allowed_transitions(from: JobState) -> Vec<JobState> {
    use JobState::*;
    match from {
        Queued => vec![Running, NeedsHuman, Failed],
        Running => vec![PrOpened, NeedsHuman, Failed],
        PrOpened => vec![Green, NeedsHuman, Failed],
        Green | NeedsHuman | Failed | SkippedDuplicate => vec![],
    }
}

pub fn validate_transition(from: JobState, to: JobState) -> Result<()> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(EngineError::StateMachine {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub bundle_fingerprint: String,
    pub consumer: String,
    pub repo_ref: String,
    pub wave_index: usize,
    pub session_id: Option<String>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Completed poll attempts against the agent session.
    pub attempts: u32,
    pub last_detail: String,
    pub pr_url: Option<String>,
    pub ci_status: Option<CiStatus>,
}

impl Job {
    pub fn new(
        bundle_fingerprint: impl Into<String>,
        consumer: impl Into<String>,
        repo_ref: impl Into<String>,
        wave_index: usize,
        state: JobState,
        detail: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            bundle_fingerprint: bundle_fingerprint.into(),
            consumer: consumer.into(),
            repo_ref: repo_ref.into(),
            wave_index,
            session_id: None,
            state,
            created_at: now,
            updated_at: now,
            attempts: 0,
            last_detail: detail.into(),
            pr_url: None,
            ci_status: None,
        }
    }
}
