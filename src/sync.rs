// propagate-rs/src/sync.rs
// Session reconciliation: map external agent session state onto the local
// job table through the same validated-transition path the supervisor uses.
//
// Runs as part of `check-status` when sync is enabled. A process-wide mutex
// prevents overlapping sync writers.

use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use crate::agent::{AgentApi, AgentSessionState};
use crate::error::Result;
use crate::job::JobState;
use crate::store::DataStore;

static SYNC_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Reconcile every live job that has a session against the agent API.
/// Returns the number of jobs whose state advanced.
pub async fn sync_sessions(store: &Arc<DataStore>, agent: &Arc<dyn AgentApi>) -> Result<usize> {
    let _guard = SYNC_MUTEX.lock().await;

    let live = store.non_terminal_jobs().await;
    let mut advanced = 0;

    for job in live {
        let session_id = match &job.session_id {
            Some(id) => id.clone(),
            None => continue,
        };

        let status = match agent.poll_session(&session_id).await {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(job_id = %job.id, error = %err, "sync poll failed; skipping job");
                continue;
            }
        };

        let mut current = job.clone();

        if let Some(pr_url) = &status.pr_url {
            if current.state == JobState::Running {
                let pr_url = pr_url.clone();
                current = store
                    .transition_with(
                        current.id,
                        JobState::PrOpened,
                        format!("PR opened: {pr_url} (sync)"),
                        |j| j.pr_url = Some(pr_url.clone()),
                    )
                    .await?;
                advanced += 1;
            }
        }

        // Only agent-side terminal signals advance a job here; CI gating and
        // protected-path checks stay with the supervisor.
        if current.state == JobState::Running && status.pr_url.is_none() {
            match status.state {
                AgentSessionState::Blocked => {
                    store
                        .transition(
                            current.id,
                            JobState::NeedsHuman,
                            format!("agent session blocked: {} (sync)", status.detail),
                        )
                        .await?;
                    advanced += 1;
                }
                AgentSessionState::Failed => {
                    store
                        .transition(
                            current.id,
                            JobState::Failed,
                            format!("agent reported unrecoverable error: {} (sync)", status.detail),
                        )
                        .await?;
                    advanced += 1;
                }
                AgentSessionState::Stopped => {
                    store
                        .transition(
                            current.id,
                            JobState::Failed,
                            "session stopped without opening a PR (sync)",
                        )
                        .await?;
                    advanced += 1;
                }
                AgentSessionState::Working => {}
            }
        }
    }

    tracing::info!(advanced = advanced, "session sync complete");
    Ok(advanced)
}
