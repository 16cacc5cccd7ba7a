// propagate-rs/src/dispatcher.rs
// Wave-ordered dispatch of remediation bundles to the external agent.
//
// Waves are processed strictly in order by the pipeline; within a wave,
// submission fans out in parallel under a global concurrency budget. The
// fingerprint index is consulted through the store's guarded
// check-then-insert, so a bundle whose previous job is still live yields a
// skipped_duplicate record instead of a second session.

use std::sync::Arc;

use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::agent::{AgentApi, SessionRequest};
use crate::bundle::Bundle;
use crate::error::{EngineError, Result};
use crate::job::{Job, JobState};
use crate::store::{DataStore, DispatchDecision};

/// The job ids a wave dispatch produced: every record created, and the
/// subset that is live and needs supervision.
#[derive(Debug, Default, Clone)]
pub struct WaveDispatch {
    pub all: Vec<Uuid>,
    pub live: Vec<Uuid>,
}

pub struct Dispatcher {
    store: Arc<DataStore>,
    agent: Arc<dyn AgentApi>,
    /// Global budget over simultaneous outstanding session submissions.
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(store: Arc<DataStore>, agent: Arc<dyn AgentApi>, max_concurrent: usize) -> Self {
        Self {
            store,
            agent,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Dispatch every bundle in one wave. Skipped duplicates and jobs that
    /// failed at submission are terminal already; only the live subset
    /// needs supervision.
    pub async fn dispatch_wave(&self, wave_index: usize, bundles: &[Bundle]) -> Result<WaveDispatch> {
        tracing::info!(
            wave = wave_index,
            bundles = bundles.len(),
            "dispatching wave"
        );

        let results =
            futures::future::join_all(bundles.iter().map(|b| self.dispatch_one(b))).await;

        let mut dispatch = WaveDispatch::default();
        for result in results {
            let (id, is_live) = result?;
            dispatch.all.push(id);
            if is_live {
                dispatch.live.push(id);
            }
        }
        Ok(dispatch)
    }

    async fn dispatch_one(&self, bundle: &Bundle) -> Result<(Uuid, bool)> {
        let template = Job::new(
            &bundle.fingerprint,
            &bundle.consumer,
            &bundle.repo_ref,
            bundle.wave_index,
            JobState::Queued,
            "job created",
        );

        let job = match self.store.create_dispatch_job(template).await? {
            DispatchDecision::Skipped(skip) => {
                tracing::info!(
                    consumer = %bundle.consumer,
                    fingerprint = %bundle.fingerprint,
                    "skipped duplicate dispatch"
                );
                metrics::counter!("propagate.jobs.skipped_duplicate", 1);
                return Ok((skip.id, false));
            }
            DispatchDecision::Created(job) => job,
        };

        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| EngineError::persistence("dispatch semaphore closed"))?;

        let request = SessionRequest {
            repo_ref: bundle.repo_ref.clone(),
            prompt: bundle.prompt.clone(),
            idempotency_key: bundle.fingerprint.clone(),
        };

        let outcome = self.agent.create_session(&request).await;
        drop(permit);

        match outcome {
            Ok(handle) => {
                let session_id = handle.session_id;
                self.store
                    .transition_with(
                        job.id,
                        JobState::Running,
                        format!("session {session_id} accepted"),
                        |j| j.session_id = Some(session_id.clone()),
                    )
                    .await?;
                metrics::counter!("propagate.jobs.dispatched", 1);
                tracing::info!(consumer = %bundle.consumer, job_id = %job.id, "job running");
                Ok((job.id, true))
            }
            Err(err) if matches!(err, EngineError::StateMachine { .. }) => Err(err),
            Err(err) => {
                // Session creation failed after retries; the job fails but
                // the wave carries on.
                tracing::error!(
                    consumer = %bundle.consumer,
                    job_id = %job.id,
                    error = %err,
                    "session creation failed"
                );
                self.store
                    .transition(job.id, JobState::Failed, format!("session creation failed: {err}"))
                    .await?;
                Ok((job.id, false))
            }
        }
    }
}
