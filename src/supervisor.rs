// propagate-rs/src/supervisor.rs
// Session supervision: drive every live job to a terminal state.
//
// A single loop fans due job ids across a fixed worker pool instead of
// pinning one task per session, bounding memory and socket use. Transient
// poll errors back off exponentially up to a cap; guardrails are evaluated
// on every poll once a PR is known; a session that outlives its wall-clock
// budget escalates with reason `timeout`. On cancellation, in-flight polls
// drain within a grace period and every still-live job is recorded as
// `needs_human(reason=interrupted)` before exit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use uuid::Uuid;

use crate::agent::{AgentApi, AgentSessionState};
use crate::error::{EngineError, Result};
use crate::guardrails::{CiGate, Guardrails};
use crate::job::{Job, JobState};
use crate::providers::{ChangedFilesApi, CiStatusApi, CiStatus};
use crate::store::DataStore;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub poll_interval: Duration,
    pub session_timeout: Duration,
    /// Size of the polling worker pool.
    pub pool_size: usize,
    /// How long to wait for in-flight polls when cancelled.
    pub shutdown_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            session_timeout: Duration::from_secs(90 * 60),
            pool_size: 4,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Per-job polling state, kept in memory for the duration of a run.
#[derive(Debug, Clone)]
struct PollState {
    next_poll_at: tokio::time::Instant,
    backoff: Duration,
    consecutive_unknown_ci: u32,
    file_list_attempts: u32,
}

pub struct Supervisor {
    store: Arc<DataStore>,
    agent: Arc<dyn AgentApi>,
    ci: Arc<dyn CiStatusApi>,
    git: Arc<dyn ChangedFilesApi>,
    guardrails: Guardrails,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        store: Arc<DataStore>,
        agent: Arc<dyn AgentApi>,
        ci: Arc<dyn CiStatusApi>,
        git: Arc<dyn ChangedFilesApi>,
        guardrails: Guardrails,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            store,
            agent,
            ci,
            git,
            guardrails,
            config,
        }
    }

    /// Poll the given jobs until every one is terminal, or until a shutdown
    /// signal arrives. Returns once the wave is complete.
    pub async fn supervise(
        &self,
        job_ids: &[Uuid],
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        if job_ids.is_empty() {
            return Ok(());
        }

        let states: Arc<Mutex<HashMap<Uuid, PollState>>> = Arc::new(Mutex::new(
            job_ids
                .iter()
                .map(|id| {
                    (
                        *id,
                        PollState {
                            next_poll_at: tokio::time::Instant::now() + self.config.poll_interval,
                            backoff: self.config.poll_interval,
                            consecutive_unknown_ci: 0,
                            file_list_attempts: 0,
                        },
                    )
                })
                .collect(),
        ));
        let in_flight: Arc<Mutex<HashSet<Uuid>>> = Arc::new(Mutex::new(HashSet::new()));

        let (tx, rx) = mpsc::channel::<Uuid>(job_ids.len().max(1));
        let rx = Arc::new(Mutex::new(rx));

        // Fixed worker pool consuming from the channel of due job ids.
        let mut workers = Vec::new();
        for _ in 0..self.config.pool_size.max(1) {
            let rx = Arc::clone(&rx);
            let states = Arc::clone(&states);
            let in_flight = Arc::clone(&in_flight);
            let worker = PollWorker {
                store: Arc::clone(&self.store),
                agent: Arc::clone(&self.agent),
                ci: Arc::clone(&self.ci),
                git: Arc::clone(&self.git),
                guardrails: self.guardrails.clone(),
                config: self.config.clone(),
            };
            workers.push(tokio::spawn(async move {
                loop {
                    let id = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let id = match id {
                        Some(id) => id,
                        None => return Ok::<(), EngineError>(()),
                    };
                    let result = worker.poll_once(id, &states).await;
                    in_flight.lock().await.remove(&id);
                    result?;
                }
            }));
        }

        let tick = self
            .config
            .poll_interval
            .min(Duration::from_millis(500))
            .max(Duration::from_millis(10));
        let mut interval = tokio::time::interval(tick);
        let mut interrupted = false;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::warn!("shutdown requested; draining outstanding polls");
                    interrupted = true;
                    break;
                }
                _ = interval.tick() => {
                    let mut any_live = false;
                    let now = tokio::time::Instant::now();
                    for id in job_ids {
                        let job = match self.store.get(*id).await {
                            Some(job) => job,
                            None => continue,
                        };
                        if job.state.is_terminal() {
                            continue;
                        }
                        any_live = true;

                        let due = {
                            let states = states.lock().await;
                            states
                                .get(id)
                                .map(|s| s.next_poll_at <= now)
                                .unwrap_or(false)
                        };
                        if !due {
                            continue;
                        }
                        let mut in_flight_guard = in_flight.lock().await;
                        if in_flight_guard.contains(id) {
                            continue;
                        }
                        in_flight_guard.insert(*id);
                        drop(in_flight_guard);
                        if tx.try_send(*id).is_err() {
                            // Queue full, or every worker exited; either way
                            // this id is not in flight.
                            in_flight.lock().await.remove(id);
                        }
                    }

                    if tx.is_closed() {
                        break;
                    }
                    if !any_live && in_flight.lock().await.is_empty() {
                        break;
                    }
                }
            }
        }

        drop(tx);

        if interrupted {
            // Give in-flight polls a bounded chance to finish cleanly.
            let drain = async {
                loop {
                    if in_flight.lock().await.is_empty() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            };
            let _ = tokio::time::timeout(self.config.shutdown_grace, drain).await;
        }

        for worker in workers {
            match worker.await {
                Ok(result) => result?,
                Err(err) => {
                    return Err(EngineError::persistence(format!("poll worker panicked: {err}")))
                }
            }
        }

        if interrupted {
            for id in job_ids {
                if let Some(job) = self.store.get(*id).await {
                    if !job.state.is_terminal() {
                        self.store
                            .transition(
                                *id,
                                JobState::NeedsHuman,
                                "interrupted: process cancelled before a terminal result",
                            )
                            .await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// One supervision pass over every live job, without waiting for
    /// terminality. This backs the `check-status` entry point.
    pub async fn poll_pass(&self) -> Result<usize> {
        let live = self.store.non_terminal_jobs().await;
        let states: Arc<Mutex<HashMap<Uuid, PollState>>> = Arc::new(Mutex::new(
            live.iter()
                .map(|job| {
                    (
                        job.id,
                        PollState {
                            next_poll_at: tokio::time::Instant::now(),
                            backoff: self.config.poll_interval,
                            consecutive_unknown_ci: 0,
                            file_list_attempts: 0,
                        },
                    )
                })
                .collect(),
        ));

        let worker = PollWorker {
            store: Arc::clone(&self.store),
            agent: Arc::clone(&self.agent),
            ci: Arc::clone(&self.ci),
            git: Arc::clone(&self.git),
            guardrails: self.guardrails.clone(),
            config: self.config.clone(),
        };

        let mut polled = 0;
        for job in live {
            if job.session_id.is_some() {
                worker.poll_once(job.id, &states).await?;
                polled += 1;
            }
        }
        Ok(polled)
    }
}

/// The per-poll logic, shared by the pool workers and the one-shot pass.
struct PollWorker {
    store: Arc<DataStore>,
    agent: Arc<dyn AgentApi>,
    ci: Arc<dyn CiStatusApi>,
    git: Arc<dyn ChangedFilesApi>,
    guardrails: Guardrails,
    config: SupervisorConfig,
}

impl PollWorker {
    async fn poll_once(
        &self,
        job_id: Uuid,
        states: &Arc<Mutex<HashMap<Uuid, PollState>>>,
    ) -> Result<()> {
        let job = match self.store.get(job_id).await {
            Some(job) => job,
            None => return Ok(()),
        };
        if job.state.is_terminal() {
            return Ok(());
        }

        // Wall-clock budget check comes first: a stuck session must not be
        // polled forever.
        let budget = chrono::Duration::from_std(self.config.session_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(90));
        if chrono::Utc::now() - job.created_at >= budget {
            self.store
                .transition(
                    job_id,
                    JobState::NeedsHuman,
                    "timeout: session exceeded its wall-clock budget",
                )
                .await?;
            return Ok(());
        }

        let session_id = match &job.session_id {
            Some(id) => id.clone(),
            None => return Ok(()),
        };

        let status = match self.agent.poll_session(&session_id).await {
            Ok(status) => status,
            Err(err) if err.is_retryable() => {
                self.store.record_poll_attempt(job_id).await?;
                let mut states = states.lock().await;
                if let Some(state) = states.get_mut(&job_id) {
                    state.backoff = (state.backoff * 2).min(self.config.poll_interval * 8);
                    state.next_poll_at = tokio::time::Instant::now() + state.backoff;
                }
                tracing::warn!(job_id = %job_id, error = %err, "transient poll error; backing off");
                return Ok(());
            }
            Err(err @ EngineError::StateMachine { .. }) => return Err(err),
            Err(err) => {
                self.store
                    .transition(job_id, JobState::Failed, format!("agent poll failed: {err}"))
                    .await?;
                return Ok(());
            }
        };

        self.store.record_poll_attempt(job_id).await?;
        {
            let mut states = states.lock().await;
            if let Some(state) = states.get_mut(&job_id) {
                state.backoff = self.config.poll_interval;
                state.next_poll_at = tokio::time::Instant::now() + self.config.poll_interval;
            }
        }

        let mut job = job;

        // PR observed: running -> pr_opened.
        if let Some(pr_url) = &status.pr_url {
            if job.state == JobState::Running {
                let pr_url = pr_url.clone();
                job = self
                    .store
                    .transition_with(
                        job_id,
                        JobState::PrOpened,
                        format!("PR opened: {pr_url}"),
                        |j| j.pr_url = Some(pr_url.clone()),
                    )
                    .await?;
            }
        }

        if job.state == JobState::PrOpened {
            return self.check_guardrails(&job, states).await;
        }

        // No PR yet: interpret the agent-side session state.
        match status.state {
            AgentSessionState::Working => Ok(()),
            AgentSessionState::Blocked => {
                self.store
                    .transition(
                        job_id,
                        JobState::NeedsHuman,
                        format!("agent session blocked: {}", status.detail),
                    )
                    .await?;
                Ok(())
            }
            AgentSessionState::Failed => {
                self.store
                    .transition(
                        job_id,
                        JobState::Failed,
                        format!("agent reported unrecoverable error: {}", status.detail),
                    )
                    .await?;
                Ok(())
            }
            AgentSessionState::Stopped => {
                self.store
                    .transition(
                        job_id,
                        JobState::Failed,
                        "session stopped without opening a PR",
                    )
                    .await?;
                Ok(())
            }
        }
    }

    /// Fail-closed checks, evaluated on every poll once the PR is known.
    async fn check_guardrails(
        &self,
        job: &Job,
        states: &Arc<Mutex<HashMap<Uuid, PollState>>>,
    ) -> Result<()> {
        let pr_url = match &job.pr_url {
            Some(url) => url.clone(),
            None => return Ok(()),
        };

        // Protected-path check first: a PR that touches protected files
        // escalates even if CI is green.
        match self.git.changed_files(&pr_url).await {
            Ok(files) => {
                let violations = self.guardrails.protected_violations(&files);
                if !violations.is_empty() {
                    self.store
                        .transition(
                            job.id,
                            JobState::NeedsHuman,
                            format!(
                                "guardrail protected-path: PR touches {}",
                                violations.join(", ")
                            ),
                        )
                        .await?;
                    return Ok(());
                }
                let mut states = states.lock().await;
                if let Some(state) = states.get_mut(&job.id) {
                    state.file_list_attempts = 0;
                }
            }
            Err(err @ EngineError::StateMachine { .. }) => return Err(err),
            Err(err) => {
                let attempts = {
                    let mut states = states.lock().await;
                    let state = states.get_mut(&job.id);
                    match state {
                        Some(state) => {
                            state.file_list_attempts += 1;
                            state.file_list_attempts
                        }
                        None => 1,
                    }
                };
                if attempts >= self.guardrails.max_file_list_attempts {
                    self.store
                        .transition(
                            job.id,
                            JobState::NeedsHuman,
                            format!(
                                "guardrail protected-path: changed-file list unavailable after {attempts} attempts ({err})"
                            ),
                        )
                        .await?;
                } else {
                    tracing::warn!(job_id = %job.id, error = %err, "changed-file lookup failed; will retry");
                }
                return Ok(());
            }
        }

        // CI gate. Unknown statuses count consecutively; any definite
        // status resets the counter.
        let ci_status = match self.ci.status(&pr_url).await {
            Ok(check) => check.status,
            Err(err) if err.is_retryable() => {
                tracing::warn!(job_id = %job.id, error = %err, "transient CI lookup error");
                return Ok(());
            }
            Err(err @ EngineError::StateMachine { .. }) => return Err(err),
            Err(err) => {
                tracing::warn!(job_id = %job.id, error = %err, "CI lookup failed; counting as unknown");
                CiStatus::Unknown
            }
        };

        let consecutive_unknowns = {
            let mut states = states.lock().await;
            let state = states.get_mut(&job.id);
            match state {
                Some(state) => {
                    if ci_status == CiStatus::Unknown {
                        state.consecutive_unknown_ci += 1;
                    } else {
                        state.consecutive_unknown_ci = 0;
                    }
                    state.consecutive_unknown_ci
                }
                None => u32::from(ci_status == CiStatus::Unknown),
            }
        };

        match self.guardrails.ci_gate(ci_status, consecutive_unknowns) {
            CiGate::Green => {
                self.store
                    .transition_with(
                        job.id,
                        JobState::Green,
                        format!("CI success on {pr_url}"),
                        |j| j.ci_status = Some(CiStatus::Success),
                    )
                    .await?;
            }
            CiGate::Escalate(rule) => {
                self.store
                    .transition_with(
                        job.id,
                        JobState::NeedsHuman,
                        format!("guardrail ci-gate ({rule}) on {pr_url}"),
                        |j| j.ci_status = Some(ci_status),
                    )
                    .await?;
            }
            CiGate::Pending => {}
        }
        Ok(())
    }
}
