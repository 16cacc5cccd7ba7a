// propagate-rs/src/pipeline.rs
// End-to-end propagation runs: diff -> classify -> impact -> bundle ->
// waves -> dispatch -> supervise, plus the one-shot check-status pass.
//
// All collaborators arrive through the context, so dry runs and tests swap
// in mocks without touching global state. Dry-run performs everything up to
// but not including dispatch; it derives the same impact set and the same
// bundle fingerprints as a real run over the same inputs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::agent::AgentApi;
use crate::bundle::{build_bundles, Bundle};
use crate::classifier::classify_all;
use crate::config::Settings;
use crate::contract::{content_hash, ContractDocument, ContractVersion};
use crate::differ::diff_contracts;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Result};
use crate::guardrails::Guardrails;
use crate::impact::map_impacts;
use crate::job::JobState;
use crate::notify::Notifier;
use crate::providers::{ChangedFilesApi, CiStatusApi};
use crate::service_map::ServiceMap;
use crate::store::DataStore;
use crate::supervisor::{Supervisor, SupervisorConfig};
use crate::sync::sync_sessions;
use crate::telemetry::TelemetryStore;
use crate::waves::{assign_wave_indices, plan_waves};

/// Everything a pipeline stage needs, injected rather than global.
pub struct PipelineContext {
    pub settings: Settings,
    pub store: Arc<DataStore>,
    /// Absent in dry-run mode, where no session is ever created.
    pub agent: Option<Arc<dyn AgentApi>>,
    pub ci: Option<Arc<dyn CiStatusApi>>,
    pub git: Option<Arc<dyn ChangedFilesApi>>,
    pub notifier: Notifier,
    /// Process-level cancellation; subscribers drain before exit.
    pub shutdown: broadcast::Sender<()>,
}

impl PipelineContext {
    pub fn guardrails(&self) -> Guardrails {
        Guardrails::new(self.settings.protected_path_globs.clone())
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            poll_interval: Duration::from_secs(self.settings.poll_interval_seconds),
            session_timeout: Duration::from_secs(self.settings.session_timeout_minutes * 60),
            pool_size: self.settings.max_concurrent_sessions,
            ..SupervisorConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// First run: the contract was stored as baseline, nothing to diff.
    BaselineStored,
    /// Contract hash unchanged, or no semantic diffs.
    NoChange,
    /// Diffs exist but no consumer is impacted.
    NoImpact,
    /// Dry run: impact and fingerprints derived, nothing dispatched.
    DryRun,
    /// Waves were dispatched and supervised to terminal states.
    Dispatched,
}

#[derive(Debug, Clone)]
pub struct BundleSummary {
    pub consumer: String,
    pub fingerprint: String,
    pub wave_index: usize,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub bundles: Vec<BundleSummary>,
    pub green: usize,
    pub needs_human: usize,
    pub failed: usize,
    pub skipped_duplicate: usize,
}

impl RunSummary {
    fn with_outcome(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            bundles: Vec::new(),
            green: 0,
            needs_human: 0,
            failed: 0,
            skipped_duplicate: 0,
        }
    }

    /// 0: all terminal and non-escalated. 2: some escalated. 3: some failed.
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            3
        } else if self.needs_human > 0 {
            2
        } else {
            0
        }
    }
}

/// Run the full propagation pipeline once.
pub async fn run(ctx: &PipelineContext, dry_run: bool) -> Result<RunSummary> {
    let settings = &ctx.settings;
    let producer = settings.producer_service.clone();

    // Load and parse the current contract before touching any state.
    let raw = tokio::fs::read_to_string(&settings.contract_path)
        .await
        .map_err(|e| {
            EngineError::input(format!(
                "cannot read contract {}: {e}",
                settings.contract_path.display()
            ))
        })?;
    let next_doc = ContractDocument::parse(&raw)?;
    let new_hash = content_hash(&raw);
    let new_version = &new_hash[..16];

    let previous = ctx.store.latest_snapshot(&producer).await?;

    let previous = match previous {
        None => {
            tracing::info!(producer = %producer, version = %new_version, "no prior snapshot; storing baseline");
            ctx.store
                .insert_snapshot(&ContractVersion::capture(producer.as_str(), raw.as_str()))
                .await?;
            return Ok(RunSummary::with_outcome(RunOutcome::BaselineStored));
        }
        Some(previous) if previous.hash == new_hash => {
            tracing::info!(producer = %producer, "contract unchanged; nothing to propagate");
            return Ok(RunSummary::with_outcome(RunOutcome::NoChange));
        }
        Some(previous) => previous,
    };

    let prev_doc = previous.document()?;

    // Step 1 + 2: diff and classify.
    let entries = diff_contracts(&prev_doc, &next_doc);
    if entries.is_empty() {
        tracing::info!("no semantic diffs; advancing snapshot");
        ctx.store
            .insert_snapshot(&ContractVersion::capture(producer.as_str(), raw.as_str()))
            .await?;
        return Ok(RunSummary::with_outcome(RunOutcome::NoChange));
    }

    let change_set = classify_all(&producer, &previous.version_id, new_version, entries);
    tracing::info!(
        changes = change_set.changes.len(),
        severity = %change_set.severity,
        breaking = change_set.is_breaking,
        routes = ?change_set.touched_routes(),
        "classified contract change"
    );
    let stored_change = ctx.store.insert_change(&change_set).await?;

    // Step 3: impact mapping over declared edges and telemetry.
    let service_map = ServiceMap::load(&settings.service_map_path).await?;
    let telemetry = TelemetryStore::load(&settings.telemetry_path).await?;
    let samples = telemetry.samples_for(&producer, settings.telemetry_window_days, Utc::now());
    let impacts = map_impacts(&change_set, &service_map, &samples);
    ctx.store.insert_impacts(stored_change.id, &impacts).await?;

    for impact in &impacts {
        tracing::info!(
            consumer = %impact.consumer,
            calls_7d = impact.total_calls_7d,
            confidence = %impact.confidence,
            breaking = impact.is_breaking(),
            "impacted consumer"
        );
    }

    // Step 4: bundles and waves.
    let mut bundles = build_bundles(&change_set, &impacts, &service_map, new_version);
    if bundles.is_empty() {
        tracing::info!("no remediation bundles required; advancing snapshot");
        ctx.store
            .insert_snapshot(&ContractVersion::capture(producer.as_str(), raw.as_str()))
            .await?;
        return Ok(RunSummary::with_outcome(RunOutcome::NoImpact));
    }

    let impacted: Vec<String> = bundles.iter().map(|b| b.consumer.clone()).collect();
    let plan = plan_waves(&impacted, &service_map);
    assign_wave_indices(&mut bundles, &plan);

    let bundle_summaries: Vec<BundleSummary> = bundles
        .iter()
        .map(|b| BundleSummary {
            consumer: b.consumer.clone(),
            fingerprint: b.fingerprint.clone(),
            wave_index: b.wave_index,
        })
        .collect();

    for summary in &bundle_summaries {
        tracing::info!(
            consumer = %summary.consumer,
            fingerprint = %summary.fingerprint,
            wave = summary.wave_index,
            "remediation bundle ready"
        );
    }

    if dry_run {
        tracing::info!(
            bundles = bundles.len(),
            waves = plan.waves.len(),
            "dry run complete; nothing dispatched and snapshot not advanced"
        );
        let mut summary = RunSummary::with_outcome(RunOutcome::DryRun);
        summary.bundles = bundle_summaries;
        return Ok(summary);
    }

    // Step 5: dispatch waves in order, supervising each to terminal.
    let agent = ctx
        .agent
        .clone()
        .ok_or_else(|| EngineError::config("agent client required for a live run"))?;
    let ci = ctx
        .ci
        .clone()
        .ok_or_else(|| EngineError::config("CI status client required for a live run"))?;
    let git = ctx
        .git
        .clone()
        .ok_or_else(|| EngineError::config("git provider client required for a live run"))?;

    let dispatcher = Dispatcher::new(
        Arc::clone(&ctx.store),
        Arc::clone(&agent),
        settings.max_concurrent_sessions,
    );
    let supervisor = Supervisor::new(
        Arc::clone(&ctx.store),
        Arc::clone(&agent),
        ci,
        git,
        ctx.guardrails(),
        ctx.supervisor_config(),
    );

    let mut by_wave: BTreeMap<usize, Vec<Bundle>> = BTreeMap::new();
    for bundle in bundles {
        by_wave.entry(bundle.wave_index).or_default().push(bundle);
    }

    let mut all_job_ids = Vec::new();
    let mut prior_wave_context: Option<String> = None;

    for (wave_index, wave_bundles) in &by_wave {
        let dispatch = dispatcher.dispatch_wave(*wave_index, wave_bundles).await?;
        all_job_ids.extend(dispatch.all.clone());

        // Downstream agents learn that upstream contracts are now stable.
        if let Some(message) = &prior_wave_context {
            send_wave_context(ctx, &agent, &dispatch.live, message).await;
        }

        supervisor
            .supervise(&dispatch.live, ctx.shutdown.subscribe())
            .await?;

        prior_wave_context = wave_context_message(ctx, *wave_index, &dispatch.all).await?;
    }

    // Step 6: terminal accounting and snapshot advancement.
    let mut summary = RunSummary::with_outcome(RunOutcome::Dispatched);
    summary.bundles = bundle_summaries;
    for id in &all_job_ids {
        if let Some(job) = ctx.store.get(*id).await {
            match job.state {
                JobState::Green => summary.green += 1,
                JobState::NeedsHuman => summary.needs_human += 1,
                JobState::Failed => summary.failed += 1,
                JobState::SkippedDuplicate => summary.skipped_duplicate += 1,
                other => {
                    return Err(EngineError::persistence(format!(
                        "job {id} finished supervision in non-terminal state {other}"
                    )))
                }
            }
        }
    }

    if summary.needs_human > 0 || summary.failed > 0 {
        tracing::warn!(
            needs_human = summary.needs_human,
            failed = summary.failed,
            "unresolved jobs; snapshot NOT advanced so this delta re-triggers on the next run"
        );
    } else {
        ctx.store
            .insert_snapshot(&ContractVersion::capture(producer.as_str(), raw.as_str()))
            .await?;
        tracing::info!(version = %new_version, "snapshot advanced");
    }

    ctx.notifier
        .emit(
            "/propagation/complete",
            &serde_json::json!({
                "producer": producer,
                "to_version": new_version,
                "green": summary.green,
                "needs_human": summary.needs_human,
                "failed": summary.failed,
                "skipped_duplicate": summary.skipped_duplicate,
            }),
        )
        .await;

    Ok(summary)
}

async fn send_wave_context(
    ctx: &PipelineContext,
    agent: &Arc<dyn AgentApi>,
    live_job_ids: &[uuid::Uuid],
    message: &str,
) {
    for id in live_job_ids {
        let session_id = match ctx.store.get(*id).await.and_then(|j| j.session_id) {
            Some(session_id) => session_id,
            None => continue,
        };
        if let Err(err) = agent.send_message(&session_id, message).await {
            tracing::warn!(session_id = %session_id, error = %err, "wave context message failed (non-fatal)");
        }
    }
}

async fn wave_context_message(
    ctx: &PipelineContext,
    wave_index: usize,
    job_ids: &[uuid::Uuid],
) -> Result<Option<String>> {
    if job_ids.is_empty() {
        return Ok(None);
    }
    let mut parts = Vec::new();
    for id in job_ids {
        if let Some(job) = ctx.store.get(*id).await {
            let pr = job
                .pr_url
                .as_deref()
                .map(|url| format!(" ({url})"))
                .unwrap_or_default();
            parts.push(format!("{}: {}{pr}", job.repo_ref, job.state));
        }
    }
    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(format!(
        "Wave {wave_index} complete. Upstream remediation status: {}. \
         Upstream contracts are now stable where CI is green.",
        parts.join("; ")
    )))
}

/// One supervision pass over live jobs without dispatching anything new.
pub async fn check_status(ctx: &PipelineContext) -> Result<RunSummary> {
    let agent = ctx
        .agent
        .clone()
        .ok_or_else(|| EngineError::config("agent client required for check-status"))?;
    let ci = ctx
        .ci
        .clone()
        .ok_or_else(|| EngineError::config("CI status client required for check-status"))?;
    let git = ctx
        .git
        .clone()
        .ok_or_else(|| EngineError::config("git provider client required for check-status"))?;

    if ctx.settings.sync_enabled {
        sync_sessions(&ctx.store, &agent).await?;
    }

    let supervisor = Supervisor::new(
        Arc::clone(&ctx.store),
        agent,
        ci,
        git,
        ctx.guardrails(),
        ctx.supervisor_config(),
    );
    let polled = supervisor.poll_pass().await?;
    tracing::info!(polled = polled, "status check complete");

    let mut summary = RunSummary::with_outcome(RunOutcome::Dispatched);
    for job in ctx.store.all_jobs().await {
        match job.state {
            JobState::Green => summary.green += 1,
            JobState::NeedsHuman => summary.needs_human += 1,
            JobState::Failed => summary.failed += 1,
            JobState::SkippedDuplicate => summary.skipped_duplicate += 1,
            _ => {}
        }
    }
    Ok(summary)
}
