// End-to-end pipeline runs against scripted agent/CI/git providers and a
// temp-dir store: baseline bootstrap, wave ordering, idempotent re-runs,
// dry-run parity, guardrail trips, and exit-code mapping.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use propagate_rs::job::{validate_transition, JobState};
use propagate_rs::pipeline::{self, RunOutcome};
use propagate_rs::providers::CiStatus;
use propagate_rs::store::DataStore;

fn breaking_telemetry() -> Vec<String> {
    vec![
        telemetry_line("billing-service", "post", "/api/v1/sessions", 42),
        telemetry_line("invoice-service", "post", "/api/v1/sessions", 7),
    ]
}

#[tokio::test(start_paused = true)]
async fn baseline_then_green_in_dependency_order() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path(), CONTRACT_V1, SERVICE_MAP, &breaking_telemetry()).await;

    let agent = Arc::new(MockAgent::new(&[
        ("org/billing-service", AgentScript::OpensPr),
        ("org/invoice-service", AgentScript::OpensPr),
    ]));
    let ci = Arc::new(MockCi::always(CiStatus::Success));
    let git = Arc::new(MockGit::with_files(&["src/api_client.py"]));

    let ctx = context(
        settings_for(dir.path()),
        Some(agent.clone()),
        Some(ci),
        Some(git),
    )
    .await;

    // First run stores the baseline and dispatches nothing.
    let summary = pipeline::run(&ctx, false).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::BaselineStored);
    assert_eq!(agent.created.load(Ordering::SeqCst), 0);

    // The contract gains a required field without a default.
    tokio::fs::write(dir.path().join("openapi.yaml"), CONTRACT_V2_BREAKING)
        .await
        .unwrap();

    let summary = pipeline::run(&ctx, false).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Dispatched);
    assert_eq!(summary.green, 2);
    assert_eq!(summary.needs_human, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.exit_code(), 0);

    // invoice-service declares billing-service, so billing dispatches first
    // and invoice only after billing's wave completed.
    let order = agent.creation_order.lock().unwrap().clone();
    assert_eq!(order, vec!["org/billing-service".to_string(), "org/invoice-service".to_string()]);

    // Idempotency keys are the bundle fingerprints.
    let keys = agent.idempotency_keys.lock().unwrap().clone();
    let fingerprints: Vec<String> = summary.bundles.iter().map(|b| b.fingerprint.clone()).collect();
    for key in &keys {
        assert!(fingerprints.contains(key));
    }

    // Every job's audit trail is a valid state-machine path ending terminal.
    for job in ctx.store.all_jobs().await {
        assert_eq!(job.state, JobState::Green);
        let entries = ctx.store.audit().entries_for_job(job.id).await.unwrap();
        assert_eq!(entries[0].from_state, None);
        for window in entries.windows(2) {
            assert!(window[0].timestamp <= window[1].timestamp);
            assert_eq!(window[1].from_state, Some(window[0].to_state));
            validate_transition(window[0].to_state, window[1].to_state).unwrap();
        }
        assert!(entries.last().unwrap().to_state.is_terminal());
    }

    // All green, so the snapshot advanced: the same contract is a no-op.
    let summary = pipeline::run(&ctx, false).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::NoChange);
    assert_eq!(agent.created.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn additive_change_dispatches_nothing_and_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path(), CONTRACT_V1, SERVICE_MAP, &breaking_telemetry()).await;

    let agent = Arc::new(MockAgent::new(&[]));
    let ctx = context(
        settings_for(dir.path()),
        Some(agent.clone()),
        Some(Arc::new(MockCi::always(CiStatus::Success))),
        Some(Arc::new(MockGit::with_files(&["src/api_client.py"]))),
    )
    .await;

    pipeline::run(&ctx, false).await.unwrap();
    tokio::fs::write(dir.path().join("openapi.yaml"), CONTRACT_V2_ADDITIVE)
        .await
        .unwrap();

    let summary = pipeline::run(&ctx, false).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::NoImpact);
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(agent.created.load(Ordering::SeqCst), 0);
    assert!(ctx.store.all_jobs().await.is_empty());

    // Additive-only still advances the snapshot.
    let summary = pipeline::run(&ctx, false).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::NoChange);
}

#[tokio::test(start_paused = true)]
async fn dry_run_derives_the_same_fingerprints_as_a_real_run() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path(), CONTRACT_V1, SERVICE_MAP, &breaking_telemetry()).await;

    // Baseline through a throwaway live context.
    let setup_ctx = context(
        settings_for(dir.path()),
        Some(Arc::new(MockAgent::new(&[]))),
        Some(Arc::new(MockCi::always(CiStatus::Success))),
        Some(Arc::new(MockGit::with_files(&["src/api_client.py"]))),
    )
    .await;
    pipeline::run(&setup_ctx, false).await.unwrap();
    tokio::fs::write(dir.path().join("openapi.yaml"), CONTRACT_V2_BREAKING)
        .await
        .unwrap();

    // Dry run: no credentials, no dispatch, no snapshot advancement.
    let dry_ctx = context(settings_for(dir.path()), None, None, None).await;
    let dry = pipeline::run(&dry_ctx, true).await.unwrap();
    assert_eq!(dry.outcome, RunOutcome::DryRun);
    assert_eq!(dry.bundles.len(), 2);
    assert!(dry_ctx.store.all_jobs().await.is_empty());

    // A second dry run derives identical fingerprints.
    let dry_again = pipeline::run(&dry_ctx, true).await.unwrap();
    let mut a: Vec<_> = dry.bundles.iter().map(|b| b.fingerprint.clone()).collect();
    let mut b: Vec<_> = dry_again.bundles.iter().map(|b| b.fingerprint.clone()).collect();
    a.sort();
    b.sort();
    assert_eq!(a, b);

    // The real run produces jobs keyed by the same fingerprints.
    let agent = Arc::new(MockAgent::new(&[
        ("org/billing-service", AgentScript::OpensPr),
        ("org/invoice-service", AgentScript::OpensPr),
    ]));
    let live_ctx = context(
        settings_for(dir.path()),
        Some(agent),
        Some(Arc::new(MockCi::always(CiStatus::Success))),
        Some(Arc::new(MockGit::with_files(&["src/api_client.py"]))),
    )
    .await;
    let real = pipeline::run(&live_ctx, false).await.unwrap();
    assert_eq!(real.outcome, RunOutcome::Dispatched);

    let mut real_fps: Vec<_> = live_ctx
        .store
        .all_jobs()
        .await
        .iter()
        .map(|j| j.bundle_fingerprint.clone())
        .collect();
    real_fps.sort();
    assert_eq!(a, real_fps);
}

#[tokio::test(start_paused = true)]
async fn protected_path_trips_even_when_ci_is_green() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(
        dir.path(),
        CONTRACT_V1,
        SERVICE_MAP_BILLING_ONLY,
        &[telemetry_line("billing-service", "post", "/api/v1/sessions", 42)],
    )
    .await;

    let agent = Arc::new(MockAgent::new(&[("org/billing-service", AgentScript::OpensPr)]));
    let ci = Arc::new(MockCi::always(CiStatus::Success));
    let git = Arc::new(MockGit::with_files(&["infra/terraform/main.tf"]));

    let ctx = context(settings_for(dir.path()), Some(agent.clone()), Some(ci.clone()), Some(git)).await;
    pipeline::run(&ctx, false).await.unwrap();
    tokio::fs::write(dir.path().join("openapi.yaml"), CONTRACT_V2_BREAKING)
        .await
        .unwrap();

    let summary = pipeline::run(&ctx, false).await.unwrap();
    assert_eq!(summary.needs_human, 1);
    assert_eq!(summary.green, 0);
    assert_eq!(summary.exit_code(), 2);

    let jobs = ctx.store.all_jobs().await;
    let job = jobs
        .iter()
        .find(|j| j.consumer == "billing-service")
        .unwrap();
    assert_eq!(job.state, JobState::NeedsHuman);
    assert!(job.last_detail.contains("protected-path"));
    assert!(job.last_detail.contains("infra/terraform/main.tf"));

    // The trip happened on the first poll after the PR appeared, and the
    // job was never polled again. CI was never consulted.
    assert_eq!(agent.polls_for_repo("org/billing-service"), 1);
    assert_eq!(ci.calls.load(Ordering::SeqCst), 0);

    // Escalations hold the snapshot back: the delta re-triggers next run.
    let summary = pipeline::run(&ctx, false).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Dispatched);
}

#[tokio::test(start_paused = true)]
async fn ci_failure_escalates_to_needs_human() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(
        dir.path(),
        CONTRACT_V1,
        SERVICE_MAP_BILLING_ONLY,
        &[telemetry_line("billing-service", "post", "/api/v1/sessions", 42)],
    )
    .await;

    let agent = Arc::new(MockAgent::new(&[("org/billing-service", AgentScript::OpensPr)]));
    let ctx = context(
        settings_for(dir.path()),
        Some(agent),
        Some(Arc::new(MockCi::always(CiStatus::Failure))),
        Some(Arc::new(MockGit::with_files(&["src/api_client.py"]))),
    )
    .await;
    pipeline::run(&ctx, false).await.unwrap();
    tokio::fs::write(dir.path().join("openapi.yaml"), CONTRACT_V2_BREAKING)
        .await
        .unwrap();

    let summary = pipeline::run(&ctx, false).await.unwrap();
    assert_eq!(summary.needs_human, 1);
    assert_eq!(summary.exit_code(), 2);

    let jobs = ctx.store.all_jobs().await;
    assert!(jobs[0].last_detail.contains("ci-gate"));
}

#[tokio::test(start_paused = true)]
async fn blocked_agent_escalates_while_the_wave_completes() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path(), CONTRACT_V1, SERVICE_MAP, &breaking_telemetry()).await;

    let agent = Arc::new(MockAgent::new(&[
        ("org/billing-service", AgentScript::Blocked),
        ("org/invoice-service", AgentScript::OpensPr),
    ]));
    let ctx = context(
        settings_for(dir.path()),
        Some(agent),
        Some(Arc::new(MockCi::always(CiStatus::Success))),
        Some(Arc::new(MockGit::with_files(&["src/api_client.py"]))),
    )
    .await;
    pipeline::run(&ctx, false).await.unwrap();
    tokio::fs::write(dir.path().join("openapi.yaml"), CONTRACT_V2_BREAKING)
        .await
        .unwrap();

    // billing escalates in wave 0; the wave still completes and invoice
    // proceeds in wave 1.
    let summary = pipeline::run(&ctx, false).await.unwrap();
    assert_eq!(summary.green, 1);
    assert_eq!(summary.needs_human, 1);
    assert_eq!(summary.exit_code(), 2);
}

#[tokio::test(start_paused = true)]
async fn stopped_session_without_pr_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(
        dir.path(),
        CONTRACT_V1,
        SERVICE_MAP_BILLING_ONLY,
        &[telemetry_line("billing-service", "post", "/api/v1/sessions", 42)],
    )
    .await;

    let agent = Arc::new(MockAgent::new(&[("org/billing-service", AgentScript::StopsWithoutPr)]));
    let ctx = context(
        settings_for(dir.path()),
        Some(agent),
        Some(Arc::new(MockCi::always(CiStatus::Success))),
        Some(Arc::new(MockGit::with_files(&["src/api_client.py"]))),
    )
    .await;
    pipeline::run(&ctx, false).await.unwrap();
    tokio::fs::write(dir.path().join("openapi.yaml"), CONTRACT_V2_BREAKING)
        .await
        .unwrap();

    let summary = pipeline::run(&ctx, false).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.exit_code(), 3);
}

#[tokio::test(start_paused = true)]
async fn duplicate_bundle_is_skipped_while_prior_job_is_live() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(
        dir.path(),
        CONTRACT_V1,
        SERVICE_MAP_BILLING_ONLY,
        &[telemetry_line("billing-service", "post", "/api/v1/sessions", 42)],
    )
    .await;

    // Derive the fingerprint from a dry run over the same inputs.
    let setup_ctx = context(
        settings_for(dir.path()),
        Some(Arc::new(MockAgent::new(&[]))),
        Some(Arc::new(MockCi::always(CiStatus::Success))),
        Some(Arc::new(MockGit::with_files(&["src/api_client.py"]))),
    )
    .await;
    pipeline::run(&setup_ctx, false).await.unwrap();
    tokio::fs::write(dir.path().join("openapi.yaml"), CONTRACT_V2_BREAKING)
        .await
        .unwrap();
    let dry = pipeline::run(&setup_ctx, true).await.unwrap();
    let fingerprint = dry.bundles[0].fingerprint.clone();

    // Another process already holds a non-terminal job for this bundle.
    let store = Arc::new(DataStore::open(dir.path().join("data")).await.unwrap());
    let existing = propagate_rs::job::Job::new(
        &fingerprint,
        "billing-service",
        "org/billing-service",
        0,
        JobState::Queued,
        "job created",
    );
    store.create_dispatch_job(existing).await.unwrap();

    let agent = Arc::new(MockAgent::new(&[("org/billing-service", AgentScript::OpensPr)]));
    let ctx = context(
        settings_for(dir.path()),
        Some(agent.clone()),
        Some(Arc::new(MockCi::always(CiStatus::Success))),
        Some(Arc::new(MockGit::with_files(&["src/api_client.py"]))),
    )
    .await;

    let summary = pipeline::run(&ctx, false).await.unwrap();
    assert_eq!(summary.skipped_duplicate, 1);
    // No new session was created for the duplicate.
    assert_eq!(agent.created.load(Ordering::SeqCst), 0);

    let jobs = ctx.store.all_jobs().await;
    let skipped = jobs
        .iter()
        .find(|j| j.state == JobState::SkippedDuplicate)
        .expect("skipped_duplicate job recorded");
    let entries = ctx.store.audit().entries_for_job(skipped.id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].to_state, JobState::SkippedDuplicate);
}

#[tokio::test(start_paused = true)]
async fn mutually_dependent_consumers_share_a_wave_without_deadlock() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(
        dir.path(),
        CONTRACT_V1,
        SERVICE_MAP_CYCLE,
        &[
            telemetry_line("alpha-service", "post", "/api/v1/sessions", 10),
            telemetry_line("beta-service", "post", "/api/v1/sessions", 20),
        ],
    )
    .await;

    let agent = Arc::new(MockAgent::new(&[
        ("org/alpha-service", AgentScript::OpensPr),
        ("org/beta-service", AgentScript::OpensPr),
    ]));
    let ctx = context(
        settings_for(dir.path()),
        Some(agent),
        Some(Arc::new(MockCi::always(CiStatus::Success))),
        Some(Arc::new(MockGit::with_files(&["src/client.py"]))),
    )
    .await;
    pipeline::run(&ctx, false).await.unwrap();
    tokio::fs::write(dir.path().join("openapi.yaml"), CONTRACT_V2_BREAKING)
        .await
        .unwrap();

    let summary = pipeline::run(&ctx, false).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Dispatched);
    assert_eq!(summary.green, 2);
    // Both consumers landed in wave 0 despite the declared cycle.
    assert!(summary.bundles.iter().all(|b| b.wave_index == 0));
}
