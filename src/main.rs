// propagate-rs/src/main.rs
// CLI entry points: `propagate run [--dry-run]` and `propagate check-status`.
//
// Exit codes: 0 all terminal and non-escalated; 2 some jobs escalated to
// needs_human; 3 one or more jobs failed; 10 configuration error.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use propagate_rs::agent::{AgentApi, HttpAgentClient};
use propagate_rs::error::EngineError;
use propagate_rs::notify::Notifier;
use propagate_rs::pipeline::{self, PipelineContext, RunOutcome};
use propagate_rs::providers::{ChangedFilesApi, CiStatusApi, GitHubProvider};
use propagate_rs::store::DataStore;
use propagate_rs::Settings;

const EXIT_CONFIG_ERROR: u8 = 10;

#[derive(Parser)]
#[command(name = "propagate", about = "Contract change propagation engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline: diff, classify, map impact, dispatch, supervise.
    Run {
        /// Perform everything up to but not including dispatch.
        #[arg(long)]
        dry_run: bool,
    },
    /// Drive one supervisor pass over live jobs without new dispatch.
    CheckStatus,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(error = %err, "configuration error");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match execute(settings, cli.command).await {
        Ok(code) => code,
        Err(err @ EngineError::Config(_)) => {
            tracing::error!(error = %err, "configuration error");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
        Err(err) => {
            tracing::error!(error = %err, "pipeline aborted");
            ExitCode::FAILURE
        }
    }
}

async fn execute(settings: Settings, command: Command) -> propagate_rs::Result<ExitCode> {
    let dry_run = matches!(&command, Command::Run { dry_run: true });

    let store = Arc::new(DataStore::open(settings.data_dir()?).await?);
    let (shutdown_tx, _) = broadcast::channel(1);

    // Ctrl-C drains outstanding polls and records still-live jobs as
    // needs_human(interrupted) before the process exits.
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; beginning graceful drain");
            let _ = signal_tx.send(());
        }
    });

    // Dry runs never talk to the agent, so no credentials are needed.
    let (agent, ci, git): (
        Option<Arc<dyn AgentApi>>,
        Option<Arc<dyn CiStatusApi>>,
        Option<Arc<dyn ChangedFilesApi>>,
    ) = if dry_run {
        (None, None, None)
    } else {
        let agent = HttpAgentClient::new(&settings.agent_api_base, &settings.agent_api_key)?;
        let ci = GitHubProvider::new(&settings.git_api_base, &settings.git_token)?;
        let git = GitHubProvider::new(&settings.git_api_base, &settings.git_token)?;
        (Some(Arc::new(agent)), Some(Arc::new(ci)), Some(Arc::new(git)))
    };

    let ctx = PipelineContext {
        notifier: Notifier::new(settings.webhook_url.clone()),
        settings,
        store,
        agent,
        ci,
        git,
        shutdown: shutdown_tx,
    };

    let summary = match command {
        Command::Run { dry_run } => pipeline::run(&ctx, dry_run).await?,
        Command::CheckStatus => pipeline::check_status(&ctx).await?,
    };

    match summary.outcome {
        RunOutcome::BaselineStored => tracing::info!("baseline stored; no diff to propagate"),
        RunOutcome::NoChange => tracing::info!("no contract change"),
        RunOutcome::NoImpact => tracing::info!("contract changed but no consumer is impacted"),
        RunOutcome::DryRun => {
            for bundle in &summary.bundles {
                tracing::info!(
                    consumer = %bundle.consumer,
                    fingerprint = %bundle.fingerprint,
                    wave = bundle.wave_index,
                    "would dispatch"
                );
            }
        }
        RunOutcome::Dispatched => tracing::info!(
            green = summary.green,
            needs_human = summary.needs_human,
            failed = summary.failed,
            skipped_duplicate = summary.skipped_duplicate,
            "propagation finished"
        ),
    }

    let code = summary.exit_code();
    Ok(if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(code as u8)
    })
}
