//! CaseClaw CLI — init the state store, then run the background sweeps.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use caseclaw_channels::{channels_from_config, notifier_from_config};
use caseclaw_core::CaseClawConfig;
use caseclaw_engine::{
    run_sequence_sweep, run_workflow_sweep, seed_default_workflow, CaseDb, ChannelRouter,
    EngineActionRunner, SequenceEngine, WorkflowEngine,
};

#[derive(Parser)]
#[command(name = "caseclaw", version, about = "Dispute & collections workflow engine")]
struct Cli {
    /// Path to config.toml (defaults to ~/.caseclaw/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and seed the default dispute workflow graph.
    Init {
        /// Tenant to seed the workflow graph for.
        #[arg(long, default_value = "default")]
        tenant: String,
    },
    /// Run the workflow and sequence sweeps until interrupted.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CaseClawConfig::load_from(path).context("loading config")?,
        None => CaseClawConfig::load().context("loading config")?,
    };

    match cli.command {
        Command::Init { tenant } => {
            let db = CaseDb::open(&config.store.path).context("opening state store")?;
            let seeded = seed_default_workflow(&db, &tenant)?;
            println!(
                "Initialized store at {} and seeded {} transitions for tenant '{tenant}'.",
                config.store.path.display(),
                seeded.len()
            );
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

async fn serve(config: CaseClawConfig) -> anyhow::Result<()> {
    let db = Arc::new(CaseDb::open(&config.store.path).context("opening state store")?);
    let notifier = notifier_from_config(&config.channel);

    let mut router = ChannelRouter::new();
    for channel in channels_from_config(&config.channel) {
        router.register(channel);
    }

    let sequences = Arc::new(
        SequenceEngine::new(db.clone(), db.clone(), router)
            .with_max_attempts(config.scheduler.step_max_attempts),
    );
    let actions = Arc::new(EngineActionRunner::new(
        sequences.clone(),
        db.clone(),
        notifier,
    ));
    let workflows = Arc::new(WorkflowEngine::new(db.clone(), db.clone(), actions));

    tracing::info!("🦀 CaseClaw serving from {}", config.store.path.display());

    let workflow_loop = tokio::spawn(run_workflow_sweep(
        workflows,
        config.scheduler.workflow_sweep_secs,
    ));
    let sequence_loop = tokio::spawn(run_sequence_sweep(
        sequences,
        config.scheduler.sequence_sweep_secs,
    ));

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");
    workflow_loop.abort();
    sequence_loop.abort();
    Ok(())
}
