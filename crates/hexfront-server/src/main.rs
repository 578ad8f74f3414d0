//! Hexfront consensus server
//!
//! Boots the coordinator with in-process validators, then reads action batches from stdin (one
//! JSON array per line), proposes each against the current tip and prints the outcome.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hexfront_core::{load_rules, starter_world, CompiledRules, RulesSource, World, WorldView};
use hexfront_protocol::wire::{actions_from_json, snapshot_from_json};
use hexfront_protocol::{ProposalId, ProposalStatus};
use hexfront_server::{
    propose, spawn_local_validator, ConsensusCoordinator, FileSnapshotStore, ServerConfig,
    SnapshotStore,
};

#[derive(Parser)]
#[command(name = "hexfront-server")]
#[command(about = "K-of-N consensus coordinator for hexfront games", version)]
struct Cli {
    /// YAML config file (built-in defaults otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON snapshot to start from when the snapshot directory is empty
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Override the configured quorum
    #[arg(long)]
    quorum: Option<usize>,

    /// Override the proposal timeout, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Override the snapshot directory
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct BatchReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    proposal: Option<ProposalId>,
    #[serde(flatten)]
    status: ProposalStatus,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("hexfront_server=debug,hexfront_core=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("hexfront_server=info,hexfront_core=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(quorum) = cli.quorum {
        config.quorum = quorum;
    }
    if let Some(secs) = cli.timeout_secs {
        config.proposal_timeout = Duration::from_secs(secs);
    }
    if let Some(dir) = cli.snapshot_dir {
        config.snapshot_dir = dir;
    }
    config.validate().context("invalid configuration")?;

    let rules = Arc::new(match &config.rules_path {
        Some(path) => load_rules(RulesSource::Path(path.clone()))
            .with_context(|| format!("loading rules from {path}"))?,
        None => load_rules(RulesSource::Embedded).context("loading embedded rules")?,
    });

    info!("Hexfront server v{}", env!("CARGO_PKG_VERSION"));
    let store = Arc::new(
        FileSnapshotStore::new(&config.snapshot_dir)
            .with_context(|| format!("opening {}", config.snapshot_dir.display()))?,
    );
    let world = initial_world(&config, &rules, store.as_ref(), cli.snapshot.as_ref())?;
    info!(
        tip = world.version(),
        turn = world.turn(),
        dir = %store.dir().display(),
        "world loaded"
    );

    let coordinator =
        ConsensusCoordinator::new(&config, Arc::clone(&rules), world, store.clone())?;
    let validators: Vec<_> = config
        .validators
        .iter()
        .map(|name| spawn_local_validator(coordinator.clone(), Arc::clone(&rules), name.clone()))
        .collect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let report = play(&coordinator, &rules, &line).await;
        println!("{}", serde_json::to_string(&report)?);
    }

    for handle in validators {
        handle.abort();
    }
    info!(tip = coordinator.tip().await, "shutting down");
    Ok(())
}

/// Latest stored snapshot, else the `--snapshot` file, else a fresh starter map.
fn initial_world(
    config: &ServerConfig,
    rules: &CompiledRules,
    store: &dyn SnapshotStore,
    snapshot: Option<&PathBuf>,
) -> Result<World> {
    if let Some(stored) = store.load_latest().context("loading stored snapshot")? {
        return World::from_snapshot_checked(&stored, rules)
            .context("stored snapshot does not match the loaded rules");
    }
    let world = match snapshot {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            World::from_snapshot_checked(&snapshot_from_json(&text)?, rules)
                .with_context(|| format!("loading {}", path.display()))?
        }
        None => {
            let seed = config.seed.unwrap_or_else(rand::random);
            info!(seed, "starting a new game");
            starter_world(rules, &config.starter, seed)?
        }
    };
    if world.rules_hash() != rules.rules_hash() {
        warn!(
            snapshot = %format!("{:016x}", world.rules_hash()),
            loaded = %format!("{:016x}", rules.rules_hash()),
            "starting snapshot was written under different rules"
        );
    }
    store
        .persist(world.version(), &world.snapshot())
        .context("persisting starting snapshot")?;
    Ok(world)
}

async fn play(coordinator: &ConsensusCoordinator, rules: &CompiledRules, line: &str) -> BatchReport {
    let rejected = |reason: String| BatchReport {
        proposal: None,
        status: ProposalStatus::Rejected { reason },
    };
    let actions = match actions_from_json(line) {
        Ok(actions) => actions,
        Err(err) => return rejected(format!("unreadable batch: {err}")),
    };
    let world = match World::from_snapshot_checked(&coordinator.snapshot().await, rules) {
        Ok(world) => world,
        Err(err) => return rejected(err.to_string()),
    };
    let proposal = match propose(&world, rules, "stdin", actions) {
        Ok(proposal) => proposal,
        Err(err) => return rejected(err.to_string()),
    };
    let id = match coordinator.submit(proposal).await {
        Ok(id) => id,
        Err(err) => return rejected(err.to_string()),
    };
    let status = match coordinator.wait(id).await {
        Ok(status) => status,
        Err(err) => ProposalStatus::Rejected {
            reason: err.to_string(),
        },
    };
    BatchReport {
        proposal: Some(id),
        status,
    }
}
