//! Offline driver for the engine: seed a snapshot, replay an action batch against it, or list
//! the options at a hex. Reads and writes JSON so batches can be written by hand.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use hexfront_core::{
    load_rules, options_at, starter_world, CompiledRules, MoveProcessor, RulesSource, StarterMap,
    World, WorldView,
};
use hexfront_protocol::wire::{
    actions_from_json, snapshot_from_json, snapshot_hash, snapshot_to_json,
};
use hexfront_protocol::{Hex, OptionsAt, StateHash, WorldChange};

#[derive(Parser)]
#[command(name = "hexfront-sim")]
#[command(about = "Replay hexfront action batches offline", version)]
struct Cli {
    /// Directory holding terrain.yaml, units.yaml and combat.yaml (embedded rules otherwise)
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter snapshot: a hexagon of grass with a city and an infantry per player
    Init {
        #[arg(long, default_value_t = 5)]
        radius: i32,
        #[arg(long, default_value_t = 2)]
        players: u8,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 300)]
        coins: i32,
        /// Output file (stdout otherwise)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Apply a batch of actions to a snapshot and print the resulting changes
    Play {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        actions: PathBuf,
        /// Write the resulting snapshot here
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List the current player's options at a hex
    Options {
        #[arg(long)]
        snapshot: PathBuf,
        /// Coordinate as `q,r`
        #[arg(long)]
        at: Hex,
    },
}

#[derive(Serialize)]
struct PlayReport {
    version: u64,
    hash: StateHash,
    changes: Vec<WorldChange>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let rules = match &cli.rules {
        Some(dir) => load_rules(RulesSource::Path(dir.display().to_string()))
            .with_context(|| format!("loading rules from {}", dir.display()))?,
        None => load_rules(RulesSource::Embedded).context("loading embedded rules")?,
    };

    match cli.command {
        Commands::Init {
            radius,
            players,
            seed,
            coins,
            out,
        } => {
            let map = StarterMap {
                radius,
                players,
                coins,
            };
            let world = starter_world(&rules, &map, seed)?;
            let json = snapshot_to_json(&world.snapshot())?;
            emit(&json, out)
        }
        Commands::Play {
            snapshot,
            actions,
            out,
        } => {
            let mut world = read_world(&rules, &snapshot)?;
            let text = std::fs::read_to_string(&actions)
                .with_context(|| format!("reading {}", actions.display()))?;
            let actions = actions_from_json(&text).context("parsing actions")?;

            let processor = MoveProcessor::new(&rules);
            let changes = processor.process_batch(&mut world, &actions)?;
            let snapshot = world.snapshot();
            let report = PlayReport {
                version: world.version(),
                hash: snapshot_hash(&snapshot)?,
                changes,
            };
            info!(version = report.version, hash = %report.hash, "batch applied");
            if let Some(path) = out {
                emit(&snapshot_to_json(&snapshot)?, Some(path))?;
            }
            emit(&serde_json::to_string_pretty(&report)?, None)
        }
        Commands::Options { snapshot, at } => {
            let world = read_world(&rules, &snapshot)?;
            let options: OptionsAt = options_at(&world, &rules, at);
            emit(&serde_json::to_string_pretty(&options)?, None)
        }
    }
}

fn read_world(rules: &CompiledRules, path: &PathBuf) -> Result<World> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let snapshot = snapshot_from_json(&text).context("parsing snapshot")?;
    if snapshot.rules_hash != rules.rules_hash() {
        warn!(
            snapshot = %format!("{:016x}", snapshot.rules_hash),
            loaded = %format!("{:016x}", rules.rules_hash()),
            "snapshot was written under different rules"
        );
    }
    Ok(World::from_snapshot_checked(&snapshot, rules)?)
}

fn emit(text: &str, out: Option<PathBuf>) -> Result<()> {
    match out {
        Some(path) => std::fs::write(&path, text)
            .with_context(|| format!("writing {}", path.display())),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}
