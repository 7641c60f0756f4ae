//! Strand - operator CLI for cluster session state
//!
//! Main entry point for the strand CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

mod commands;

use commands::{config, ids, sessions};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Strand - inspect and manage clustered session state
#[derive(Parser)]
#[command(name = "strand")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Load this config file instead of discovering one
    #[arg(long, global = true, env = "STRAND_CONFIG")]
    pub config: Option<PathBuf>,

    /// Act as this node (overrides [node].id and STRAND_NODE_ID)
    #[arg(long, global = true)]
    pub node: Option<String>,

    /// SQLite session store (overrides [store].path)
    #[arg(long, global = true, env = "STRAND_STORE")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Session operations
    Sessions(sessions::SessionsArgs),

    /// Cluster id operations
    Ids(ids::IdsArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = match &cli.config {
        Some(path) => {
            let mut config = strand_config::load_config_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            strand_config::apply_env_overrides(&mut config, std::env::var("STRAND_NODE_ID").ok());
            let source = strand_config::ConfigSource {
                path: path.clone(),
                loaded: true,
            };
            (config, vec![source])
        }
        None => {
            let loaded = strand_config::load_config(None)?;
            for warning in &loaded.warnings {
                eprintln!("warning: {warning}");
            }
            (loaded.config, loaded.sources)
        }
    };
    if let Some(node) = &cli.node {
        strand_config::apply_env_overrides(&mut config, Some(node.clone()));
    }
    if let Some(store) = &cli.store {
        config.store = Some(strand_config::StoreConfig {
            path: Some(store.clone()),
        });
    }

    // Initialize tracing: console on stderr + rotating JSON file
    let filter = if cli.verbose {
        "strand=debug,strand_session=debug,strand_store=debug,strand_config=debug,info"
    } else {
        "strand=info,strand_session=warn,strand_store=warn,warn"
    };

    let log_dir = config.log_dir().unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "strand.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "strand=trace,strand_session=trace,strand_store=debug,strand_config=debug,info",
                )),
        )
        .init();

    let ctx = commands::Context {
        config,
        sources,
        json_output: cli.json,
        verbose: cli.verbose,
    };
    tracing::debug!(
        node = %ctx.config.node_id(),
        store = %ctx.config.store_path().display(),
        "Configuration resolved"
    );

    match cli.command {
        Commands::Sessions(args) => sessions::run(args, &ctx),
        Commands::Ids(args) => ids::run(args, &ctx),
        Commands::Config(args) => config::run(args, &ctx),
    }
}
