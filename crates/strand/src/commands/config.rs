//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};
use console::{Style, style};
use serde_json::json;
use strand_config::{NodeSection, SessionConfig, StrandConfig};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,

    /// Show which config files are checked and which were loaded
    Path,

    /// Write a config file with defaults
    Init {
        /// Create project-local config (./strand.toml) instead of user config
        #[arg(long)]
        local: bool,
    },
}

/// Run the config command.
pub fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Path => cmd_path(ctx),
        ConfigCommand::Init { local } => cmd_init(local, ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let config = &ctx.config;
    let session = config.session();
    let contexts: Vec<String> = session
        .session_contexts()
        .iter()
        .map(ToString::to_string)
        .collect();
    let store = config.store_path();
    let log_dir = config.log_dir();

    if ctx.json_output {
        let doc = json!({
            "node_id": config.node_id(),
            "save_interval_secs": session.save_interval_secs,
            "max_idle_ms": session.max_idle_ms,
            "id_cache_capacity": session.id_cache_capacity,
            "contexts": contexts,
            "store": store,
            "log_dir": log_dir,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Configuration").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!("  {:<18} {}", dim.apply_to("node"), config.node_id());
    println!(
        "  {:<18} {}s",
        dim.apply_to("save interval"),
        session.save_interval_secs
    );
    if session.max_idle_ms < 0 {
        println!("  {:<18} fallback window", dim.apply_to("max idle"));
    } else {
        println!("  {:<18} {}ms", dim.apply_to("max idle"), session.max_idle_ms);
    }
    println!(
        "  {:<18} {}",
        dim.apply_to("id cache"),
        session.id_cache_capacity
    );
    println!("  {:<18} {}", dim.apply_to("contexts"), contexts.join(", "));
    println!("  {:<18} {}", dim.apply_to("store"), store.display());
    if let Some(dir) = log_dir {
        println!("  {:<18} {}", dim.apply_to("logs"), dir.display());
    }
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    if ctx.json_output {
        let sources: Vec<_> = ctx
            .sources
            .iter()
            .map(|s| json!({ "path": s.path, "loaded": s.loaded }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    println!("Config file search order (later overrides earlier):\n");
    for source in &ctx.sources {
        let status = if source.loaded {
            Style::new().green().apply_to("✓ loaded")
        } else {
            Style::new().dim().apply_to("· not found")
        };
        println!("  {} {}", status, source.path.display());
    }

    println!();
    let loaded = ctx.sources.iter().filter(|s| s.loaded).count();
    if loaded == 0 {
        println!("No config files found. Run 'strand config init' to create one.");
    } else {
        println!("{} config file(s) loaded.", loaded);
    }
    Ok(())
}

fn cmd_init(local: bool, ctx: &Context) -> Result<()> {
    let path = if local {
        PathBuf::from("strand.toml")
    } else {
        strand_config::user_config_path()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?
    };

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    let config = StrandConfig {
        node: Some(NodeSection {
            id: ctx.config.node_id().to_string(),
        }),
        session: Some(SessionConfig::default()),
        ..StrandConfig::default()
    };
    strand_config::save_config(&config, &path)?;

    if ctx.json_output {
        println!("{}", json!({ "created": path }));
    } else {
        println!(
            "{} Created {}",
            Style::new().green().apply_to("✓"),
            path.display()
        );
    }
    Ok(())
}
