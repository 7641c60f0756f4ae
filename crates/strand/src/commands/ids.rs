//! Ids command - cluster id claims.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::Style;
use serde_json::json;
use strand_session::{Clock, cluster_id_of};

use super::{Context, format_millis};

/// Arguments for the ids command.
#[derive(Args, Debug)]
pub struct IdsArgs {
    #[command(subcommand)]
    pub command: IdsCommand,
}

#[derive(Subcommand, Debug)]
pub enum IdsCommand {
    /// List every claimed id with store totals
    List,

    /// Check whether an id is claimed anywhere in the cluster
    Check {
        /// Cluster id, with or without a worker suffix
        id: String,
    },

    /// Claim an id if it is free
    Claim {
        /// Cluster id, with or without a worker suffix
        id: String,
    },

    /// Release a claimed id
    Release {
        /// Cluster id, with or without a worker suffix
        id: String,
    },
}

/// Run the ids command.
pub fn run(args: IdsArgs, ctx: &Context) -> Result<()> {
    let node = ctx.open_node()?;
    let registry = node.registry();
    let dim = Style::new().dim();

    let (id, field, value, message) = match args.command {
        IdsCommand::List => return list(ctx),
        IdsCommand::Check { id } => {
            let in_use = registry.is_in_use(&id)?;
            let message = if in_use { "in use" } else { "free" };
            (id, "in_use", in_use, message)
        }
        IdsCommand::Claim { id } => {
            let claimed = registry.claim(&id, node.clock().now_millis())?;
            let message = if claimed { "claimed" } else { "already in use" };
            (id, "claimed", claimed, message)
        }
        IdsCommand::Release { id } => {
            let released = registry.unregister(&id)?;
            let message = if released { "released" } else { "was not claimed" };
            (id, "released", released, message)
        }
    };

    let cluster_id = cluster_id_of(&id);
    if ctx.json_output {
        println!("{}", json!({ "id": cluster_id, field: value }));
    } else {
        let style = if value {
            Style::new().green()
        } else {
            Style::new().yellow()
        };
        println!("{} {}", dim.apply_to(cluster_id), style.apply_to(message));
    }
    Ok(())
}

fn list(ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let claims = store.list_cluster_ids()?;
    let stats = store.stats()?;

    if ctx.json_output {
        let ids: Vec<_> = claims
            .iter()
            .map(|claim| json!({ "id": claim.cluster_id, "created_at": claim.created_at }))
            .collect();
        let doc = json!({
            "ids": ids,
            "sessions": stats.sessions,
            "cluster_ids": stats.cluster_ids,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    for claim in &claims {
        println!(
            "{}  {}",
            claim.cluster_id,
            dim.apply_to(format_millis(claim.created_at))
        );
    }
    println!(
        "{}",
        dim.apply_to(format!(
            "{} claimed ids, {} stored sessions",
            stats.cluster_ids, stats.sessions
        ))
    );
    Ok(())
}
