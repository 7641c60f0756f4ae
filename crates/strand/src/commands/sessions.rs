//! Sessions command - inspect and change stored sessions as this node.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use clap::{Args, Subcommand};
use console::{Style, style};
use serde_json::{Value, json};
use strand_session::{
    Clock, SessionContext, SessionCoordinator, SessionHandle, SessionNode, SessionRecord,
    cluster_id_of,
};
use tracing::debug;

use super::{Context, format_millis};

/// Arguments for the sessions command.
#[derive(Args, Debug)]
pub struct SessionsArgs {
    /// Context path (defaults to the first configured context)
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Virtual host for --context
    #[arg(long, global = true)]
    pub vhost: Option<String>,

    #[command(subcommand)]
    pub command: SessionsCommand,
}

#[derive(Subcommand, Debug)]
pub enum SessionsCommand {
    /// List stored sessions in the context
    List,

    /// Create a session owned by this node
    Create {
        /// Session id
        id: String,

        /// Initial attribute as key=value (value parsed as JSON, else a string)
        #[arg(short, long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, Value)>,
    },

    /// Load a session through this node and show it
    Get {
        /// Session id
        id: String,
    },

    /// Set an attribute
    Set {
        /// Session id
        id: String,
        /// Attribute name
        key: String,
        /// Value (JSON, or a bare string)
        value: String,
    },

    /// Remove an attribute
    Unset {
        /// Session id
        id: String,
        /// Attribute name
        key: String,
    },

    /// Delete a session from the store
    Remove {
        /// Session id
        id: String,
    },

    /// Delete a session, drop it from every context and release its id
    Invalidate {
        /// Session id
        id: String,
    },

    /// Delete expired sessions in the context
    Purge,
}

/// Run the sessions command.
pub fn run(args: SessionsArgs, ctx: &Context) -> Result<()> {
    let node = ctx.open_node()?;
    let context = match &args.context {
        Some(path) => SessionContext::new(Some(path), args.vhost.as_deref()),
        None => ctx
            .config
            .session()
            .session_contexts()
            .into_iter()
            .next()
            .unwrap_or_else(SessionContext::root),
    };
    // Open every configured context so invalidation reaches all of them.
    for configured in ctx.config.session().session_contexts() {
        node.context(configured);
    }
    let sessions = node.context(context);

    let dim = Style::new().dim();
    let green = Style::new().green();

    match args.command {
        SessionsCommand::List => list(&node, &sessions, ctx)?,
        SessionsCommand::Create { id, attrs } => {
            let now = node.clock().now_millis();
            // One cluster id may back a session in every context.
            if !node.registry().claim(&id, now)? {
                debug!(cluster_id = %cluster_id_of(&id), "Cluster id already claimed, reusing it");
            }
            let handle = sessions.create(&id)?;
            for (key, value) in attrs {
                sessions.mutate_attribute(&handle, &key, Some(value));
            }
            sessions.complete_request(&handle)?;
            print_record(&handle.record(), now, ctx)?;
        }
        SessionsCommand::Get { id } => {
            let handle = acquire(&sessions, &id)?;
            print_record(&handle.record(), node.clock().now_millis(), ctx)?;
        }
        SessionsCommand::Set { id, key, value } => {
            let value = parse_value(&value);
            let record = update(&node, &sessions, &id, &key, Some(value))?;
            print_record(&record, node.clock().now_millis(), ctx)?;
        }
        SessionsCommand::Unset { id, key } => {
            let record = update(&node, &sessions, &id, &key, None)?;
            print_record(&record, node.clock().now_millis(), ctx)?;
        }
        SessionsCommand::Remove { id } => {
            let existed = sessions.remove(&id)?;
            if ctx.json_output {
                println!("{}", json!({ "id": id, "removed": existed }));
            } else if existed {
                println!("{} Session removed: {}", green.apply_to("✓"), dim.apply_to(&id));
            } else {
                println!("{}", dim.apply_to(format!("No session {id}")));
            }
        }
        SessionsCommand::Invalidate { id } => {
            let existed = sessions.invalidate(&id)?;
            let released = node.registry().unregister(&id)?;
            if ctx.json_output {
                println!(
                    "{}",
                    json!({ "id": id, "removed": existed, "id_released": released })
                );
            } else {
                println!(
                    "{} Session invalidated: {}",
                    green.apply_to("✓"),
                    dim.apply_to(&id)
                );
            }
        }
        SessionsCommand::Purge => {
            let purged = sessions.purge_expired()?;
            if ctx.json_output {
                let context = sessions.config().context.to_string();
                println!("{}", json!({ "context": context, "purged": purged }));
            } else {
                println!(
                    "{} Purged {} expired session(s)",
                    green.apply_to("✓"),
                    purged
                );
            }
        }
    }

    node.shutdown();
    Ok(())
}

fn acquire(sessions: &SessionCoordinator, id: &str) -> Result<SessionHandle> {
    sessions
        .acquire(id)?
        .ok_or_else(|| anyhow!("session '{id}' not found in {}", sessions.config().context))
}

/// One full request: acquire, touch, mutate, complete.
fn update(
    node: &SessionNode,
    sessions: &Arc<SessionCoordinator>,
    id: &str,
    key: &str,
    value: Option<Value>,
) -> Result<SessionRecord> {
    let handle = acquire(sessions, id)?;
    sessions.touch(&handle, node.clock().now_millis());
    sessions.mutate_attribute(&handle, key, value);
    if !sessions.complete_request(&handle)? {
        bail!("session '{id}' was removed before it could be saved");
    }
    Ok(handle.record())
}

fn list(node: &SessionNode, sessions: &SessionCoordinator, ctx: &Context) -> Result<()> {
    let records = sessions.sessions()?;
    let now = node.clock().now_millis();

    if ctx.json_output {
        let rows: Vec<Value> = records
            .values()
            .map(|record| record_json(record, now))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!(
        "{}",
        style(format!("Sessions in {}", sessions.config().context)).bold()
    );
    println!("{}", dim.apply_to("─".repeat(50)));

    if records.is_empty() {
        println!("{}", dim.apply_to("No sessions found"));
        return Ok(());
    }

    for (id, record) in &records {
        let state = if record.is_expired(now) {
            Style::new().red().apply_to("expired")
        } else {
            Style::new().green().apply_to("live")
        };
        println!(
            "{:<24} {:<8} {:<12} {}",
            id,
            state,
            record.last_node(),
            dim.apply_to(format!("{} attribute(s)", record.attributes().len()))
        );
    }
    Ok(())
}

fn record_json(record: &SessionRecord, now: i64) -> Value {
    json!({
        "key": record.key().to_string(),
        "id": record.cluster_id(),
        "last_node": record.last_node(),
        "max_idle_ms": record.max_idle_ms(),
        "times": record.times(),
        "expired": record.is_expired(now),
        "attributes": record.attributes(),
    })
}

fn print_record(record: &SessionRecord, now: i64, ctx: &Context) -> Result<()> {
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&record_json(record, now))?);
        return Ok(());
    }

    let dim = Style::new().dim();
    let times = record.times();
    println!("{}", style(format!("Session {}", record.cluster_id())).bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!("  {:<12} {}", dim.apply_to("key"), record.key());
    println!("  {:<12} {}", dim.apply_to("last node"), record.last_node());
    println!("  {:<12} {}", dim.apply_to("created"), format_millis(times.created));
    println!("  {:<12} {}", dim.apply_to("accessed"), format_millis(times.accessed));
    println!("  {:<12} {}", dim.apply_to("saved"), format_millis(times.last_saved));
    println!("  {:<12} {}", dim.apply_to("expires"), format_millis(times.expiry_at));
    if ctx.verbose {
        println!(
            "  {:<12} {}",
            dim.apply_to("cookie set"),
            format_millis(times.cookie_set_at)
        );
        println!("  {:<12} {}", dim.apply_to("max idle ms"), record.max_idle_ms());
    }

    if record.attributes().is_empty() {
        println!("  {}", dim.apply_to("(no attributes)"));
    } else {
        let mut names: Vec<_> = record.attributes().keys().collect();
        names.sort();
        for name in names {
            if let Some(value) = record.attribute(name) {
                println!("  {} = {}", style(name).cyan(), value);
            }
        }
    }
    Ok(())
}

/// Parse a CLI value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_attr(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.trim().is_empty() {
        return Err(format!("empty attribute name in '{raw}'"));
    }
    Ok((key.trim().to_string(), parse_value(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_value("alice"), json!("alice"));
    }

    #[test]
    fn test_parse_attr() {
        assert_eq!(
            parse_attr("user=alice").unwrap(),
            ("user".to_string(), json!("alice"))
        );
        assert_eq!(
            parse_attr("n=a=b").unwrap(),
            ("n".to_string(), json!("a=b"))
        );
        assert!(parse_attr("novalue").is_err());
        assert!(parse_attr("=x").is_err());
    }
}
