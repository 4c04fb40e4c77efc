//! Retention policy CLI commands.
//!
//! Commands for enabling, disabling and inspecting vanishing channels.

use chrono::{DateTime, Utc};
use clap::Subcommand;

use crate::channels::ChannelGateway;
use crate::db::PolicyStore;
use crate::policy::{RetentionPolicy, format_count, format_ttl, parse_ttl};

#[derive(Subcommand, Debug, Clone)]
pub enum PolicyCommand {
    /// Make messages in a channel vanish after a duration
    Set {
        /// Channel ID
        channel_id: String,

        /// Guild (server) ID the channel belongs to
        guild_id: String,

        /// Time-to-live, e.g. "6h", "1d", "30m", "60s"
        duration: String,
    },

    /// Stop deleting messages in a channel
    Off {
        /// Channel ID
        channel_id: String,
    },

    /// Show a channel's policy and deletion stats
    Status {
        /// Channel ID
        channel_id: String,
    },

    /// List all vanishing channels
    List {
        /// Show only channels in this guild
        #[arg(short, long, env = "SWEEP_GUILD_ID")]
        guild: Option<String>,
    },
}

/// Run a policy command.
///
/// When a gateway is given, `set` also writes the channel label right away
/// instead of waiting for the next sweep, and `off` clears it.
pub async fn run_policy_command(
    cmd: PolicyCommand,
    store: &dyn PolicyStore,
    gateway: Option<&dyn ChannelGateway>,
) -> anyhow::Result<()> {
    match cmd {
        PolicyCommand::Set {
            channel_id,
            guild_id,
            duration,
        } => set_policy(store, gateway, &channel_id, &guild_id, &duration).await,
        PolicyCommand::Off { channel_id } => disable_policy(store, gateway, &channel_id).await,
        PolicyCommand::Status { channel_id } => show_status(store, &channel_id).await,
        PolicyCommand::List { guild } => list_policies(store, guild.as_deref()).await,
    }
}

async fn set_policy(
    store: &dyn PolicyStore,
    gateway: Option<&dyn ChannelGateway>,
    channel_id: &str,
    guild_id: &str,
    duration: &str,
) -> anyhow::Result<()> {
    let Some(ttl_seconds) = parse_ttl(duration) else {
        anyhow::bail!(
            "Invalid duration '{}'. Use something like: 6h, 1d, 30m, or 60s",
            duration
        );
    };

    let policy = store.set_policy(channel_id, guild_id, ttl_seconds).await?;

    if let Some(gateway) = gateway {
        if let Err(e) = gateway.set_channel_label(channel_id, &policy.label()).await {
            tracing::warn!(channel_id, code = e.code(), error = %e, "Failed to update channel label");
        }
    }

    println!(
        "Messages in {} will be automatically deleted after {}",
        channel_id,
        format_ttl(policy.ttl_seconds)
    );
    Ok(())
}

async fn disable_policy(
    store: &dyn PolicyStore,
    gateway: Option<&dyn ChannelGateway>,
    channel_id: &str,
) -> anyhow::Result<()> {
    if store.remove_policy(channel_id).await? {
        if let Some(gateway) = gateway {
            if let Err(e) = gateway.set_channel_label(channel_id, "").await {
                tracing::warn!(channel_id, code = e.code(), error = %e, "Failed to clear channel label");
            }
        }
        println!("Auto-deletion has been disabled for {}", channel_id);
    } else {
        println!("Auto-deletion is not enabled for {}", channel_id);
    }
    Ok(())
}

async fn show_status(store: &dyn PolicyStore, channel_id: &str) -> anyhow::Result<()> {
    match store.get_policy(channel_id).await? {
        Some(policy) => println!("{}", render_status(&policy)),
        None => println!("Auto-deletion is not enabled for {}", channel_id),
    }
    Ok(())
}

async fn list_policies(store: &dyn PolicyStore, guild_id: Option<&str>) -> anyhow::Result<()> {
    let policies = store.list_active_policies(guild_id).await?;
    if policies.is_empty() {
        println!("No vanishing channels.");
        return Ok(());
    }

    print!("{}", render_table(&policies));
    Ok(())
}

fn format_timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "Never".to_string())
}

fn render_status(policy: &RetentionPolicy) -> String {
    [
        format!("Auto-deletion status for {}", policy.channel_id),
        format!(
            "  Messages older than {} will be deleted",
            format_ttl(policy.ttl_seconds)
        ),
        format!(
            "  Total messages deleted: {}",
            format_count(policy.messages_deleted)
        ),
        format!("  Last deletion: {}", format_timestamp(policy.last_deletion_at)),
        format!("  Active since: {}", format_timestamp(Some(policy.created_at))),
    ]
    .join("\n")
}

fn render_table(policies: &[RetentionPolicy]) -> String {
    let width = policies
        .iter()
        .map(|p| p.channel_id.len())
        .max()
        .unwrap_or(0)
        .max("CHANNEL".len());

    let mut out = format!(
        "{:width$}  {:>6}  {:>10}  {}\n",
        "CHANNEL",
        "TTL",
        "DELETED",
        "GUILD",
        width = width
    );
    for p in policies {
        out.push_str(&format!(
            "{:width$}  {:>6}  {:>10}  {}\n",
            p.channel_id,
            format_ttl(p.ttl_seconds),
            format_count(p.messages_deleted),
            p.guild_id,
            width = width
        ));
    }
    out
}
