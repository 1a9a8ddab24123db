//! Status Commands
//!
//! `ping` answers anyone; `status` reports where the bot is and how long it has been
//! connected.

use chrono::{DateTime, Utc};
use ircbridge_core::{async_trait, AccessLevel, CommandContext, CommandHandler, Result};

/// `ping`
pub struct PingCommand;

#[async_trait]
impl CommandHandler for PingCommand {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "Checks that the bot is responding"
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        ctx.respond(&format!("{}: pong", ctx.sender))
    }
}

/// `status`
pub struct StatusCommand;

#[async_trait]
impl CommandHandler for StatusCommand {
    fn name(&self) -> &str {
        "status"
    }

    fn description(&self) -> &str {
        "Shows network, nickname, channels and uptime"
    }

    fn min_level(&self) -> AccessLevel {
        AccessLevel::Voice
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let host = &ctx.host;
        let network = host.network_name().unwrap_or_else(|| "unknown".to_string());
        let mut channels = host.joined_channels();
        channels.sort();
        let channels = if channels.is_empty() {
            "none".to_string()
        } else {
            channels.join(", ")
        };
        let uptime = host
            .connected_since()
            .map(|since| format_uptime(since, Utc::now()))
            .unwrap_or_else(|| "not connected".to_string());

        ctx.respond(&format!(
            "{} on {} as {} | channels: {} | connected: {}",
            host.bot_name(),
            network,
            host.nickname(),
            channels,
            uptime
        ))
    }
}

/// Compact elapsed time such as `2d 3h 4m`, down to seconds under a minute
pub fn format_uptime(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = (now - since).num_seconds().max(0);
    if elapsed < 60 {
        return format!("{}s", elapsed);
    }

    let days = elapsed / 86_400;
    let hours = (elapsed % 86_400) / 3_600;
    let minutes = (elapsed % 3_600) / 60;
    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if days > 0 || hours > 0 {
        parts.push(format!("{}h", hours));
    }
    parts.push(format!("{}m", minutes));
    parts.join(" ")
}
