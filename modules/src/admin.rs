//! Administrative Commands
//!
//! `say` relays operator text to the echo channel of the bot that received it.

use ircbridge_core::{
    async_trait, AccessLevel, CommandContext, CommandHandler, Error, Message, Result,
};
use tracing::info;

/// `say <text>`
pub struct SayCommand;

#[async_trait]
impl CommandHandler for SayCommand {
    fn name(&self) -> &str {
        "say"
    }

    fn description(&self) -> &str {
        "Broadcasts text to the echo channel"
    }

    fn min_level(&self) -> AccessLevel {
        AccessLevel::Operator
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        if ctx.rest.is_empty() {
            return ctx.respond(&format!("Usage: {}say <text>", ctx.prefix()));
        }
        let channel = ctx
            .host
            .echo_channel()
            .ok_or_else(|| Error::Command("No echo channel configured".to_string()))?;

        info!(bot = %ctx.host.bot_name(), "{} says to {}: {}", ctx.sender, channel, ctx.rest);
        ctx.host
            .send_line(&Message::privmsg(&channel, &ctx.rest).to_line())
    }
}
