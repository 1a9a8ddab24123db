//! Help Command
//!
//! Lists the commands the caller may run, or describes one of them.

use ircbridge_core::{async_trait, AccessLevel, CommandContext, CommandHandler, Result};

/// `help [command]`
pub struct HelpCommand;

#[async_trait]
impl CommandHandler for HelpCommand {
    fn name(&self) -> &str {
        "help"
    }

    fn description(&self) -> &str {
        "Lists available commands, or describes one"
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let level = ctx.effective_level();

        if let Some(topic) = ctx.arg(0) {
            let topic = topic.to_lowercase();
            let reply = match ctx.commands().iter().find(|c| c.name == topic) {
                Some(cmd) if cmd.min_level > AccessLevel::None => format!(
                    "{}: {} (requires {})",
                    cmd.name, cmd.description, cmd.min_level
                ),
                Some(cmd) => format!("{}: {}", cmd.name, cmd.description),
                None => format!("No such command: {}", topic),
            };
            return ctx.respond(&reply);
        }

        let prefix = ctx.prefix();
        let usable: Vec<String> = ctx
            .commands()
            .iter()
            .filter(|c| c.min_level <= level)
            .map(|c| format!("{}{}", prefix, c.name))
            .collect();
        ctx.respond(&format!("Available commands: {}", usable.join(" ")))
    }
}
