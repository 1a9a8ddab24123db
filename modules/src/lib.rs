//! IRC Bridge Modules
//!
//! Built-in command handlers for the bridge runtime.

pub mod admin;
pub mod help;
pub mod status;

#[cfg(test)]
mod testing;

pub use admin::SayCommand;
pub use help::HelpCommand;
pub use status::{PingCommand, StatusCommand};

use ircbridge_core::{CommandManager, Result};
use std::sync::Arc;

/// Register every built-in command with a manager
pub fn register_builtin_commands(manager: &mut CommandManager) -> Result<()> {
    manager.register(Arc::new(HelpCommand))?;
    manager.register(Arc::new(PingCommand))?;
    manager.register(Arc::new(StatusCommand))?;
    manager.register(Arc::new(SayCommand))?;
    Ok(())
}
