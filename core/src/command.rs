//! Command dispatch with permission checks
//!
//! A command is a PRIVMSG whose text starts with the configured prefix character. The
//! sender's level is derived at dispatch time from the prefix symbols the owning bot
//! currently sees for them, mapped through an ordered [`PermissionTable`]. Handlers and
//! the permission delegate are registered once, before the manager is shared.

use crate::config::PermissionEntry;
use crate::membership::CaseMapping;
use crate::message::{Command, Message};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Access level derived from channel membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    None,
    Voice,
    HalfOp,
    Operator,
    Admin,
    Owner,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessLevel::None => "none",
            AccessLevel::Voice => "voice",
            AccessLevel::HalfOp => "halfop",
            AccessLevel::Operator => "operator",
            AccessLevel::Admin => "admin",
            AccessLevel::Owner => "owner",
        };
        f.write_str(name)
    }
}

/// Ordered mapping from prefix symbol to access level
///
/// Rows are checked in order and the first symbol the member holds decides the level,
/// so the table is written highest rank first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionTable {
    entries: Vec<(char, AccessLevel)>,
}

impl PermissionTable {
    pub fn new(entries: Vec<(char, AccessLevel)>) -> Self {
        Self { entries }
    }

    pub fn from_entries(entries: &[PermissionEntry]) -> Self {
        Self::new(entries.iter().map(|e| (e.symbol, e.level)).collect())
    }

    /// Level granted by a set of symbols
    pub fn level_for(&self, symbols: &[char]) -> AccessLevel {
        self.entries
            .iter()
            .find(|(symbol, _)| symbols.contains(symbol))
            .map(|(_, level)| *level)
            .unwrap_or(AccessLevel::None)
    }

    /// Rows in order
    pub fn entries(&self) -> &[(char, AccessLevel)] {
        &self.entries
    }
}

impl Default for PermissionTable {
    fn default() -> Self {
        Self::from_entries(&crate::config::default_permissions())
    }
}

/// What a command-dispatching bot exposes to the dispatcher and to handlers
pub trait CommandHost: Send + Sync {
    /// Name of the bot, for logs
    fn bot_name(&self) -> String;

    /// Our current nickname
    fn nickname(&self) -> String;

    /// Prefix symbols a nick currently holds in a channel; `None` when there is no data
    fn member_symbols(&self, channel: &str, nick: &str) -> Option<Vec<char>>;

    /// Configured echo channel
    fn echo_channel(&self) -> Option<String>;

    /// Whether a target names a channel on this network
    fn is_channel_name(&self, target: &str) -> bool;

    /// Write one raw line to the server
    fn send_line(&self, line: &str) -> Result<()>;

    /// Advertised network name
    fn network_name(&self) -> Option<String> {
        None
    }

    /// Channels currently joined
    fn joined_channels(&self) -> Vec<String> {
        Vec::new()
    }

    /// When the current session registered
    fn connected_since(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Case mapping the network uses for nicks and channels
    fn case_mapping(&self) -> CaseMapping {
        CaseMapping::default()
    }
}

/// Where a response goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    /// The channel the command was said in
    Channel(String),
    /// The sender, for private messages
    Private(String),
}

impl ReplyTarget {
    pub fn name(&self) -> &str {
        match self {
            ReplyTarget::Channel(name) | ReplyTarget::Private(name) => name,
        }
    }
}

/// Name, description and required level of a registered command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSummary {
    pub name: String,
    pub description: String,
    pub min_level: AccessLevel,
}

/// Per-invocation context handed to a handler
pub struct CommandContext {
    /// Bot the command arrived on
    pub host: Arc<dyn CommandHost>,
    /// Sender nick
    pub sender: String,
    /// Full sender source (`nick!user@host`)
    pub source: String,
    /// Resolved level; `None` when membership data was unavailable
    pub level: Option<AccessLevel>,
    /// Where responses go
    pub target: ReplyTarget,
    /// Command word, lower-cased, without prefix
    pub command: String,
    /// Whitespace-separated arguments
    pub args: Vec<String>,
    /// Text after the command word, unsplit
    pub rest: String,
    prefix: char,
    catalog: Arc<Vec<CommandSummary>>,
}

impl CommandContext {
    /// Write text back to the originating target, one PRIVMSG per non-empty line
    pub fn respond(&self, text: &str) -> Result<()> {
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            self.host
                .send_line(&Message::privmsg(self.target.name(), line).to_line())?;
        }
        Ok(())
    }

    /// Argument by position
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Level, treating missing data as no access
    pub fn effective_level(&self) -> AccessLevel {
        self.level.unwrap_or(AccessLevel::None)
    }

    /// Every registered command, sorted by name
    pub fn commands(&self) -> &[CommandSummary] {
        &self.catalog
    }

    /// Character commands start with
    pub fn prefix(&self) -> char {
        self.prefix
    }
}

/// A registered command
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Command word, matched case-insensitively
    fn name(&self) -> &str;

    /// One-line description
    fn description(&self) -> &str;

    /// Minimum level required to run the command
    fn min_level(&self) -> AccessLevel {
        AccessLevel::None
    }

    /// Run the command
    async fn execute(&self, ctx: &CommandContext) -> Result<()>;
}

/// Responses for refused commands
#[async_trait]
pub trait PermissionDelegate: Send + Sync {
    /// Sender's level is known and too low
    async fn denied(&self, ctx: &CommandContext, required: AccessLevel) -> Result<()>;

    /// Sender's level could not be determined
    async fn unresolved(&self, ctx: &CommandContext, required: AccessLevel) -> Result<()>;
}

/// Replies with a short notice to the originating target
pub struct DefaultPermissionDelegate;

#[async_trait]
impl PermissionDelegate for DefaultPermissionDelegate {
    async fn denied(&self, ctx: &CommandContext, required: AccessLevel) -> Result<()> {
        ctx.respond(&format!(
            "{}: {} requires {} access",
            ctx.sender, ctx.command, required
        ))
    }

    async fn unresolved(&self, ctx: &CommandContext, _required: AccessLevel) -> Result<()> {
        ctx.respond(&format!(
            "{}: cannot verify your access right now, try again shortly",
            ctx.sender
        ))
    }
}

/// Result of feeding a message to the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a command (wrong message type, no prefix, or our own message)
    NotACommand,
    /// Prefixed word with no registered handler
    Unknown,
    /// Handler ran to completion
    Executed,
    /// Level known and too low
    Denied,
    /// Level could not be determined
    Unresolved,
    /// Handler returned an error
    Failed(String),
}

/// Registry of command handlers
pub struct CommandManager {
    prefix: char,
    permissions: PermissionTable,
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
    catalog: Arc<Vec<CommandSummary>>,
    delegate: Arc<dyn PermissionDelegate>,
}

impl CommandManager {
    /// Create an empty manager
    pub fn new(prefix: char, permissions: PermissionTable) -> Self {
        Self {
            prefix,
            permissions,
            handlers: HashMap::new(),
            catalog: Arc::new(Vec::new()),
            delegate: Arc::new(DefaultPermissionDelegate),
        }
    }

    /// Create a manager from the `[commands]` and `[[permissions]]` sections
    pub fn from_config(config: &crate::Config) -> Self {
        Self::new(config.commands.prefix, config.permission_table())
    }

    /// Replace the permission delegate
    pub fn with_delegate(mut self, delegate: Arc<dyn PermissionDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    /// Register a handler; names are unique
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) -> Result<()> {
        let name = handler.name().to_lowercase();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(Error::Command(format!("Invalid command name {:?}", handler.name())));
        }
        if self.handlers.contains_key(&name) {
            return Err(Error::Command(format!("Command {} already registered", name)));
        }

        tracing::debug!("Registered command {} ({})", name, handler.min_level());
        self.handlers.insert(name, handler);

        let mut catalog: Vec<CommandSummary> = self
            .handlers
            .iter()
            .map(|(name, h)| CommandSummary {
                name: name.clone(),
                description: h.description().to_string(),
                min_level: h.min_level(),
            })
            .collect();
        catalog.sort_by(|a, b| a.name.cmp(&b.name));
        self.catalog = Arc::new(catalog);
        Ok(())
    }

    /// Handler by name
    pub fn handler(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&name.to_lowercase()).cloned()
    }

    /// Registered commands, sorted
    pub fn commands(&self) -> &[CommandSummary] {
        &self.catalog
    }

    pub fn prefix(&self) -> char {
        self.prefix
    }

    pub fn permissions(&self) -> &PermissionTable {
        &self.permissions
    }

    /// Sender's level in a channel; `None` when the host has no data
    pub fn resolve_level(
        &self,
        host: &dyn CommandHost,
        channel: Option<&str>,
        nick: &str,
    ) -> Option<AccessLevel> {
        let channel = channel?;
        host.member_symbols(channel, nick)
            .map(|symbols| self.permissions.level_for(&symbols))
    }

    /// Dispatch a message if it is a command
    ///
    /// Handler failures are logged and reported as [`DispatchOutcome::Failed`]; only
    /// delegate errors are returned.
    pub async fn dispatch(&self, host: Arc<dyn CommandHost>, msg: &Message) -> Result<DispatchOutcome> {
        if msg.command != Command::PrivMsg {
            return Ok(DispatchOutcome::NotACommand);
        }
        let (Some(target), Some(text), Some(sender)) = (msg.arg(0), msg.arg(1), msg.source_nick())
        else {
            return Ok(DispatchOutcome::NotACommand);
        };
        let Some(body) = text.strip_prefix(self.prefix) else {
            return Ok(DispatchOutcome::NotACommand);
        };
        if host.case_mapping().names_equal(sender, &host.nickname()) {
            return Ok(DispatchOutcome::NotACommand);
        }

        let body = body.trim_start();
        let (word, rest) = body
            .split_once(char::is_whitespace)
            .map(|(w, r)| (w, r.trim()))
            .unwrap_or((body, ""));
        if word.is_empty() {
            return Ok(DispatchOutcome::NotACommand);
        }
        let command = word.to_lowercase();

        let Some(handler) = self.handlers.get(&command).cloned() else {
            tracing::debug!(bot = %host.bot_name(), "Ignoring unknown command {} from {}", command, sender);
            return Ok(DispatchOutcome::Unknown);
        };

        let (reply_to, lookup_channel) = if host.is_channel_name(target) {
            (ReplyTarget::Channel(target.to_string()), Some(target.to_string()))
        } else {
            (ReplyTarget::Private(sender.to_string()), host.echo_channel())
        };
        let level = self.resolve_level(host.as_ref(), lookup_channel.as_deref(), sender);

        let ctx = CommandContext {
            host: Arc::clone(&host),
            sender: sender.to_string(),
            source: msg.source.clone().unwrap_or_default(),
            level,
            target: reply_to,
            command: command.clone(),
            args: rest.split_whitespace().map(str::to_string).collect(),
            rest: rest.to_string(),
            prefix: self.prefix,
            catalog: Arc::clone(&self.catalog),
        };

        let required = handler.min_level();
        if required > AccessLevel::None {
            match level {
                None => {
                    tracing::info!(
                        bot = %host.bot_name(),
                        "No membership data for {} running {}, refusing",
                        sender,
                        command
                    );
                    self.delegate.unresolved(&ctx, required).await?;
                    return Ok(DispatchOutcome::Unresolved);
                }
                Some(level) if level < required => {
                    tracing::info!(
                        bot = %host.bot_name(),
                        "Denied {} to {} ({} < {})",
                        command,
                        sender,
                        level,
                        required
                    );
                    self.delegate.denied(&ctx, required).await?;
                    return Ok(DispatchOutcome::Denied);
                }
                Some(_) => {}
            }
        }

        tracing::debug!(bot = %host.bot_name(), "Running {} for {}", command, sender);
        match handler.execute(&ctx).await {
            Ok(()) => Ok(DispatchOutcome::Executed),
            Err(e) => {
                tracing::error!(bot = %host.bot_name(), "Command {} failed: {}", command, e);
                Ok(DispatchOutcome::Failed(e.to_string()))
            }
        }
    }
}
