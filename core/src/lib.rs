//! IRC Bridge Core
//!
//! This crate provides the runtime that keeps bots connected to IRC servers, tracks what
//! each server advertises and who holds which channel status, and dispatches prefixed
//! commands to handlers after checking the sender's access level.

pub mod backoff;
pub mod bot;
pub mod buffer;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod membership;
pub mod message;
pub mod modes;
pub mod network;
pub mod numeric;
pub mod runtime;


pub use backoff::BackoffPolicy;
pub use bot::{Bot, BotState};
pub use buffer::{ConnectionTiming, LineBuffer};
pub use command::{
    AccessLevel, CommandContext, CommandHandler, CommandHost, CommandManager, CommandSummary,
    DefaultPermissionDelegate, DispatchOutcome, PermissionDelegate, PermissionTable, ReplyTarget,
};
pub use config::{
    ChannelConfig, CommandConfig, Config, IdentityConfig, KeepaliveConfig, KeepaliveSettings,
    PermissionEntry, ReconnectConfig, ServerConfig,
};
pub use connection::{
    Connection, ConnectionEvent, ConnectionSettings, ConnectionState, ConnectionStatus, Connector,
    Registration, TcpConnector, Transport,
};
pub use error::{Error, Result};
pub use membership::{CaseMapping, ChannelMembership, ChannelState, Member};
pub use message::{Command, Message, Prefix};
pub use modes::{ModeChange, ModeEntry, ModeKind, ModeParser};
pub use network::{NetworkTracker, SupportChange, SupportValue};
pub use numeric::NumericReply;
pub use runtime::Runtime;

/// Re-exports for convenience
pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
pub use tracing::{debug, error, info, warn};
