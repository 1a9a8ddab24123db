//! Configuration management

use crate::backoff::BackoffPolicy;
use crate::command::{AccessLevel, PermissionTable};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Identities the bridge connects as
    pub identities: Vec<IdentityConfig>,
    /// Servers every identity connects to
    pub servers: Vec<ServerConfig>,
    /// Channels joined once registered
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    /// Reconnection backoff
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Client-side keepalive
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
    /// Command dispatch settings
    #[serde(default)]
    pub commands: CommandConfig,
    /// Ordered prefix symbol to access level table
    #[serde(default = "default_permissions")]
    pub permissions: Vec<PermissionEntry>,
}

/// One identity (nick and credentials)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Name used in logs
    pub name: String,
    /// Requested nickname
    pub nickname: String,
    /// Username sent in USER
    pub username: String,
    /// Real name sent in USER
    pub realname: String,
    /// Server password sent in PASS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Password sent to NickServ once registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickserv_password: Option<String>,
    /// Whether this identity answers commands and carries echo broadcasts
    #[serde(default)]
    pub primary: bool,
}

/// One target server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name used in logs
    pub name: String,
    /// Hostname or address
    pub host: String,
    /// Port
    pub port: u16,
    /// Whether to wrap the link in TLS
    #[serde(default)]
    pub tls: bool,
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One channel to join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name
    pub name: String,
    /// Channel key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Marks the administrative broadcast channel
    #[serde(default)]
    pub echo: bool,
}

/// Reconnection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect
    pub base_delay_ms: u64,
    /// Upper bound on any delay
    pub max_delay_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_secs: 300,
        }
    }
}

impl ReconnectConfig {
    /// Backoff policy described by this section
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_secs(self.max_delay_secs),
        )
    }
}

/// Keepalive settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Whether client-side PINGs are sent
    pub enabled: bool,
    /// Silence before a PING is sent
    pub ping_interval_secs: u64,
    /// Silence before the link is dropped
    pub timeout_secs: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ping_interval_secs: 120,
            timeout_secs: 300,
        }
    }
}

/// Keepalive durations handed to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveSettings {
    pub ping_interval: Duration,
    pub timeout: Duration,
}

impl KeepaliveConfig {
    /// Durations, or `None` when disabled
    pub fn settings(&self) -> Option<KeepaliveSettings> {
        self.enabled.then(|| KeepaliveSettings {
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

/// Command dispatch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Character that starts a command
    pub prefix: char,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self { prefix: '!' }
    }
}

/// One row of the permission table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    /// Membership prefix symbol
    pub symbol: char,
    /// Level granted by that symbol
    pub level: AccessLevel,
}

/// Default permission table, highest rank first
pub fn default_permissions() -> Vec<PermissionEntry> {
    [
        ('~', AccessLevel::Owner),
        ('&', AccessLevel::Admin),
        ('@', AccessLevel::Operator),
        ('%', AccessLevel::HalfOp),
        ('+', AccessLevel::Voice),
    ]
    .into_iter()
    .map(|(symbol, level)| PermissionEntry { symbol, level })
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identities: vec![IdentityConfig {
                name: "bridge".to_string(),
                nickname: "ircbridge".to_string(),
                username: "ircbridge".to_string(),
                realname: "IRC bridge".to_string(),
                password: None,
                nickserv_password: None,
                primary: true,
            }],
            servers: vec![ServerConfig {
                name: "libera".to_string(),
                host: "irc.libera.chat".to_string(),
                port: 6697,
                tls: true,
            }],
            channels: vec![ChannelConfig {
                name: "#ircbridge".to_string(),
                key: None,
                echo: true,
            }],
            reconnect: ReconnectConfig::default(),
            keepalive: KeepaliveConfig::default(),
            commands: CommandConfig::default(),
            permissions: default_permissions(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.identities.is_empty() {
            return Err(Error::Config("At least one identity must be configured".to_string()));
        }
        for identity in &self.identities {
            if identity.nickname.is_empty() || identity.nickname.contains(' ') {
                return Err(Error::Config(format!(
                    "Identity {} has an invalid nickname",
                    identity.name
                )));
            }
        }
        if self.identities.iter().filter(|i| i.primary).count() != 1 {
            return Err(Error::Config("Exactly one identity must be primary".to_string()));
        }

        if self.servers.is_empty() {
            return Err(Error::Config("At least one server must be configured".to_string()));
        }
        let mut seen_names = HashSet::new();
        for server in &self.servers {
            if server.port == 0 {
                return Err(Error::Config(format!("Server {} port cannot be 0", server.name)));
            }
            if server.host.is_empty() {
                return Err(Error::Config(format!("Server {} host cannot be empty", server.name)));
            }
            if !seen_names.insert(server.name.as_str()) {
                return Err(Error::Config(format!("Duplicate server name: {}", server.name)));
            }
        }

        for channel in &self.channels {
            if channel.name.trim().is_empty() {
                return Err(Error::Config("Channel name cannot be empty".to_string()));
            }
        }
        if self.channels.iter().filter(|c| c.echo).count() > 1 {
            return Err(Error::Config("Only one channel can be the echo channel".to_string()));
        }

        if self.reconnect.base_delay_ms == 0 {
            return Err(Error::Config("Reconnect base_delay_ms cannot be 0".to_string()));
        }
        if self.reconnect.max_delay_secs == 0 {
            return Err(Error::Config("Reconnect max_delay_secs cannot be 0".to_string()));
        }

        if self.keepalive.enabled && self.keepalive.timeout_secs <= self.keepalive.ping_interval_secs {
            return Err(Error::Config(
                "Keepalive timeout must be greater than the ping interval".to_string(),
            ));
        }

        if self.commands.prefix.is_whitespace() {
            return Err(Error::Config("Command prefix cannot be whitespace".to_string()));
        }

        Ok(())
    }

    /// The echo channel, if one is configured
    pub fn echo_channel(&self) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.echo)
    }

    /// Permission table built from the `[[permissions]]` rows
    pub fn permission_table(&self) -> PermissionTable {
        PermissionTable::from_entries(&self.permissions)
    }

    /// Backoff policy for reconnects
    pub fn backoff(&self) -> BackoffPolicy {
        self.reconnect.policy()
    }
}
