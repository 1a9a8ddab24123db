//! Runtime: owns every configured bot and starts/stops them together

use crate::bot::Bot;
use crate::command::CommandManager;
use crate::config::Config;
use crate::connection::{ConnectionSettings, Connector, TcpConnector};
use crate::{Error, Result};
use std::sync::Arc;

/// The set of bots built from one configuration
pub struct Runtime {
    config: Arc<Config>,
    commands: Arc<CommandManager>,
    bots: Vec<Bot>,
}

impl Runtime {
    /// Build bots that connect over TCP
    pub fn new(config: Config, commands: CommandManager) -> Result<Self> {
        Self::with_connector(config, commands, Arc::new(TcpConnector::new()))
    }

    /// Build one bot per (identity, server) pair using the given connector
    pub fn with_connector(
        config: Config,
        commands: CommandManager,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let commands = Arc::new(commands);
        let settings = ConnectionSettings {
            backoff: config.backoff(),
            keepalive: config.keepalive.settings(),
        };

        let bots = config
            .identities
            .iter()
            .flat_map(|identity| {
                config.servers.iter().map(|server| {
                    Bot::new(
                        identity.clone(),
                        server.clone(),
                        config.channels.clone(),
                        settings,
                        Arc::clone(&connector),
                        Arc::clone(&commands),
                    )
                })
            })
            .collect::<Vec<_>>();

        tracing::info!(
            "Runtime built with {} bots ({} identities, {} servers, {} commands)",
            bots.len(),
            config.identities.len(),
            config.servers.len(),
            commands.commands().len()
        );

        Ok(Self {
            config,
            commands,
            bots,
        })
    }

    /// Start every bot
    pub fn start(&self) -> Result<()> {
        for bot in &self.bots {
            bot.start()?;
        }
        Ok(())
    }

    /// Stop every bot, waiting for each to finish
    pub async fn shutdown(&self, reason: &str) {
        tracing::info!("Shutting down {} bots", self.bots.len());
        for bot in &self.bots {
            bot.stop(reason).await;
        }
    }

    pub fn bots(&self) -> &[Bot] {
        &self.bots
    }

    /// Bot by `identity@server` name
    pub fn bot(&self, name: &str) -> Option<&Bot> {
        self.bots.iter().find(|b| b.name() == name)
    }

    /// Bots of the primary identity
    pub fn primary_bots(&self) -> impl Iterator<Item = &Bot> {
        self.bots.iter().filter(|b| b.is_primary())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn commands(&self) -> &Arc<CommandManager> {
        &self.commands
    }

    /// Send a raw line through every connected bot; returns how many accepted it
    pub fn broadcast(&self, line: &str) -> usize {
        self.bots
            .iter()
            .filter(|bot| match bot.send(line) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(bot = %bot.name(), "Broadcast skipped: {}", e);
                    false
                }
            })
            .count()
    }

    /// Send text to the echo channel through every connected primary bot
    ///
    /// Fails only when no echo channel is configured; disconnected bots are skipped.
    pub fn broadcast_echo(&self, text: &str) -> Result<usize> {
        if self.config.echo_channel().is_none() {
            return Err(Error::Config("No echo channel configured".to_string()));
        }

        let delivered = self
            .primary_bots()
            .filter(|bot| match bot.send_echo(text) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(bot = %bot.name(), "Echo skipped: {}", e);
                    false
                }
            })
            .count();
        Ok(delivered)
    }
}
