//! Scripted command host shared by the handler tests

use chrono::{DateTime, Utc};
use ircbridge_core::{CommandHost, CommandManager, DispatchOutcome, Message, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Host with one synchronised channel, `#ops`
pub struct TestHost {
    pub members: HashMap<String, Vec<char>>,
    pub echo: Option<String>,
    pub network: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub sent: Mutex<Vec<String>>,
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
            echo: Some("#ops".to_string()),
            network: None,
            since: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_member(mut self, nick: &str, symbols: &str) -> Self {
        self.members.insert(nick.to_string(), symbols.chars().collect());
        self
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

impl CommandHost for TestHost {
    fn bot_name(&self) -> String {
        "main@test".to_string()
    }

    fn nickname(&self) -> String {
        "bridge".to_string()
    }

    fn member_symbols(&self, channel: &str, nick: &str) -> Option<Vec<char>> {
        if channel != "#ops" {
            return None;
        }
        Some(self.members.get(nick).cloned().unwrap_or_default())
    }

    fn echo_channel(&self) -> Option<String> {
        self.echo.clone()
    }

    fn is_channel_name(&self, target: &str) -> bool {
        target.starts_with('#')
    }

    fn send_line(&self, line: &str) -> Result<()> {
        self.sent.lock().push(line.to_string());
        Ok(())
    }

    fn network_name(&self) -> Option<String> {
        self.network.clone()
    }

    fn joined_channels(&self) -> Vec<String> {
        vec!["#ops".to_string()]
    }

    fn connected_since(&self) -> Option<DateTime<Utc>> {
        self.since
    }
}

/// Run one line through a manager holding the built-in commands
pub async fn run(host: &Arc<TestHost>, line: &str) -> DispatchOutcome {
    let mut manager = CommandManager::new('!', Default::default());
    crate::register_builtin_commands(&mut manager).unwrap();
    let msg = Message::parse(line).unwrap();
    let host: Arc<dyn CommandHost> = host.clone();
    manager.dispatch(host, &msg).await.unwrap()
}
