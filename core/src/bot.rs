//! One bot: a connection plus the per-server protocol state it feeds
//!
//! Every event from the connection is handled in order by a single task. Capability
//! lines update the [`NetworkTracker`] and, when `PREFIX`/`CHANMODES` change, rebuild the
//! [`ModeParser`]. Channel traffic keeps [`ChannelMembership`] current, and on the
//! primary identity PRIVMSG lines are handed to the [`CommandManager`].

use crate::command::{CommandHost, CommandManager, DispatchOutcome};
use crate::config::{ChannelConfig, IdentityConfig, ServerConfig};
use crate::connection::{
    Connection, ConnectionEvent, ConnectionSettings, ConnectionState, ConnectionStatus,
    Connector, Registration,
};
use crate::membership::{CaseMapping, ChannelMembership};
use crate::message::{Command, Message};
use crate::modes::{ModeKind, ModeParser};
use crate::network::{NetworkTracker, SupportValue};
use crate::numeric::NumericReply;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const DEFAULT_PREFIX: &str = "(ov)@+";
const DEFAULT_CHANMODES: &str = "b,k,l,imnpst";

/// Protocol state rebuilt from scratch on every registration
#[derive(Debug)]
pub struct BotState {
    pub tracker: NetworkTracker,
    pub modes: ModeParser,
    pub membership: ChannelMembership,
    pub registered_at: Option<DateTime<Utc>>,
}

impl BotState {
    fn new() -> Self {
        Self {
            tracker: NetworkTracker::new(),
            modes: ModeParser::rfc1459(),
            membership: ChannelMembership::new(),
            registered_at: None,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    /// Rebuild the mode table from the advertised rules, defaults filling the gaps
    fn rebuild_modes(&mut self) {
        let mut modes = ModeParser::new();
        let chanmodes = match self.tracker.support_rule("CHANMODES") {
            Some(SupportValue::Value(value)) => value.as_str(),
            _ => DEFAULT_CHANMODES,
        };
        if !modes.set_channel_modes(chanmodes) {
            modes.set_channel_modes(DEFAULT_CHANMODES);
        }
        let prefix = match self.tracker.support_rule("PREFIX") {
            Some(SupportValue::Value(value)) => value.as_str(),
            Some(SupportValue::Flag) => "()",
            None => DEFAULT_PREFIX,
        };
        if !modes.set_channel_prefixes(prefix) {
            modes.set_channel_prefixes(DEFAULT_PREFIX);
        }
        self.modes = modes;
    }
}

/// Work left over after state was updated under the lock
#[derive(Debug, PartialEq, Eq)]
enum FollowUp {
    /// Kicked from a configured channel
    Rejoin(ChannelConfig),
    /// Server refused a JOIN we sent
    JoinRefused { channel: String, reason: String },
}

struct BotInner {
    name: String,
    identity: IdentityConfig,
    channels: Vec<ChannelConfig>,
    connection: Connection,
    commands: Arc<CommandManager>,
    state: Mutex<BotState>,
    events_task: Mutex<Option<JoinHandle<()>>>,
}

/// Cheaply cloneable handle to one bot
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

impl Bot {
    pub fn new(
        identity: IdentityConfig,
        server: ServerConfig,
        channels: Vec<ChannelConfig>,
        settings: ConnectionSettings,
        connector: Arc<dyn Connector>,
        commands: Arc<CommandManager>,
    ) -> Self {
        let name = format!("{}@{}", identity.name, server.name);
        let connection = Connection::new(
            name.clone(),
            server,
            Registration::from_identity(&identity),
            settings,
            connector,
        );
        Self {
            inner: Arc::new(BotInner {
                name,
                identity,
                channels,
                connection,
                commands,
                state: Mutex::new(BotState::new()),
                events_task: Mutex::new(None),
            }),
        }
    }

    /// `identity@server`
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn identity(&self) -> &IdentityConfig {
        &self.inner.identity
    }

    pub fn server(&self) -> &ServerConfig {
        self.inner.connection.server()
    }

    /// Whether this bot answers commands and carries echo broadcasts
    pub fn is_primary(&self) -> bool {
        self.inner.identity.primary
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.connection.status()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.connection.subscribe()
    }

    pub fn nickname(&self) -> String {
        self.inner.connection.nickname()
    }

    /// Connect and start handling events
    pub fn start(&self) -> Result<()> {
        let mut task = self.inner.events_task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(Error::Connection(format!("{} is already running", self.name())));
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        self.inner.connection.connect(events_tx)?;

        let bot = self.clone();
        *task = Some(tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                bot.handle_event(event).await;
            }
            tracing::debug!(bot = %bot.name(), "Event stream ended");
        }));
        tracing::info!(bot = %self.name(), server = %self.server(), "Bot started");
        Ok(())
    }

    /// Disconnect and wait for pending events to drain
    pub async fn stop(&self, reason: &str) {
        self.inner.connection.disconnect(reason).await;
        let task = self.inner.events_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(bot = %self.name(), "Event task ended abnormally: {}", e);
            }
        }
        self.inner.state.lock().reset();
        tracing::info!(bot = %self.name(), "Bot stopped");
    }

    /// Queue one raw line; fails with `NotConnected` unless registered
    pub fn send(&self, line: &str) -> Result<()> {
        self.inner.connection.send(line)
    }

    /// Send text to a target, one PRIVMSG per non-empty line
    pub fn send_message(&self, target: &str, text: &str) -> Result<()> {
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            self.send(&Message::privmsg(target, line).to_line())?;
        }
        Ok(())
    }

    /// Send text to the echo channel
    pub fn send_echo(&self, text: &str) -> Result<()> {
        let channel = self
            .echo_channel_config()
            .ok_or_else(|| Error::Config("No echo channel configured".to_string()))?;
        self.send_message(&channel.name, text)
    }

    fn echo_channel_config(&self) -> Option<&ChannelConfig> {
        self.inner.channels.iter().find(|c| c.echo)
    }

    /// Prefix symbols a member currently holds; `None` before registration, when not in
    /// the channel, or before its member list has been received
    pub fn member_symbols(&self, channel: &str, nick: &str) -> Option<Vec<char>> {
        if !self.inner.connection.is_ready() {
            return None;
        }
        let state = self.inner.state.lock();
        if state.registered_at.is_none() {
            return None;
        }
        state.membership.member_symbols(channel, nick)
    }

    /// Advertised capability rule
    pub fn support_rule(&self, key: &str) -> Option<SupportValue> {
        self.inner.state.lock().tracker.support_rule(key).cloned()
    }

    /// How a mode character behaves on this server
    pub fn classify_mode(&self, code: char) -> Option<ModeKind> {
        self.inner.state.lock().modes.classify(code)
    }

    /// Membership symbols the server uses, highest first
    pub fn prefix_symbols(&self) -> Vec<char> {
        self.inner.state.lock().modes.prefix_symbols()
    }

    /// Channels currently joined
    pub fn joined_channels(&self) -> Vec<String> {
        self.inner.state.lock().membership.channel_names()
    }

    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().registered_at
    }

    async fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Registered { nickname } => self.on_registered(&nickname),
            ConnectionEvent::Message(msg) => {
                if let Err(e) = self.handle_message(&msg).await {
                    tracing::warn!(bot = %self.name(), "Failed to handle {}: {}", msg.command, e);
                }
            }
            ConnectionEvent::Disconnected { attempt, reason } => {
                tracing::debug!(bot = %self.name(), attempt, "Dropping state after disconnect: {}", reason);
                self.inner.state.lock().reset();
            }
        }
    }

    fn on_registered(&self, nickname: &str) {
        {
            let mut state = self.inner.state.lock();
            state.reset();
            state.registered_at = Some(Utc::now());
        }
        tracing::info!(bot = %self.name(), server = %self.server(), "Registered as {}", nickname);

        if let Some(password) = &self.inner.identity.nickserv_password {
            let identify = Message::privmsg("NickServ", &format!("IDENTIFY {}", password));
            if let Err(e) = self.send(&identify.to_line()) {
                tracing::warn!(bot = %self.name(), "Failed to identify with NickServ: {}", e);
            }
        }

        for channel in &self.inner.channels {
            self.join(channel);
        }
    }

    fn join(&self, channel: &ChannelConfig) {
        let join = Message::join(&channel.name, channel.key.as_deref());
        if let Err(e) = self.send(&join.to_line()) {
            tracing::warn!(bot = %self.name(), "Failed to join {}: {}", channel.name, e);
        }
    }

    /// Apply one inbound message to the bot's state and, on the primary bot, dispatch it
    /// if it is a command. Only the event task calls this, one message at a time.
    pub(crate) async fn handle_message(&self, msg: &Message) -> Result<Option<DispatchOutcome>> {
        let follow_up = {
            let mut state = self.inner.state.lock();
            self.apply(&mut state, msg)
        };

        match follow_up {
            Some(FollowUp::Rejoin(channel)) => {
                tracing::info!(bot = %self.name(), "Kicked from {}, rejoining", channel.name);
                self.join(&channel);
            }
            Some(FollowUp::JoinRefused { channel, reason }) => {
                tracing::warn!(
                    bot = %self.name(),
                    server = %self.server(),
                    "Could not join {}: {}",
                    channel,
                    reason
                );
            }
            None => {}
        }

        if msg.command == Command::PrivMsg && self.is_primary() {
            let host: Arc<dyn CommandHost> = Arc::new(self.clone());
            let outcome = self.inner.commands.dispatch(host, msg).await?;
            return Ok(Some(outcome));
        }
        Ok(None)
    }

    fn is_self(&self, state: &BotState, nick: &str) -> bool {
        state
            .membership
            .case_mapping()
            .names_equal(nick, &self.inner.connection.nickname())
    }

    fn apply(&self, state: &mut BotState, msg: &Message) -> Option<FollowUp> {
        let nick = msg.source_nick();
        match (&msg.command, nick) {
            (Command::Numeric(_), _) => return self.apply_numeric(state, msg),
            (Command::Join, Some(nick)) => {
                let channel = msg.arg(0)?;
                if self.is_self(state, nick) {
                    state.membership.join_self(channel);
                } else {
                    state.membership.add_member(channel, nick);
                }
            }
            (Command::Part, Some(nick)) => {
                let channel = msg.arg(0)?;
                if self.is_self(state, nick) {
                    state.membership.part_self(channel);
                } else {
                    state.membership.remove_member(channel, nick);
                }
            }
            (Command::Kick, _) => {
                let channel = msg.arg(0)?;
                let victim = msg.arg(1)?;
                if self.is_self(state, victim) {
                    state.membership.part_self(channel);
                    let case_mapping = state.membership.case_mapping();
                    return self
                        .inner
                        .channels
                        .iter()
                        .find(|c| case_mapping.names_equal(&c.name, channel))
                        .cloned()
                        .map(FollowUp::Rejoin);
                }
                state.membership.remove_member(channel, victim);
            }
            (Command::Quit, Some(nick)) => {
                state.membership.remove_everywhere(nick);
            }
            (Command::Nick, Some(nick)) => {
                let new = msg.arg(0)?;
                state.membership.rename(nick, new);
            }
            (Command::Mode, _) => {
                let args: Vec<&str> = msg.args().collect();
                let (target, modestring) = (*args.first()?, *args.get(1)?);
                if !state.tracker.is_channel_name(target) {
                    return None;
                }
                for change in state.modes.parse_changes(modestring, &args[2..]) {
                    let (Some(symbol), Some(member)) =
                        (state.modes.symbol_for_mode(change.mode), change.argument.as_deref())
                    else {
                        continue;
                    };
                    if change.adding {
                        state.membership.add_symbol(target, member, symbol);
                    } else {
                        state.membership.remove_symbol(target, member, symbol);
                    }
                }
            }
            _ => {}
        }
        None
    }

    fn apply_numeric(&self, state: &mut BotState, msg: &Message) -> Option<FollowUp> {
        match msg.numeric_reply() {
            Some(NumericReply::RplISupport) => {
                let changes = state.tracker.handle_message(msg);
                if changes
                    .iter()
                    .any(|c| matches!(c.key(), "PREFIX" | "CHANMODES"))
                {
                    state.rebuild_modes();
                    tracing::debug!(
                        bot = %self.name(),
                        "Mode table rebuilt, prefixes {:?}",
                        state.modes.prefix_symbols()
                    );
                }
                if changes.iter().any(|c| c.key() == "CASEMAPPING") {
                    let case_mapping = state.tracker.case_mapping();
                    state.membership.set_case_mapping(case_mapping);
                }
            }
            Some(NumericReply::RplNameReply) => {
                let (Some(channel), Some(names)) = (msg.params.last(), msg.trailing.as_deref())
                else {
                    return None;
                };
                for entry in names.split_whitespace() {
                    let (symbols, nick) = state.modes.split_prefixed_nick(entry);
                    // userhost-in-names form
                    let nick = nick.split('!').next().unwrap_or(nick);
                    if !nick.is_empty() {
                        state.membership.set_member_symbols(channel, nick, symbols);
                    }
                }
            }
            Some(NumericReply::RplEndOfNames) => {
                if let Some(channel) = msg.arg(1) {
                    state.membership.mark_synced(channel);
                }
            }
            Some(reply) if reply.is_join_refusal() => {
                let channel = msg.arg(1)?;
                let reason = msg.trailing.as_deref().unwrap_or_default();
                return Some(FollowUp::JoinRefused {
                    channel: channel.to_string(),
                    reason: format!("{} ({})", reason, reply.code()),
                });
            }
            _ => {}
        }
        None
    }
}

impl CommandHost for Bot {
    fn bot_name(&self) -> String {
        self.inner.name.clone()
    }

    fn nickname(&self) -> String {
        Bot::nickname(self)
    }

    fn member_symbols(&self, channel: &str, nick: &str) -> Option<Vec<char>> {
        Bot::member_symbols(self, channel, nick)
    }

    fn echo_channel(&self) -> Option<String> {
        self.echo_channel_config().map(|c| c.name.clone())
    }

    fn is_channel_name(&self, target: &str) -> bool {
        self.inner.state.lock().tracker.is_channel_name(target)
    }

    fn send_line(&self, line: &str) -> Result<()> {
        self.send(line)
    }

    fn network_name(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .tracker
            .network_name()
            .map(str::to_string)
    }

    fn joined_channels(&self) -> Vec<String> {
        Bot::joined_channels(self)
    }

    fn case_mapping(&self) -> CaseMapping {
        self.inner.state.lock().membership.case_mapping()
    }

    fn connected_since(&self) -> Option<DateTime<Utc>> {
        self.registered_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::PermissionTable;
    use crate::connection::TcpConnector;

    fn isupport(tokens: &str) -> Message {
        Message::parse(&format!(":srv 005 bridge {} :are supported", tokens)).unwrap()
    }

    fn line(text: &str) -> Message {
        Message::parse(text).unwrap()
    }

    /// Never started, so nothing touches the network
    fn idle_bot(channel: &str) -> Bot {
        Bot::new(
            IdentityConfig {
                name: "main".to_string(),
                nickname: "bridge".to_string(),
                username: "bridge".to_string(),
                realname: "Bridge".to_string(),
                password: None,
                nickserv_password: None,
                primary: true,
            },
            ServerConfig {
                name: "test".to_string(),
                host: "irc.test".to_string(),
                port: 6667,
                tls: false,
            },
            vec![ChannelConfig {
                name: channel.to_string(),
                key: Some("sekrit".to_string()),
                echo: true,
            }],
            ConnectionSettings::default(),
            Arc::new(TcpConnector::new()),
            Arc::new(CommandManager::new('!', PermissionTable::default())),
        )
    }

    #[test]
    fn test_kick_rejoin_follows_case_mapping() {
        let bot = idle_bot("#[ops]");
        let mut state = BotState::new();
        state.tracker.handle_message(&isupport("CASEMAPPING=rfc1459"));
        state.membership.set_case_mapping(state.tracker.case_mapping());
        bot.apply(&mut state, &line(":bridge!b@h JOIN #[ops]"));

        let follow_up = bot.apply(&mut state, &line(":op!o@h KICK #{OPS} Bridge :out"));
        let Some(FollowUp::Rejoin(channel)) = &follow_up else {
            panic!("expected a rejoin, got {:?}", follow_up);
        };
        assert_eq!(channel.name, "#[ops]");
        assert_eq!(channel.key.as_deref(), Some("sekrit"));
        assert!(state.membership.channel_names().is_empty());

        // Under ascii the brackets are distinct, so this is some other channel
        let mut state = BotState::new();
        state.membership.set_case_mapping(CaseMapping::Ascii);
        bot.apply(&mut state, &line(":bridge!b@h JOIN #{ops}"));
        assert_eq!(bot.apply(&mut state, &line(":op!o@h KICK #{ops} bridge")), None);
    }

    #[test]
    fn test_join_refusal_is_reported() {
        let bot = idle_bot("#ops");
        let mut state = BotState::new();

        let follow_up = bot.apply(
            &mut state,
            &line(":irc.test 474 bridge #ops :Cannot join channel (+b)"),
        );
        assert_eq!(
            follow_up,
            Some(FollowUp::JoinRefused {
                channel: "#ops".to_string(),
                reason: "Cannot join channel (+b) (474)".to_string(),
            })
        );
        assert!(!state.membership.is_joined("#ops"));
        assert_eq!(bot.apply(&mut state, &line(":irc.test 433 * bridge :in use")), None);
    }

    #[test]
    fn test_rebuild_modes_from_isupport() {
        let mut state = BotState::new();
        assert_eq!(state.modes.prefix_symbols(), vec!['@', '+']);

        state.tracker.handle_message(&isupport("PREFIX=(qaohv)~&@%+ CHANMODES=beI,k,l,imnt"));
        state.rebuild_modes();
        assert_eq!(state.modes.prefix_symbols(), vec!['~', '&', '@', '%', '+']);
        assert_eq!(state.modes.classify('I'), Some(ModeKind::WithParameter));
        assert_eq!(state.modes.classify('s'), None);

        state.tracker.handle_message(&isupport("-PREFIX"));
        state.rebuild_modes();
        assert_eq!(state.modes.prefix_symbols(), vec!['@', '+']);
        assert_eq!(state.modes.classify('I'), Some(ModeKind::WithParameter));
    }

    #[test]
    fn test_malformed_isupport_falls_back() {
        let mut state = BotState::new();
        state.tracker.handle_message(&isupport("PREFIX=garbage CHANMODES=b"));
        state.rebuild_modes();
        assert_eq!(state.modes.prefix_symbols(), vec!['@', '+']);
        assert_eq!(state.modes.classify('k'), Some(ModeKind::WithParameter));
    }
}
