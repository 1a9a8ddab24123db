//! IRC message parsing and formatting
//!
//! This module implements the line format defined in RFC 1459 section 2.3.1 as seen
//! from the client side of a connection.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Message source (server or user)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prefix {
    /// Server name
    Server(String),
    /// User prefix (nick!user@host)
    User {
        nick: String,
        user: Option<String>,
        host: Option<String>,
    },
}

impl Prefix {
    /// Split a raw source into its parts
    pub fn parse(source: &str) -> Self {
        match source.split_once('!') {
            Some((nick, rest)) => {
                let (user, host) = match rest.split_once('@') {
                    Some((user, host)) => (Some(user.to_string()), Some(host.to_string())),
                    None => (Some(rest.to_string()), None),
                };
                Prefix::User {
                    nick: nick.to_string(),
                    user,
                    host,
                }
            }
            None => match source.split_once('@') {
                Some((nick, host)) => Prefix::User {
                    nick: nick.to_string(),
                    user: None,
                    host: Some(host.to_string()),
                },
                // A bare token with a dot is a server name, anything else is a nick.
                None if source.contains('.') => Prefix::Server(source.to_string()),
                None => Prefix::User {
                    nick: source.to_string(),
                    user: None,
                    host: None,
                },
            },
        }
    }

    /// Nickname for user sources
    pub fn nick(&self) -> Option<&str> {
        match self {
            Prefix::User { nick, .. } => Some(nick),
            Prefix::Server(_) => None,
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::Server(name) => write!(f, "{}", name),
            Prefix::User { nick, user, host } => {
                write!(f, "{}", nick)?;
                if let Some(user) = user {
                    write!(f, "!{}", user)?;
                }
                if let Some(host) = host {
                    write!(f, "@{}", host)?;
                }
                Ok(())
            }
        }
    }
}

/// IRC commands the bridge sends or reacts to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Pass,
    Nick,
    User,
    Join,
    Part,
    Kick,
    Mode,
    Quit,
    PrivMsg,
    Notice,
    Ping,
    Pong,
    Error,
    /// Three-digit numeric reply
    Numeric(u16),
    /// Anything else, upper-cased
    Other(String),
}

impl Command {
    /// Numeric code, if this is a numeric reply
    pub fn numeric(&self) -> Option<u16> {
        match self {
            Command::Numeric(code) => Some(*code),
            _ => None,
        }
    }

    /// Canonical form: `Other` upper-cased, or mapped to the known variant it names
    pub fn normalized(self) -> Self {
        match self {
            Command::Other(name) => Command::from(name.as_str()),
            command => command,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Pass => "PASS",
            Command::Nick => "NICK",
            Command::User => "USER",
            Command::Join => "JOIN",
            Command::Part => "PART",
            Command::Kick => "KICK",
            Command::Mode => "MODE",
            Command::Quit => "QUIT",
            Command::PrivMsg => "PRIVMSG",
            Command::Notice => "NOTICE",
            Command::Ping => "PING",
            Command::Pong => "PONG",
            Command::Error => "ERROR",
            Command::Numeric(code) => return write!(f, "{:03}", code),
            Command::Other(cmd) => cmd,
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        if s.len() == 3 && s.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(code) = s.parse::<u16>() {
                return Command::Numeric(code);
            }
        }
        match s.to_ascii_uppercase().as_str() {
            "PASS" => Command::Pass,
            "NICK" => Command::Nick,
            "USER" => Command::User,
            "JOIN" => Command::Join,
            "PART" => Command::Part,
            "KICK" => Command::Kick,
            "MODE" => Command::Mode,
            "QUIT" => Command::Quit,
            "PRIVMSG" => Command::PrivMsg,
            "NOTICE" => Command::Notice,
            "PING" => Command::Ping,
            "PONG" => Command::Pong,
            "ERROR" => Command::Error,
            other => Command::Other(other.to_string()),
        }
    }
}

/// A single protocol line split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Optional source (`:source` token)
    pub source: Option<String>,
    /// Command or numeric
    pub command: Command,
    /// Middle parameters, without the trailing one
    pub params: Vec<String>,
    /// Final parameter introduced by `:`
    pub trailing: Option<String>,
}

impl Message {
    /// Create a new message
    ///
    /// Only the last parameter may be empty, contain spaces or start with `:`. Such a
    /// parameter becomes the trailing one so the line parses back to the same message.
    pub fn new(command: Command, mut params: Vec<String>) -> Self {
        let trailing = match params.last() {
            Some(last) if needs_trailing(last) => params.pop(),
            _ => None,
        };
        Self {
            source: None,
            command: command.normalized(),
            params,
            trailing,
        }
    }

    /// Set the trailing parameter
    pub fn with_trailing(mut self, trailing: impl Into<String>) -> Self {
        self.trailing = Some(trailing.into());
        self
    }

    /// Set the source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn pass(password: &str) -> Self {
        Self::new(Command::Pass, vec![password.to_string()])
    }

    pub fn nick(nickname: &str) -> Self {
        Self::new(Command::Nick, vec![nickname.to_string()])
    }

    pub fn user(username: &str, realname: &str) -> Self {
        Self::new(
            Command::User,
            vec![username.to_string(), "0".to_string(), "*".to_string()],
        )
        .with_trailing(realname)
    }

    pub fn join(channel: &str, key: Option<&str>) -> Self {
        let mut params = vec![channel.to_string()];
        if let Some(key) = key {
            params.push(key.to_string());
        }
        Self::new(Command::Join, params)
    }

    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new(Command::PrivMsg, vec![target.to_string()]).with_trailing(text)
    }

    pub fn ping(token: &str) -> Self {
        Self::new(Command::Ping, Vec::new()).with_trailing(token)
    }

    pub fn pong(token: &str) -> Self {
        Self::new(Command::Pong, Vec::new()).with_trailing(token)
    }

    pub fn quit(reason: &str) -> Self {
        Self::new(Command::Quit, Vec::new()).with_trailing(reason)
    }

    /// Parse one protocol line
    ///
    /// Line terminators are stripped if still present. IRCv3 tags are skipped.
    pub fn parse(input: &str) -> Result<Self> {
        let line = input.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(Error::MalformedMessage("empty message".to_string()));
        }

        let mut rest = line.trim_start_matches(' ');
        if rest.starts_with('@') {
            rest = rest.split_once(' ').map(|(_, r)| r).unwrap_or("");
            rest = rest.trim_start_matches(' ');
        }

        let source = match rest.strip_prefix(':') {
            Some(stripped) => {
                let (source, remainder) = stripped.split_once(' ').unwrap_or((stripped, ""));
                if source.is_empty() {
                    return Err(Error::MalformedMessage(format!("empty source in {:?}", line)));
                }
                rest = remainder.trim_start_matches(' ');
                Some(source.to_string())
            }
            None => None,
        };

        let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(Error::MalformedMessage(format!("missing command in {:?}", line)));
        }

        let mut params = Vec::new();
        let mut trailing = None;
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(text) = rest.strip_prefix(':') {
                trailing = Some(text.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, remainder)) => {
                    params.push(param.to_string());
                    rest = remainder;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Ok(Message {
            source,
            command: Command::from(command),
            params,
            trailing,
        })
    }

    /// Format as a protocol line without the terminator
    pub fn to_line(&self) -> String {
        let mut result = String::new();

        if let Some(ref source) = self.source {
            result.push(':');
            result.push_str(source);
            result.push(' ');
        }

        result.push_str(&self.command.to_string());

        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            result.push(' ');
            if i == last && self.trailing.is_none() && needs_trailing(param) {
                result.push(':');
            }
            result.push_str(param);
        }

        if let Some(ref trailing) = self.trailing {
            result.push_str(" :");
            result.push_str(trailing);
        }

        result
    }

    /// Numeric code, if this is a numeric reply
    pub fn numeric(&self) -> Option<u16> {
        self.command.numeric()
    }

    /// Parsed source
    pub fn prefix(&self) -> Option<Prefix> {
        self.source.as_deref().map(Prefix::parse)
    }

    /// Nickname part of the source (everything before `!`)
    pub fn source_nick(&self) -> Option<&str> {
        let source = self.source.as_deref()?;
        let nick = source.split(['!', '@']).next().unwrap_or(source);
        if nick.is_empty() {
            None
        } else {
            Some(nick)
        }
    }

    /// All arguments in order, the trailing one last
    pub fn args(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .map(String::as_str)
            .chain(self.trailing.as_deref())
    }

    /// Argument by position, counting the trailing parameter
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args().nth(index)
    }

    /// Number of arguments, counting the trailing parameter
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.trailing.is_some())
    }
}

/// Whether a parameter can only be written in trailing form
fn needs_trailing(param: &str) -> bool {
    param.is_empty() || param.contains(' ') || param.starts_with(':')
}

impl FromStr for Message {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Message::parse(s)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_message() {
        let msg = Message::parse("NICK alice").unwrap();
        assert_eq!(msg.command, Command::Nick);
        assert_eq!(msg.params, vec!["alice"]);
        assert!(msg.source.is_none());
        assert!(msg.trailing.is_none());
    }

    #[test]
    fn test_parse_message_with_source() {
        let msg = Message::parse(":alice!user@host PRIVMSG #channel :Hello world").unwrap();
        match msg.prefix() {
            Some(Prefix::User { nick, user, host }) => {
                assert_eq!(nick, "alice");
                assert_eq!(user.as_deref(), Some("user"));
                assert_eq!(host.as_deref(), Some("host"));
            }
            _ => panic!("Expected user prefix"),
        }
        assert_eq!(msg.command, Command::PrivMsg);
        assert_eq!(msg.params, vec!["#channel"]);
        assert_eq!(msg.trailing.as_deref(), Some("Hello world"));
        assert_eq!(msg.arg(1), Some("Hello world"));
    }

    #[test]
    fn test_parse_numeric() {
        let msg = Message::parse(":irc.example.net 001 bot :Welcome to the network").unwrap();
        assert_eq!(msg.numeric(), Some(1));
        assert_eq!(msg.prefix(), Some(Prefix::Server("irc.example.net".to_string())));
        assert_eq!(msg.command.to_string(), "001");
    }

    #[test]
    fn test_parse_tolerates_extra_spaces_and_terminator() {
        let msg = Message::parse(":srv  MODE   #chan  +o   alice\r\n").unwrap();
        assert_eq!(msg.command, Command::Mode);
        assert_eq!(msg.params, vec!["#chan", "+o", "alice"]);
    }

    #[test]
    fn test_parse_empty_trailing() {
        let msg = Message::parse("PRIVMSG #chan :").unwrap();
        assert_eq!(msg.trailing.as_deref(), Some(""));
    }

    #[test]
    fn test_parse_skips_tags() {
        let msg = Message::parse("@time=2024-01-01T00:00:00Z :nick!u@h JOIN #chan").unwrap();
        assert_eq!(msg.command, Command::Join);
        assert_eq!(msg.source_nick(), Some("nick"));
    }

    #[test]
    fn test_malformed_messages() {
        assert!(matches!(Message::parse(""), Err(Error::MalformedMessage(_))));
        assert!(matches!(Message::parse("   \r\n"), Err(Error::MalformedMessage(_))));
        assert!(matches!(Message::parse(":source"), Err(Error::MalformedMessage(_))));
        assert!(matches!(Message::parse(":source   "), Err(Error::MalformedMessage(_))));
        assert!(matches!(Message::parse(": PING"), Err(Error::MalformedMessage(_))));
    }

    #[test]
    fn test_many_params_are_kept() {
        let line = ":srv 005 bot A B C D E F G H I J K L M N O :are supported by this server";
        let msg = Message::parse(line).unwrap();
        assert_eq!(msg.params.len(), 16);
        assert_eq!(msg.arg_count(), 17);
    }

    #[test]
    fn test_round_trip() {
        let lines = [
            "NICK alice",
            ":alice!user@host PRIVMSG #channel :Hello world",
            ":srv 353 bot = #chan :@alice +bob carol",
            "PING :irc.example.net",
            ":srv MODE #chan +kl secret 10",
            "QUIT :",
        ];
        for line in lines {
            let msg = Message::parse(line).unwrap();
            assert_eq!(msg.to_line(), line);
            assert_eq!(Message::parse(&msg.to_line()).unwrap(), msg);
        }
    }

    #[test]
    fn test_built_messages_parse_back() {
        let commands = [
            Command::PrivMsg,
            Command::Numeric(1),
            Command::Other("foo".to_string()),
            Command::Other("notice".to_string()),
        ];
        let params: [&[&str]; 6] = [
            &[],
            &["#a"],
            &["#a", "hello world"],
            &["#a", ""],
            &["#a", ":key"],
            &["bot", "=", "#a", "@alice +bob"],
        ];
        for command in &commands {
            for args in &params {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                for source in [None, Some("nick!user@host")] {
                    let mut msg = Message::new(command.clone(), args.clone());
                    if let Some(source) = source {
                        msg = msg.with_source(source);
                    }
                    let line = msg.to_line();
                    assert_eq!(Message::parse(&line).unwrap(), msg, "{}", line);
                    assert_eq!(msg.args().collect::<Vec<_>>(), args);
                }
            }
        }
    }

    #[test]
    fn test_built_messages_use_trailing_form() {
        let msg = Message::new(Command::PrivMsg, vec!["#a".into(), "hello world".into()]);
        assert_eq!(msg.to_line(), "PRIVMSG #a :hello world");
        let msg = Message::new(Command::Join, vec!["#a".into(), ":key".into()]);
        assert_eq!(msg.to_line(), "JOIN #a ::key");
        let msg = Message::new(Command::Other("foo".into()), vec!["#a".into(), "".into()]);
        assert_eq!(msg.command, Command::Other("FOO".into()));
        assert_eq!(msg.to_line(), "FOO #a :");
        assert_eq!(Message::new(Command::Other("join".into()), vec![]).command, Command::Join);

        // Fields set directly still format a parseable line
        let msg = Message {
            source: None,
            command: Command::PrivMsg,
            params: vec!["#a".into(), "hi there".into()],
            trailing: None,
        };
        assert_eq!(msg.to_line(), "PRIVMSG #a :hi there");
    }

    #[test]
    fn test_constructors() {
        assert_eq!(Message::user("bot", "Bridge Bot").to_line(), "USER bot 0 * :Bridge Bot");
        assert_eq!(Message::join("#chan", Some("key")).to_line(), "JOIN #chan key");
        assert_eq!(Message::privmsg("#chan", "hi there").to_line(), "PRIVMSG #chan :hi there");
        assert_eq!(Message::pong("abc").to_line(), "PONG :abc");
    }

    #[test]
    fn test_source_forms() {
        assert_eq!(Prefix::parse("nick"), Prefix::User { nick: "nick".into(), user: None, host: None });
        assert_eq!(Prefix::parse("nick!user@host").to_string(), "nick!user@host");
        assert_eq!(Prefix::parse("nick@host").nick(), Some("nick"));
        assert_eq!(Prefix::parse("irc.example.net").nick(), None);
    }
}
