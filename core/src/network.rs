//! Server capability tracking (RPL_ISUPPORT)
//!
//! Servers advertise their limits and extensions through one or more `005` lines sent
//! after registration. No single line is assumed to be complete: rules accumulate until
//! the connection is reset, and a `-KEY` token retracts an earlier rule.

use crate::membership::CaseMapping;
use crate::message::Message;
use crate::numeric::NumericReply;
use std::collections::HashMap;

/// Value of an advertised rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupportValue {
    /// Rule present without a value (`KEY` or `KEY=`)
    Flag,
    /// Rule present with a value (`KEY=value`)
    Value(String),
}

impl SupportValue {
    /// String value, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SupportValue::Flag => None,
            SupportValue::Value(value) => Some(value),
        }
    }
}

/// Change applied by one token of a capability line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupportChange {
    Set(String, SupportValue),
    Removed(String),
}

impl SupportChange {
    /// Key touched by this change
    pub fn key(&self) -> &str {
        match self {
            SupportChange::Set(key, _) | SupportChange::Removed(key) => key,
        }
    }
}

/// Accumulated I-support rules of one server connection
#[derive(Debug, Clone, Default)]
pub struct NetworkTracker {
    rules: HashMap<String, SupportValue>,
}

impl NetworkTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a message; non-capability messages are ignored
    ///
    /// The first parameter (our own nick) and the trailing descriptive text are not
    /// rules. Returns the changes that were applied.
    pub fn handle_message(&mut self, msg: &Message) -> Vec<SupportChange> {
        if msg.numeric_reply() != Some(NumericReply::RplISupport) {
            return Vec::new();
        }

        let mut changes = Vec::new();
        for token in msg.params.iter().skip(1) {
            if let Some(change) = Self::parse_token(token) {
                match &change {
                    SupportChange::Set(key, value) => {
                        tracing::debug!("I-support rule {} = {:?}", key, value);
                        self.rules.insert(key.clone(), value.clone());
                    }
                    SupportChange::Removed(key) => {
                        tracing::debug!("I-support rule {} retracted", key);
                        self.rules.remove(key);
                    }
                }
                changes.push(change);
            }
        }
        changes
    }

    fn parse_token(token: &str) -> Option<SupportChange> {
        if let Some(key) = token.strip_prefix('-') {
            return if key.is_empty() {
                None
            } else {
                Some(SupportChange::Removed(key.to_string()))
            };
        }

        match token.split_once('=') {
            Some(("", _)) => None,
            Some((key, "")) => Some(SupportChange::Set(key.to_string(), SupportValue::Flag)),
            Some((key, value)) => Some(SupportChange::Set(
                key.to_string(),
                SupportValue::Value(unescape_value(value)),
            )),
            None if token.is_empty() => None,
            None => Some(SupportChange::Set(token.to_string(), SupportValue::Flag)),
        }
    }

    /// Look up a rule; `None` means the server never advertised it (or retracted it)
    pub fn support_rule(&self, key: &str) -> Option<&SupportValue> {
        self.rules.get(key)
    }

    /// String value of a rule, if it has one
    pub fn support_value(&self, key: &str) -> Option<&str> {
        self.support_rule(key).and_then(SupportValue::as_str)
    }

    /// Whether a rule is present in any form
    pub fn supports(&self, key: &str) -> bool {
        self.rules.contains_key(key)
    }

    /// Number of known rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are known
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Advertised network name
    pub fn network_name(&self) -> Option<&str> {
        self.support_value("NETWORK")
    }

    /// Characters that start a channel name
    pub fn channel_types(&self) -> &str {
        self.support_value("CHANTYPES").unwrap_or("#&")
    }

    /// Case mapping used for nick and channel comparison
    pub fn case_mapping(&self) -> CaseMapping {
        self.support_value("CASEMAPPING")
            .map(CaseMapping::from_name)
            .unwrap_or_default()
    }

    /// Whether a message target is a channel on this network
    pub fn is_channel_name(&self, target: &str) -> bool {
        target
            .chars()
            .next()
            .map(|c| self.channel_types().contains(c))
            .unwrap_or(false)
    }
}

/// Decode `\xHH` escapes used in I-support values
fn unescape_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1] == b'x' {
            let hex = std::str::from_utf8(&bytes[i + 2..i + 4]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
