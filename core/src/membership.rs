//! Channel membership tracking
//!
//! Stores, per joined channel, the prefix symbols each member currently holds. Nothing
//! here resolves a permission level: the symbols are read at dispatch time and mapped by
//! the command layer, so a mode change between two messages is always honoured.

use std::collections::HashMap;

/// Case mapping advertised through `CASEMAPPING`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseMapping {
    /// Only A-Z are folded
    Ascii,
    /// A-Z plus `[]\~` → `{}|^`
    #[default]
    Rfc1459,
    /// A-Z plus `[]\` → `{}|`
    StrictRfc1459,
}

impl CaseMapping {
    /// Parse an advertised name; unknown mappings fall back to rfc1459
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "ascii" => CaseMapping::Ascii,
            "strict-rfc1459" => CaseMapping::StrictRfc1459,
            _ => CaseMapping::Rfc1459,
        }
    }

    /// Fold a nick or channel name to its comparison key
    pub fn fold(&self, name: &str) -> String {
        name.chars()
            .map(|c| match (self, c) {
                (_, 'A'..='Z') => c.to_ascii_lowercase(),
                (CaseMapping::Rfc1459 | CaseMapping::StrictRfc1459, '[') => '{',
                (CaseMapping::Rfc1459 | CaseMapping::StrictRfc1459, ']') => '}',
                (CaseMapping::Rfc1459 | CaseMapping::StrictRfc1459, '\\') => '|',
                (CaseMapping::Rfc1459, '~') => '^',
                _ => c,
            })
            .collect()
    }

    /// Compare two names under this mapping
    pub fn names_equal(&self, a: &str, b: &str) -> bool {
        self.fold(a) == self.fold(b)
    }
}

/// One member of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Nick as last seen on the wire
    pub nick: String,
    /// Prefix symbols currently applied
    pub symbols: Vec<char>,
}

impl Member {
    fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            symbols: Vec::new(),
        }
    }

    fn add_symbol(&mut self, symbol: char) {
        if !self.symbols.contains(&symbol) {
            self.symbols.push(symbol);
        }
    }

    fn remove_symbol(&mut self, symbol: char) {
        self.symbols.retain(|s| *s != symbol);
    }
}

/// State of one joined channel
#[derive(Debug, Clone)]
pub struct ChannelState {
    /// Channel name as joined
    pub name: String,
    /// Members keyed by folded nick
    members: HashMap<String, Member>,
    /// Whether the initial NAMES listing has completed
    synced: bool,
}

impl ChannelState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: HashMap::new(),
            synced: false,
        }
    }

    /// Whether the initial NAMES listing has completed
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Iterate over current members
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Number of members
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// Membership of every channel the bot is in
#[derive(Debug, Clone, Default)]
pub struct ChannelMembership {
    case_mapping: CaseMapping,
    channels: HashMap<String, ChannelState>,
}

impl ChannelMembership {
    /// Create empty membership state
    pub fn new() -> Self {
        Self::default()
    }

    /// Current case mapping
    pub fn case_mapping(&self) -> CaseMapping {
        self.case_mapping
    }

    /// Switch case mapping, re-keying existing state
    pub fn set_case_mapping(&mut self, case_mapping: CaseMapping) {
        if case_mapping == self.case_mapping {
            return;
        }
        self.case_mapping = case_mapping;
        let channels = std::mem::take(&mut self.channels);
        for (_, mut channel) in channels {
            let members = std::mem::take(&mut channel.members);
            channel.members = members
                .into_values()
                .map(|m| (case_mapping.fold(&m.nick), m))
                .collect();
            self.channels.insert(case_mapping.fold(&channel.name), channel);
        }
    }

    fn key(&self, name: &str) -> String {
        self.case_mapping.fold(name)
    }

    fn member_mut(&mut self, channel: &str, nick: &str) -> Option<&mut Member> {
        let channel_key = self.key(channel);
        let nick_key = self.key(nick);
        self.channels
            .get_mut(&channel_key)
            .and_then(|c| c.members.get_mut(&nick_key))
    }

    /// We joined a channel; any stale state for it is discarded
    pub fn join_self(&mut self, channel: &str) {
        let key = self.key(channel);
        self.channels.insert(key, ChannelState::new(channel));
    }

    /// We left (or were removed from) a channel
    pub fn part_self(&mut self, channel: &str) -> bool {
        let key = self.key(channel);
        self.channels.remove(&key).is_some()
    }

    /// Someone joined a channel we are in
    pub fn add_member(&mut self, channel: &str, nick: &str) {
        let channel_key = self.key(channel);
        let nick_key = self.key(nick);
        if let Some(state) = self.channels.get_mut(&channel_key) {
            state
                .members
                .entry(nick_key)
                .or_insert_with(|| Member::new(nick));
        }
    }

    /// Someone left a channel we are in
    pub fn remove_member(&mut self, channel: &str, nick: &str) {
        let channel_key = self.key(channel);
        let nick_key = self.key(nick);
        if let Some(state) = self.channels.get_mut(&channel_key) {
            state.members.remove(&nick_key);
        }
    }

    /// Someone quit the network; returns the channels they were removed from
    pub fn remove_everywhere(&mut self, nick: &str) -> Vec<String> {
        let nick_key = self.key(nick);
        self.channels
            .values_mut()
            .filter_map(|state| state.members.remove(&nick_key).map(|_| state.name.clone()))
            .collect()
    }

    /// Someone changed nick
    pub fn rename(&mut self, old: &str, new: &str) {
        let old_key = self.key(old);
        let new_key = self.key(new);
        for state in self.channels.values_mut() {
            if let Some(mut member) = state.members.remove(&old_key) {
                member.nick = new.to_string();
                state.members.insert(new_key.clone(), member);
            }
        }
    }

    /// Record a NAMES entry; the listed symbols replace what we knew
    pub fn set_member_symbols(&mut self, channel: &str, nick: &str, symbols: Vec<char>) {
        let channel_key = self.key(channel);
        let nick_key = self.key(nick);
        if let Some(state) = self.channels.get_mut(&channel_key) {
            let member = state
                .members
                .entry(nick_key)
                .or_insert_with(|| Member::new(nick));
            member.symbols.clear();
            for symbol in symbols {
                member.add_symbol(symbol);
            }
        }
    }

    /// Apply a `+` membership mode
    pub fn add_symbol(&mut self, channel: &str, nick: &str, symbol: char) {
        if let Some(member) = self.member_mut(channel, nick) {
            member.add_symbol(symbol);
        } else {
            tracing::debug!("Mode +{} for unknown member {} in {}", symbol, nick, channel);
        }
    }

    /// Apply a `-` membership mode
    pub fn remove_symbol(&mut self, channel: &str, nick: &str, symbol: char) {
        if let Some(member) = self.member_mut(channel, nick) {
            member.remove_symbol(symbol);
        }
    }

    /// End of NAMES: the member list is now complete
    pub fn mark_synced(&mut self, channel: &str) {
        let key = self.key(channel);
        if let Some(state) = self.channels.get_mut(&key) {
            state.synced = true;
        }
    }

    /// Symbols a member holds in a channel
    ///
    /// `None` means we have no reliable data (not joined, or NAMES not finished), which
    /// is different from `Some(vec![])`: known to hold nothing.
    pub fn member_symbols(&self, channel: &str, nick: &str) -> Option<Vec<char>> {
        let state = self.channels.get(&self.key(channel))?;
        if !state.synced {
            return None;
        }
        Some(
            state
                .members
                .get(&self.key(nick))
                .map(|m| m.symbols.clone())
                .unwrap_or_default(),
        )
    }

    /// Channel state by name
    pub fn channel(&self, channel: &str) -> Option<&ChannelState> {
        self.channels.get(&self.key(channel))
    }

    /// Whether we are in the channel
    pub fn is_joined(&self, channel: &str) -> bool {
        self.channels.contains_key(&self.key(channel))
    }

    /// Names of joined channels, sorted
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.values().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synced(channel: &str, nicks: &[(&str, &str)]) -> ChannelMembership {
        let mut membership = ChannelMembership::new();
        membership.join_self(channel);
        for (nick, symbols) in nicks {
            membership.set_member_symbols(channel, nick, symbols.chars().collect());
        }
        membership.mark_synced(channel);
        membership
    }

    #[test]
    fn test_case_mapping_fold() {
        assert_eq!(CaseMapping::Rfc1459.fold("Nick[A]~"), "nick{a}^");
        assert_eq!(CaseMapping::StrictRfc1459.fold("Nick[A]~"), "nick{a}~");
        assert_eq!(CaseMapping::Ascii.fold("Nick[A]~"), "nick[a]~");
        assert_eq!(CaseMapping::from_name("ascii"), CaseMapping::Ascii);
        assert_eq!(CaseMapping::from_name("rfc7613"), CaseMapping::Rfc1459);
        assert!(CaseMapping::Rfc1459.names_equal("Bot[1]", "bot{1}"));
    }

    #[test]
    fn test_unsynced_channel_has_no_data() {
        let mut membership = ChannelMembership::new();
        assert_eq!(membership.member_symbols("#chan", "alice"), None);

        membership.join_self("#chan");
        membership.set_member_symbols("#chan", "alice", vec!['@']);
        assert_eq!(membership.member_symbols("#chan", "alice"), None);

        membership.mark_synced("#chan");
        assert_eq!(membership.member_symbols("#chan", "alice"), Some(vec!['@']));
        assert_eq!(membership.member_symbols("#chan", "nobody"), Some(vec![]));
    }

    #[test]
    fn test_symbol_changes() {
        let mut membership = synced("#chan", &[("alice", "")]);
        membership.add_symbol("#CHAN", "Alice", '@');
        membership.add_symbol("#chan", "alice", '@');
        assert_eq!(membership.member_symbols("#chan", "alice"), Some(vec!['@']));

        membership.remove_symbol("#chan", "ALICE", '@');
        assert_eq!(membership.member_symbols("#chan", "alice"), Some(vec![]));
    }

    #[test]
    fn test_rename_and_quit() {
        let mut membership = synced("#a", &[("alice", "+")]);
        membership.join_self("#b");
        membership.add_member("#b", "alice");
        membership.mark_synced("#b");

        membership.rename("alice", "alice2");
        assert_eq!(membership.member_symbols("#a", "alice2"), Some(vec!['+']));
        assert_eq!(membership.member_symbols("#a", "alice"), Some(vec![]));

        let mut left = membership.remove_everywhere("ALICE2");
        left.sort();
        assert_eq!(left, vec!["#a", "#b"]);
        assert_eq!(membership.channel("#a").map(|c| c.member_count()), Some(0));
    }

    #[test]
    fn test_part_self_forgets_channel() {
        let mut membership = synced("#chan", &[("alice", "@")]);
        assert!(membership.part_self("#Chan"));
        assert!(!membership.is_joined("#chan"));
        assert_eq!(membership.member_symbols("#chan", "alice"), None);
    }

    #[test]
    fn test_set_case_mapping_rekeys() {
        let mut membership = synced("#Chan~", &[("Nick~", "@")]);
        membership.set_case_mapping(CaseMapping::Ascii);
        assert_eq!(membership.member_symbols("#chan~", "nick~"), Some(vec!['@']));
        assert_eq!(membership.member_symbols("#chan^", "nick~"), None);
    }
}
