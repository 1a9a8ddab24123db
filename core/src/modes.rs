//! Channel mode classification
//!
//! Servers describe their channel modes through two I-support rules:
//!
//! * `PREFIX=(ov)@+` pairs membership mode letters with the symbols shown in front of
//!   nicknames, highest rank first.
//! * `CHANMODES=A,B,C,D` groups every other channel mode by how it takes arguments.
//!
//! Both are merged into one table keyed by character. Prefix symbols and mode letters
//! never overlap in practice, so a single namespace holds both and a lookup never has to
//! know which of the two rules a character came from.

use std::collections::HashMap;
use std::fmt;

/// How a mode consumes arguments in a MODE command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeKind {
    /// Always takes an argument (list modes, prefix modes, CHANMODES group B)
    WithParameter,
    /// Takes an argument only when being set (CHANMODES group C, e.g. `l`)
    WithParameterWhenSet,
    /// Never takes an argument (CHANMODES group D)
    WithoutParameter,
}

impl ModeKind {
    /// Whether a change in the given direction consumes an argument
    pub fn takes_argument(&self, adding: bool) -> bool {
        match self {
            ModeKind::WithParameter => true,
            ModeKind::WithParameterWhenSet => adding,
            ModeKind::WithoutParameter => false,
        }
    }
}

/// Entry in the merged mode table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeEntry {
    /// A channel mode letter from CHANMODES
    Channel {
        kind: ModeKind,
        /// Whether this is a list mode (group A)
        list: bool,
    },
    /// A membership mode letter from PREFIX
    MemberMode { symbol: char, rank: usize },
    /// A membership symbol from PREFIX
    MemberSymbol { mode: char, rank: usize },
}

impl ModeEntry {
    /// Argument behaviour of this entry
    pub fn kind(&self) -> ModeKind {
        match self {
            ModeEntry::Channel { kind, .. } => *kind,
            ModeEntry::MemberMode { .. } | ModeEntry::MemberSymbol { .. } => {
                ModeKind::WithParameter
            }
        }
    }
}

/// One change extracted from a MODE command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    /// `true` for `+`, `false` for `-`
    pub adding: bool,
    /// Mode letter
    pub mode: char,
    /// Argument consumed by this change
    pub argument: Option<String>,
}

impl fmt::Display for ModeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", if self.adding { '+' } else { '-' }, self.mode)?;
        if let Some(ref argument) = self.argument {
            write!(f, " {}", argument)?;
        }
        Ok(())
    }
}

/// Translator between mode characters and their meaning on one server
#[derive(Debug, Clone, Default)]
pub struct ModeParser {
    /// Mode letters and prefix symbols in one namespace
    entries: HashMap<char, ModeEntry>,
    /// Membership mode letters, highest rank first
    prefix_modes: Vec<char>,
}

impl ModeParser {
    /// Create an empty parser that knows no modes
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser configured with the RFC 1459 defaults, used until the server says otherwise
    pub fn rfc1459() -> Self {
        let mut parser = Self::new();
        parser.set_channel_modes("b,k,l,imnpst");
        parser.set_channel_prefixes("(ov)@+");
        parser
    }

    /// Apply a `PREFIX` value of the form `(modes)symbols`
    ///
    /// Returns `false` and leaves the table untouched if the value is malformed.
    pub fn set_channel_prefixes(&mut self, spec: &str) -> bool {
        let parsed = spec
            .strip_prefix('(')
            .and_then(|rest| rest.split_once(')'))
            .filter(|(modes, symbols)| modes.chars().count() == symbols.chars().count());

        let Some((modes, symbols)) = parsed else {
            tracing::warn!("Ignoring malformed PREFIX value {:?}", spec);
            return false;
        };

        // Drop the previous prefix pairing so a shorter list does not leave stale ranks.
        for mode in std::mem::take(&mut self.prefix_modes) {
            if let Some(ModeEntry::MemberMode { symbol, .. }) = self.entries.get(&mode).cloned() {
                self.entries.remove(&mode);
                if matches!(self.entries.get(&symbol), Some(ModeEntry::MemberSymbol { .. })) {
                    self.entries.remove(&symbol);
                }
            }
        }

        for (rank, (mode, symbol)) in modes.chars().zip(symbols.chars()).enumerate() {
            self.entries.insert(mode, ModeEntry::MemberMode { symbol, rank });
            self.entries.insert(symbol, ModeEntry::MemberSymbol { mode, rank });
            self.prefix_modes.push(mode);
        }
        true
    }

    /// Apply a `CHANMODES` value of the form `A,B,C,D`
    ///
    /// Groups past the fourth are ignored. Fewer than four groups is malformed.
    pub fn set_channel_modes(&mut self, spec: &str) -> bool {
        let groups: Vec<&str> = spec.split(',').collect();
        if groups.len() < 4 {
            tracing::warn!("Ignoring malformed CHANMODES value {:?}", spec);
            return false;
        }

        let kinds = [
            (ModeKind::WithParameter, true),
            (ModeKind::WithParameter, false),
            (ModeKind::WithParameterWhenSet, false),
            (ModeKind::WithoutParameter, false),
        ];
        for (group, (kind, list)) in groups.iter().zip(kinds) {
            for mode in group.chars() {
                if let Some(ModeEntry::MemberMode { .. }) = self.entries.get(&mode) {
                    self.prefix_modes.retain(|m| *m != mode);
                }
                self.entries.insert(mode, ModeEntry::Channel { kind, list });
            }
        }
        true
    }

    /// Argument behaviour of a mode letter or prefix symbol, `None` if unknown
    pub fn classify(&self, code: char) -> Option<ModeKind> {
        self.entries.get(&code).map(ModeEntry::kind)
    }

    /// Prefix symbol for a membership mode letter (`o` → `@`)
    pub fn symbol_for_mode(&self, mode: char) -> Option<char> {
        match self.entries.get(&mode) {
            Some(ModeEntry::MemberMode { symbol, .. }) => Some(*symbol),
            _ => None,
        }
    }

    /// Membership mode letter for a prefix symbol (`@` → `o`)
    pub fn mode_for_symbol(&self, symbol: char) -> Option<char> {
        match self.entries.get(&symbol) {
            Some(ModeEntry::MemberSymbol { mode, .. }) => Some(*mode),
            _ => None,
        }
    }

    /// Whether the character is a membership prefix symbol
    pub fn is_prefix_symbol(&self, symbol: char) -> bool {
        matches!(self.entries.get(&symbol), Some(ModeEntry::MemberSymbol { .. }))
    }

    /// Rank of a membership symbol or letter, 0 being the highest
    pub fn prefix_rank(&self, code: char) -> Option<usize> {
        match self.entries.get(&code) {
            Some(ModeEntry::MemberMode { rank, .. }) | Some(ModeEntry::MemberSymbol { rank, .. }) => {
                Some(*rank)
            }
            _ => None,
        }
    }

    /// Membership symbols, highest rank first
    pub fn prefix_symbols(&self) -> Vec<char> {
        self.prefix_modes
            .iter()
            .filter_map(|mode| self.symbol_for_mode(*mode))
            .collect()
    }

    /// Split a leading run of prefix symbols off a NAMES entry (`@+alice` → `[@, +]`, `alice`)
    pub fn split_prefixed_nick<'a>(&self, entry: &'a str) -> (Vec<char>, &'a str) {
        let nick = entry.trim_start_matches(|c| self.is_prefix_symbol(c));
        let symbols = entry[..entry.len() - nick.len()].chars().collect();
        (symbols, nick)
    }

    /// Resolve a mode string and its arguments into individual changes
    ///
    /// Arguments are handed out left to right according to each letter's kind. Unknown
    /// letters take no argument. A parameterized change with no argument left is dropped.
    pub fn parse_changes<S: AsRef<str>>(&self, modes: &str, args: &[S]) -> Vec<ModeChange> {
        let mut changes = Vec::new();
        let mut args = args.iter().map(|a| a.as_ref().to_string());
        let mut adding = true;

        for mode in modes.chars() {
            match mode {
                '+' => adding = true,
                '-' => adding = false,
                _ => {
                    let takes_argument = self
                        .classify(mode)
                        .map(|kind| kind.takes_argument(adding))
                        .unwrap_or(false);
                    if takes_argument {
                        match args.next() {
                            Some(argument) => changes.push(ModeChange {
                                adding,
                                mode,
                                argument: Some(argument),
                            }),
                            None => {
                                tracing::debug!(
                                    "Mode {}{} is missing its argument",
                                    if adding { '+' } else { '-' },
                                    mode
                                );
                            }
                        }
                    } else {
                        if self.classify(mode).is_none() {
                            tracing::debug!("Unknown channel mode {:?}, taking no argument", mode);
                        }
                        changes.push(ModeChange {
                            adding,
                            mode,
                            argument: None,
                        });
                    }
                }
            }
        }

        changes
    }
}
