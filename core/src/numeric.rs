//! IRC numeric replies the bridge reacts to (RFC 1459, RFC 2812, modern I-support)

use crate::message::{Command, Message};

/// IRC numeric reply codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericReply {
    // Connection registration
    RplWelcome,
    RplISupport,

    // Channel state
    RplNameReply,
    RplEndOfNames,

    // Errors
    ErrErroneusNickname,
    ErrNicknameInUse,
    ErrNickCollision,
    ErrPasswdMismatch,
    ErrYoureBannedCreep,
    ErrChannelIsFull,
    ErrInviteOnlyChan,
    ErrBannedFromChan,
    ErrBadChannelKey,

    // Anything this crate has no name for
    Custom(u16),
}

impl NumericReply {
    /// Get the numeric code
    pub fn numeric_code(&self) -> u16 {
        match self {
            NumericReply::RplWelcome => 1,
            NumericReply::RplISupport => 5,
            NumericReply::RplNameReply => 353,
            NumericReply::RplEndOfNames => 366,
            NumericReply::ErrErroneusNickname => 432,
            NumericReply::ErrNicknameInUse => 433,
            NumericReply::ErrNickCollision => 436,
            NumericReply::ErrPasswdMismatch => 464,
            NumericReply::ErrYoureBannedCreep => 465,
            NumericReply::ErrChannelIsFull => 471,
            NumericReply::ErrInviteOnlyChan => 473,
            NumericReply::ErrBannedFromChan => 474,
            NumericReply::ErrBadChannelKey => 475,
            NumericReply::Custom(code) => *code,
        }
    }

    /// Map a raw code to a named reply
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => NumericReply::RplWelcome,
            5 => NumericReply::RplISupport,
            353 => NumericReply::RplNameReply,
            366 => NumericReply::RplEndOfNames,
            432 => NumericReply::ErrErroneusNickname,
            433 => NumericReply::ErrNicknameInUse,
            436 => NumericReply::ErrNickCollision,
            464 => NumericReply::ErrPasswdMismatch,
            465 => NumericReply::ErrYoureBannedCreep,
            471 => NumericReply::ErrChannelIsFull,
            473 => NumericReply::ErrInviteOnlyChan,
            474 => NumericReply::ErrBannedFromChan,
            475 => NumericReply::ErrBadChannelKey,
            other => NumericReply::Custom(other),
        }
    }

    /// Get the numeric code as a zero-padded string
    pub fn code(&self) -> String {
        format!("{:03}", self.numeric_code())
    }

    /// Whether the server refuses the connection outright
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NumericReply::ErrPasswdMismatch | NumericReply::ErrYoureBannedCreep
        )
    }

    /// Whether a JOIN was refused by the channel's restrictions
    pub fn is_join_refusal(&self) -> bool {
        matches!(
            self,
            NumericReply::ErrChannelIsFull
                | NumericReply::ErrInviteOnlyChan
                | NumericReply::ErrBannedFromChan
                | NumericReply::ErrBadChannelKey
        )
    }

    /// Whether the server rejected the requested nickname during registration
    pub fn is_nick_rejection(&self) -> bool {
        matches!(
            self,
            NumericReply::ErrNicknameInUse
                | NumericReply::ErrNickCollision
                | NumericReply::ErrErroneusNickname
        )
    }

    /// Build a reply message as a server would send it (used by tests and tooling)
    pub fn reply(&self, source: &str, target: &str, params: &[&str], text: &str) -> Message {
        let mut all = vec![target.to_string()];
        all.extend(params.iter().map(|p| p.to_string()));
        Message::new(Command::Numeric(self.numeric_code()), all)
            .with_source(source)
            .with_trailing(text)
    }
}

impl Message {
    /// Named numeric reply, if this is one
    pub fn numeric_reply(&self) -> Option<NumericReply> {
        self.numeric().map(NumericReply::from_code)
    }
}
