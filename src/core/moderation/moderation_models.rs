// Moderation domain models - data structures for the automod engine.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts them to and from serenity types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// How many characters of the offending content we keep for the audit log.
pub const EVIDENCE_SNIPPET_CHARS: usize = 50;

/// Which content policy a message broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    /// Banned word or unauthorized invite link
    BannedWord,
    /// Raid-style mass mention
    MassMention,
    /// Mostly upper-case message
    ExcessiveCaps,
    /// GIF link or animated embed
    UnsolicitedMedia,
    /// Author was flagged as an alternate account of a banned user
    KnownAltAccount,
    /// Freshly joined member dumping long content
    NewAccountSpam,
    /// Nothing wrong
    None,
}

impl ViolationKind {
    /// Severe violations skip the strike counter and go straight to a ban.
    pub fn is_severe(self) -> bool {
        matches!(
            self,
            ViolationKind::MassMention | ViolationKind::KnownAltAccount | ViolationKind::NewAccountSpam
        )
    }

    /// Reason string attached to platform actions and audit entries.
    pub fn reason(self) -> &'static str {
        match self {
            ViolationKind::BannedWord => {
                "AUTOMOD: Use of inappropriate content or unauthorized invite links"
            }
            ViolationKind::MassMention => "AUTOMOD: Attempted server raiding / mass mention spam",
            ViolationKind::ExcessiveCaps => "AUTOMOD: Excessive use of capital letters",
            ViolationKind::UnsolicitedMedia => "AUTOMOD: Unsolicited GIF or animated media",
            ViolationKind::KnownAltAccount => {
                "AUTOMOD: Detected alternate account of a permanently banned user"
            }
            ViolationKind::NewAccountSpam => "AUTOMOD: Suspected bot spam from a new account",
            ViolationKind::None => "No violation",
        }
    }

    /// Stable identifier used when persisting the last violation kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::BannedWord => "banned_word",
            ViolationKind::MassMention => "mass_mention",
            ViolationKind::ExcessiveCaps => "excessive_caps",
            ViolationKind::UnsolicitedMedia => "unsolicited_media",
            ViolationKind::KnownAltAccount => "known_alt_account",
            ViolationKind::NewAccountSpam => "new_account_spam",
            ViolationKind::None => "none",
        }
    }
}

impl FromStr for ViolationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "banned_word" => Ok(ViolationKind::BannedWord),
            "mass_mention" => Ok(ViolationKind::MassMention),
            "excessive_caps" => Ok(ViolationKind::ExcessiveCaps),
            "unsolicited_media" => Ok(ViolationKind::UnsolicitedMedia),
            "known_alt_account" => Ok(ViolationKind::KnownAltAccount),
            "new_account_spam" => Ok(ViolationKind::NewAccountSpam),
            "none" => Ok(ViolationKind::None),
            other => Err(format!("unknown violation kind '{}'", other)),
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationKind::BannedWord => write!(f, "Banned Word"),
            ViolationKind::MassMention => write!(f, "Mass Mention"),
            ViolationKind::ExcessiveCaps => write!(f, "Excessive Caps"),
            ViolationKind::UnsolicitedMedia => write!(f, "Unsolicited Media"),
            ViolationKind::KnownAltAccount => write!(f, "Known Alt Account"),
            ViolationKind::NewAccountSpam => write!(f, "New Account Spam"),
            ViolationKind::None => write!(f, "None"),
        }
    }
}

/// Result of running the content checks on one message.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyViolation {
    pub kind: ViolationKind,
    /// Bounded excerpt of the offending content, for the audit log
    pub evidence_snippet: String,
}

impl PolicyViolation {
    /// A clean message.
    pub fn none() -> Self {
        Self {
            kind: ViolationKind::None,
            evidence_snippet: String::new(),
        }
    }

    pub fn new(kind: ViolationKind, content: &str) -> Self {
        Self {
            kind,
            evidence_snippet: evidence_snippet(content),
        }
    }

    pub fn is_violation(&self) -> bool {
        self.kind != ViolationKind::None
    }
}

/// Cut `content` down to `EVIDENCE_SNIPPET_CHARS` characters, never splitting a char.
pub fn evidence_snippet(content: &str) -> String {
    let trimmed = content.trim();
    match trimmed.char_indices().nth(EVIDENCE_SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// Where a message lives, so the gateway can delete or reply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: u64,
    pub message_id: u64,
}

/// Coarse classification of an embed or attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedKind {
    /// GIF / gifv - the only kind the media check cares about
    AnimatedImage,
    Image,
    Video,
    Link,
    Other,
}

/// Everything the engine needs to know about an incoming message.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub guild_id: u64,
    pub author_id: u64,
    pub message: MessageRef,
    pub content: String,
    /// Mentioned user IDs, in message order
    pub mentions: Vec<u64>,
    pub embeds: Vec<EmbedKind>,
    /// Age of the author's account, if known
    pub account_age: Option<Duration>,
    /// Time since the author joined the guild, if known
    pub join_age: Option<Duration>,
    /// Externally supplied "known alternate account" signal
    pub flagged_alt: bool,
}

/// Per-user strike state in one guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationRecord {
    pub user_id: u64,
    pub guild_id: u64,
    pub strike_count: u32,
    pub last_violation: Option<DateTime<Utc>>,
    pub last_kind: Option<ViolationKind>,
}

impl ModerationRecord {
    pub fn new(user_id: u64, guild_id: u64) -> Self {
        Self {
            user_id,
            guild_id,
            strike_count: 0,
            last_violation: None,
            last_kind: None,
        }
    }
}

/// What should happen to the author of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum ModerationAction {
    /// Message is fine
    None,
    /// Remove the message, strike recorded but still under the warn threshold
    DeleteOnly { reason: String },
    /// Remove the message and warn the author
    Warn { reason: String, strike_count: u32 },
    /// Remove the message and apply a platform timeout
    TimedMute {
        duration: Duration,
        reason: String,
        strike_count: u32,
    },
    /// Remove the author from the guild; strikes were reset
    Kick { reason: String },
    /// Ban the author and lock the guild down temporarily
    InstantBan { reason: String },
}

impl ModerationAction {
    pub fn label(&self) -> &'static str {
        match self {
            ModerationAction::None => "None",
            ModerationAction::DeleteOnly { .. } => "Delete",
            ModerationAction::Warn { .. } => "Warn",
            ModerationAction::TimedMute { .. } => "Timed Mute",
            ModerationAction::Kick { .. } => "Kick",
            ModerationAction::InstantBan { .. } => "Instant Ban + Lockdown",
        }
    }

    pub fn triggers_lockdown(&self) -> bool {
        matches!(self, ModerationAction::InstantBan { .. })
    }
}

/// Platform side effects the enforcer attempts, named for failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    DeleteMessage,
    WarnUser,
    NotifyUser,
    TimeoutUser,
    KickUser,
    BanUser,
    SnapshotChannels,
    LockChannel(u64),
    UnlockChannel(u64),
}

impl std::fmt::Display for SideEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SideEffect::DeleteMessage => write!(f, "delete message"),
            SideEffect::WarnUser => write!(f, "warn user"),
            SideEffect::NotifyUser => write!(f, "message user"),
            SideEffect::TimeoutUser => write!(f, "timeout user"),
            SideEffect::KickUser => write!(f, "kick user"),
            SideEffect::BanUser => write!(f, "ban user"),
            SideEffect::SnapshotChannels => write!(f, "list open channels"),
            SideEffect::LockChannel(id) => write!(f, "lock channel {}", id),
            SideEffect::UnlockChannel(id) => write!(f, "unlock channel {}", id),
        }
    }
}

/// Entries handed to the audit collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum ModerationLogEvent {
    ViolationActioned {
        guild_id: u64,
        user_id: u64,
        channel_id: u64,
        kind: ViolationKind,
        action: ModerationAction,
        strike_count: u32,
        evidence: String,
    },
    SideEffectFailed {
        guild_id: u64,
        user_id: Option<u64>,
        effect: SideEffect,
        error: String,
    },
    LockdownStarted {
        guild_id: u64,
        trigger_user_id: u64,
        channels: Vec<u64>,
        duration: Duration,
    },
    LockdownLifted {
        guild_id: u64,
        channels: Vec<u64>,
    },
    /// Too many members joined inside the watch window
    RaidSuspected {
        guild_id: u64,
        trigger_user_id: u64,
        join_count: usize,
        window: Duration,
    },
    EvaluationFailed {
        guild_id: u64,
        user_id: u64,
        error: String,
    },
}

/// Output of evaluating one message.
#[derive(Debug, Clone)]
pub struct ModerationDecision {
    pub violation: PolicyViolation,
    pub action: ModerationAction,
    /// The author's record after evaluation; `None` when nothing was evaluated
    pub record: Option<ModerationRecord>,
    pub delete_message: bool,
    pub events: Vec<ModerationLogEvent>,
}

impl ModerationDecision {
    /// Nothing to do.
    pub fn none() -> Self {
        Self {
            violation: PolicyViolation::none(),
            action: ModerationAction::None,
            record: None,
            delete_message: false,
            events: Vec::new(),
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.violation.is_violation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severe_kinds_bypass_strikes() {
        assert!(ViolationKind::MassMention.is_severe());
        assert!(ViolationKind::KnownAltAccount.is_severe());
        assert!(ViolationKind::NewAccountSpam.is_severe());
        assert!(!ViolationKind::BannedWord.is_severe());
        assert!(!ViolationKind::ExcessiveCaps.is_severe());
        assert!(!ViolationKind::UnsolicitedMedia.is_severe());
        assert!(!ViolationKind::None.is_severe());
    }

    #[test]
    fn violation_kind_storage_names_parse_back() {
        for kind in [
            ViolationKind::BannedWord,
            ViolationKind::MassMention,
            ViolationKind::ExcessiveCaps,
            ViolationKind::UnsolicitedMedia,
            ViolationKind::KnownAltAccount,
            ViolationKind::NewAccountSpam,
            ViolationKind::None,
        ] {
            assert_eq!(kind.as_str().parse::<ViolationKind>(), Ok(kind));
        }
        assert!("shouting".parse::<ViolationKind>().is_err());
    }

    #[test]
    fn evidence_snippet_is_bounded() {
        let long = "é".repeat(80);
        let snippet = evidence_snippet(&long);
        assert_eq!(snippet.chars().count(), EVIDENCE_SNIPPET_CHARS + 1);
        assert!(snippet.ends_with('…'));

        assert_eq!(evidence_snippet("  short  "), "short");
    }

    #[test]
    fn only_instant_ban_locks_down() {
        let ban = ModerationAction::InstantBan {
            reason: "raid".into(),
        };
        let kick = ModerationAction::Kick {
            reason: "strikes".into(),
        };
        assert!(ban.triggers_lockdown());
        assert!(!kick.triggers_lockdown());
    }
}
