// Automod policy - every threshold the engine uses lives here.
//
// Nothing is hard-coded in the checks; the loader in infra fills this from
// a JSON file and environment overrides, then `validated()` rejects
// configurations the engine can't act on.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Longest timeout Discord accepts (28 days).
pub const MAX_MUTE_SECS: u64 = 28 * 24 * 60 * 60;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("Strike thresholds must satisfy 1 <= warn < mute < kick (got {warn}/{mute}/{kick})")]
    InvalidStrikeThresholds { warn: u32, mute: u32, kick: u32 },

    #[error("Caps ratio threshold must be between 0 and 1 (got {0})")]
    InvalidCapsRatio(f64),

    #[error("Mass mention threshold must be at least 1")]
    InvalidMassMentionThreshold,

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("Mute duration of {0} seconds exceeds the 28 day platform limit")]
    MuteTooLong(u64),

    #[error("Invalid value '{value}' for {var}")]
    InvalidValue { var: String, value: String },

    #[error("Could not read policy file {path}: {detail}")]
    Unreadable { path: String, detail: String },
}

/// Automod configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationPolicy {
    /// Master switch; when off every message passes
    pub enabled: bool,
    /// Case-insensitive substrings that count as banned language
    pub banned_words: Vec<String>,
    /// Whether invite links are treated like banned words
    pub block_invite_links: bool,
    pub invite_markers: Vec<String>,
    /// Mentions in one message that signal a raid...
    pub mass_mention_threshold: usize,
    /// ...when the message is shorter than this many characters
    pub mass_mention_max_chars: usize,
    /// Uppercase / alphabetic ratio above which a message is shouting
    pub caps_ratio_threshold: f64,
    pub caps_min_length: usize,
    pub caps_min_letters: usize,
    /// Strike counts for each escalation step
    pub warn_strikes: u32,
    pub mute_strikes: u32,
    pub kick_strikes: u32,
    pub mute_duration_secs: u64,
    pub lockdown_duration_secs: u64,
    pub media_check_enabled: bool,
    /// Substrings identifying GIF hosts
    pub media_markers: Vec<String>,
    /// Users the automod never checks
    pub bypass_user_ids: HashSet<u64>,
    /// Members who joined less than this many seconds ago and post long
    /// content are treated as spam bots. 0 disables the rule.
    pub new_member_window_secs: u64,
    /// Joins inside `join_raid_window_secs` that count as a raid. 0 disables the monitor.
    pub join_raid_threshold: usize,
    pub join_raid_window_secs: u64,
    /// Lock the server when a join raid is suspected instead of only alerting
    pub join_raid_lockdown: bool,
}

impl Default for ModerationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            banned_words: ["swearword", "curseword", "badword", "inappropriatephrase", "explicitterm"]
                .iter()
                .map(|w| w.to_string())
                .collect(),
            block_invite_links: true,
            invite_markers: ["discord.gg/", "discordapp.com/invite/", "dsc.gg/"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            mass_mention_threshold: 10,
            mass_mention_max_chars: 100,
            caps_ratio_threshold: 0.60,
            caps_min_length: 10,
            caps_min_letters: 5,
            warn_strikes: 1,
            mute_strikes: 3,
            kick_strikes: 5,
            mute_duration_secs: 600,  // 10 minutes
            lockdown_duration_secs: 300, // 5 minutes
            media_check_enabled: true,
            media_markers: ["tenor.com", "giphy.com", "gfycat.com"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            bypass_user_ids: HashSet::new(),
            new_member_window_secs: 0,
            join_raid_threshold: 5,
            join_raid_window_secs: 60,
            join_raid_lockdown: false,
        }
    }
}

impl ModerationPolicy {
    /// Check thresholds and normalise word lists (lower-case, no blanks).
    pub fn validated(mut self) -> Result<Self, ConfigurationError> {
        let (warn, mute, kick) = (self.warn_strikes, self.mute_strikes, self.kick_strikes);
        if warn == 0 || warn >= mute || mute >= kick {
            return Err(ConfigurationError::InvalidStrikeThresholds { warn, mute, kick });
        }

        if !(self.caps_ratio_threshold > 0.0 && self.caps_ratio_threshold <= 1.0) {
            return Err(ConfigurationError::InvalidCapsRatio(
                self.caps_ratio_threshold,
            ));
        }

        if self.mass_mention_threshold == 0 {
            return Err(ConfigurationError::InvalidMassMentionThreshold);
        }

        if self.mute_duration_secs == 0 {
            return Err(ConfigurationError::ZeroDuration {
                field: "mute_duration_secs",
            });
        }
        if self.mute_duration_secs > MAX_MUTE_SECS {
            return Err(ConfigurationError::MuteTooLong(self.mute_duration_secs));
        }
        if self.lockdown_duration_secs == 0 {
            return Err(ConfigurationError::ZeroDuration {
                field: "lockdown_duration_secs",
            });
        }
        if self.join_raid_threshold > 0 && self.join_raid_window_secs == 0 {
            return Err(ConfigurationError::ZeroDuration {
                field: "join_raid_window_secs",
            });
        }

        self.banned_words = normalize_markers(self.banned_words);
        self.invite_markers = normalize_markers(self.invite_markers);
        self.media_markers = normalize_markers(self.media_markers);

        Ok(self)
    }

    pub fn mute_duration(&self) -> Duration {
        Duration::from_secs(self.mute_duration_secs)
    }

    pub fn lockdown_duration(&self) -> Duration {
        Duration::from_secs(self.lockdown_duration_secs)
    }

    pub fn new_member_window(&self) -> Option<Duration> {
        (self.new_member_window_secs > 0).then(|| Duration::from_secs(self.new_member_window_secs))
    }

    pub fn join_raid_window(&self) -> Duration {
        Duration::from_secs(self.join_raid_window_secs)
    }

    pub fn is_bypassed(&self, user_id: u64) -> bool {
        self.bypass_user_ids.contains(&user_id)
    }
}

fn normalize_markers(markers: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    markers
        .into_iter()
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty() && seen.insert(m.clone()))
        .collect()
}
