// Builds the automod policy from an optional JSON file plus environment
// overrides. Any malformed value is a ConfigurationError and stops startup.

use crate::core::moderation::{ConfigurationError, ModerationPolicy};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

pub const POLICY_FILE_VAR: &str = "AUTOMOD_POLICY_FILE";

/// Load the policy from the process environment.
pub fn load_policy() -> Result<ModerationPolicy, ConfigurationError> {
    load_policy_from(|var| std::env::var(var).ok())
}

/// Load the policy using `lookup` to read variables (lets tests avoid touching the real env).
pub fn load_policy_from(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ModerationPolicy, ConfigurationError> {
    let lookup = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

    let mut policy = match lookup(POLICY_FILE_VAR) {
        Some(path) => read_policy_file(Path::new(&path))?,
        None => ModerationPolicy::default(),
    };

    if let Some(v) = lookup("AUTOMOD_ENABLED") {
        policy.enabled = parse("AUTOMOD_ENABLED", &v)?;
    }
    if let Some(v) = lookup("AUTOMOD_BANNED_WORDS") {
        policy.banned_words = split_list(&v);
    }
    if let Some(v) = lookup("AUTOMOD_BLOCK_INVITES") {
        policy.block_invite_links = parse("AUTOMOD_BLOCK_INVITES", &v)?;
    }
    if let Some(v) = lookup("AUTOMOD_MASS_MENTION_THRESHOLD") {
        policy.mass_mention_threshold = parse("AUTOMOD_MASS_MENTION_THRESHOLD", &v)?;
    }
    if let Some(v) = lookup("AUTOMOD_CAPS_RATIO") {
        policy.caps_ratio_threshold = parse("AUTOMOD_CAPS_RATIO", &v)?;
    }
    if let Some(v) = lookup("AUTOMOD_STRIKES") {
        let (warn, mute, kick) = parse_strikes(&v)?;
        policy.warn_strikes = warn;
        policy.mute_strikes = mute;
        policy.kick_strikes = kick;
    }
    if let Some(v) = lookup("AUTOMOD_MUTE_SECS") {
        policy.mute_duration_secs = parse("AUTOMOD_MUTE_SECS", &v)?;
    }
    if let Some(v) = lookup("AUTOMOD_LOCKDOWN_SECS") {
        policy.lockdown_duration_secs = parse("AUTOMOD_LOCKDOWN_SECS", &v)?;
    }
    if let Some(v) = lookup("AUTOMOD_MEDIA_CHECK") {
        policy.media_check_enabled = parse("AUTOMOD_MEDIA_CHECK", &v)?;
    }
    if let Some(v) = lookup("AUTOMOD_BYPASS_USERS") {
        policy.bypass_user_ids = split_list(&v)
            .iter()
            .map(|id| parse("AUTOMOD_BYPASS_USERS", id))
            .collect::<Result<HashSet<u64>, _>>()?;
    }
    if let Some(v) = lookup("AUTOMOD_NEW_MEMBER_WINDOW_SECS") {
        policy.new_member_window_secs = parse("AUTOMOD_NEW_MEMBER_WINDOW_SECS", &v)?;
    }
    if let Some(v) = lookup("AUTOMOD_JOIN_RAID_THRESHOLD") {
        policy.join_raid_threshold = parse("AUTOMOD_JOIN_RAID_THRESHOLD", &v)?;
    }
    if let Some(v) = lookup("AUTOMOD_JOIN_RAID_WINDOW_SECS") {
        policy.join_raid_window_secs = parse("AUTOMOD_JOIN_RAID_WINDOW_SECS", &v)?;
    }
    if let Some(v) = lookup("AUTOMOD_JOIN_RAID_LOCKDOWN") {
        policy.join_raid_lockdown = parse("AUTOMOD_JOIN_RAID_LOCKDOWN", &v)?;
    }

    policy.validated()
}

fn read_policy_file(path: &Path) -> Result<ModerationPolicy, ConfigurationError> {
    let unreadable = |detail: String| ConfigurationError::Unreadable {
        path: path.display().to_string(),
        detail,
    };

    let file = std::fs::File::open(path).map_err(|e| unreadable(e.to_string()))?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| unreadable(e.to_string()))
}

fn parse<T: FromStr>(var: &str, value: &str) -> Result<T, ConfigurationError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigurationError::InvalidValue {
            var: var.to_string(),
            value: value.to_string(),
        })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// "warn,mute,kick", e.g. "1,3,5".
fn parse_strikes(value: &str) -> Result<(u32, u32, u32), ConfigurationError> {
    let parts = split_list(value);
    match parts.as_slice() {
        [warn, mute, kick] => Ok((
            parse("AUTOMOD_STRIKES", warn)?,
            parse("AUTOMOD_STRIKES", mute)?,
            parse("AUTOMOD_STRIKES", kick)?,
        )),
        _ => Err(ConfigurationError::InvalidValue {
            var: "AUTOMOD_STRIKES".to_string(),
            value: value.to_string(),
        }),
    }
}
