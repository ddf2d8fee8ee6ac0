// Content checks - decide which policy, if any, a message breaks.
//
// Pure functions over `ModerationPolicy` + `IncomingMessage`. The first
// matching check wins and the remaining ones are skipped.

use super::moderation_models::{EmbedKind, IncomingMessage, PolicyViolation, ViolationKind};
use super::moderation_policy::ModerationPolicy;

/// Run every check in priority order and return the first violation found.
pub fn detect_violation(policy: &ModerationPolicy, message: &IncomingMessage) -> PolicyViolation {
    let content = message.content.as_str();
    if content.trim().is_empty() {
        return PolicyViolation::none();
    }

    if message.flagged_alt {
        return PolicyViolation::new(ViolationKind::KnownAltAccount, content);
    }

    let lowered = content.to_lowercase();
    if contains_banned_content(policy, &lowered) {
        return PolicyViolation::new(ViolationKind::BannedWord, content);
    }

    if is_mass_mention(policy, message) {
        return PolicyViolation::new(ViolationKind::MassMention, content);
    }

    if is_new_account_spam(policy, message) {
        return PolicyViolation::new(ViolationKind::NewAccountSpam, content);
    }

    if let Some(ratio) = caps_ratio(content, policy.caps_min_length, policy.caps_min_letters) {
        if ratio > policy.caps_ratio_threshold {
            return PolicyViolation::new(ViolationKind::ExcessiveCaps, content);
        }
    }

    if policy.media_check_enabled && has_unsolicited_media(policy, &lowered, &message.embeds) {
        return PolicyViolation::new(ViolationKind::UnsolicitedMedia, content);
    }

    PolicyViolation::none()
}

/// Banned words and (optionally) invite links, matched as substrings of the lower-cased text.
fn contains_banned_content(policy: &ModerationPolicy, lowered: &str) -> bool {
    if policy.banned_words.iter().any(|w| lowered.contains(w.as_str())) {
        return true;
    }

    policy.block_invite_links
        && policy
            .invite_markers
            .iter()
            .any(|m| lowered.contains(m.as_str()))
}

fn is_mass_mention(policy: &ModerationPolicy, message: &IncomingMessage) -> bool {
    message.mentions.len() >= policy.mass_mention_threshold
        && message.content.chars().count() < policy.mass_mention_max_chars
}

/// A member who joined inside the configured window posting a wall of text.
fn is_new_account_spam(policy: &ModerationPolicy, message: &IncomingMessage) -> bool {
    let window = match policy.new_member_window() {
        Some(window) => window,
        None => return false,
    };

    match message.join_age {
        Some(joined) => {
            joined < window && message.content.chars().count() > policy.mass_mention_max_chars
        }
        None => false,
    }
}

/// Uppercase share of the alphabetic characters.
///
/// Returns `None` when the message is too short (fewer than `min_length`
/// characters) or has fewer than `min_letters` letters to judge.
pub fn caps_ratio(content: &str, min_length: usize, min_letters: usize) -> Option<f64> {
    if content.chars().count() < min_length {
        return None;
    }

    let (letters, upper) = content
        .chars()
        .filter(|c| c.is_alphabetic())
        .fold((0usize, 0usize), |(letters, upper), c| {
            (letters + 1, upper + usize::from(c.is_uppercase()))
        });

    if letters < min_letters {
        return None;
    }

    Some(upper as f64 / letters as f64)
}

fn has_unsolicited_media(policy: &ModerationPolicy, lowered: &str, embeds: &[EmbedKind]) -> bool {
    policy
        .media_markers
        .iter()
        .any(|m| lowered.contains(m.as_str()))
        || embeds.iter().any(|e| *e == EmbedKind::AnimatedImage)
}
