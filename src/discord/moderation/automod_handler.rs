// Discord-specific automod handling - feeds messages through the engine and
// hands the decision to the enforcer.

use crate::discord::moderation::message_adapter::incoming_from_message;
use crate::discord::{Data, Error};
use poise::serenity_prelude as serenity;

/// Check a message against the automod policy and apply the decision.
///
/// Returns `true` if the message was a violation and was handled.
pub async fn handle_message_for_automod(
    msg: &serenity::Message,
    data: &Data,
) -> Result<bool, Error> {
    // Skip bots
    if msg.author.bot {
        return Ok(false);
    }

    // Only check guild messages
    let incoming = match incoming_from_message(msg, &data.known_alts, chrono::Utc::now()) {
        Some(incoming) => incoming,
        None => return Ok(false),
    };

    let decision = data.moderation.evaluate(&incoming).await;
    if !decision.is_actionable() && decision.events.is_empty() {
        return Ok(false);
    }

    if decision.is_actionable() {
        tracing::info!(
            guild_id = incoming.guild_id,
            user_id = incoming.author_id,
            kind = decision.violation.kind.as_str(),
            action = decision.action.label(),
            "Automod violation"
        );
    }

    data.enforcer.execute(&incoming, &decision).await;

    Ok(decision.is_actionable())
}

/// Count a new member toward the join-raid window and respond to a surge.
///
/// Returns `true` if the join completed a surge.
pub async fn handle_member_join(member: &serenity::Member, data: &Data) -> Result<bool, Error> {
    if member.user.bot {
        return Ok(false);
    }

    let Some(surge) = data
        .join_monitor
        .record_join(member.guild_id.get(), member.user.id.get())
    else {
        return Ok(false);
    };

    if let Some(channels) = data.enforcer.handle_join_surge(&surge).await {
        tracing::info!(
            guild_id = surge.guild_id,
            channels = channels.len(),
            "Server locked after join surge"
        );
    }

    Ok(true)
}
