// Converts serenity messages into the platform-agnostic `IncomingMessage`.

use crate::core::moderation::{EmbedKind, IncomingMessage, MessageRef};
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use std::collections::HashSet;
use std::time::Duration;

/// Build the engine input for a guild message. DMs yield `None`.
pub fn incoming_from_message(
    msg: &serenity::Message,
    known_alts: &HashSet<u64>,
    now: DateTime<Utc>,
) -> Option<IncomingMessage> {
    let guild_id = msg.guild_id?.get();
    let author_id = msg.author.id.get();

    let mut embeds: Vec<EmbedKind> = msg
        .embeds
        .iter()
        .map(|embed| classify_embed(embed.kind.as_deref()))
        .collect();
    embeds.extend(msg.attachments.iter().map(|attachment| {
        classify_attachment(&attachment.filename, attachment.content_type.as_deref())
    }));

    let join_age = msg
        .member
        .as_ref()
        .and_then(|member| member.joined_at)
        .map(|joined| elapsed_since(joined.unix_timestamp(), now));

    Some(IncomingMessage {
        guild_id,
        author_id,
        message: MessageRef {
            channel_id: msg.channel_id.get(),
            message_id: msg.id.get(),
        },
        content: msg.content.clone(),
        mentions: msg.mentions.iter().map(|user| user.id.get()).collect(),
        embeds,
        account_age: Some(elapsed_since(msg.author.id.created_at().unix_timestamp(), now)),
        join_age,
        flagged_alt: known_alts.contains(&author_id),
    })
}

/// Map Discord's embed `type` field onto our embed kinds.
pub fn classify_embed(kind: Option<&str>) -> EmbedKind {
    match kind {
        Some("gifv") => EmbedKind::AnimatedImage,
        Some("image") => EmbedKind::Image,
        Some("video") => EmbedKind::Video,
        Some("link") | Some("article") => EmbedKind::Link,
        _ => EmbedKind::Other,
    }
}

/// Uploaded files count as embeds too; GIFs and animated WebPs are animated.
pub fn classify_attachment(filename: &str, content_type: Option<&str>) -> EmbedKind {
    let name = filename.to_lowercase();
    let content_type = content_type.unwrap_or_default().to_lowercase();

    if name.ends_with(".gif") || content_type == "image/gif" {
        EmbedKind::AnimatedImage
    } else if content_type.starts_with("image/")
        || name.ends_with(".png")
        || name.ends_with(".jpg")
        || name.ends_with(".jpeg")
        || name.ends_with(".webp")
    {
        EmbedKind::Image
    } else if content_type.starts_with("video/") || name.ends_with(".mp4") || name.ends_with(".webm") {
        EmbedKind::Video
    } else {
        EmbedKind::Other
    }
}

fn elapsed_since(unix_secs: i64, now: DateTime<Utc>) -> Duration {
    Duration::from_secs((now.timestamp() - unix_secs).max(0) as u64)
}
