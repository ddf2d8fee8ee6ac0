// Audit sink that posts moderation events to the mod-log channel.
//
// `record` is called from inside the enforcer and must not block, so events
// go through an unbounded channel to a background task that does the HTTP.

use crate::core::moderation::{AuditSink, ModerationAction, ModerationLogEvent};
use poise::serenity_prelude::{self as serenity, CreateEmbed, CreateEmbedFooter};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

enum AuditMessage {
    Event(ModerationLogEvent),
    /// Answered once every event queued before it has been posted
    Flush(oneshot::Sender<()>),
}

pub struct ChannelAuditSink {
    sender: mpsc::UnboundedSender<AuditMessage>,
}

impl ChannelAuditSink {
    /// Start the posting task. Without a log channel events are only traced.
    pub fn spawn(http: Arc<serenity::Http>, log_channel_id: Option<u64>) -> Self {
        Self::with_poster(move |event| {
            let http = Arc::clone(&http);
            async move {
                tracing::info!(?event, "Automod audit event");

                let Some(channel_id) = log_channel_id else {
                    return;
                };

                let message = serenity::CreateMessage::new().embed(format_moderation_event(&event));
                if let Err(e) = serenity::ChannelId::new(channel_id)
                    .send_message(&*http, message)
                    .await
                {
                    tracing::warn!(channel_id, "Failed to post automod log: {}", e);
                }
            }
        })
    }

    fn with_poster<F, Fut>(post: F) -> Self
    where
        F: Fn(ModerationLogEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<AuditMessage>();

        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match message {
                    AuditMessage::Event(event) => post(event).await,
                    AuditMessage::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { sender }
    }

    /// Wait until everything recorded so far has been posted.
    pub async fn flush(&self) {
        let (done, posted) = oneshot::channel();
        if self.sender.send(AuditMessage::Flush(done)).is_err() {
            return;
        }
        if posted.await.is_err() {
            tracing::warn!("Automod audit task stopped before the queue drained");
        }
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: ModerationLogEvent) {
        if let Err(e) = self.sender.send(AuditMessage::Event(event)) {
            if let AuditMessage::Event(event) = e.0 {
                tracing::error!("Automod audit channel closed, dropping {:?}", event);
            }
        }
    }
}

pub fn format_moderation_event(event: &ModerationLogEvent) -> CreateEmbed {
    match event {
        ModerationLogEvent::ViolationActioned {
            guild_id,
            user_id,
            channel_id,
            kind,
            action,
            strike_count,
            evidence,
        } => {
            let (title, color) = match action {
                ModerationAction::InstantBan { .. } => (
                    "🚨 Raid Attempt Detected",
                    serenity::Color::from_rgb(139, 0, 0), // Dark red
                ),
                ModerationAction::Kick { .. } => ("👢 User Kicked", serenity::Color::RED),
                ModerationAction::TimedMute { .. } => (
                    "🔇 User Muted",
                    serenity::Color::from_rgb(255, 165, 0), // Orange
                ),
                ModerationAction::Warn { .. } => (
                    "⚠️ User Warned",
                    serenity::Color::from_rgb(255, 215, 0), // Gold
                ),
                ModerationAction::DeleteOnly { .. } | ModerationAction::None => {
                    ("🗑️ Message Removed", serenity::Color::LIGHT_GREY)
                }
            };

            let action_text = match action {
                ModerationAction::TimedMute { duration, .. } => {
                    format!("{} ({} min)", action.label(), duration.as_secs() / 60)
                }
                _ => action.label().to_string(),
            };

            let evidence_display = if evidence.is_empty() {
                "*No content*".to_string()
            } else {
                format!("`{}`", evidence.replace('`', "'"))
            };

            CreateEmbed::default()
                .title(title)
                .description(format!("**User:** <@{}> (`{}`)", user_id, user_id))
                .color(color)
                .field("Violation", kind.to_string(), true)
                .field("Action", action_text, true)
                .field("Strikes", strike_count.to_string(), true)
                .field("Reason", kind.reason(), false)
                .field("Channel", format!("<#{}>", channel_id), false)
                .field("Message Snippet", evidence_display, false)
                .footer(CreateEmbedFooter::new(format!("Guild ID: {}", guild_id)))
                .timestamp(serenity::Timestamp::now())
        }

        ModerationLogEvent::SideEffectFailed {
            guild_id,
            user_id,
            effect,
            error,
        } => {
            let target = match user_id {
                Some(id) => format!("<@{}>", id),
                None => "Server".to_string(),
            };

            CreateEmbed::default()
                .title("❗ Automod Action Failed")
                .description(format!("Could not {} ({}).", effect, target))
                .color(serenity::Color::from_rgb(255, 165, 0)) // Orange
                .field("Error", error.clone(), false)
                .footer(CreateEmbedFooter::new(format!("Guild ID: {}", guild_id)))
                .timestamp(serenity::Timestamp::now())
        }

        ModerationLogEvent::LockdownStarted {
            guild_id,
            trigger_user_id,
            channels,
            duration,
        } => CreateEmbed::default()
            .title("🔒 Server Locked")
            .description(format!(
                "Server lockdown triggered by <@{}> (`{}`).",
                trigger_user_id, trigger_user_id
            ))
            .color(serenity::Color::RED)
            .field("Channels Locked", channel_list(channels), false)
            .field(
                "Unlocks In",
                format!("{} minutes", (duration.as_secs() + 59) / 60),
                false,
            )
            .footer(CreateEmbedFooter::new(format!("Guild ID: {}", guild_id)))
            .timestamp(serenity::Timestamp::now()),

        ModerationLogEvent::LockdownLifted { guild_id, channels } => CreateEmbed::default()
            .title("✅ Server Unlocked")
            .description("The server has been unlocked after the raid threat subsided.")
            .color(serenity::Color::from_rgb(0, 255, 0)) // Green
            .field("Channels Restored", channel_list(channels), false)
            .footer(CreateEmbedFooter::new(format!("Guild ID: {}", guild_id)))
            .timestamp(serenity::Timestamp::now()),

        ModerationLogEvent::RaidSuspected {
            guild_id,
            trigger_user_id,
            join_count,
            window,
        } => CreateEmbed::default()
            .title("🚨 Join Raid Suspected")
            .description(format!(
                "{} members joined within {} seconds.",
                join_count,
                window.as_secs()
            ))
            .color(serenity::Color::from_rgb(139, 0, 0)) // Dark red
            .field(
                "Latest Join",
                format!("<@{}> (`{}`)", trigger_user_id, trigger_user_id),
                false,
            )
            .footer(CreateEmbedFooter::new(format!("Guild ID: {}", guild_id)))
            .timestamp(serenity::Timestamp::now()),

        ModerationLogEvent::EvaluationFailed {
            guild_id,
            user_id,
            error,
        } => CreateEmbed::default()
            .title("❗ Automod Evaluation Failed")
            .description(format!(
                "A message from <@{}> could not be checked.",
                user_id
            ))
            .color(serenity::Color::DARK_GREY)
            .field("Error", error.clone(), false)
            .footer(CreateEmbedFooter::new(format!("Guild ID: {}", guild_id)))
            .timestamp(serenity::Timestamp::now()),
    }
}

fn channel_list(channels: &[u64]) -> String {
    if channels.is_empty() {
        return "None".to_string();
    }

    let list = channels
        .iter()
        .map(|id| format!("<#{}>", id))
        .collect::<Vec<_>>()
        .join(", ");

    // Embed field values are capped at 1024 chars
    if list.len() > 1024 {
        format!("{} channels", channels.len())
    } else {
        list
    }
}
