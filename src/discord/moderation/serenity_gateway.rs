// `ModerationGateway` on top of serenity's HTTP client.
//
// Works from HTTP alone (no cache), so the enforcer's unlock timer can run
// without holding a `Context`.

use crate::core::moderation::{GatewayError, MessageRef, ModerationGateway};
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

pub struct SerenityGateway {
    http: Arc<serenity::Http>,
}

impl SerenityGateway {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ModerationGateway for SerenityGateway {
    async fn delete_message(&self, _guild_id: u64, message: MessageRef) -> Result<(), GatewayError> {
        serenity::ChannelId::new(message.channel_id)
            .delete_message(&*self.http, serenity::MessageId::new(message.message_id))
            .await
            .map_err(map_error)
    }

    async fn warn_user(
        &self,
        _guild_id: u64,
        message: MessageRef,
        user_id: u64,
        reason: &str,
    ) -> Result<(), GatewayError> {
        let warning = format!(
            "⚠️ <@{}> your message was removed. {}\nPlease review the server rules.",
            user_id, reason
        );
        serenity::ChannelId::new(message.channel_id)
            .say(&*self.http, warning)
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    async fn timeout_user(
        &self,
        guild_id: u64,
        user_id: u64,
        duration: Duration,
        reason: &str,
    ) -> Result<(), GatewayError> {
        let until = serenity::Timestamp::from_unix_timestamp(
            chrono::Utc::now().timestamp() + duration.as_secs() as i64,
        )
        .map_err(|e| GatewayError::Platform(e.to_string()))?;

        serenity::GuildId::new(guild_id)
            .edit_member(
                &*self.http,
                serenity::UserId::new(user_id),
                serenity::EditMember::new()
                    .disable_communication_until_datetime(until)
                    .audit_log_reason(reason),
            )
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    async fn ban_user(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), GatewayError> {
        // Deletes the last day of their messages as well.
        serenity::GuildId::new(guild_id)
            .ban_with_reason(&*self.http, serenity::UserId::new(user_id), 1, reason)
            .await
            .map_err(map_error)
    }

    async fn kick_user(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), GatewayError> {
        serenity::GuildId::new(guild_id)
            .kick_with_reason(&*self.http, serenity::UserId::new(user_id), reason)
            .await
            .map_err(map_error)
    }

    async fn open_text_channels(&self, guild_id: u64) -> Result<Vec<u64>, GatewayError> {
        let guild = serenity::GuildId::new(guild_id);
        // @everyone role ID is same as guild ID
        let everyone = serenity::RoleId::new(guild_id);

        let roles = guild.roles(&*self.http).await.map_err(map_error)?;
        let base = roles
            .get(&everyone)
            .map(|role| role.permissions)
            .unwrap_or_else(serenity::Permissions::empty);

        let channels = guild.channels(&*self.http).await.map_err(map_error)?;
        let mut open: Vec<u64> = channels
            .values()
            .filter(|channel| {
                matches!(
                    channel.kind,
                    serenity::ChannelType::Text | serenity::ChannelType::News
                )
            })
            .filter(|channel| everyone_can_send(base, &channel.permission_overwrites, everyone))
            .map(|channel| channel.id.get())
            .collect();
        open.sort_unstable();
        Ok(open)
    }

    async fn set_channel_send_permission(
        &self,
        guild_id: u64,
        channel_id: u64,
        allowed: bool,
        reason: &str,
    ) -> Result<(), GatewayError> {
        let everyone = serenity::RoleId::new(guild_id);
        let channel = serenity::ChannelId::new(channel_id);

        let existing = channel
            .to_channel(&*self.http)
            .await
            .map_err(map_error)?
            .guild()
            .and_then(|guild_channel| {
                guild_channel
                    .permission_overwrites
                    .into_iter()
                    .find(|o| o.kind == serenity::PermissionOverwriteType::Role(everyone))
            });

        let overwrite = send_overwrite(existing, everyone, allowed);
        tracing::debug!(guild_id, channel_id, allowed, "{}", reason);

        // Raw endpoint so the reason shows up in Discord's audit log
        self.http
            .create_permission(
                channel,
                ::serenity::model::id::TargetId::new(guild_id),
                &overwrite_body(&overwrite, guild_id),
                Some(reason),
            )
            .await
            .map_err(map_error)
    }

    async fn direct_message(&self, user_id: u64, content: &str) -> Result<(), GatewayError> {
        serenity::UserId::new(user_id)
            .direct_message(&*self.http, serenity::CreateMessage::new().content(content))
            .await
            .map(|_| ())
            .map_err(map_error)
    }
}

/// Whether @everyone may send in a channel with these overwrites.
pub fn everyone_can_send(
    base: serenity::Permissions,
    overwrites: &[serenity::PermissionOverwrite],
    everyone: serenity::RoleId,
) -> bool {
    if base.contains(serenity::Permissions::ADMINISTRATOR) {
        return true;
    }

    let mut effective = base;
    if let Some(overwrite) = overwrites
        .iter()
        .find(|o| o.kind == serenity::PermissionOverwriteType::Role(everyone))
    {
        effective = (effective & !overwrite.deny) | overwrite.allow;
    }

    effective.contains(serenity::Permissions::VIEW_CHANNEL | serenity::Permissions::SEND_MESSAGES)
}

/// Flip SEND_MESSAGES on the @everyone overwrite, keeping every other bit as it was.
pub fn send_overwrite(
    existing: Option<serenity::PermissionOverwrite>,
    everyone: serenity::RoleId,
    allowed: bool,
) -> serenity::PermissionOverwrite {
    let (mut allow, mut deny) = existing
        .map(|o| (o.allow, o.deny))
        .unwrap_or((serenity::Permissions::empty(), serenity::Permissions::empty()));

    if allowed {
        deny.remove(serenity::Permissions::SEND_MESSAGES);
        allow.insert(serenity::Permissions::SEND_MESSAGES);
    } else {
        allow.remove(serenity::Permissions::SEND_MESSAGES);
        deny.insert(serenity::Permissions::SEND_MESSAGES);
    }

    serenity::PermissionOverwrite {
        allow,
        deny,
        kind: serenity::PermissionOverwriteType::Role(everyone),
    }
}

/// JSON body for the @everyone role overwrite (type 0 = role).
pub fn overwrite_body(overwrite: &serenity::PermissionOverwrite, everyone_id: u64) -> serde_json::Value {
    serde_json::json!({
        "id": everyone_id.to_string(),
        "type": 0,
        "allow": overwrite.allow.bits().to_string(),
        "deny": overwrite.deny.bits().to_string(),
    })
}

fn map_error(e: serenity::Error) -> GatewayError {
    match &e {
        serenity::Error::Http(::serenity::http::HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 403 =>
        {
            GatewayError::PermissionDenied(e.to_string())
        }
        serenity::Error::Model(::serenity::model::ModelError::InvalidPermissions { .. }) => {
            GatewayError::PermissionDenied(e.to_string())
        }
        _ => GatewayError::Platform(e.to_string()),
    }
}
