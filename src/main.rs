// This is the entry point of the automod bot.
//
// **Architecture Overview:**
// - `core/` = Moderation engine and enforcement (platform-agnostic)
// - `infra/` = Strike stores and policy loading
// - `discord/` = Discord-specific adapters (gateway, audit log, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Route message and member-join events into automod

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::moderation::{Enforcer, JoinRateMonitor, ModerationEngine, StrikeStore};
use crate::discord::moderation::{
    handle_member_join, handle_message_for_automod, ChannelAuditSink, SerenityGateway,
};
use crate::discord::{Data, Error};
use crate::infra::moderation::{load_policy, InMemoryStrikeStore, SqliteStrikeStore};
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::collections::HashSet;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_PATH: &str = "data/automod.db";

/// Event handler for non-command Discord events.
async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            if let Err(e) = handle_message_for_automod(new_message, data).await {
                tracing::error!("Error running automod on message: {}", e);
            }
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            if let Err(e) = handle_member_join(new_member, data).await {
                tracing::error!("Error checking member join: {}", e);
            }
        }
        _ => {}
    }

    Ok(())
}

/// Parse an optional comma-separated list of Discord IDs.
fn id_list_from_env(var: &str) -> anyhow::Result<HashSet<u64>> {
    let raw = match std::env::var(var) {
        Ok(raw) => raw,
        Err(_) => return Ok(HashSet::new()),
    };

    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<u64>()
                .with_context(|| format!("{} contains an invalid user id: {}", var, id))
        })
        .collect()
}

async fn build_strike_store() -> anyhow::Result<Box<dyn StrikeStore>> {
    if std::env::var("AUTOMOD_STORAGE").as_deref() == Ok("memory") {
        tracing::warn!("Using in-memory strike store; strikes reset on restart");
        return Ok(Box::new(InMemoryStrikeStore::new()));
    }

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    let db_path = std::env::var("AUTOMOD_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for {}", db_path))?;
        }
    }

    let store = SqliteStrikeStore::connect(&db_path)
        .await
        .with_context(|| format!("Failed to open strike database at {}", db_path))?;
    tracing::info!(db_path = %db_path, "Strike store ready");
    Ok(Box::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Initialize logging so we can see what's happening (RUST_LOG overrides)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let token = std::env::var("DISCORD_TOKEN").context(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    )?;

    // A bad policy is fatal.
    let policy = load_policy().context("Invalid automod configuration")?;
    tracing::info!(
        enabled = policy.enabled,
        banned_words = policy.banned_words.len(),
        warn = policy.warn_strikes,
        mute = policy.mute_strikes,
        kick = policy.kick_strikes,
        join_raid_threshold = policy.join_raid_threshold,
        "Automod policy loaded"
    );

    let log_channel_id = match std::env::var("MOD_LOG_CHANNEL_ID") {
        Ok(raw) => Some(
            raw.trim()
                .parse::<u64>()
                .with_context(|| format!("MOD_LOG_CHANNEL_ID is not a channel id: {}", raw))?,
        ),
        Err(_) => {
            tracing::warn!("MOD_LOG_CHANNEL_ID not set; automod events will only be traced");
            None
        }
    };
    let known_alts = id_list_from_env("AUTOMOD_KNOWN_ALTS")?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where we wire everything together.

    let store = build_strike_store().await?;
    let lockdown_duration = policy.lockdown_duration();
    let join_monitor = Arc::new(JoinRateMonitor::from_policy(&policy));
    let moderation = Arc::new(ModerationEngine::new(store, policy)?);

    let http = Arc::new(serenity::Http::new(&token));
    let gateway = Arc::new(SerenityGateway::new(Arc::clone(&http)));
    let audit = Arc::new(ChannelAuditSink::spawn(Arc::clone(&http), log_channel_id));
    let enforcer = Arc::new(Enforcer::new(gateway, Arc::clone(&audit), lockdown_duration));

    let data = Data {
        moderation,
        enforcer: Arc::clone(&enforcer),
        join_monitor,
        known_alts,
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: Vec::new(),
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|_ctx, ready, _framework| {
            Box::pin(async move {
                tracing::info!(user = %ready.user.name, "🚀 Automod is ready!");
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    // Ctrl-C: give every locked channel back before going offline.
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutting down, lifting active lockdowns");
        enforcer.lift_all().await;
        audit.flush().await;
        shard_manager.shutdown_all().await;
    });

    client.start().await.context("Error running bot")?;
    Ok(())
}
