// Discord layer - event handlers and platform adapters.

#[path = "moderation/mod.rs"]
pub mod moderation;

use crate::core::moderation::{Enforcer, JoinRateMonitor, ModerationEngine, StrikeStore};
use moderation::{ChannelAuditSink, SerenityGateway};
use std::collections::HashSet;
use std::sync::Arc;

pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Shared state handed to every event.
pub struct Data {
    pub moderation: Arc<ModerationEngine<Box<dyn StrikeStore>>>,
    pub enforcer: Arc<Enforcer<SerenityGateway, ChannelAuditSink>>,
    pub join_monitor: Arc<JoinRateMonitor>,
    /// Users whose messages carry the known-alt signal
    pub known_alts: HashSet<u64>,
}
