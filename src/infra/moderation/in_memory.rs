// In-memory implementation of StrikeStore.
//
// Strikes live for the lifetime of the process. Handy for running the bot
// without a database file and for exercising the engine in tests.

use crate::core::moderation::{ModerationError, ModerationRecord, StrikeStore};
use async_trait::async_trait;
use dashmap::DashMap;

/// A composite key for looking up strike records.
/// We need both user_id AND guild_id since users can be in multiple guilds.
#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
struct UserGuildKey {
    user_id: u64,
    guild_id: u64,
}

/// Concurrent map of (user, guild) -> record.
#[derive(Default)]
pub struct InMemoryStrikeStore {
    records: DashMap<UserGuildKey, ModerationRecord>,
}

impl InMemoryStrikeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StrikeStore for InMemoryStrikeStore {
    async fn get_record(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<ModerationRecord>, ModerationError> {
        let key = UserGuildKey { user_id, guild_id };
        Ok(self.records.get(&key).map(|entry| entry.clone()))
    }

    async fn save_record(&self, record: &ModerationRecord) -> Result<(), ModerationError> {
        let key = UserGuildKey {
            user_id: record.user_id,
            guild_id: record.guild_id,
        };
        self.records.insert(key, record.clone());
        Ok(())
    }
}
