// SQLite-backed strike store so strikes survive restarts.
//
// Tables:
// - strike_records: one row per (user, guild) with the current strike count

use crate::core::moderation::{ModerationError, ModerationRecord, StrikeStore, ViolationKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteStrikeStore {
    pool: Pool<Sqlite>,
}

impl SqliteStrikeStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `path` and run migrations.
    pub async fn connect(path: &str) -> Result<Self, ModerationError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect(&format!("sqlite://{}?mode=rwc", path))
            .await
            .map_err(|e| ModerationError::StorageError(e.to_string()))?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strike_records (
                user_id INTEGER NOT NULL,
                guild_id INTEGER NOT NULL,
                strike_count INTEGER NOT NULL DEFAULT 0,
                last_violation TEXT,
                last_kind TEXT,
                PRIMARY KEY (user_id, guild_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ModerationError::StorageError(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl StrikeStore for SqliteStrikeStore {
    async fn get_record(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<ModerationRecord>, ModerationError> {
        let row = sqlx::query(
            r#"
            SELECT strike_count, last_violation, last_kind
            FROM strike_records
            WHERE user_id = ? AND guild_id = ?
            "#,
        )
        .bind(user_id as i64)
        .bind(guild_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ModerationError::StorageError(e.to_string()))?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let last_violation = row
            .get::<Option<String>, _>("last_violation")
            .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let last_kind = match row.get::<Option<String>, _>("last_kind") {
            Some(kind) => match kind.parse::<ViolationKind>() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    tracing::warn!(user_id, guild_id, "Ignoring stored violation kind: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(Some(ModerationRecord {
            user_id,
            guild_id,
            strike_count: row.get::<i64, _>("strike_count").max(0) as u32,
            last_violation,
            last_kind,
        }))
    }

    async fn save_record(&self, record: &ModerationRecord) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            INSERT INTO strike_records (user_id, guild_id, strike_count, last_violation, last_kind)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, guild_id) DO UPDATE SET
                strike_count = excluded.strike_count,
                last_violation = excluded.last_violation,
                last_kind = excluded.last_kind
            "#,
        )
        .bind(record.user_id as i64)
        .bind(record.guild_id as i64)
        .bind(record.strike_count as i64)
        .bind(record.last_violation.map(|ts| ts.to_rfc3339()))
        .bind(record.last_kind.map(|kind| kind.as_str()))
        .execute(&self.pool)
        .await
        .map_err(|e| ModerationError::StorageError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_strikes_survive_reconnect() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_string_lossy().to_string();

        let store = SqliteStrikeStore::connect(&path).await.unwrap();
        assert_eq!(store.get_record(5, 7).await.unwrap(), None);

        let mut record = ModerationRecord::new(5, 7);
        record.strike_count = 3;
        record.last_kind = Some(ViolationKind::ExcessiveCaps);
        record.last_violation = Some(Utc::now());
        store.save_record(&record).await.unwrap();

        // Reopen the same file
        let store2 = SqliteStrikeStore::connect(&path).await.unwrap();
        let loaded = store2.get_record(5, 7).await.unwrap().unwrap();
        assert_eq!(loaded.strike_count, 3);
        assert_eq!(loaded.last_kind, Some(ViolationKind::ExcessiveCaps));
        assert!(loaded.last_violation.is_some());
    }

    #[tokio::test]
    async fn test_save_overwrites_existing_record() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_string_lossy().to_string();
        let store = SqliteStrikeStore::connect(&path).await.unwrap();

        let mut record = ModerationRecord::new(1, 2);
        record.strike_count = 5;
        store.save_record(&record).await.unwrap();

        // kick reset
        record.strike_count = 0;
        store.save_record(&record).await.unwrap();

        let loaded = store.get_record(1, 2).await.unwrap().unwrap();
        assert_eq!(loaded.strike_count, 0);
        assert_eq!(loaded.last_kind, None);
    }
}
