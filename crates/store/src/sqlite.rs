//! SQLite backend.
//!
//! Uses a single SQLite database file with three tables:
//! - `sessions`: one row per session
//! - `messages`: message headers, keyed by ascending id
//! - `parts`: message parts, cascading on message delete
//!
//! Entities are stored as JSON documents next to the few columns needed for
//! lookup and ordering.

use async_trait::async_trait;
use chrono::SecondsFormat;
use rivet_core::error::StoreError;
use rivet_core::message::{MessageInfo, MessageWithParts, Part};
use rivet_core::session::Session;
use rivet_core::store::MessageStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

fn storage(context: &str) -> impl Fn(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::Storage(format!("{context}: {e}"))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_row<T: DeserializeOwned>(row: &sqlx::sqlite::SqliteRow) -> Result<T, StoreError> {
    let data: String = row
        .try_get("data")
        .map_err(|e| StoreError::Storage(format!("data column: {e}")))?;
    serde_json::from_str(&data).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// A SQLite message store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open a store at `path`, e.g. `sqlite://~/.rivet/rivet.db`.
    ///
    /// The database and all tables/indexes are created automatically.
    /// Pass `"sqlite::memory:"` for an ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // Every connection to `:memory:` is its own database.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(storage("Failed to open SQLite"))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            (
                "sessions table",
                r#"
                CREATE TABLE IF NOT EXISTS sessions (
                    id          TEXT PRIMARY KEY NOT NULL,
                    updated_at  TEXT NOT NULL,
                    data        TEXT NOT NULL
                )
                "#,
            ),
            (
                "messages table",
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id          TEXT PRIMARY KEY NOT NULL,
                    session_id  TEXT NOT NULL,
                    data        TEXT NOT NULL
                )
                "#,
            ),
            (
                "parts table",
                r#"
                CREATE TABLE IF NOT EXISTS parts (
                    id          TEXT PRIMARY KEY NOT NULL,
                    message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                    data        TEXT NOT NULL
                )
                "#,
            ),
            (
                "messages index",
                "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id)",
            ),
            (
                "parts index",
                "CREATE INDEX IF NOT EXISTS idx_parts_message ON parts(message_id, id)",
            ),
            (
                "sessions index",
                "CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at DESC)",
            ),
        ];

        for (name, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{name}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    async fn upsert_part<'e, E>(executor: E, part: &Part) -> Result<(), StoreError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO parts (id, message_id, data) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET data = excluded.data
            "#,
        )
        .bind(&part.id)
        .bind(&part.message_id)
        .bind(to_json(part)?)
        .execute(executor)
        .await
        .map_err(storage("Part upsert failed"))?;
        Ok(())
    }

    async fn upsert_message<'e, E>(executor: E, info: &MessageInfo) -> Result<(), StoreError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, data) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET data = excluded.data
            "#,
        )
        .bind(info.id())
        .bind(info.session_id())
        .bind(to_json(info)?)
        .execute(executor)
        .await
        .map_err(storage("Message upsert failed"))?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, updated_at, data) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                updated_at = excluded.updated_at,
                data = excluded.data
            "#,
        )
        .bind(&session.id)
        .bind(session.time.updated.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(to_json(session)?)
        .execute(&self.pool)
        .await
        .map_err(storage("Session upsert failed"))?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT data FROM sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("Session lookup failed"))?;
        row.as_ref().map(from_row).transpose()
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query("SELECT data FROM sessions ORDER BY updated_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage("Session listing failed"))?;
        rows.iter().map(from_row).collect()
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage("Begin failed"))?;
        sqlx::query("DELETE FROM messages WHERE session_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage("Message delete failed"))?;
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage("Session delete failed"))?;
        tx.commit().await.map_err(storage("Commit failed"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_message(&self, info: &MessageInfo) -> Result<(), StoreError> {
        Self::upsert_message(&self.pool, info).await
    }

    async fn get_message(&self, id: &str) -> Result<Option<MessageInfo>, StoreError> {
        let row = sqlx::query("SELECT data FROM messages WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("Message lookup failed"))?;
        row.as_ref().map(from_row).transpose()
    }

    async fn message_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT id FROM messages WHERE session_id = ?1 ORDER BY id ASC")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("Message listing failed"))?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("id")
                    .map_err(|e| StoreError::Storage(format!("id column: {e}")))
            })
            .collect()
    }

    async fn delete_message(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage("Message delete failed"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_message(&self, message: &MessageWithParts) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage("Begin failed"))?;
        Self::upsert_message(&mut *tx, &message.info).await?;
        for part in &message.parts {
            Self::upsert_part(&mut *tx, part).await?;
        }
        tx.commit().await.map_err(storage("Commit failed"))?;
        Ok(())
    }

    async fn write_part(&self, part: &Part) -> Result<(), StoreError> {
        Self::upsert_part(&self.pool, part).await
    }

    async fn get_part(&self, message_id: &str, part_id: &str) -> Result<Option<Part>, StoreError> {
        let row = sqlx::query("SELECT data FROM parts WHERE id = ?1 AND message_id = ?2")
            .bind(part_id)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("Part lookup failed"))?;
        row.as_ref().map(from_row).transpose()
    }

    async fn list_parts(&self, message_id: &str) -> Result<Vec<Part>, StoreError> {
        let rows = sqlx::query("SELECT data FROM parts WHERE message_id = ?1 ORDER BY id ASC")
            .bind(message_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("Part listing failed"))?;
        rows.iter().map(from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    async fn test_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("rivet.db").display());
        let store = SqliteStore::new(&url).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn message_lifecycle() {
        let (_dir, store) = test_store().await;
        testing::message_lifecycle(&store).await;
    }

    #[tokio::test]
    async fn part_rules() {
        let (_dir, store) = test_store().await;
        testing::part_rules(&store).await;
    }

    #[tokio::test]
    async fn settlement_is_terminal() {
        let (_dir, store) = test_store().await;
        testing::settlement_is_terminal(&store).await;
    }

    #[tokio::test]
    async fn stream_is_newest_first() {
        let (_dir, store) = test_store().await;
        testing::stream_is_newest_first(&store).await;
    }

    #[tokio::test]
    async fn session_cascade() {
        let (_dir, store) = test_store().await;
        testing::session_cascade(&store).await;
    }

    #[tokio::test]
    async fn in_memory_database_works() {
        let store = SqliteStore::new("sqlite::memory:").await.unwrap();
        let session = store.create_session(None).await.unwrap();
        assert!(store.get_session(&session.id).await.unwrap().is_some());
        assert_eq!(store.name(), "sqlite");
    }
}
