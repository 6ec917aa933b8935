//! SQLite session store.
//!
//! Three tables in one database file:
//! - `sessions` — one row of metadata per live session
//! - `messages` — the log, keyed by `(session_id, ordinal)`
//! - `tombstones` — ids of deleted sessions, never reused
//!
//! Each append runs in its own transaction, so a failed write leaves the log
//! exactly as it was.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::error::StoreError;
use parley_core::keyed_lock::KeyedLocks;
use parley_core::message::{Message, Role, SessionId};
use parley_core::session::{sort_newest_first, SessionFlags, SessionMeta, SessionStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A durable session store on SQLite.
pub struct SqliteSessionStore {
    pool: SqlitePool,
    locks: KeyedLocks<SessionId>,
}

impl SqliteSessionStore {
    /// Open the database at `path`, creating file and schema when missing.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite session store initialized at {path}");
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            locks: KeyedLocks::new(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id            TEXT PRIMARY KEY,
                title         TEXT NOT NULL,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0,
                tools_enabled INTEGER NOT NULL DEFAULT 1,
                rag_enabled   INTEGER NOT NULL DEFAULT 1,
                documents     TEXT NOT NULL DEFAULT '[]'
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                session_id       TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                ordinal          INTEGER NOT NULL,
                role             TEXT NOT NULL,
                content          TEXT NOT NULL,
                image            TEXT,
                tool_invocations TEXT NOT NULL DEFAULT '[]',
                timestamp        TEXT NOT NULL,
                truncated        INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (session_id, ordinal)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS tombstones (
                session_id TEXT PRIMARY KEY,
                deleted_at TEXT NOT NULL
            )
            "#,
        ];

        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        }
        debug!("SQLite session schema ready");
        Ok(())
    }

    async fn tombstoned(&self, id: &SessionId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM tombstones WHERE session_id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        Ok(row.is_some())
    }

    async fn update_meta<F>(&self, id: &SessionId, f: F) -> Result<SessionMeta, StoreError>
    where
        F: FnOnce(&mut SessionMeta) + Send,
    {
        let _guard = self.locks.lock(id).await;
        if self.tombstoned(id).await? {
            return Err(StoreError::SessionDeleted(id.to_string()));
        }
        let mut meta = self
            .meta(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        f(&mut meta);
        meta.updated_at = Utc::now();

        sqlx::query(
            "UPDATE sessions SET title = ?2, updated_at = ?3, tools_enabled = ?4, \
             rag_enabled = ?5, documents = ?6 WHERE id = ?1",
        )
        .bind(id.as_str())
        .bind(&meta.title)
        .bind(meta.updated_at.to_rfc3339())
        .bind(meta.flags.tools_enabled)
        .bind(meta.flags.rag_enabled)
        .bind(to_json(&meta.documents)?)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(meta)
    }

    fn row_to_meta(row: &sqlx::sqlite::SqliteRow) -> Result<SessionMeta, StoreError> {
        let documents: String = row.try_get("documents").map_err(db)?;
        Ok(SessionMeta {
            id: SessionId::from(row.try_get::<String, _>("id").map_err(db)?.as_str()),
            title: row.try_get("title").map_err(db)?,
            created_at: parse_time(&row.try_get::<String, _>("created_at").map_err(db)?)?,
            updated_at: parse_time(&row.try_get::<String, _>("updated_at").map_err(db)?)?,
            message_count: row.try_get::<i64, _>("message_count").map_err(db)? as u64,
            flags: SessionFlags {
                tools_enabled: row.try_get("tools_enabled").map_err(db)?,
                rag_enabled: row.try_get("rag_enabled").map_err(db)?,
            },
            documents: from_json(&documents)?,
        })
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
        let role: String = row.try_get("role").map_err(db)?;
        let image: Option<String> = row.try_get("image").map_err(db)?;
        let invocations: String = row.try_get("tool_invocations").map_err(db)?;
        Ok(Message {
            ordinal: row.try_get::<i64, _>("ordinal").map_err(db)? as u64,
            role: Role::parse(&role)
                .ok_or_else(|| StoreError::Storage(format!("Unknown role in database: {role}")))?,
            content: row.try_get("content").map_err(db)?,
            image: image.as_deref().map(from_json).transpose()?,
            tool_invocations: from_json(&invocations)?,
            timestamp: parse_time(&row.try_get::<String, _>("timestamp").map_err(db)?)?,
            truncated: row.try_get("truncated").map_err(db)?,
        })
    }

    async fn insert_session(
        conn: &mut sqlx::SqliteConnection,
        meta: &SessionMeta,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO sessions \
             (id, title, created_at, updated_at, message_count, tools_enabled, rag_enabled, documents) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(meta.id.as_str())
        .bind(&meta.title)
        .bind(meta.created_at.to_rfc3339())
        .bind(meta.updated_at.to_rfc3339())
        .bind(meta.message_count as i64)
        .bind(meta.flags.tools_enabled)
        .bind(meta.flags.rag_enabled)
        .bind(to_json(&meta.documents)?)
        .execute(conn)
        .await
        .map_err(db)?;
        Ok(())
    }
}

fn db(e: sqlx::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Storage(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::Storage(e.to_string()))
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Storage(format!("Bad timestamp {text:?}: {e}")))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create(&self, meta: SessionMeta) -> Result<SessionMeta, StoreError> {
        let _guard = self.locks.lock(&meta.id).await;
        if self.tombstoned(&meta.id).await? {
            return Err(StoreError::SessionDeleted(meta.id.to_string()));
        }
        let mut conn = self.pool.acquire().await.map_err(db)?;
        Self::insert_session(&mut *conn, &meta).await?;
        drop(conn);
        self.meta(&meta.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(meta.id.to_string()))
    }

    async fn append(&self, session_id: &SessionId, mut message: Message) -> Result<Message, StoreError> {
        let _guard = self.locks.lock(session_id).await;
        let mut tx = self.pool.begin().await.map_err(db)?;

        let dead = sqlx::query("SELECT 1 FROM tombstones WHERE session_id = ?1")
            .bind(session_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?;
        if dead.is_some() {
            return Err(StoreError::SessionDeleted(session_id.to_string()));
        }

        Self::insert_session(&mut *tx, &SessionMeta::new(session_id.clone(), SessionFlags::default()))
            .await?;

        let next: i64 = sqlx::query(
            "SELECT COALESCE(MAX(ordinal) + 1, 0) AS next FROM messages WHERE session_id = ?1",
        )
        .bind(session_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db)?
        .try_get("next")
        .map_err(db)?;
        message.ordinal = next as u64;

        sqlx::query(
            "INSERT INTO messages \
             (session_id, ordinal, role, content, image, tool_invocations, timestamp, truncated) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(session_id.as_str())
        .bind(next)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.image.as_ref().map(to_json).transpose()?)
        .bind(to_json(&message.tool_invocations)?)
        .bind(message.timestamp.to_rfc3339())
        .bind(message.truncated)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        sqlx::query("UPDATE sessions SET message_count = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(session_id.as_str())
            .bind(next + 1)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        tx.commit().await.map_err(db)?;
        debug!(session = %session_id, ordinal = next, "Message appended");
        Ok(message)
    }

    async fn get(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        if self.tombstoned(session_id).await? {
            return Err(StoreError::SessionDeleted(session_id.to_string()));
        }
        if self.meta(session_id).await?.is_none() {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        let rows = sqlx::query("SELECT * FROM messages WHERE session_id = ?1 ORDER BY ordinal ASC")
            .bind(session_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn meta(&self, session_id: &SessionId) -> Result<Option<SessionMeta>, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(session_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(Self::row_to_meta).transpose()
    }

    async fn delete(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        let _guard = self.locks.lock(session_id).await;
        let mut tx = self.pool.begin().await.map_err(db)?;
        sqlx::query("INSERT OR IGNORE INTO tombstones (session_id, deleted_at) VALUES (?1, ?2)")
            .bind(session_id.as_str())
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        sqlx::query("DELETE FROM messages WHERE session_id = ?1")
            .bind(session_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(session_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        tx.commit().await.map_err(db)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, StoreError> {
        let rows = sqlx::query("SELECT * FROM sessions")
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        let mut metas = rows
            .iter()
            .map(Self::row_to_meta)
            .collect::<Result<Vec<_>, _>>()?;
        sort_newest_first(&mut metas);
        Ok(metas)
    }

    async fn rename(&self, session_id: &SessionId, title: &str) -> Result<SessionMeta, StoreError> {
        let title = title.to_string();
        self.update_meta(session_id, move |m| m.title = title).await
    }

    async fn set_flags(
        &self,
        session_id: &SessionId,
        flags: SessionFlags,
    ) -> Result<SessionMeta, StoreError> {
        self.update_meta(session_id, move |m| m.flags = flags).await
    }

    async fn add_document(&self, session_id: &SessionId, name: &str) -> Result<SessionMeta, StoreError> {
        let name = name.to_string();
        self.update_meta(session_id, move |m| m.push_document(&name)).await
    }

    async fn is_deleted(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        self.tombstoned(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::message::{ImageRef, ToolInvocation};

    async fn test_store(dir: &tempfile::TempDir) -> SqliteSessionStore {
        let path = dir.path().join("sessions.db");
        SqliteSessionStore::new(&format!("sqlite://{}", path.display()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn append_assigns_ordinals() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_store(&dir).await;
        let id = SessionId::from("s1");
        let first = db.append(&id, Message::user("2+2?")).await.unwrap();
        let second = db.append(&id, Message::assistant("4")).await.unwrap();
        assert_eq!((first.ordinal, second.ordinal), (0, 1));

        let meta = db.meta(&id).await.unwrap().unwrap();
        assert_eq!(meta.message_count, 2);
    }

    #[tokio::test]
    async fn message_fields_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_store(&dir).await;
        let id = SessionId::from("s1");
        let msg = Message::assistant("It is sunny")
            .with_image(ImageRef::Url { url: "https://example.com/a.png".into() })
            .with_tool_invocations(vec![ToolInvocation {
                tool_name: "weather_lookup".into(),
                input: serde_json::json!({"city": "Paris"}),
                output: Some("Sunny, 22°C".into()),
                error: None,
                latency_ms: 3,
            }])
            .mark_truncated();
        let stored = db.append(&id, msg).await.unwrap();

        let back = db.get(&id).await.unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].tool_invocations, stored.tool_invocations);
        assert_eq!(back[0].image, stored.image);
        assert!(back[0].truncated);
    }

    #[tokio::test]
    async fn delete_writes_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_store(&dir).await;
        let id = SessionId::from("gone");
        db.append(&id, Message::user("hi")).await.unwrap();
        assert!(db.delete(&id).await.unwrap());
        assert!(!db.delete(&id).await.unwrap());
        assert!(db.is_deleted(&id).await.unwrap());
        assert!(matches!(
            db.append(&id, Message::user("late")).await,
            Err(StoreError::SessionDeleted(_))
        ));
        assert!(db.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delete_wins_over_concurrent_appends() {
        let dir = tempfile::tempdir().unwrap();
        let db = std::sync::Arc::new(test_store(&dir).await);
        crate::store_tests::append_racing_delete(db).await;

        let reopened = test_store(&dir).await;
        let id = SessionId::from("contested");
        assert!(reopened.is_deleted(&id).await.unwrap());
        assert!(reopened.meta(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = SessionId::from("kept");
        {
            let db = test_store(&dir).await;
            db.append(&id, Message::user("remember me")).await.unwrap();
            db.rename(&id, "Memory test").await.unwrap();
        }
        let db = test_store(&dir).await;
        let meta = db.meta(&id).await.unwrap().unwrap();
        assert_eq!(meta.title, "Memory test");
        assert_eq!(db.get(&id).await.unwrap()[0].content, "remember me");
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_store(&dir).await;
        assert!(matches!(
            db.get(&SessionId::from("nope")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn store_name() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(test_store(&dir).await.name(), "sqlite");
    }
}
