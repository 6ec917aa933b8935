//! File-based session store: one JSON document per session.
//!
//! Layout under the data directory:
//!
//! ```text
//! sessions/<escaped id>.json   SessionRecord (meta + every message)
//! tombstones.json              ids of deleted sessions
//! ```
//!
//! Every mutation rewrites the affected file through [`write_atomic`], and the
//! in-memory cache is only updated once that write has succeeded. A failed
//! append therefore leaves no trace in the cache or on disk.
//!
//! [`write_atomic`]: crate::atomic::write_atomic

use crate::atomic::{escape_file_name, read_json, remove_durable, remove_stale_temps, write_json};
use crate::record::SessionRecord;
use async_trait::async_trait;
use chrono::Utc;
use parley_core::error::StoreError;
use parley_core::keyed_lock::KeyedLocks;
use parley_core::message::{Message, SessionId};
use parley_core::session::{sort_newest_first, SessionFlags, SessionMeta, SessionStore};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Durable session store backed by JSON files.
pub struct FileSessionStore {
    root: PathBuf,
    cache: Arc<RwLock<HashMap<SessionId, SessionRecord>>>,
    tombstones: Arc<RwLock<BTreeSet<SessionId>>>,
    locks: KeyedLocks<SessionId>,
}

impl FileSessionStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// Corrupt session files are skipped with a warning, files of tombstoned
    /// sessions are removed, and half-written temp files are swept.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let sessions_dir = root.join("sessions");
        std::fs::create_dir_all(&sessions_dir).map_err(storage)?;

        let swept = remove_stale_temps(&sessions_dir).map_err(storage)?
            + remove_stale_temps(&root).map_err(storage)?;
        if swept > 0 {
            warn!(count = swept, "Removed interrupted session writes");
        }

        let tombstones: BTreeSet<SessionId> = match read_json(&root.join("tombstones.json")) {
            Ok(t) => t.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Tombstone file unreadable, starting with none");
                BTreeSet::new()
            }
        };

        let mut cache = HashMap::new();
        for entry in std::fs::read_dir(&sessions_dir).map_err(storage)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<SessionRecord>(&path) {
                Ok(Some(record)) if tombstones.contains(&record.meta.id) => {
                    debug!(session = %record.meta.id, "Dropping file of deleted session");
                    remove_durable(&path).map_err(storage)?;
                }
                Ok(Some(record)) => {
                    if !record.is_gapless() {
                        warn!(session = %record.meta.id, "Session has ordinal gaps");
                    }
                    cache.insert(record.meta.id.clone(), record);
                }
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping corrupted session file"),
            }
        }

        debug!(root = %root.display(), sessions = cache.len(), "File session store loaded");
        Ok(Self {
            root,
            cache: Arc::new(RwLock::new(cache)),
            tombstones: Arc::new(RwLock::new(tombstones)),
            locks: KeyedLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_path(&self, id: &SessionId) -> PathBuf {
        self.root
            .join("sessions")
            .join(format!("{}.json", escape_file_name(id.as_str())))
    }

    async fn persist(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let path = self.session_path(&record.meta.id);
        let record = record.clone();
        tokio::task::spawn_blocking(move || write_json(&path, &record))
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?
            .map_err(storage)
    }

    async fn ensure_live(&self, id: &SessionId) -> Result<(), StoreError> {
        if self.tombstones.read().await.contains(id) {
            return Err(StoreError::SessionDeleted(id.to_string()));
        }
        Ok(())
    }

    async fn update_meta<F>(&self, id: &SessionId, f: F) -> Result<SessionMeta, StoreError>
    where
        F: FnOnce(&mut SessionMeta) + Send,
    {
        let _guard = self.locks.lock(id).await;
        self.ensure_live(id).await?;
        let mut record = self
            .cache
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        f(&mut record.meta);
        record.meta.updated_at = Utc::now();
        self.persist(&record).await?;
        let meta = record.meta.clone();
        self.cache.write().await.insert(id.clone(), record);
        Ok(meta)
    }
}

fn storage(e: std::io::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn create(&self, meta: SessionMeta) -> Result<SessionMeta, StoreError> {
        let _guard = self.locks.lock(&meta.id).await;
        self.ensure_live(&meta.id).await?;
        if let Some(existing) = self.cache.read().await.get(&meta.id) {
            return Ok(existing.meta.clone());
        }
        let record = SessionRecord::new(meta);
        self.persist(&record).await?;
        let meta = record.meta.clone();
        self.cache.write().await.insert(meta.id.clone(), record);
        Ok(meta)
    }

    async fn append(&self, session_id: &SessionId, message: Message) -> Result<Message, StoreError> {
        let _guard = self.locks.lock(session_id).await;
        self.ensure_live(session_id).await?;

        let mut record = self
            .cache
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| SessionRecord::implicit(session_id));
        let stored = record.push(message);
        self.persist(&record).await?;
        self.cache.write().await.insert(session_id.clone(), record);

        debug!(session = %session_id, ordinal = stored.ordinal, "Message appended");
        Ok(stored)
    }

    async fn get(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.ensure_live(session_id).await?;
        self.cache
            .read()
            .await
            .get(session_id)
            .map(|r| r.messages.clone())
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn meta(&self, session_id: &SessionId) -> Result<Option<SessionMeta>, StoreError> {
        Ok(self.cache.read().await.get(session_id).map(|r| r.meta.clone()))
    }

    async fn delete(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        let _guard = self.locks.lock(session_id).await;

        // Tombstone first: a crash before the file removal is finished on next open.
        {
            let mut tombstones = self.tombstones.write().await;
            if !tombstones.contains(session_id) {
                let mut next = tombstones.clone();
                next.insert(session_id.clone());
                let path = self.root.join("tombstones.json");
                let snapshot = next.clone();
                tokio::task::spawn_blocking(move || write_json(&path, &snapshot))
                    .await
                    .map_err(|e| StoreError::Storage(e.to_string()))?
                    .map_err(storage)?;
                *tombstones = next;
            }
        }

        let path = self.session_path(session_id);
        tokio::task::spawn_blocking(move || remove_durable(&path))
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?
            .map_err(storage)?;
        let existed = self.cache.write().await.remove(session_id).is_some();
        debug!(session = %session_id, existed, "Session deleted");
        Ok(existed)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, StoreError> {
        let mut metas: Vec<SessionMeta> =
            self.cache.read().await.values().map(|r| r.meta.clone()).collect();
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
        Ok(self.tombstones.read().await.contains(session_id))
    }
}
