//! The UI-facing projection of the session list.

use chrono::{DateTime, Utc};
use parley_core::error::SyncError;
use parley_core::message::SessionId;
use parley_core::session::SessionMeta;
use parley_memory::atomic::{read_json, write_json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What the sidebar needs to show one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSession {
    pub id: SessionId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: u64,
}

impl From<&SessionMeta> for CachedSession {
    fn from(meta: &SessionMeta) -> Self {
        Self {
            id: meta.id.clone(),
            title: meta.title.clone(),
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            message_count: meta.message_count,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    active: Option<SessionId>,
    #[serde(default)]
    sessions: BTreeMap<SessionId, CachedSession>,
}

/// Local session list, optionally persisted to a JSON file.
#[derive(Debug, Default)]
pub struct LocalHistoryCache {
    path: Option<PathBuf>,
    data: CacheFile,
    /// Bumped by every snapshot.
    generation: u64,
}

/// The cache contents at one point in time, to be written once the cache
/// lock is released.
#[derive(Debug)]
pub struct CacheSnapshot {
    path: PathBuf,
    data: CacheFile,
    generation: u64,
}

impl CacheSnapshot {
    /// Later snapshots have higher generations.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Write atomically. Blocking; async callers use `spawn_blocking`.
    pub fn write(&self) -> Result<(), SyncError> {
        write_json(&self.path, &self.data).map_err(|e| SyncError::CacheIo(e.to_string()))
    }
}

impl LocalHistoryCache {
    /// A cache that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing file is an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let path = path.into();
        let data = read_json::<CacheFile>(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                SyncError::CacheCorrupt(e.to_string())
            } else {
                SyncError::CacheIo(e.to_string())
            }
        })?;
        Ok(Self {
            path: Some(path),
            data: data.unwrap_or_default(),
            generation: 0,
        })
    }

    /// An empty cache that will be written to `path` on the next save.
    pub fn empty_at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            data: CacheFile::default(),
            generation: 0,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Copy the contents for writing. In-memory caches have nothing to write.
    pub fn snapshot(&mut self) -> Option<CacheSnapshot> {
        let path = self.path.clone()?;
        self.generation += 1;
        Some(CacheSnapshot {
            path,
            data: self.data.clone(),
            generation: self.generation,
        })
    }

    pub fn get(&self, id: &SessionId) -> Option<&CachedSession> {
        self.data.sessions.get(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.data.sessions.contains_key(id)
    }

    pub fn upsert(&mut self, session: CachedSession) {
        self.data.sessions.insert(session.id.clone(), session);
    }

    /// Remove an entry; clears the active marker if it pointed there.
    pub fn remove(&mut self, id: &SessionId) -> bool {
        if self.data.active.as_ref() == Some(id) {
            self.data.active = None;
        }
        self.data.sessions.remove(id).is_some()
    }

    pub fn set_title(&mut self, id: &SessionId, title: &str) -> bool {
        match self.data.sessions.get_mut(id) {
            Some(entry) => {
                entry.title = title.to_string();
                true
            }
            None => false,
        }
    }

    /// Newest first, same order as the store lists them.
    pub fn list(&self) -> Vec<CachedSession> {
        let mut sessions: Vec<CachedSession> = self.data.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.data.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.data.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.sessions.is_empty()
    }

    pub fn active(&self) -> Option<&SessionId> {
        self.data.active.as_ref()
    }

    pub fn set_active(&mut self, id: Option<SessionId>) {
        self.data.active = id;
    }
}
