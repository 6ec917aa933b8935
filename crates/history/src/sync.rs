//! Reconciliation between the local cache and the authoritative store.

use crate::cache::{CacheSnapshot, CachedSession, LocalHistoryCache};
use chrono::Utc;
use parley_core::error::{Error, StoreError, SyncError};
use parley_core::event::{DomainEvent, EventBus};
use parley_core::message::{Message, SessionId};
use parley_core::session::{SessionMeta, SessionStore};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What a reconcile pass had to repair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// In the store but missing locally.
    pub added: Vec<SessionId>,
    /// Cached locally but gone from the store.
    pub removed: Vec<SessionId>,
    /// Title differed; the store's title won.
    pub retitled: Vec<SessionId>,
    /// Entries whose counters or timestamps were refreshed.
    pub refreshed: usize,
}

impl SyncReport {
    /// Divergences between cache and store (refreshes excluded).
    pub fn repairs(&self) -> usize {
        self.added.len() + self.removed.len() + self.retitled.len()
    }

    pub fn is_clean(&self) -> bool {
        self.repairs() == 0
    }
}

pub struct HistorySync {
    store: Arc<dyn SessionStore>,
    cache: Mutex<LocalHistoryCache>,
    /// Generation of the last snapshot on disk; held while writing.
    written: Mutex<u64>,
    events: Option<Arc<EventBus>>,
    /// Repairs made by the reconcile that ran at startup.
    startup_report: SyncReport,
}

impl HistorySync {
    pub fn new(store: Arc<dyn SessionStore>, cache: LocalHistoryCache) -> Self {
        Self {
            store,
            cache: Mutex::new(cache),
            written: Mutex::new(0),
            events: None,
            startup_report: SyncReport::default(),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Open the cache at `cache_path` and reconcile it once.
    ///
    /// A corrupt cache is discarded; the store rebuilds it.
    pub async fn startup(
        store: Arc<dyn SessionStore>,
        cache_path: Option<PathBuf>,
        events: Option<Arc<EventBus>>,
    ) -> Result<Self, Error> {
        let cache = match cache_path {
            None => LocalHistoryCache::in_memory(),
            Some(path) => match LocalHistoryCache::load(&path) {
                Ok(cache) => cache,
                Err(SyncError::CacheCorrupt(reason)) => {
                    warn!(path = %path.display(), %reason, "Local history cache corrupt, rebuilding from store");
                    LocalHistoryCache::empty_at(path)
                }
                Err(e) => return Err(e.into()),
            },
        };

        let mut sync = Self::new(store, cache);
        sync.events = events;
        let report = sync.reconcile().await?;
        info!(
            sessions = sync.cache.lock().await.len(),
            repairs = report.repairs(),
            "History sync ready"
        );
        sync.startup_report = report;
        Ok(sync)
    }

    pub fn startup_report(&self) -> &SyncReport {
        &self.startup_report
    }

    /// Make the cache match the store's live sessions and titles.
    ///
    /// The store wins every disagreement. Each divergence is logged as a
    /// consistency error before it is repaired.
    pub async fn reconcile(&self) -> Result<SyncReport, Error> {
        let authoritative = self.store.list_sessions().await?;
        let mut cache = self.cache.lock().await;
        let mut report = SyncReport::default();

        let live: HashSet<&SessionId> = authoritative.iter().map(|m| &m.id).collect();
        for id in cache.ids() {
            if !live.contains(&id) {
                log_divergence(&id, "cached session is not in the store");
                cache.remove(&id);
                report.removed.push(id);
            }
        }

        for meta in &authoritative {
            let fresh = CachedSession::from(meta);
            match cache.get(&meta.id) {
                None => {
                    log_divergence(&meta.id, "store session missing from cache");
                    report.added.push(meta.id.clone());
                }
                Some(cached) if cached.title != fresh.title => {
                    log_divergence(&meta.id, "title differs from store");
                    report.retitled.push(meta.id.clone());
                }
                Some(cached) if cached != &fresh => report.refreshed += 1,
                Some(_) => continue,
            }
            cache.upsert(fresh);
        }

        let snapshot = if report.repairs() > 0 || report.refreshed > 0 {
            cache.snapshot()
        } else {
            None
        };
        drop(cache);
        self.persist(snapshot).await?;

        debug!(
            added = report.added.len(),
            removed = report.removed.len(),
            retitled = report.retitled.len(),
            refreshed = report.refreshed,
            "History reconciled"
        );
        if let Some(events) = &self.events {
            events.publish(DomainEvent::HistoryReconciled {
                repairs: report.repairs(),
                timestamp: Utc::now(),
            });
        }
        Ok(report)
    }

    /// The session list from the fast path.
    pub async fn list(&self) -> Vec<CachedSession> {
        self.cache.lock().await.list()
    }

    pub async fn active(&self) -> Option<SessionId> {
        self.cache.lock().await.active().cloned()
    }

    /// Resume a session: full history comes from the store.
    ///
    /// If the store no longer has the session, the stale cache entry is
    /// dropped and the error is returned.
    pub async fn switch_to(&self, id: &SessionId) -> Result<Vec<Message>, Error> {
        match self.store.get(id).await {
            Ok(messages) => {
                let mut cache = self.cache.lock().await;
                if !cache.contains(id) {
                    if let Some(meta) = self.store.meta(id).await? {
                        cache.upsert(CachedSession::from(&meta));
                    }
                }
                cache.set_active(Some(id.clone()));
                let snapshot = cache.snapshot();
                drop(cache);
                self.persist_or_warn(snapshot).await;
                Ok(messages)
            }
            Err(e @ (StoreError::NotFound(_) | StoreError::SessionDeleted(_))) => {
                let snapshot = {
                    let mut cache = self.cache.lock().await;
                    if cache.remove(id) {
                        log_divergence(id, "switched to a session the store no longer has");
                        cache.snapshot()
                    } else {
                        None
                    }
                };
                self.persist_or_warn(snapshot).await;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mirror a store write (new session, appended turn) into the cache.
    pub async fn record(&self, meta: &SessionMeta) {
        let snapshot = {
            let mut cache = self.cache.lock().await;
            cache.upsert(CachedSession::from(meta));
            cache.snapshot()
        };
        self.persist_or_warn(snapshot).await;
    }

    /// Retitle a session. The store is updated first; the id never changes.
    pub async fn rename(&self, id: &SessionId, title: &str) -> Result<SessionMeta, Error> {
        let meta = self.store.rename(id, title).await?;
        let snapshot = {
            let mut cache = self.cache.lock().await;
            if !cache.set_title(id, &meta.title) {
                cache.upsert(CachedSession::from(&meta));
            }
            cache.snapshot()
        };
        self.persist_or_warn(snapshot).await;
        Ok(meta)
    }

    /// Delete a session: store first, then the local entry.
    ///
    /// If the store delete fails the cache is left untouched, so the session
    /// stays visible rather than reappearing after a restart.
    pub async fn delete(&self, id: &SessionId) -> Result<bool, Error> {
        let existed = self.store.delete(id).await?;
        let (was_cached, snapshot) = {
            let mut cache = self.cache.lock().await;
            let was_cached = cache.remove(id);
            (was_cached, cache.snapshot())
        };
        self.persist_or_warn(snapshot).await;
        debug!(session = %id, existed, was_cached, "Session removed from history");
        Ok(existed || was_cached)
    }
}

impl HistorySync {
    /// Write a snapshot on a blocking thread, outside the cache lock.
    /// A snapshot older than the one already on disk is dropped.
    async fn persist(&self, snapshot: Option<CacheSnapshot>) -> Result<(), SyncError> {
        let Some(snapshot) = snapshot else {
            return Ok(());
        };
        let mut written = self.written.lock().await;
        let generation = snapshot.generation();
        if generation <= *written {
            return Ok(());
        }
        tokio::task::spawn_blocking(move || snapshot.write())
            .await
            .map_err(|e| SyncError::CacheIo(e.to_string()))??;
        *written = generation;
        Ok(())
    }

    /// Cache write failures are not fatal: the next reconcile rebuilds the entry.
    async fn persist_or_warn(&self, snapshot: Option<CacheSnapshot>) {
        if let Err(e) = self.persist(snapshot).await {
            warn!(error = %e, "Local history cache write failed");
        }
    }
}

fn log_divergence(id: &SessionId, detail: &str) {
    let err = SyncError::Diverged {
        session_id: id.to_string(),
        detail: detail.to_string(),
    };
    warn!(kind = %err.kind(), "{err}; repairing from store");
}


#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::session::SessionFlags;
    use parley_memory::{FileSessionStore, InMemorySessionStore};

    async fn seeded_store(ids: &[&str]) -> Arc<InMemorySessionStore> {
        let store = Arc::new(InMemorySessionStore::new());
        for id in ids {
            store
                .append(&SessionId::from(*id), Message::user(format!("hello from {id}")))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn startup_fills_empty_cache() {
        let store = seeded_store(&["a", "b"]).await;
        let sync = HistorySync::startup(store, None, None).await.unwrap();
        assert_eq!(sync.list().await.len(), 2);
        assert_eq!(sync.startup_report().added.len(), 2);
    }

    #[tokio::test]
    async fn store_wins_on_existence_and_title() {
        let store = seeded_store(&["a"]).await;
        let mut cache = LocalHistoryCache::in_memory();
        let mut ghost = SessionMeta::new(SessionId::from("ghost"), SessionFlags::default());
        ghost.title = "Zombie".into();
        cache.upsert(CachedSession::from(&ghost));
        let mut stale = CachedSession::from(&store.meta(&SessionId::from("a")).await.unwrap().unwrap());
        stale.title = "Old title".into();
        cache.upsert(stale);

        let sync = HistorySync::new(store.clone(), cache);
        let report = sync.reconcile().await.unwrap();
        assert_eq!(report.removed, vec![SessionId::from("ghost")]);
        assert_eq!(report.retitled, vec![SessionId::from("a")]);

        let listed = sync.list().await;
        assert_eq!(listed.len(), 1);
        assert_ne!(listed[0].title, "Old title");
        assert!(sync.reconcile().await.unwrap().is_clean());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_records_leave_the_newest_cache_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("history.json");
        let store = seeded_store(&[]).await;
        let sync = Arc::new(
            HistorySync::startup(store, Some(cache_path.clone()), None)
                .await
                .unwrap(),
        );

        let writers: Vec<_> = (0..24)
            .map(|i| {
                let sync = sync.clone();
                tokio::spawn(async move {
                    let meta = SessionMeta::new(SessionId::from(&format!("s{i:02}")), SessionFlags::default());
                    sync.record(&meta).await;
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        assert_eq!(sync.list().await.len(), 24);
        let on_disk = LocalHistoryCache::load(&cache_path).unwrap();
        assert_eq!(on_disk.len(), 24);
    }

    #[tokio::test]
    async fn delete_propagates_to_store_first() {
        let store = seeded_store(&["a", "b"]).await;
        let sync = HistorySync::startup(store.clone(), None, None).await.unwrap();

        assert!(sync.delete(&SessionId::from("a")).await.unwrap());
        assert!(store.is_deleted(&SessionId::from("a")).await.unwrap());
        assert_eq!(sync.list().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_store_delete_keeps_local_entry() {
        let store = seeded_store(&["a"]).await;
        let sync = HistorySync::startup(store.clone(), None, None).await.unwrap();
        store.fail_writes(true);
        assert!(sync.delete(&SessionId::from("a")).await.is_err());
        assert_eq!(sync.list().await.len(), 1);
    }

    #[tokio::test]
    async fn deleted_session_does_not_come_back_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("history.json");
        let id = SessionId::from("doomed");
        {
            let store = Arc::new(FileSessionStore::open(dir.path()).unwrap());
            store.append(&id, Message::user("hi")).await.unwrap();
            let sync = HistorySync::startup(store, Some(cache_path.clone()), None)
                .await
                .unwrap();
            sync.delete(&id).await.unwrap();
        }
        let store = Arc::new(FileSessionStore::open(dir.path()).unwrap());
        let sync = HistorySync::startup(store, Some(cache_path), None).await.unwrap();
        assert!(sync.list().await.is_empty());
    }

    #[tokio::test]
    async fn rename_updates_both_views_and_keeps_id() {
        let store = seeded_store(&["a"]).await;
        let sync = HistorySync::startup(store.clone(), None, None).await.unwrap();
        let id = SessionId::from("a");
        let meta = sync.rename(&id, "Renamed").await.unwrap();
        assert_eq!(meta.id, id);
        assert_eq!(store.meta(&id).await.unwrap().unwrap().title, "Renamed");
        assert_eq!(sync.list().await[0].title, "Renamed");
        assert!(sync.reconcile().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn switch_to_reads_store_and_marks_active() {
        let store = seeded_store(&["a"]).await;
        let sync = HistorySync::startup(store, None, None).await.unwrap();
        let messages = sync.switch_to(&SessionId::from("a")).await.unwrap();
        assert_eq!(messages[0].content, "hello from a");
        assert_eq!(sync.active().await, Some(SessionId::from("a")));
    }

    #[tokio::test]
    async fn switch_to_missing_session_drops_cache_entry() {
        let store = seeded_store(&["a"]).await;
        let sync = HistorySync::startup(store.clone(), None, None).await.unwrap();
        // Deleted behind the sync layer's back.
        store.delete(&SessionId::from("a")).await.unwrap();

        let err = sync.switch_to(&SessionId::from("a")).await.unwrap_err();
        assert_eq!(err.kind(), parley_core::ErrorKind::NotFound);
        assert!(sync.list().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_cache_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("history.json");
        std::fs::write(&cache_path, "not json").unwrap();
        let store = seeded_store(&["a"]).await;
        let sync = HistorySync::startup(store, Some(cache_path.clone()), None)
            .await
            .unwrap();
        assert_eq!(sync.list().await.len(), 1);
        assert!(LocalHistoryCache::load(&cache_path).is_ok());
    }
}
