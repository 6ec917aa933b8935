//! History Sync Layer.
//!
//! The UI reads session titles and ordering from a small local cache
//! ([`LocalHistoryCache`]) so listing is instant. The
//! [`SessionStore`](parley_core::SessionStore) stays the source of truth:
//! [`HistorySync`] reconciles the cache against it, fetches full history on
//! switch, and pushes renames and deletes to the store before touching the
//! cache, so a restart can never bring a deleted session back.

pub mod cache;
pub mod sync;

pub use cache::{CacheSnapshot, CachedSession, LocalHistoryCache};
pub use sync::{HistorySync, SyncReport};
