//! Session metadata and the Session Store trait.
//!
//! The Session Store is the authoritative, durable record of every
//! conversation. The local UI history cache is only ever a projection of it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::{Message, SessionId};

/// Maximum number of characters taken from the first user message for a title.
pub const TITLE_MAX_CHARS: usize = 20;

/// Per-session toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFlags {
    pub tools_enabled: bool,
    pub rag_enabled: bool,
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self {
            tools_enabled: true,
            rag_enabled: true,
        }
    }
}

/// Everything about a session except its messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: SessionId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub flags: SessionFlags,
    /// File names uploaded into this session's knowledge base.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<String>,
}

impl SessionMeta {
    pub fn new(id: SessionId, flags: SessionFlags) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: default_title(now),
            created_at: now,
            updated_at: now,
            message_count: 0,
            flags,
            documents: Vec::new(),
        }
    }

    /// True while the title is still the generated placeholder.
    pub fn has_default_title(&self) -> bool {
        self.title == default_title(self.created_at)
    }

    /// Record an uploaded file name, ignoring duplicates.
    pub fn push_document(&mut self, name: &str) {
        if !self.documents.iter().any(|d| d == name) {
            self.documents.push(name.to_string());
        }
    }
}

/// Placeholder title for a fresh session, e.g. `New Chat 14:05`.
pub fn default_title(created_at: DateTime<Utc>) -> String {
    format!("New Chat {}", created_at.format("%H:%M"))
}

/// Title derived from the first user message: trimmed, first 20 characters.
pub fn title_from_text(text: &str) -> Option<String> {
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.is_empty() {
        return None;
    }
    let title: String = line.chars().take(TITLE_MAX_CHARS).collect();
    Some(title.trim_end().to_string())
}

/// Sort newest first, the order every listing uses.
pub fn sort_newest_first(sessions: &mut [SessionMeta]) {
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// The authoritative conversation store.
///
/// Every write is durable before it returns `Ok`. Writes to one session are
/// serialized; reads may run concurrently. A deleted session id is
/// tombstoned: later writes to it fail with [`StoreError::SessionDeleted`]
/// instead of silently recreating it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// A short backend name for logs (`memory`, `file`, `sqlite`).
    fn name(&self) -> &str;

    /// Create a session explicitly ("new conversation").
    async fn create(&self, meta: SessionMeta) -> Result<SessionMeta, StoreError>;

    /// Append a message. Creates the session if it does not exist.
    ///
    /// The store assigns the next ordinal; the stored copy is returned.
    async fn append(&self, session_id: &SessionId, message: Message) -> Result<Message, StoreError>;

    /// All messages of a session, ordered by ordinal.
    async fn get(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError>;

    /// Metadata of a live session, `None` if unknown or deleted.
    async fn meta(&self, session_id: &SessionId) -> Result<Option<SessionMeta>, StoreError>;

    /// Delete a session. Returns whether anything was removed.
    async fn delete(&self, session_id: &SessionId) -> Result<bool, StoreError>;

    /// All live sessions, newest first.
    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, StoreError>;

    /// Change the display title. The id never changes.
    async fn rename(&self, session_id: &SessionId, title: &str) -> Result<SessionMeta, StoreError>;

    async fn set_flags(
        &self,
        session_id: &SessionId,
        flags: SessionFlags,
    ) -> Result<SessionMeta, StoreError>;

    /// Record an uploaded document name on the session.
    async fn add_document(&self, session_id: &SessionId, name: &str) -> Result<SessionMeta, StoreError>;

    /// Whether this id was deleted at some point.
    async fn is_deleted(&self, session_id: &SessionId) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn default_title_uses_clock_time() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 7, 0).unwrap();
        assert_eq!(default_title(at), "New Chat 09:07");
    }

    #[test]
    fn title_takes_first_twenty_chars() {
        assert_eq!(
            title_from_text("  What is the capital\nof France and why?").as_deref(),
            Some("What is the capital")
        );
        assert_eq!(title_from_text("2+2?").as_deref(), Some("2+2?"));
        assert_eq!(title_from_text("   \n"), None);
    }

    #[test]
    fn title_counts_characters_not_bytes() {
        let title = title_from_text("请帮我总结一下这份文档的主要内容和结论，谢谢你的帮助").unwrap();
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn new_session_has_default_title() {
        let mut meta = SessionMeta::new(SessionId::from("s1"), SessionFlags::default());
        assert!(meta.has_default_title());
        meta.title = "Taxes".into();
        assert!(!meta.has_default_title());
    }

    #[test]
    fn documents_are_deduplicated() {
        let mut meta = SessionMeta::new(SessionId::from("s1"), SessionFlags::default());
        meta.push_document("a.pdf");
        meta.push_document("a.pdf");
        meta.push_document("b.md");
        assert_eq!(meta.documents, vec!["a.pdf", "b.md"]);
    }
}
