//! The in-memory shape of one session, shared by the memory and file stores.

use chrono::Utc;
use parley_core::message::{Message, SessionId};
use parley_core::session::{SessionFlags, SessionMeta};
use serde::{Deserialize, Serialize};

/// Metadata plus the full message log of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub meta: SessionMeta,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl SessionRecord {
    pub fn new(meta: SessionMeta) -> Self {
        Self {
            meta,
            messages: Vec::new(),
        }
    }

    /// A fresh record for a session created implicitly by `append`.
    pub fn implicit(id: &SessionId) -> Self {
        Self::new(SessionMeta::new(id.clone(), SessionFlags::default()))
    }

    /// The ordinal the next appended message will get.
    pub fn next_ordinal(&self) -> u64 {
        self.messages.last().map_or(0, |m| m.ordinal + 1)
    }

    /// Assign the next ordinal to `message`, push it, and return the stored copy.
    pub fn push(&mut self, mut message: Message) -> Message {
        message.ordinal = self.next_ordinal();
        self.messages.push(message.clone());
        self.meta.message_count = self.messages.len() as u64;
        self.meta.updated_at = Utc::now();
        message
    }

    /// Ordinals are 0..n with no gaps.
    pub fn is_gapless(&self) -> bool {
        self.messages
            .iter()
            .enumerate()
            .all(|(i, m)| m.ordinal == i as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_consecutive_ordinals() {
        let mut record = SessionRecord::implicit(&SessionId::from("s1"));
        let first = record.push(Message::user("2+2?"));
        let second = record.push(Message::assistant("4"));
        assert_eq!(first.ordinal, 0);
        assert_eq!(second.ordinal, 1);
        assert_eq!(record.meta.message_count, 2);
        assert!(record.is_gapless());
    }

    #[test]
    fn caller_supplied_ordinal_is_ignored() {
        let mut record = SessionRecord::implicit(&SessionId::from("s1"));
        let mut msg = Message::user("hi");
        msg.ordinal = 41;
        assert_eq!(record.push(msg).ordinal, 0);
    }
}
