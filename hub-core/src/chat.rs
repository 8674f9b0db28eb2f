//! Chat History (spec §3): an append-only in-memory log.
//!
//! Never read back by the hub itself — spec §9 is explicit that there is no
//! replay on join, since deciding a replay window and handling the privacy
//! of private messages is left as a deliberate open question. The log exists
//! so a future replay feature has something to read from without changing
//! the append path.

use parking_lot::Mutex;

use crate::registry::ParticipantId;

/// One logged chat message, public or private.
#[derive(Debug, Clone)]
pub struct ChatEntry {
    pub sender_id: ParticipantId,
    pub sender_username: String,
    pub text: String,
    pub timestamp: String,
}

/// Append-only chat log, kept for the process lifetime.
#[derive(Default)]
pub struct ChatHistory {
    entries: Mutex<Vec<ChatEntry>>,
}

impl ChatHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: ChatEntry) {
        self.entries.lock().push(entry);
    }

    /// Number of messages logged so far. Exposed for diagnostics and tests;
    /// not part of the wire protocol.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_grows_the_log() {
        let history = ChatHistory::new();
        assert!(history.is_empty());
        history.append(ChatEntry {
            sender_id: 0,
            sender_username: "alice".to_string(),
            text: "hi".to_string(),
            timestamp: "00:00:00".to_string(),
        });
        assert_eq!(history.len(), 1);
    }
}
