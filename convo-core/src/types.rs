//! Conversation, message and summary models plus their validation rules.
//!
//! All types serialize with serde; the file backend persists them verbatim
//! as the per-user document, and the SQLite backend maps them onto rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConvoError, Result};

/// Role of a message sender. Closed set: anything else is rejected at the
/// boundary, never coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    /// Wire string used by both backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    /// Parses a stored role string. Unknown values are a validation error.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(ConvoError::Validation(format!("unknown role: {other}"))),
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored turn of a conversation.
///
/// `sequence` is the ordering key: strictly increasing per conversation,
/// assigned at append time. `created_at` is informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub conversation_id: Uuid,
    pub sequence: u64,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Rolled-up text replacing compacted history. Messages with
/// `sequence <= covers_up_to_sequence` are superseded by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub text: String,
    pub covers_up_to_sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// Conversation header. `message_count` always equals the number of stored
/// messages for the conversation; at most one conversation per user is
/// active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active: bool,
    pub message_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ConversationSummary>,
}

impl Conversation {
    /// Fresh active conversation for a user.
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            created_at: now,
            updated_at: now,
            active: true,
            message_count: 0,
            summary: None,
        }
    }

    /// Sequence number the next appended message receives. Sequences keep
    /// growing across compaction, so the high-water mark is the larger of
    /// the last stored message and the summary coverage.
    pub fn next_sequence(&self, last_stored: Option<u64>) -> u64 {
        let covered = self.summary.as_ref().map_or(0, |s| s.covers_up_to_sequence);
        last_stored.unwrap_or(0).max(covered) + 1
    }
}

/// Bounded read result: the most recent live messages in ascending sequence
/// order, with the summary (if any) standing in for all compacted history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub summary: Option<ConversationSummary>,
    pub messages: Vec<StoredMessage>,
}

impl ContextWindow {
    /// Number of entries a response generator would see (summary counts as
    /// one leading entry).
    pub fn entry_count(&self) -> usize {
        self.messages.len() + usize::from(self.summary.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.messages.is_empty()
    }
}

/// Per-user aggregate reported by `stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    pub conversation_count: u64,
    pub active_conversation_count: u64,
    pub message_count: u64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl UserStats {
    /// Empty stats for a user the backend has never seen.
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            conversation_count: 0,
            active_conversation_count: 0,
            message_count: 0,
            first_seen: None,
            last_seen: None,
        }
    }
}

/// Backend liveness report with cheap totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub backend: String,
    pub user_count: u64,
    pub conversation_count: u64,
    pub message_count: u64,
}

/// Rejects message content that is empty after trimming. The stored content
/// is kept as given; only the check trims.
pub fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(ConvoError::Validation("message content is empty".into()));
    }
    Ok(())
}

/// Rejects user ids that are empty or could escape the per-user file layout.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(ConvoError::Validation("user id is empty".into()));
    }
    if user_id.contains('/') || user_id.contains('\\') || user_id.contains("..") {
        return Err(ConvoError::Validation(format!("invalid user id: {user_id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_wire_string() {
        for role in [MessageRole::User, MessageRole::Assistant] {
            assert_eq!(MessageRole::parse(role.as_str()).unwrap(), role);
        }
    }

    #[test]
    fn unknown_role_is_rejected() {
        let err = MessageRole::parse("system").unwrap_err();
        assert!(matches!(err, ConvoError::Validation(_)));
    }

    #[test]
    fn role_serde_uses_lowercase_tags() {
        assert_eq!(serde_json::to_string(&MessageRole::User).unwrap(), "\"user\"");
        let role: MessageRole = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(role, MessageRole::Assistant);
    }

    #[test]
    fn empty_content_is_rejected() {
        assert!(validate_content("").is_err());
        assert!(validate_content("   \n\t ").is_err());
        assert!(validate_content("hello").is_ok());
        // leading/trailing whitespace around real content is fine
        assert!(validate_content("  hi  ").is_ok());
    }

    #[test]
    fn path_hostile_user_ids_are_rejected() {
        assert!(validate_user_id("42").is_ok());
        assert!(validate_user_id("alice_bob-1").is_ok());
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("../etc/passwd").is_err());
        assert!(validate_user_id("a/b").is_err());
    }

    #[test]
    fn next_sequence_starts_at_one() {
        let conv = Conversation::new("u1");
        assert_eq!(conv.next_sequence(None), 1);
    }

    #[test]
    fn next_sequence_continues_past_summary_coverage() {
        let mut conv = Conversation::new("u1");
        conv.summary = Some(ConversationSummary {
            text: "earlier chat".into(),
            covers_up_to_sequence: 5,
            created_at: Utc::now(),
        });
        // no live messages left after compaction: next is 6
        assert_eq!(conv.next_sequence(None), 6);
        // live messages beyond the summary win
        assert_eq!(conv.next_sequence(Some(7)), 8);
    }

    #[test]
    fn context_window_counts_summary_as_one_entry() {
        let mut window = ContextWindow::default();
        assert!(window.is_empty());
        assert_eq!(window.entry_count(), 0);

        window.summary = Some(ConversationSummary {
            text: "s".into(),
            covers_up_to_sequence: 3,
            created_at: Utc::now(),
        });
        assert!(!window.is_empty());
        assert_eq!(window.entry_count(), 1);
    }
}
