//! The storage contract both backends honor.
//!
//! Append serializes per conversation: concurrent appends to the same
//! conversation never produce duplicate sequence numbers, appends to
//! different conversations proceed independently. Every mutation is a
//! single atomic unit (file replace-on-write, or one transaction), so a
//! failed call leaves state unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use convo_core::{
    ContextWindow, Conversation, HealthReport, MessageRole, Result, StoredMessage, UserStats,
};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The user's currently active conversation, if any. At most one exists.
    async fn active_conversation(&self, user_id: &str) -> Result<Option<Conversation>>;

    /// Creates a fresh active conversation for the user. Fails with
    /// `Conflict` if the user already has an active one.
    async fn create_conversation(&self, user_id: &str) -> Result<Conversation>;

    /// Conversation header by id.
    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>>;

    /// All conversation headers for a user, newest first.
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>>;

    /// Marks a conversation inactive. `Ok(false)` if it already was;
    /// `NotFound` if it does not exist.
    async fn archive_conversation(&self, conversation_id: Uuid) -> Result<bool>;

    /// Appends one message and returns its assigned sequence number.
    /// Fails with `NotFound` if the conversation no longer exists,
    /// `Validation` if the message is malformed, `Conflict` if a concurrent
    /// append won the sequence.
    async fn append(&self, conversation_id: Uuid, role: MessageRole, content: &str) -> Result<u64>;

    /// The most recent `limit` live messages in ascending sequence order,
    /// with the summary (if any) as the leading entry standing in for all
    /// compacted history. An empty conversation yields an empty window,
    /// never an error.
    async fn read_recent(&self, conversation_id: Uuid, limit: usize) -> Result<ContextWindow>;

    /// Every stored message in ascending sequence order, uncached, with no
    /// summary substitution. For export and history display.
    async fn read_full(&self, conversation_id: Uuid) -> Result<Vec<StoredMessage>>;

    /// Replaces messages with `sequence <= covers_up_to_sequence` by a
    /// single summary record. Idempotent: re-applying the same coverage
    /// overwrites the summary rather than stacking.
    async fn compact(
        &self,
        conversation_id: Uuid,
        summary_text: &str,
        covers_up_to_sequence: u64,
    ) -> Result<()>;

    /// Removes a conversation and its messages. `Ok(false)` if nothing
    /// matched; never an error for a missing id.
    async fn delete_conversation(&self, conversation_id: Uuid) -> Result<bool>;

    /// Removes the user's archived conversations whose `updated_at` is
    /// before `cutoff`. The active conversation is never a candidate.
    /// Returns the number of conversations removed; other users' data is
    /// untouched.
    async fn delete_older_than(&self, user_id: &str, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Per-user aggregate counts and first/last activity.
    async fn stats(&self, user_id: &str) -> Result<UserStats>;

    /// Every user id the backend holds data for.
    async fn list_users(&self) -> Result<Vec<String>>;

    /// Inserts a conversation with its messages exactly as given (ids,
    /// sequences and timestamps preserved). Used by backend migration.
    /// Fails with `Conflict` if the id already exists.
    async fn import_conversation(
        &self,
        conversation: &Conversation,
        messages: &[StoredMessage],
    ) -> Result<()>;

    /// Backend liveness plus cheap totals. Reports rather than errors when
    /// the backend is unreachable.
    async fn health_check(&self) -> Result<HealthReport>;
}
