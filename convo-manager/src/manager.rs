//! The conversation manager: the single entry point for the chat glue.
//!
//! Appends for one user serialize behind a per-user lock, so sequence
//! assignment never interleaves; different users proceed in parallel. Every
//! storage call is bounded by the configured request timeout, and transient
//! failures are retried a bounded number of times before surfacing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use convo_core::types::{validate_content, validate_user_id};
use convo_core::{
    ContextWindow, ConvoError, Conversation, HealthReport, MessageRole, Result, Settings,
    StoredMessage, UserStats,
};
use convo_storage::{Backend, ConversationStore};

use crate::policy::{MessageCountPolicy, SummarizePolicy};

/// Retries after the first attempt for transient failures.
const RETRY_ATTEMPTS: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// What the external model collaborator is asked to summarize. Produced by
/// the trigger, consumed by [`ConversationManager::apply_summary`] once the
/// caller has the text.
#[derive(Debug, Clone)]
pub struct SummarizeRequest {
    pub user_id: String,
    pub conversation_id: Uuid,
    /// Highest sequence the summary will cover; everything at or below it
    /// is replaced by the summary on compaction.
    pub covers_up_to_sequence: u64,
    /// The live messages to condense, in ascending sequence order.
    pub messages: Vec<StoredMessage>,
    /// Existing summary to fold in, if the conversation was compacted
    /// before.
    pub prior_summary: Option<String>,
}

/// Result of an append: the assigned sequence, plus a summarize request if
/// the trigger fired.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub sequence: u64,
    pub summarize: Option<SummarizeRequest>,
}

pub struct ConversationManager {
    store: Backend,
    settings: Settings,
    policy: Arc<dyn SummarizePolicy>,
    /// Per-user exclusive sections serializing appends, clears and cleanup.
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// user id -> active conversation id, maintained alongside the lock.
    active: RwLock<HashMap<String, Uuid>>,
}

impl ConversationManager {
    pub fn new(store: Backend, settings: Settings) -> Self {
        Self::with_policy(store, settings, Arc::new(MessageCountPolicy))
    }

    pub fn with_policy(
        store: Backend,
        settings: Settings,
        policy: Arc<dyn SummarizePolicy>,
    ) -> Self {
        Self {
            store,
            settings,
            policy,
            user_locks: Mutex::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Records a message from the user and evaluates the summarization
    /// trigger. Returns the assigned sequence; on error the message was not
    /// recorded.
    pub async fn add_user_message(&self, user_id: &str, text: &str) -> Result<AppendOutcome> {
        self.add_message(user_id, MessageRole::User, text).await
    }

    /// Records an assistant reply supplied by the caller.
    pub async fn add_assistant_message(&self, user_id: &str, text: &str) -> Result<AppendOutcome> {
        self.add_message(user_id, MessageRole::Assistant, text).await
    }

    async fn add_message(
        &self,
        user_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<AppendOutcome> {
        validate_user_id(user_id)?;
        validate_content(content)?;
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let conversation = self.resolve_active(user_id).await?;
        let (conversation_id, sequence) = match self
            .call(|| self.store.append(conversation.id, role, content))
            .await
        {
            Ok(sequence) => (conversation.id, sequence),
            Err(ConvoError::NotFound(_)) => {
                // the cached conversation vanished underneath us; start fresh
                self.active.write().await.remove(user_id);
                let fresh = self.resolve_active(user_id).await?;
                let sequence = self
                    .call(|| self.store.append(fresh.id, role, content))
                    .await?;
                (fresh.id, sequence)
            }
            Err(e) => return Err(e),
        };

        let summarize = self.trigger_for(user_id, conversation_id).await?;
        debug!(user_id, %conversation_id, sequence, %role, "recorded message");
        Ok(AppendOutcome {
            sequence,
            summarize,
        })
    }

    /// The bounded, ordered message window (plus leading summary if one
    /// exists) to feed a response generator. `window_size` overrides the
    /// configured default.
    pub async fn get_conversation_context(
        &self,
        user_id: &str,
        window_size: Option<usize>,
    ) -> Result<ContextWindow> {
        validate_user_id(user_id)?;
        let limit = window_size.unwrap_or(self.settings.context_window_size);
        let Some(conversation) = self
            .call(|| self.store.active_conversation(user_id))
            .await?
        else {
            return Ok(ContextWindow::default());
        };
        self.call(|| self.store.read_recent(conversation.id, limit))
            .await
    }

    /// Asks the trigger whether the user's active conversation is due for
    /// summarization, and if so what range to condense. Never mutates
    /// anything.
    pub async fn maybe_summarize(&self, user_id: &str) -> Result<Option<SummarizeRequest>> {
        validate_user_id(user_id)?;
        let Some(conversation) = self
            .call(|| self.store.active_conversation(user_id))
            .await?
        else {
            return Ok(None);
        };
        self.trigger_for(user_id, conversation.id).await
    }

    /// Compacts the conversation named by an earlier [`SummarizeRequest`]
    /// using caller-supplied text. Returns `Ok(false)` without compacting
    /// if the conversation was cleared or deleted since the request was
    /// issued — `clear` takes precedence over a pending summarization.
    pub async fn apply_summary(
        &self,
        request: &SummarizeRequest,
        summary_text: &str,
    ) -> Result<bool> {
        validate_content(summary_text)?;
        let lock = self.user_lock(&request.user_id).await;
        let _guard = lock.lock().await;

        let Some(conversation) = self
            .call(|| self.store.get_conversation(request.conversation_id))
            .await?
        else {
            return Ok(false);
        };
        if !conversation.active {
            debug!(
                conversation_id = %request.conversation_id,
                "conversation cleared while summary was pending; dropping it"
            );
            return Ok(false);
        }
        self.call(|| {
            self.store
                .compact(request.conversation_id, summary_text, request.covers_up_to_sequence)
        })
        .await?;
        info!(
            user_id = %request.user_id,
            conversation_id = %request.conversation_id,
            covers_up_to = request.covers_up_to_sequence,
            "applied summary"
        );
        Ok(true)
    }

    /// Archives the active conversation; the next message starts a fresh
    /// one. The archived conversation stays readable until retention
    /// removes it.
    pub async fn clear(&self, user_id: &str) -> Result<bool> {
        validate_user_id(user_id)?;
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let Some(conversation) = self
            .call(|| self.store.active_conversation(user_id))
            .await?
        else {
            self.active.write().await.remove(user_id);
            return Ok(false);
        };
        let archived = self
            .call(|| self.store.archive_conversation(conversation.id))
            .await?;
        self.active.write().await.remove(user_id);
        info!(user_id, conversation_id = %conversation.id, "cleared conversation");
        Ok(archived)
    }

    /// Read-only stats pass-through.
    pub async fn get_stats(&self, user_id: &str) -> Result<UserStats> {
        validate_user_id(user_id)?;
        self.call(|| self.store.stats(user_id)).await
    }

    /// Full history of the active conversation (post-compaction), newest
    /// last; `limit` keeps only the most recent entries.
    pub async fn get_history(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredMessage>> {
        validate_user_id(user_id)?;
        let Some(conversation) = self
            .call(|| self.store.active_conversation(user_id))
            .await?
        else {
            return Ok(Vec::new());
        };
        let mut messages = self.call(|| self.store.read_full(conversation.id)).await?;
        if let Some(limit) = limit {
            let start = messages.len().saturating_sub(limit);
            messages.drain(..start);
        }
        Ok(messages)
    }

    /// Removes archived conversations past the retention age and enforces
    /// the per-user conversation cap, oldest first. The active conversation
    /// is never a candidate, regardless of its age. Returns the number of
    /// conversations removed.
    pub async fn run_cleanup(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - chrono::Duration::days(self.settings.cleanup_old_data_days);
        let mut removed = 0u64;

        for user_id in self.call(|| self.store.list_users()).await? {
            let lock = self.user_lock(&user_id).await;
            let _guard = lock.lock().await;

            removed += self
                .call(|| self.store.delete_older_than(&user_id, cutoff))
                .await?;

            let conversations = self
                .call(|| self.store.list_conversations(&user_id))
                .await?;
            let max = self.settings.max_conversations_per_user;
            if conversations.len() > max {
                let mut excess = conversations.len() - max;
                // list is newest first; walk from the oldest end
                for conversation in conversations.iter().rev() {
                    if excess == 0 {
                        break;
                    }
                    if conversation.active {
                        continue;
                    }
                    if self
                        .call(|| self.store.delete_conversation(conversation.id))
                        .await?
                    {
                        removed += 1;
                        excess -= 1;
                    }
                }
            }
        }

        info!(removed, "retention cleanup finished");
        Ok(removed)
    }

    /// Backend liveness pass-through.
    pub async fn health_check(&self) -> Result<HealthReport> {
        self.call(|| self.store.health_check()).await
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Looks up (or creates) the user's active conversation. Caller must
    /// hold the user lock.
    async fn resolve_active(&self, user_id: &str) -> Result<Conversation> {
        // copy the id out so the read guard is released before any await
        let cached = self.active.read().await.get(user_id).copied();
        if let Some(id) = cached {
            if let Some(conversation) = self.call(|| self.store.get_conversation(id)).await? {
                if conversation.active {
                    return Ok(conversation);
                }
            }
            self.active.write().await.remove(user_id);
        }
        if let Some(conversation) = self
            .call(|| self.store.active_conversation(user_id))
            .await?
        {
            self.active
                .write()
                .await
                .insert(user_id.to_string(), conversation.id);
            return Ok(conversation);
        }
        let conversation = self.call(|| self.store.create_conversation(user_id)).await?;
        self.active
            .write()
            .await
            .insert(user_id.to_string(), conversation.id);
        Ok(conversation)
    }

    /// Evaluates the summarization policy against the conversation's live
    /// message count.
    async fn trigger_for(
        &self,
        user_id: &str,
        conversation_id: Uuid,
    ) -> Result<Option<SummarizeRequest>> {
        let Some(conversation) = self
            .call(|| self.store.get_conversation(conversation_id))
            .await?
        else {
            return Ok(None);
        };
        if !conversation.active {
            return Ok(None);
        }
        if !self.policy.should_summarize(
            conversation.message_count,
            self.settings.auto_summarize_threshold,
        ) {
            return Ok(None);
        }
        let messages = self.call(|| self.store.read_full(conversation_id)).await?;
        let Some(last) = messages.last() else {
            return Ok(None);
        };
        let covers_up_to_sequence = last.sequence;
        Ok(Some(SummarizeRequest {
            user_id: user_id.to_string(),
            conversation_id,
            covers_up_to_sequence,
            messages,
            prior_summary: conversation.summary.map(|s| s.text),
        }))
    }

    /// Runs one storage call under the request timeout, retrying transient
    /// failures with a short backoff.
    async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.settings.request_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ConvoError::Unavailable(format!(
                    "storage call timed out after {:?}",
                    self.settings.request_timeout
                ))),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < RETRY_ATTEMPTS => {
                    attempt += 1;
                    warn!("storage call failed (attempt {attempt}): {e}; retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
