//! JSON-file backend: one self-describing document per user.
//!
//! All mutations are read-modify-write under a per-user lock; the new
//! document is staged to `<user_id>.json.tmp` and renamed over the old one,
//! so readers never observe a half-written file. A write-through cache of
//! recently accessed users avoids redundant reads and is replaced on every
//! successful write.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use convo_core::types::{validate_content, validate_user_id};
use convo_core::{
    ContextWindow, ConvoError, Conversation, ConversationSummary, HealthReport, MessageRole,
    Result, StoredMessage, UserStats,
};

use crate::store::ConversationStore;

/// Document persisted as `<user_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDocument {
    user_id: String,
    conversations: Vec<ConversationRecord>,
}

impl UserDocument {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            conversations: Vec::new(),
        }
    }

    fn find(&self, conversation_id: Uuid) -> Option<&ConversationRecord> {
        self.conversations.iter().find(|r| r.header.id == conversation_id)
    }

    fn find_mut(&mut self, conversation_id: Uuid) -> Option<&mut ConversationRecord> {
        self.conversations
            .iter_mut()
            .find(|r| r.header.id == conversation_id)
    }
}

/// Conversation header with its ordered message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConversationRecord {
    #[serde(flatten)]
    header: Conversation,
    messages: Vec<StoredMessage>,
}

pub struct JsonStore {
    storage_dir: PathBuf,
    /// Per-user exclusive sections; all document mutations run inside one.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Write-through cache of user documents.
    cache: RwLock<HashMap<String, UserDocument>>,
    /// conversation id -> owning user, filled as documents are loaded.
    owners: RwLock<HashMap<Uuid, String>>,
}

impl JsonStore {
    /// Opens (and creates if missing) the storage directory.
    pub async fn new(storage_dir: impl Into<PathBuf>) -> Result<Self> {
        let storage_dir = storage_dir.into();
        tokio::fs::create_dir_all(&storage_dir).await?;
        info!("initialized json store at {}", storage_dir.display());
        Ok(Self {
            storage_dir,
            locks: Mutex::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
        })
    }

    fn user_path(&self, user_id: &str) -> PathBuf {
        self.storage_dir.join(format!("{user_id}.json"))
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn index_document(&self, doc: &UserDocument) {
        let mut owners = self.owners.write().await;
        for record in &doc.conversations {
            owners.insert(record.header.id, doc.user_id.clone());
        }
    }

    /// Reads a user document straight from disk, bypassing the cache.
    /// Caller must hold the user lock.
    async fn load_document_from_disk(&self, user_id: &str) -> Result<Option<UserDocument>> {
        let path = self.user_path(user_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let doc: UserDocument = serde_json::from_str(&raw)?;
        self.index_document(&doc).await;
        Ok(Some(doc))
    }

    /// Cache-first read of a user document. Caller must hold the user lock.
    async fn load_document(&self, user_id: &str) -> Result<Option<UserDocument>> {
        if let Some(doc) = self.cache.read().await.get(user_id) {
            return Ok(Some(doc.clone()));
        }
        let doc = self.load_document_from_disk(user_id).await?;
        if let Some(doc) = &doc {
            self.cache
                .write()
                .await
                .insert(user_id.to_string(), doc.clone());
        }
        Ok(doc)
    }

    /// Stages the document to a temp file, renames it into place, then
    /// refreshes cache and owner index. Caller must hold the user lock.
    async fn store_document(&self, doc: &UserDocument) -> Result<()> {
        let path = self.user_path(&doc.user_id);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(doc)?;
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        self.index_document(doc).await;
        self.cache
            .write()
            .await
            .insert(doc.user_id.clone(), doc.clone());
        Ok(())
    }

    /// Deletes a user's file and drops it from cache and index. Caller must
    /// hold the user lock.
    async fn remove_document(&self, user_id: &str) -> Result<()> {
        let path = self.user_path(user_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.cache.write().await.remove(user_id);
        self.owners.write().await.retain(|_, owner| owner != user_id);
        Ok(())
    }

    /// Resolves which user owns a conversation, scanning documents on a
    /// cold index.
    async fn owner_of(&self, conversation_id: Uuid) -> Result<Option<String>> {
        if let Some(owner) = self.owners.read().await.get(&conversation_id) {
            return Ok(Some(owner.clone()));
        }
        for user_id in self.list_users().await? {
            let lock = self.user_lock(&user_id).await;
            let _guard = lock.lock().await;
            if let Some(doc) = self.load_document(&user_id).await? {
                if doc.find(conversation_id).is_some() {
                    return Ok(Some(user_id));
                }
            }
        }
        Ok(None)
    }

    async fn require_owner(&self, conversation_id: Uuid) -> Result<String> {
        self.owner_of(conversation_id)
            .await?
            .ok_or_else(|| ConvoError::NotFound(format!("conversation {conversation_id}")))
    }

    async fn scan_totals(&self) -> Result<(u64, u64, u64)> {
        let users = self.list_users().await?;
        let mut conversations = 0u64;
        let mut messages = 0u64;
        for user_id in &users {
            let lock = self.user_lock(user_id).await;
            let _guard = lock.lock().await;
            if let Some(doc) = self.load_document(user_id).await? {
                conversations += doc.conversations.len() as u64;
                messages += doc
                    .conversations
                    .iter()
                    .map(|r| r.messages.len() as u64)
                    .sum::<u64>();
            }
        }
        Ok((users.len() as u64, conversations, messages))
    }
}

#[async_trait]
impl ConversationStore for JsonStore {
    async fn active_conversation(&self, user_id: &str) -> Result<Option<Conversation>> {
        validate_user_id(user_id)?;
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        let Some(doc) = self.load_document(user_id).await? else {
            return Ok(None);
        };
        Ok(doc
            .conversations
            .iter()
            .find(|r| r.header.active)
            .map(|r| r.header.clone()))
    }

    async fn create_conversation(&self, user_id: &str) -> Result<Conversation> {
        validate_user_id(user_id)?;
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        let mut doc = self
            .load_document(user_id)
            .await?
            .unwrap_or_else(|| UserDocument::new(user_id));
        if doc.conversations.iter().any(|r| r.header.active) {
            return Err(ConvoError::Conflict(format!(
                "user {user_id} already has an active conversation"
            )));
        }
        let conversation = Conversation::new(user_id);
        debug!(user_id, conversation_id = %conversation.id, "creating conversation");
        doc.conversations.push(ConversationRecord {
            header: conversation.clone(),
            messages: Vec::new(),
        });
        self.store_document(&doc).await?;
        Ok(conversation)
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        let Some(user_id) = self.owner_of(conversation_id).await? else {
            return Ok(None);
        };
        let lock = self.user_lock(&user_id).await;
        let _guard = lock.lock().await;
        let Some(doc) = self.load_document(&user_id).await? else {
            return Ok(None);
        };
        Ok(doc.find(conversation_id).map(|r| r.header.clone()))
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        validate_user_id(user_id)?;
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        let Some(doc) = self.load_document(user_id).await? else {
            return Ok(Vec::new());
        };
        let mut headers: Vec<Conversation> =
            doc.conversations.iter().map(|r| r.header.clone()).collect();
        headers.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(headers)
    }

    async fn archive_conversation(&self, conversation_id: Uuid) -> Result<bool> {
        let user_id = self.require_owner(conversation_id).await?;
        let lock = self.user_lock(&user_id).await;
        let _guard = lock.lock().await;
        let mut doc = self
            .load_document(&user_id)
            .await?
            .ok_or_else(|| ConvoError::NotFound(format!("conversation {conversation_id}")))?;
        let record = doc
            .find_mut(conversation_id)
            .ok_or_else(|| ConvoError::NotFound(format!("conversation {conversation_id}")))?;
        if !record.header.active {
            return Ok(false);
        }
        record.header.active = false;
        record.header.updated_at = record.header.updated_at.max(Utc::now());
        self.store_document(&doc).await?;
        Ok(true)
    }

    async fn append(&self, conversation_id: Uuid, role: MessageRole, content: &str) -> Result<u64> {
        validate_content(content)?;
        let user_id = self.require_owner(conversation_id).await?;
        let lock = self.user_lock(&user_id).await;
        let _guard = lock.lock().await;
        let mut doc = self
            .load_document(&user_id)
            .await?
            .ok_or_else(|| ConvoError::NotFound(format!("conversation {conversation_id}")))?;
        let record = doc
            .find_mut(conversation_id)
            .ok_or_else(|| ConvoError::NotFound(format!("conversation {conversation_id}")))?;

        let sequence = record
            .header
            .next_sequence(record.messages.last().map(|m| m.sequence));
        record.messages.push(StoredMessage {
            conversation_id,
            sequence,
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        });
        record.header.message_count = record.messages.len() as u64;
        record.header.updated_at = record.header.updated_at.max(Utc::now());
        self.store_document(&doc).await?;
        debug!(%conversation_id, sequence, %role, "appended message");
        Ok(sequence)
    }

    async fn read_recent(&self, conversation_id: Uuid, limit: usize) -> Result<ContextWindow> {
        let user_id = self.require_owner(conversation_id).await?;
        let lock = self.user_lock(&user_id).await;
        let _guard = lock.lock().await;
        let doc = self
            .load_document(&user_id)
            .await?
            .ok_or_else(|| ConvoError::NotFound(format!("conversation {conversation_id}")))?;
        let record = doc
            .find(conversation_id)
            .ok_or_else(|| ConvoError::NotFound(format!("conversation {conversation_id}")))?;

        let covered = record
            .header
            .summary
            .as_ref()
            .map_or(0, |s| s.covers_up_to_sequence);
        let live: Vec<&StoredMessage> = record
            .messages
            .iter()
            .filter(|m| m.sequence > covered)
            .collect();
        let start = live.len().saturating_sub(limit);
        Ok(ContextWindow {
            summary: record.header.summary.clone(),
            messages: live[start..].iter().map(|m| (*m).clone()).collect(),
        })
    }

    async fn read_full(&self, conversation_id: Uuid) -> Result<Vec<StoredMessage>> {
        let user_id = self.require_owner(conversation_id).await?;
        let lock = self.user_lock(&user_id).await;
        let _guard = lock.lock().await;
        // export path: always read the file itself, not the cache
        let doc = self
            .load_document_from_disk(&user_id)
            .await?
            .ok_or_else(|| ConvoError::NotFound(format!("conversation {conversation_id}")))?;
        let record = doc
            .find(conversation_id)
            .ok_or_else(|| ConvoError::NotFound(format!("conversation {conversation_id}")))?;
        Ok(record.messages.clone())
    }

    async fn compact(
        &self,
        conversation_id: Uuid,
        summary_text: &str,
        covers_up_to_sequence: u64,
    ) -> Result<()> {
        validate_content(summary_text)?;
        let user_id = self.require_owner(conversation_id).await?;
        let lock = self.user_lock(&user_id).await;
        let _guard = lock.lock().await;
        let mut doc = self
            .load_document(&user_id)
            .await?
            .ok_or_else(|| ConvoError::NotFound(format!("conversation {conversation_id}")))?;
        let record = doc
            .find_mut(conversation_id)
            .ok_or_else(|| ConvoError::NotFound(format!("conversation {conversation_id}")))?;

        record.header.summary = Some(ConversationSummary {
            text: summary_text.to_string(),
            covers_up_to_sequence,
            created_at: Utc::now(),
        });
        record
            .messages
            .retain(|m| m.sequence > covers_up_to_sequence);
        record.header.message_count = record.messages.len() as u64;
        record.header.updated_at = record.header.updated_at.max(Utc::now());
        self.store_document(&doc).await?;
        info!(%conversation_id, covers_up_to_sequence, "compacted conversation");
        Ok(())
    }

    async fn delete_conversation(&self, conversation_id: Uuid) -> Result<bool> {
        let Some(user_id) = self.owner_of(conversation_id).await? else {
            return Ok(false);
        };
        let lock = self.user_lock(&user_id).await;
        let _guard = lock.lock().await;
        let Some(mut doc) = self.load_document(&user_id).await? else {
            return Ok(false);
        };
        let before = doc.conversations.len();
        doc.conversations.retain(|r| r.header.id != conversation_id);
        if doc.conversations.len() == before {
            return Ok(false);
        }
        if doc.conversations.is_empty() {
            self.remove_document(&user_id).await?;
        } else {
            self.store_document(&doc).await?;
        }
        self.owners.write().await.remove(&conversation_id);
        Ok(true)
    }

    async fn delete_older_than(&self, user_id: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        validate_user_id(user_id)?;
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        let Some(mut doc) = self.load_document(user_id).await? else {
            return Ok(0);
        };
        let mut removed = Vec::new();
        doc.conversations.retain(|r| {
            let stale = !r.header.active && r.header.updated_at < cutoff;
            if stale {
                removed.push(r.header.id);
            }
            !stale
        });
        if removed.is_empty() {
            return Ok(0);
        }
        if doc.conversations.is_empty() {
            self.remove_document(user_id).await?;
        } else {
            self.store_document(&doc).await?;
        }
        let mut owners = self.owners.write().await;
        for id in &removed {
            owners.remove(id);
        }
        debug!(user_id, count = removed.len(), "removed stale conversations");
        Ok(removed.len() as u64)
    }

    async fn stats(&self, user_id: &str) -> Result<UserStats> {
        validate_user_id(user_id)?;
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        let Some(doc) = self.load_document(user_id).await? else {
            return Ok(UserStats::empty(user_id));
        };
        Ok(UserStats {
            user_id: user_id.to_string(),
            conversation_count: doc.conversations.len() as u64,
            active_conversation_count: doc
                .conversations
                .iter()
                .filter(|r| r.header.active)
                .count() as u64,
            message_count: doc
                .conversations
                .iter()
                .map(|r| r.messages.len() as u64)
                .sum(),
            first_seen: doc
                .conversations
                .iter()
                .map(|r| r.header.created_at)
                .min(),
            last_seen: doc
                .conversations
                .iter()
                .map(|r| r.header.updated_at)
                .max(),
        })
    }

    async fn list_users(&self) -> Result<Vec<String>> {
        let mut users = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.storage_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                users.push(stem.to_string());
            }
        }
        users.sort();
        Ok(users)
    }

    async fn import_conversation(
        &self,
        conversation: &Conversation,
        messages: &[StoredMessage],
    ) -> Result<()> {
        validate_user_id(&conversation.user_id)?;
        if messages.iter().any(|m| m.conversation_id != conversation.id) {
            return Err(ConvoError::Validation(
                "imported messages belong to a different conversation".into(),
            ));
        }
        if conversation.message_count != messages.len() as u64 {
            return Err(ConvoError::Validation(format!(
                "message_count {} does not match {} imported messages",
                conversation.message_count,
                messages.len()
            )));
        }
        let lock = self.user_lock(&conversation.user_id).await;
        let _guard = lock.lock().await;
        let mut doc = self
            .load_document(&conversation.user_id)
            .await?
            .unwrap_or_else(|| UserDocument::new(&conversation.user_id));
        if doc.find(conversation.id).is_some() {
            return Err(ConvoError::Conflict(format!(
                "conversation {} already exists",
                conversation.id
            )));
        }
        if conversation.active && doc.conversations.iter().any(|r| r.header.active) {
            return Err(ConvoError::Conflict(format!(
                "user {} already has an active conversation",
                conversation.user_id
            )));
        }
        doc.conversations.push(ConversationRecord {
            header: conversation.clone(),
            messages: messages.to_vec(),
        });
        self.store_document(&doc).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthReport> {
        match self.scan_totals().await {
            Ok((user_count, conversation_count, message_count)) => Ok(HealthReport {
                healthy: true,
                backend: "json".to_string(),
                user_count,
                conversation_count,
                message_count,
            }),
            Err(e) => {
                warn!("json store health check failed: {e}");
                Ok(HealthReport {
                    healthy: false,
                    backend: "json".to_string(),
                    user_count: 0,
                    conversation_count: 0,
                    message_count: 0,
                })
            }
        }
    }
}
