//! Backend selection: a tagged choice made once at startup from settings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use convo_core::{
    ContextWindow, ConvoError, Conversation, HealthReport, MessageRole, Result, Settings,
    StoredMessage, UserStats,
};

use crate::json_store::JsonStore;
use crate::sqlite_store::SqliteStore;
use crate::store::ConversationStore;

/// The configured storage backend. Variants share no state; the choice is
/// made once by [`Backend::connect`].
pub enum Backend {
    Json(JsonStore),
    Sqlite(SqliteStore),
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("kind", &self.kind()).finish()
    }
}

impl Backend {
    /// Builds the backend named by `settings.storage_backend`.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        match settings.storage_backend.as_str() {
            "json" => {
                info!("selected json storage backend");
                Ok(Backend::Json(
                    JsonStore::new(settings.json_storage_dir.clone()).await?,
                ))
            }
            "sqlite" => {
                info!("selected sqlite storage backend");
                Ok(Backend::Sqlite(
                    SqliteStore::connect(&settings.database_url).await?,
                ))
            }
            other => Err(ConvoError::Validation(format!(
                "unknown storage backend: {other} (expected \"json\" or \"sqlite\")"
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Json(_) => "json",
            Backend::Sqlite(_) => "sqlite",
        }
    }

    fn store(&self) -> &dyn ConversationStore {
        match self {
            Backend::Json(store) => store,
            Backend::Sqlite(store) => store,
        }
    }
}

#[async_trait]
impl ConversationStore for Backend {
    async fn active_conversation(&self, user_id: &str) -> Result<Option<Conversation>> {
        self.store().active_conversation(user_id).await
    }

    async fn create_conversation(&self, user_id: &str) -> Result<Conversation> {
        self.store().create_conversation(user_id).await
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        self.store().get_conversation(conversation_id).await
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        self.store().list_conversations(user_id).await
    }

    async fn archive_conversation(&self, conversation_id: Uuid) -> Result<bool> {
        self.store().archive_conversation(conversation_id).await
    }

    async fn append(&self, conversation_id: Uuid, role: MessageRole, content: &str) -> Result<u64> {
        self.store().append(conversation_id, role, content).await
    }

    async fn read_recent(&self, conversation_id: Uuid, limit: usize) -> Result<ContextWindow> {
        self.store().read_recent(conversation_id, limit).await
    }

    async fn read_full(&self, conversation_id: Uuid) -> Result<Vec<StoredMessage>> {
        self.store().read_full(conversation_id).await
    }

    async fn compact(
        &self,
        conversation_id: Uuid,
        summary_text: &str,
        covers_up_to_sequence: u64,
    ) -> Result<()> {
        self.store()
            .compact(conversation_id, summary_text, covers_up_to_sequence)
            .await
    }

    async fn delete_conversation(&self, conversation_id: Uuid) -> Result<bool> {
        self.store().delete_conversation(conversation_id).await
    }

    async fn delete_older_than(&self, user_id: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        self.store().delete_older_than(user_id, cutoff).await
    }

    async fn stats(&self, user_id: &str) -> Result<UserStats> {
        self.store().stats(user_id).await
    }

    async fn list_users(&self) -> Result<Vec<String>> {
        self.store().list_users().await
    }

    async fn import_conversation(
        &self,
        conversation: &Conversation,
        messages: &[StoredMessage],
    ) -> Result<()> {
        self.store().import_conversation(conversation, messages).await
    }

    async fn health_check(&self) -> Result<HealthReport> {
        self.store().health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_backend_kind_is_rejected() {
        let mut settings = Settings::default();
        settings.storage_backend = "postgres".to_string();
        let err = Backend::connect(&settings).await.unwrap_err();
        assert!(matches!(err, ConvoError::Validation(_)));
    }

    #[tokio::test]
    async fn connect_selects_the_configured_variant() {
        let dir = tempfile::tempdir().unwrap();

        let mut settings = Settings::default();
        settings.storage_backend = "json".to_string();
        settings.json_storage_dir = dir.path().join("docs");
        let backend = Backend::connect(&settings).await.unwrap();
        assert_eq!(backend.kind(), "json");

        settings.storage_backend = "sqlite".to_string();
        settings.database_url = dir
            .path()
            .join("conv.db")
            .to_str()
            .unwrap()
            .to_string();
        let backend = Backend::connect(&settings).await.unwrap();
        assert_eq!(backend.kind(), "sqlite");
    }
}
