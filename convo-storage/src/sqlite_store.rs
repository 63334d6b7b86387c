//! SQLite backend: conversations and messages as separate relations.
//!
//! Every mutation runs inside a single transaction, so a failed append or
//! compact is never partially visible. The `(conversation_id, sequence)`
//! primary key turns append races into `Conflict`, which callers retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use convo_core::types::{validate_content, validate_user_id};
use convo_core::{
    ContextWindow, ConvoError, Conversation, ConversationSummary, HealthReport, MessageRole,
    Result, StoredMessage, UserStats,
};

use crate::sqlite_pool::SqlitePoolManager;
use crate::store::ConversationStore;

#[derive(Clone)]
pub struct SqliteStore {
    pool_manager: SqlitePoolManager,
}

impl SqliteStore {
    /// Opens the database file (creating it if missing) and ensures the
    /// schema exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool_manager = SqlitePoolManager::new(database_url)
            .await
            .map_err(map_sqlx_err)?;
        let store = Self { pool_manager };
        store.init_schema().await?;
        info!("initialized sqlite store at {}", database_url);
        Ok(store)
    }

    fn pool(&self) -> &SqlitePool {
        self.pool_manager.pool()
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                message_count INTEGER NOT NULL DEFAULT 0,
                summary_text TEXT,
                summary_covers_up_to INTEGER,
                summary_created_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_user_id ON conversations(user_id);
            CREATE INDEX IF NOT EXISTS idx_conversations_updated_at ON conversations(updated_at);

            CREATE TABLE IF NOT EXISTS messages (
                conversation_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (conversation_id, sequence)
            );
            "#,
        )
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    fn row_to_conversation(row: &SqliteRow) -> Result<Conversation> {
        let id: String = row.try_get("id").map_err(map_sqlx_err)?;
        let id = Uuid::parse_str(&id)
            .map_err(|e| ConvoError::Serialization(format!("bad conversation id: {e}")))?;
        let summary_text: Option<String> = row.try_get("summary_text").map_err(map_sqlx_err)?;
        let summary = match summary_text {
            Some(text) => {
                let covers: Option<i64> =
                    row.try_get("summary_covers_up_to").map_err(map_sqlx_err)?;
                let created: Option<DateTime<Utc>> =
                    row.try_get("summary_created_at").map_err(map_sqlx_err)?;
                match (covers, created) {
                    (Some(covers), Some(created_at)) => Some(ConversationSummary {
                        text,
                        covers_up_to_sequence: covers as u64,
                        created_at,
                    }),
                    _ => {
                        return Err(ConvoError::Serialization(
                            "summary row missing coverage or timestamp".into(),
                        ))
                    }
                }
            }
            None => None,
        };
        let message_count: i64 = row.try_get("message_count").map_err(map_sqlx_err)?;
        Ok(Conversation {
            id,
            user_id: row.try_get("user_id").map_err(map_sqlx_err)?,
            created_at: row.try_get("created_at").map_err(map_sqlx_err)?,
            updated_at: row.try_get("updated_at").map_err(map_sqlx_err)?,
            active: row.try_get("active").map_err(map_sqlx_err)?,
            message_count: message_count as u64,
            summary,
        })
    }

    fn row_to_message(row: &SqliteRow) -> Result<StoredMessage> {
        let conversation_id: String = row.try_get("conversation_id").map_err(map_sqlx_err)?;
        let conversation_id = Uuid::parse_str(&conversation_id)
            .map_err(|e| ConvoError::Serialization(format!("bad conversation id: {e}")))?;
        let role: String = row.try_get("role").map_err(map_sqlx_err)?;
        let role = MessageRole::parse(&role)
            .map_err(|_| ConvoError::Serialization(format!("invalid stored role: {role}")))?;
        let sequence: i64 = row.try_get("sequence").map_err(map_sqlx_err)?;
        Ok(StoredMessage {
            conversation_id,
            sequence: sequence as u64,
            role,
            content: row.try_get("content").map_err(map_sqlx_err)?,
            created_at: row.try_get("created_at").map_err(map_sqlx_err)?,
        })
    }
}

const CONVERSATION_SELECT: &str = r#"
    SELECT id, user_id, created_at, updated_at, active, message_count,
           summary_text, summary_covers_up_to, summary_created_at
    FROM conversations
"#;

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn active_conversation(&self, user_id: &str) -> Result<Option<Conversation>> {
        validate_user_id(user_id)?;
        let row = sqlx::query(
            r#"
            SELECT id, user_id, created_at, updated_at, active, message_count,
                   summary_text, summary_covers_up_to, summary_created_at
            FROM conversations
            WHERE user_id = ?1 AND active = 1
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        row.as_ref().map(Self::row_to_conversation).transpose()
    }

    async fn create_conversation(&self, user_id: &str) -> Result<Conversation> {
        validate_user_id(user_id)?;
        let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;

        let (active_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM conversations WHERE user_id = ?1 AND active = 1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        if active_count > 0 {
            return Err(ConvoError::Conflict(format!(
                "user {user_id} already has an active conversation"
            )));
        }

        let conversation = Conversation::new(user_id);
        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, created_at, updated_at, active, message_count)
            VALUES (?1, ?2, ?3, ?4, 1, 0)
            "#,
        )
        .bind(conversation.id.to_string())
        .bind(user_id)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        debug!(user_id, conversation_id = %conversation.id, "created conversation");
        Ok(conversation)
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        let sql = format!("{CONVERSATION_SELECT} WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(conversation_id.to_string())
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_err)?;
        row.as_ref().map(Self::row_to_conversation).transpose()
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        validate_user_id(user_id)?;
        let sql = format!("{CONVERSATION_SELECT} WHERE user_id = ?1 ORDER BY updated_at DESC");
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(Self::row_to_conversation).collect()
    }

    async fn archive_conversation(&self, conversation_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET active = 0, updated_at = MAX(updated_at, ?2)
            WHERE id = ?1 AND active = 1
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(Utc::now())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // already archived, or missing entirely
        match self.get_conversation(conversation_id).await? {
            Some(_) => Ok(false),
            None => Err(ConvoError::NotFound(format!(
                "conversation {conversation_id}"
            ))),
        }
    }

    async fn append(&self, conversation_id: Uuid, role: MessageRole, content: &str) -> Result<u64> {
        validate_content(content)?;
        let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;

        let row = sqlx::query(
            "SELECT updated_at, summary_covers_up_to FROM conversations WHERE id = ?1",
        )
        .bind(conversation_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| ConvoError::NotFound(format!("conversation {conversation_id}")))?;
        let prev_updated: DateTime<Utc> = row.try_get("updated_at").map_err(map_sqlx_err)?;
        let covered: Option<i64> = row.try_get("summary_covers_up_to").map_err(map_sqlx_err)?;

        let (last_sequence,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(sequence) FROM messages WHERE conversation_id = ?1")
                .bind(conversation_id.to_string())
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;

        let sequence = last_sequence.unwrap_or(0).max(covered.unwrap_or(0)) + 1;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, sequence, role, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(sequence)
        .bind(role.as_str())
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            "UPDATE conversations SET message_count = message_count + 1, updated_at = ?2 WHERE id = ?1",
        )
        .bind(conversation_id.to_string())
        .bind(prev_updated.max(now))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        debug!(%conversation_id, sequence, %role, "appended message");
        Ok(sequence as u64)
    }

    async fn read_recent(&self, conversation_id: Uuid, limit: usize) -> Result<ContextWindow> {
        let conversation = self
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| ConvoError::NotFound(format!("conversation {conversation_id}")))?;
        let covered = conversation
            .summary
            .as_ref()
            .map_or(0, |s| s.covers_up_to_sequence);

        let rows = sqlx::query(
            r#"
            SELECT conversation_id, sequence, role, content, created_at
            FROM messages
            WHERE conversation_id = ?1 AND sequence > ?2
            ORDER BY sequence DESC
            LIMIT ?3
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(covered as i64)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?;

        let mut messages: Vec<StoredMessage> = rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<_>>()?;
        messages.reverse();
        Ok(ContextWindow {
            summary: conversation.summary,
            messages,
        })
    }

    async fn read_full(&self, conversation_id: Uuid) -> Result<Vec<StoredMessage>> {
        if self.get_conversation(conversation_id).await?.is_none() {
            return Err(ConvoError::NotFound(format!(
                "conversation {conversation_id}"
            )));
        }
        let rows = sqlx::query(
            r#"
            SELECT conversation_id, sequence, role, content, created_at
            FROM messages
            WHERE conversation_id = ?1
            ORDER BY sequence ASC
            "#,
        )
        .bind(conversation_id.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn compact(
        &self,
        conversation_id: Uuid,
        summary_text: &str,
        covers_up_to_sequence: u64,
    ) -> Result<()> {
        validate_content(summary_text)?;
        let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;

        let row = sqlx::query("SELECT updated_at FROM conversations WHERE id = ?1")
            .bind(conversation_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| ConvoError::NotFound(format!("conversation {conversation_id}")))?;
        let prev_updated: DateTime<Utc> = row.try_get("updated_at").map_err(map_sqlx_err)?;
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE conversations
            SET summary_text = ?2, summary_covers_up_to = ?3, summary_created_at = ?4,
                updated_at = ?5
            WHERE id = ?1
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(summary_text)
        .bind(covers_up_to_sequence as i64)
        .bind(now)
        .bind(prev_updated.max(now))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?1 AND sequence <= ?2")
            .bind(conversation_id.to_string())
            .bind(covers_up_to_sequence as i64)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            UPDATE conversations
            SET message_count = (SELECT COUNT(*) FROM messages WHERE conversation_id = ?1)
            WHERE id = ?1
            "#,
        )
        .bind(conversation_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        info!(%conversation_id, covers_up_to_sequence, "compacted conversation");
        Ok(())
    }

    async fn delete_conversation(&self, conversation_id: Uuid) -> Result<bool> {
        let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?1")
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_older_than(&self, user_id: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        validate_user_id(user_id)?;
        let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            DELETE FROM messages WHERE conversation_id IN (
                SELECT id FROM conversations
                WHERE user_id = ?1 AND active = 0 AND updated_at < ?2
            )
            "#,
        )
        .bind(user_id)
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let result = sqlx::query(
            "DELETE FROM conversations WHERE user_id = ?1 AND active = 0 AND updated_at < ?2",
        )
        .bind(user_id)
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        let removed = result.rows_affected();
        if removed > 0 {
            debug!(user_id, removed, "removed stale conversations");
        }
        Ok(removed)
    }

    async fn stats(&self, user_id: &str) -> Result<UserStats> {
        validate_user_id(user_id)?;
        let pool = self.pool();

        let (conversation_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM conversations WHERE user_id = ?1")
                .bind(user_id)
                .fetch_one(pool)
                .await
                .map_err(map_sqlx_err)?;

        let (active_conversation_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM conversations WHERE user_id = ?1 AND active = 1")
                .bind(user_id)
                .fetch_one(pool)
                .await
                .map_err(map_sqlx_err)?;

        let (message_count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM messages
            JOIN conversations ON conversations.id = messages.conversation_id
            WHERE conversations.user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
        .map_err(map_sqlx_err)?;

        let (first_seen,): (Option<DateTime<Utc>>,) =
            sqlx::query_as("SELECT MIN(created_at) FROM conversations WHERE user_id = ?1")
                .bind(user_id)
                .fetch_one(pool)
                .await
                .map_err(map_sqlx_err)?;

        let (last_seen,): (Option<DateTime<Utc>>,) =
            sqlx::query_as("SELECT MAX(updated_at) FROM conversations WHERE user_id = ?1")
                .bind(user_id)
                .fetch_one(pool)
                .await
                .map_err(map_sqlx_err)?;

        Ok(UserStats {
            user_id: user_id.to_string(),
            conversation_count: conversation_count as u64,
            active_conversation_count: active_conversation_count as u64,
            message_count: message_count as u64,
            first_seen,
            last_seen,
        })
    }

    async fn list_users(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT user_id FROM conversations ORDER BY user_id")
                .fetch_all(self.pool())
                .await
                .map_err(map_sqlx_err)?;
        Ok(rows.into_iter().map(|(user_id,)| user_id).collect())
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

        let mut tx = self.pool().begin().await.map_err(map_sqlx_err)?;

        let (exists,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM conversations WHERE id = ?1")
                .bind(conversation.id.to_string())
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        if exists > 0 {
            return Err(ConvoError::Conflict(format!(
                "conversation {} already exists",
                conversation.id
            )));
        }
        if conversation.active {
            let (active_count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM conversations WHERE user_id = ?1 AND active = 1",
            )
            .bind(&conversation.user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
            if active_count > 0 {
                return Err(ConvoError::Conflict(format!(
                    "user {} already has an active conversation",
                    conversation.user_id
                )));
            }
        }

        let summary = conversation.summary.as_ref();
        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, created_at, updated_at, active, message_count,
                                       summary_text, summary_covers_up_to, summary_created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(conversation.id.to_string())
        .bind(&conversation.user_id)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .bind(conversation.active)
        .bind(conversation.message_count as i64)
        .bind(summary.map(|s| s.text.clone()))
        .bind(summary.map(|s| s.covers_up_to_sequence as i64))
        .bind(summary.map(|s| s.created_at))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for message in messages {
            sqlx::query(
                r#"
                INSERT INTO messages (conversation_id, sequence, role, content, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(message.conversation_id.to_string())
            .bind(message.sequence as i64)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthReport> {
        let totals = async {
            let pool = self.pool();
            sqlx::query("SELECT 1")
                .fetch_one(pool)
                .await
                .map_err(map_sqlx_err)?;
            let (users,): (i64,) =
                sqlx::query_as("SELECT COUNT(DISTINCT user_id) FROM conversations")
                    .fetch_one(pool)
                    .await
                    .map_err(map_sqlx_err)?;
            let (conversations,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
                .fetch_one(pool)
                .await
                .map_err(map_sqlx_err)?;
            let (messages,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
                .fetch_one(pool)
                .await
                .map_err(map_sqlx_err)?;
            Ok::<_, ConvoError>((users as u64, conversations as u64, messages as u64))
        };

        match totals.await {
            Ok((user_count, conversation_count, message_count)) => Ok(HealthReport {
                healthy: true,
                backend: "sqlite".to_string(),
                user_count,
                conversation_count,
                message_count,
            }),
            Err(e) => {
                warn!("sqlite store health check failed: {e}");
                Ok(HealthReport {
                    healthy: false,
                    backend: "sqlite".to_string(),
                    user_count: 0,
                    conversation_count: 0,
                    message_count: 0,
                })
            }
        }
    }
}

/// Maps sqlx failures onto the shared taxonomy: unique violations are
/// conflicts, decode problems are corruption, everything else is transient.
pub(crate) fn map_sqlx_err(err: sqlx::Error) -> ConvoError {
    match &err {
        sqlx::Error::RowNotFound => ConvoError::NotFound(err.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            ConvoError::Serialization(err.to_string())
        }
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ConvoError::Conflict(err.to_string())
        }
        _ => ConvoError::Unavailable(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = SqliteStore::connect(db_path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn append_assigns_consecutive_sequences() {
        let (store, _dir) = create_test_store().await;
        let conv = store.create_conversation("u1").await.unwrap();

        for expected in 1..=5u64 {
            let seq = store
                .append(conv.id, MessageRole::User, "hello")
                .await
                .unwrap();
            assert_eq!(seq, expected);
        }
        let header = store.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(header.message_count, 5);
    }

    #[tokio::test]
    async fn append_to_missing_conversation_is_not_found() {
        let (store, _dir) = create_test_store().await;
        let err = store
            .append(Uuid::new_v4(), MessageRole::User, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ConvoError::NotFound(_)));
    }

    #[tokio::test]
    async fn second_active_conversation_is_a_conflict() {
        let (store, _dir) = create_test_store().await;
        store.create_conversation("u1").await.unwrap();
        let err = store.create_conversation("u1").await.unwrap_err();
        assert!(matches!(err, ConvoError::Conflict(_)));
    }

    #[tokio::test]
    async fn read_recent_limits_and_orders() {
        let (store, _dir) = create_test_store().await;
        let conv = store.create_conversation("u1").await.unwrap();
        for i in 1..=6 {
            store
                .append(conv.id, MessageRole::User, &format!("msg {i}"))
                .await
                .unwrap();
        }

        let window = store.read_recent(conv.id, 4).await.unwrap();
        assert!(window.summary.is_none());
        let sequences: Vec<u64> = window.messages.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5, 6]);
        assert_eq!(window.messages[0].content, "msg 3");
    }

    #[tokio::test]
    async fn read_recent_of_empty_conversation_is_empty() {
        let (store, _dir) = create_test_store().await;
        let conv = store.create_conversation("u1").await.unwrap();
        let window = store.read_recent(conv.id, 10).await.unwrap();
        assert!(window.is_empty());
    }

    #[tokio::test]
    async fn compact_is_idempotent_and_hides_covered_messages() {
        let (store, _dir) = create_test_store().await;
        let conv = store.create_conversation("u1").await.unwrap();
        for _ in 0..6 {
            store.append(conv.id, MessageRole::User, "msg").await.unwrap();
        }

        store.compact(conv.id, "first four", 4).await.unwrap();
        let once = store.read_recent(conv.id, 10).await.unwrap();
        store.compact(conv.id, "first four", 4).await.unwrap();
        let twice = store.read_recent(conv.id, 10).await.unwrap();

        assert_eq!(once.messages, twice.messages);
        let sequences: Vec<u64> = twice.messages.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![5, 6]);
        assert_eq!(twice.summary.unwrap().text, "first four");

        let header = store.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(header.message_count, 2);
    }

    #[tokio::test]
    async fn sequences_continue_after_compaction() {
        let (store, _dir) = create_test_store().await;
        let conv = store.create_conversation("u1").await.unwrap();
        for _ in 0..3 {
            store.append(conv.id, MessageRole::User, "msg").await.unwrap();
        }
        store.compact(conv.id, "all of it", 3).await.unwrap();

        let seq = store.append(conv.id, MessageRole::User, "next").await.unwrap();
        assert_eq!(seq, 4);
    }

    #[tokio::test]
    async fn deleting_one_user_leaves_the_other_intact() {
        let (store, _dir) = create_test_store().await;
        let a = store.create_conversation("alice").await.unwrap();
        let b = store.create_conversation("bob").await.unwrap();
        store.append(a.id, MessageRole::User, "from alice").await.unwrap();
        store.append(b.id, MessageRole::User, "from bob").await.unwrap();

        assert!(store.delete_conversation(a.id).await.unwrap());
        assert!(!store.delete_conversation(a.id).await.unwrap());

        let bob_messages = store.read_full(b.id).await.unwrap();
        assert_eq!(bob_messages.len(), 1);
        assert_eq!(bob_messages[0].content, "from bob");
    }

    #[tokio::test]
    async fn delete_older_than_skips_active_conversation() {
        let (store, _dir) = create_test_store().await;
        let conv = store.create_conversation("u1").await.unwrap();
        store.append(conv.id, MessageRole::User, "still here").await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::days(365);
        let removed = store.delete_older_than("u1", cutoff).await.unwrap();
        assert_eq!(removed, 0);
        assert!(store.get_conversation(conv.id).await.unwrap().is_some());

        store.archive_conversation(conv.id).await.unwrap();
        let removed = store.delete_older_than("u1", cutoff).await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn stats_for_unknown_user_are_empty() {
        let (store, _dir) = create_test_store().await;
        let stats = store.stats("nobody").await.unwrap();
        assert_eq!(stats.conversation_count, 0);
        assert_eq!(stats.message_count, 0);
        assert!(stats.first_seen.is_none());
        assert!(stats.last_seen.is_none());
    }

    #[tokio::test]
    async fn stats_count_conversations_and_messages() {
        let (store, _dir) = create_test_store().await;
        let conv = store.create_conversation("u1").await.unwrap();
        store.append(conv.id, MessageRole::User, "a").await.unwrap();
        store.append(conv.id, MessageRole::Assistant, "b").await.unwrap();
        store.archive_conversation(conv.id).await.unwrap();
        let second = store.create_conversation("u1").await.unwrap();
        store.append(second.id, MessageRole::User, "c").await.unwrap();

        let stats = store.stats("u1").await.unwrap();
        assert_eq!(stats.conversation_count, 2);
        assert_eq!(stats.active_conversation_count, 1);
        assert_eq!(stats.message_count, 3);
    }
}
