//! Copies every user's conversations from one backend to another.

use tracing::info;

use convo_core::Result;

use crate::store::ConversationStore;

/// Migrates all conversations (headers, messages, summaries) from `from`
/// into `to`, preserving ids, sequences and timestamps. Returns the number
/// of conversations migrated. The destination must not already contain any
/// of the source conversation ids.
pub async fn migrate<S, D>(from: &S, to: &D) -> Result<usize>
where
    S: ConversationStore + ?Sized,
    D: ConversationStore + ?Sized,
{
    let mut moved = 0;
    for user_id in from.list_users().await? {
        // oldest first, so destination updated_at ordering matches the source
        let mut conversations = from.list_conversations(&user_id).await?;
        conversations.reverse();
        for conversation in conversations {
            let messages = from.read_full(conversation.id).await?;
            to.import_conversation(&conversation, &messages).await?;
            moved += 1;
        }
        info!(user_id, "migrated user");
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JsonStore, SqliteStore};
    use convo_core::MessageRole;

    #[tokio::test]
    async fn json_to_sqlite_preserves_everything() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonStore::new(dir.path().join("docs")).await.unwrap();
        let dest = SqliteStore::connect(dir.path().join("conv.db").to_str().unwrap())
            .await
            .unwrap();

        let conv = source.create_conversation("u1").await.unwrap();
        source.append(conv.id, MessageRole::User, "hello").await.unwrap();
        source
            .append(conv.id, MessageRole::Assistant, "hi there")
            .await
            .unwrap();
        source.compact(conv.id, "greeting", 1).await.unwrap();

        let moved = migrate(&source, &dest).await.unwrap();
        assert_eq!(moved, 1);

        let copied = dest.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(copied.user_id, "u1");
        assert!(copied.active);
        assert_eq!(copied.message_count, 1);
        let summary = copied.summary.unwrap();
        assert_eq!(summary.text, "greeting");
        assert_eq!(summary.covers_up_to_sequence, 1);

        let messages = dest.read_full(conv.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sequence, 2);
        assert_eq!(messages[0].content, "hi there");
    }

    #[tokio::test]
    async fn migrating_into_populated_destination_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonStore::new(dir.path().join("a")).await.unwrap();
        let dest = JsonStore::new(dir.path().join("b")).await.unwrap();

        let conv = source.create_conversation("u1").await.unwrap();
        source.append(conv.id, MessageRole::User, "hello").await.unwrap();

        assert_eq!(migrate(&source, &dest).await.unwrap(), 1);
        // second run hits the existing conversation id
        let err = migrate(&source, &dest).await.unwrap_err();
        assert!(matches!(err, convo_core::ConvoError::Conflict(_)));
    }
}
