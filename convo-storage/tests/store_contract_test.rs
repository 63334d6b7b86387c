//! Contract tests run identically against both backends.

use convo_storage::{ConversationStore, JsonStore, SqliteStore};

use convo_core::MessageRole;

async fn backends(dir: &tempfile::TempDir) -> Vec<Box<dyn ConversationStore>> {
    let json = JsonStore::new(dir.path().join("docs")).await.unwrap();
    let sqlite = SqliteStore::connect(dir.path().join("conv.db").to_str().unwrap())
        .await
        .unwrap();
    vec![Box::new(json), Box::new(sqlite)]
}

#[tokio::test]
async fn round_trip_preserves_content_and_order() {
    let dir = tempfile::tempdir().unwrap();
    for store in backends(&dir).await {
        let conv = store.create_conversation("u1").await.unwrap();
        let contents = ["first", "second", "third", "fourth"];
        for (i, content) in contents.iter().enumerate() {
            let role = if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            store.append(conv.id, role, content).await.unwrap();
        }

        let messages = store.read_full(conv.id).await.unwrap();
        assert_eq!(messages.len(), contents.len());
        for (i, message) in messages.iter().enumerate() {
            assert_eq!(message.sequence, (i + 1) as u64);
            assert_eq!(message.content, contents[i]);
        }
    }
}

#[tokio::test]
async fn sequence_numbers_have_no_gaps_or_repeats() {
    let dir = tempfile::tempdir().unwrap();
    for store in backends(&dir).await {
        let conv = store.create_conversation("u1").await.unwrap();
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(store.append(conv.id, MessageRole::User, "m").await.unwrap());
        }
        assert_eq!(seen, (1..=10).collect::<Vec<u64>>());
    }
}

#[tokio::test]
async fn summary_replaces_covered_messages_in_recent_reads() {
    let dir = tempfile::tempdir().unwrap();
    for store in backends(&dir).await {
        let conv = store.create_conversation("u1").await.unwrap();
        for i in 1..=5 {
            store
                .append(conv.id, MessageRole::User, &format!("msg {i}"))
                .await
                .unwrap();
        }
        store.compact(conv.id, "what came before", 5).await.unwrap();
        store.append(conv.id, MessageRole::User, "msg 6").await.unwrap();

        let window = store.read_recent(conv.id, 10).await.unwrap();
        assert_eq!(window.summary.as_ref().unwrap().text, "what came before");
        assert_eq!(window.messages.len(), 1);
        assert_eq!(window.messages[0].sequence, 6);
        assert!(window.messages.iter().all(|m| m.sequence > 5));

        // full read still shows only what is physically stored, no summary
        let full = store.read_full(conv.id).await.unwrap();
        assert_eq!(full.len(), 1);
    }
}

#[tokio::test]
async fn window_is_bounded_by_limit() {
    let dir = tempfile::tempdir().unwrap();
    for store in backends(&dir).await {
        let conv = store.create_conversation("u1").await.unwrap();
        for i in 1..=6 {
            store
                .append(conv.id, MessageRole::User, &format!("msg {i}"))
                .await
                .unwrap();
        }
        let window = store.read_recent(conv.id, 4).await.unwrap();
        let sequences: Vec<u64> = window.messages.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5, 6]);
    }
}

#[tokio::test]
async fn users_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    for store in backends(&dir).await {
        let a = store.create_conversation("alice").await.unwrap();
        let b = store.create_conversation("bob").await.unwrap();
        store.append(a.id, MessageRole::User, "alice says").await.unwrap();
        store.append(b.id, MessageRole::User, "bob says").await.unwrap();

        let cutoff = chrono::Utc::now() + chrono::Duration::days(1);
        store.archive_conversation(a.id).await.unwrap();
        store.delete_older_than("alice", cutoff).await.unwrap();

        assert!(store.get_conversation(a.id).await.unwrap().is_none());
        let bob = store.read_full(b.id).await.unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].content, "bob says");
    }
}

#[tokio::test]
async fn archiving_twice_reports_false() {
    let dir = tempfile::tempdir().unwrap();
    for store in backends(&dir).await {
        let conv = store.create_conversation("u1").await.unwrap();
        assert!(store.archive_conversation(conv.id).await.unwrap());
        assert!(!store.archive_conversation(conv.id).await.unwrap());
        assert!(store.active_conversation("u1").await.unwrap().is_none());
    }
}

#[tokio::test]
async fn health_check_reports_totals() {
    let dir = tempfile::tempdir().unwrap();
    for store in backends(&dir).await {
        let conv = store.create_conversation("u1").await.unwrap();
        store.append(conv.id, MessageRole::User, "hello").await.unwrap();

        let report = store.health_check().await.unwrap();
        assert!(report.healthy);
        assert_eq!(report.user_count, 1);
        assert_eq!(report.conversation_count, 1);
        assert_eq!(report.message_count, 1);
    }
}
