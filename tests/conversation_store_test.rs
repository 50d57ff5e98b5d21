// tests/conversation_store_test.rs
// Conversation store: turn ordering, the retained-turn cap, rich
// content round-trips, TTL pruning

mod common;

use recall_backend::sessions::{ConversationStore, RichContent, MAX_TURNS};
use serde_json::json;

async fn store() -> ConversationStore {
    let pool = common::memory_pool().await;
    let store = ConversationStore::new(pool, 60);
    store.init_schema().await.expect("schema");
    store
}

#[tokio::test]
async fn turns_are_ordered_and_indexed() {
    let store = store().await;

    for i in 0..3 {
        store
            .add_turn(
                "conv-1",
                &format!("question {}", i),
                &format!("answer {}", i),
                &json!([]),
                &[],
                &[],
                &json!({}),
            )
            .await
            .unwrap();
    }

    let turns = store.get_turns("conv-1").await.unwrap();
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[0].turn_index, 0);
    assert_eq!(turns[2].user_text, "question 2");
}

#[tokio::test]
async fn turn_cap_trims_oldest() {
    let store = store().await;

    for i in 0..(MAX_TURNS + 5) {
        store
            .add_turn(
                "conv-capped",
                &format!("q{}", i),
                "a",
                &json!([]),
                &[],
                &[],
                &json!({}),
            )
            .await
            .unwrap();
    }

    let turns = store.get_turns("conv-capped").await.unwrap();
    assert_eq!(turns.len(), MAX_TURNS);
    // The oldest turns are the ones that went
    assert_eq!(turns[0].user_text, "q5");
    assert_eq!(turns.last().unwrap().user_text, format!("q{}", MAX_TURNS + 4));
}

#[tokio::test]
async fn rich_content_round_trips() {
    let store = store().await;

    let rich = vec![RichContent {
        content_type: "image".to_string(),
        title: Some("Receipt".to_string()),
        url: Some("https://example.com/r.png".to_string()),
        data: json!({"width": 640}),
    }];

    store
        .add_turn(
            "conv-rich",
            "show me the receipt",
            "here it is",
            &json!([{"source_id": "doc:1", "score": 0.9}]),
            &rich,
            &["node-1".to_string()],
            &json!({"chat_name": "Family"}),
        )
        .await
        .unwrap();

    let turns = store.get_turns("conv-rich").await.unwrap();
    let turn = &turns[0];
    assert_eq!(turn.rich_content.len(), 1);
    assert_eq!(turn.rich_content[0].content_type, "image");
    assert_eq!(turn.rich_content[0].title.as_deref(), Some("Receipt"));
    assert_eq!(turn.retrieved_ids, vec!["node-1".to_string()]);
    assert_eq!(turn.filters["chat_name"], "Family");
    assert_eq!(turn.sources[0]["source_id"], "doc:1");
}

#[tokio::test]
async fn list_and_delete_conversations() {
    let store = store().await;

    store
        .add_turn("conv-a", "first question", "a", &json!([]), &[], &[], &json!({}))
        .await
        .unwrap();
    store
        .add_turn("conv-b", "other question", "a", &json!([]), &[], &[], &json!({}))
        .await
        .unwrap();

    let conversations = store.list_conversations().await.unwrap();
    assert_eq!(conversations.len(), 2);
    // Title derives from the first user message
    assert!(conversations.iter().any(|c| c.title == "first question"));

    assert!(store.delete_conversation("conv-a").await.unwrap());
    assert_eq!(store.list_conversations().await.unwrap().len(), 1);
    assert!(store.get_turns("conv-a").await.unwrap().is_empty());
}

#[tokio::test]
async fn prune_removes_idle_conversations() {
    let pool = common::memory_pool().await;
    let store = ConversationStore::new(pool.clone(), 30);
    store.init_schema().await.unwrap();

    store
        .add_turn("conv-old", "q", "a", &json!([]), &[], &[], &json!({}))
        .await
        .unwrap();
    store
        .add_turn("conv-new", "q", "a", &json!([]), &[], &[], &json!({}))
        .await
        .unwrap();

    // Age one conversation past the TTL
    sqlx::query("UPDATE conversations SET updated_at = datetime('now', '-2 hours') WHERE id = 'conv-old'")
        .execute(&pool)
        .await
        .unwrap();

    let pruned = store.prune_expired().await.unwrap();
    assert_eq!(pruned, 1);
    let remaining = store.list_conversations().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "conv-new");
}
