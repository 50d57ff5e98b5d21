// tests/recording_store_test.rs
// Recording status machine: registration idempotence, transitions,
// stale-transcribing recovery

mod common;

use recall_backend::plugins::recordings::db::RecordingStore;

async fn store() -> RecordingStore {
    let pool = common::memory_pool().await;
    let store = RecordingStore::new(pool);
    store.init_schema().await.expect("schema");
    store
}

async fn register(store: &RecordingStore, hash: &str) {
    store
        .upsert_file(
            hash,
            &format!("/recordings/{}.m4a", hash),
            &format!("{}.m4a", hash),
            1024,
            1_700_000_000,
            Some("Dana Levi"),
            Some("972501234567"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn registration_is_idempotent() {
    let store = store().await;
    register(&store, "abc123").await;

    // Same content hash again: no new row, status untouched
    store.update_status("abc123", "transcribed", None, None).await.unwrap();
    let registered = store
        .upsert_file("abc123", "/elsewhere/copy.m4a", "copy.m4a", 1024, 0, None, None)
        .await
        .unwrap();
    assert!(!registered);

    let file = store.get_file("abc123").await.unwrap().unwrap();
    assert_eq!(file.status, "transcribed");
    assert_eq!(file.filename, "abc123.m4a");
}

#[tokio::test]
async fn status_machine_walks_to_approved() {
    let store = store().await;
    register(&store, "walk").await;

    store.update_status("walk", "transcribing", None, None).await.unwrap();
    let file = store.get_file("walk").await.unwrap().unwrap();
    assert_eq!(file.status, "transcribing");
    assert!(file.transcribe_started_at.is_some());

    store.update_progress("walk", "decoding audio").await.unwrap();
    let file = store.get_file("walk").await.unwrap().unwrap();
    assert_eq!(file.progress_message.as_deref(), Some("decoding audio"));

    store
        .update_transcription("walk", "Me: hello\nDana: hi", Some("he"), Some(42.5))
        .await
        .unwrap();
    let file = store.get_file("walk").await.unwrap().unwrap();
    assert_eq!(file.status, "transcribed");
    assert!(file.progress_message.is_none());
    assert!(file.transcribe_started_at.is_none());
    assert_eq!(file.language.as_deref(), Some("he"));

    assert!(store.mark_approved("walk", "call:walk").await.unwrap());
    let file = store.get_file("walk").await.unwrap().unwrap();
    assert_eq!(file.status, "approved");
    assert_eq!(file.source_id.as_deref(), Some("call:walk"));
}

#[tokio::test]
async fn progress_only_sticks_while_transcribing() {
    let store = store().await;
    register(&store, "idle").await;

    store.update_progress("idle", "should not apply").await.unwrap();
    let file = store.get_file("idle").await.unwrap().unwrap();
    assert!(file.progress_message.is_none());
}

#[tokio::test]
async fn errors_carry_a_category() {
    let store = store().await;
    register(&store, "broken").await;

    store
        .update_status(
            "broken",
            "error",
            Some("file locked by cloud sync"),
            Some("file_locked"),
        )
        .await
        .unwrap();

    let file = store.get_file("broken").await.unwrap().unwrap();
    assert_eq!(file.status, "error");
    assert_eq!(file.error_type.as_deref(), Some("file_locked"));
}

#[tokio::test]
async fn stale_transcribing_resets_to_pending() {
    let store = store().await;
    register(&store, "stale").await;
    register(&store, "fresh").await;

    store.update_status("stale", "transcribing", None, None).await.unwrap();
    store.update_status("fresh", "transcribing", None, None).await.unwrap();

    // Age one job past the threshold
    sqlx::query(
        "UPDATE recording_files SET transcribe_started_at = datetime('now', '-45 minutes') WHERE content_hash = 'stale'",
    )
    .execute(store_pool(&store))
    .await
    .unwrap();

    let reset = store.reset_stale_transcribing(30).await.unwrap();
    assert_eq!(reset, 1);
    assert_eq!(store.get_file("stale").await.unwrap().unwrap().status, "pending");
    assert_eq!(
        store.get_file("fresh").await.unwrap().unwrap().status,
        "transcribing"
    );

    // Re-running is a no-op
    assert_eq!(store.reset_stale_transcribing(30).await.unwrap(), 0);
}

#[tokio::test]
async fn counts_group_by_status() {
    let store = store().await;
    register(&store, "one").await;
    register(&store, "two").await;
    store.update_status("two", "transcribed", None, None).await.unwrap();

    let counts = store.get_counts().await.unwrap();
    assert_eq!(counts.get("pending"), Some(&1));
    assert_eq!(counts.get("transcribed"), Some(&1));
}

// The store keeps its pool private; tests that need raw SQL reach it
// through a helper on the test side.
fn store_pool(store: &RecordingStore) -> &sqlx::SqlitePool {
    store.pool()
}
