// tests/scheduler_store_test.rs
// Task store semantics: next_run computation on create/toggle, result
// history, rating isolation, schedule liveness

mod common;

use chrono::{Duration, NaiveDateTime, Utc};
use recall_backend::scheduler::types::{ScheduleType, TaskStatus};
use recall_backend::scheduler::TaskStore;
use serde_json::json;

async fn store() -> TaskStore {
    let pool = common::memory_pool().await;
    let store = TaskStore::new(pool);
    store.init_schema().await.expect("schema");
    store
}

fn parse_db_time(raw: &str) -> chrono::DateTime<Utc> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .expect("db time format")
        .and_utc()
}

#[tokio::test]
async fn interval_task_schedules_ahead() {
    let store = store().await;
    let before = Utc::now();

    let task = store
        .create_task(
            "digest",
            "",
            "what happened today?",
            ScheduleType::Interval,
            "15m",
            "Asia/Jerusalem",
            &json!({}),
            true,
        )
        .await
        .unwrap();

    let next = parse_db_time(task.next_run_at.as_deref().expect("next_run_at set"));
    let expected = before + Duration::minutes(15);
    let delta = (next - expected).num_seconds().abs();
    assert!(delta <= 2, "next_run should be ~15 minutes out, delta {}s", delta);
}

#[tokio::test]
async fn disabled_task_has_no_next_run() {
    let store = store().await;
    let task = store
        .create_task(
            "paused",
            "",
            "prompt",
            ScheduleType::Daily,
            "08:00",
            "Asia/Jerusalem",
            &json!({}),
            false,
        )
        .await
        .unwrap();
    assert!(task.next_run_at.is_none());
}

#[tokio::test]
async fn toggle_clears_and_recomputes_next_run() {
    let store = store().await;
    let task = store
        .create_task(
            "toggle-me",
            "",
            "prompt",
            ScheduleType::Interval,
            "1h",
            "Asia/Jerusalem",
            &json!({}),
            true,
        )
        .await
        .unwrap();
    assert!(task.next_run_at.is_some());

    // Disable: next_run_at becomes NULL
    assert_eq!(store.toggle_task(task.id).await.unwrap(), Some(false));
    let disabled = store.get_task(task.id).await.unwrap().unwrap();
    assert!(disabled.next_run_at.is_none());

    // Enable: recomputed and in the future
    assert_eq!(store.toggle_task(task.id).await.unwrap(), Some(true));
    let enabled = store.get_task(task.id).await.unwrap().unwrap();
    let next = parse_db_time(enabled.next_run_at.as_deref().unwrap());
    assert!(next > Utc::now());
}

#[tokio::test]
async fn advance_strictly_increases_next_run() {
    let store = store().await;
    let task = store
        .create_task(
            "liveness",
            "",
            "prompt",
            ScheduleType::Interval,
            "30m",
            "Asia/Jerusalem",
            &json!({}),
            true,
        )
        .await
        .unwrap();
    let first = parse_db_time(task.next_run_at.as_deref().unwrap());

    let dispatch_time = first + Duration::seconds(1);
    store.advance_after_run(&task, dispatch_time).await.unwrap();

    let advanced = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(
        advanced.last_run_at.as_deref(),
        Some(dispatch_time.format("%Y-%m-%d %H:%M:%S").to_string().as_str())
    );
    let next = parse_db_time(advanced.next_run_at.as_deref().unwrap());
    assert!(next > first, "next_run_at strictly increases across dispatches");
    assert!(next > dispatch_time);
}

#[tokio::test]
async fn due_query_returns_only_due_enabled_tasks() {
    let store = store().await;

    let due = store
        .create_task(
            "due",
            "",
            "prompt",
            ScheduleType::Interval,
            "15m",
            "Asia/Jerusalem",
            &json!({}),
            true,
        )
        .await
        .unwrap();
    store
        .create_task(
            "not-due",
            "",
            "prompt",
            ScheduleType::Interval,
            "15m",
            "Asia/Jerusalem",
            &json!({}),
            true,
        )
        .await
        .unwrap();
    store
        .create_task(
            "disabled",
            "",
            "prompt",
            ScheduleType::Interval,
            "15m",
            "Asia/Jerusalem",
            &json!({}),
            false,
        )
        .await
        .unwrap();

    // Nothing is due yet
    assert!(store.get_due_tasks(Utc::now()).await.unwrap().is_empty());

    // 20 minutes from now, both enabled tasks are due
    let later = Utc::now() + Duration::minutes(20);
    let due_tasks = store.get_due_tasks(later).await.unwrap();
    assert_eq!(due_tasks.len(), 2);
    assert!(due_tasks.iter().any(|t| t.id == due.id));
}

#[tokio::test]
async fn results_history_and_rating() {
    let store = store().await;
    let task = store
        .create_task(
            "rated",
            "",
            "prompt",
            ScheduleType::Daily,
            "08:00",
            "Asia/Jerusalem",
            &json!({}),
            true,
        )
        .await
        .unwrap();

    let result_id = store
        .add_result(
            task.id,
            "the answer",
            "condensed prompt",
            &json!([{"source_id": "x"}]),
            0.0123,
            850,
            TaskStatus::Success,
            None,
        )
        .await
        .unwrap();

    let results = store.get_results(task.id, 10).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].answer, "the answer");
    assert_eq!(results[0].status, "success");
    assert!(results[0].duration_ms > 0);
    assert_eq!(results[0].rating, 0);

    // Rating mutates only the rating field
    assert!(store.rate_result(result_id, 1).await.unwrap());
    let rated = &store.get_results(task.id, 10).await.unwrap()[0];
    assert_eq!(rated.rating, 1);
    assert_eq!(rated.answer, "the answer");
    assert_eq!(rated.cost_usd, 0.0123);

    // Out-of-range ratings are rejected
    assert!(store.rate_result(result_id, 5).await.is_err());
    assert_eq!(store.get_result_count(task.id).await.unwrap(), 1);
}

#[tokio::test]
async fn error_results_are_recorded() {
    let store = store().await;
    let task = store
        .create_task(
            "failing",
            "",
            "prompt",
            ScheduleType::Daily,
            "08:00",
            "Asia/Jerusalem",
            &json!({}),
            true,
        )
        .await
        .unwrap();

    store
        .add_result(
            task.id,
            "",
            "prompt",
            &json!([]),
            0.0,
            120,
            TaskStatus::Error,
            Some("vector store unreachable"),
        )
        .await
        .unwrap();

    let results = store.get_results(task.id, 10).await.unwrap();
    assert_eq!(results[0].status, "error");
    assert_eq!(
        results[0].error_message.as_deref(),
        Some("vector store unreachable")
    );
}

#[tokio::test]
async fn deleting_a_task_cascades_results() {
    let store = store().await;
    let task = store
        .create_task(
            "doomed",
            "",
            "prompt",
            ScheduleType::Daily,
            "08:00",
            "Asia/Jerusalem",
            &json!({}),
            true,
        )
        .await
        .unwrap();
    store
        .add_result(task.id, "a", "p", &json!([]), 0.0, 1, TaskStatus::Success, None)
        .await
        .unwrap();

    assert!(store.delete_task(task.id).await.unwrap());
    assert_eq!(store.get_result_count(task.id).await.unwrap(), 0);
}
