// src/scheduler/dispatcher.rs
// Due-task dispatch loop

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::rag::{filter_sources_for_display, RagEngine, ScoredNode, SearchFilters};

use super::store::TaskStore;
use super::types::{ScheduledTask, TaskStatus};

/// How often the dispatcher wakes up to look for due tasks
const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Sources rendered into a stored result
const RESULT_SOURCE_LIMIT: usize = 10;

/// Background dispatch loop. Each tick loads due enabled tasks, executes
/// them through the retrieval engine and advances their schedules.
/// Failures are persisted as error results and the schedule still
/// advances, so one broken task can't wedge the loop.
pub async fn run_dispatcher(store: TaskStore, rag: Arc<RagEngine>) {
    let mut tick = tokio::time::interval(TICK_INTERVAL);
    info!("Scheduler dispatcher started");

    loop {
        tick.tick().await;

        let now = Utc::now();
        let due = match store.get_due_tasks(now).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("Failed to load due tasks: {}", e);
                continue;
            }
        };

        for task in due {
            info!("Dispatching task {}: {}", task.id, task.name);
            if let Err(e) = execute_task(&store, &rag, &task).await {
                error!("Task {} execution error: {}", task.id, e);
            }
            if let Err(e) = store.advance_after_run(&task, Utc::now()).await {
                error!("Failed to advance task {}: {}", task.id, e);
            }
        }
    }
}

/// Execute one task and persist its result. Also used by the run-now
/// endpoint.
pub async fn execute_task(
    store: &TaskStore,
    rag: &Arc<RagEngine>,
    task: &ScheduledTask,
) -> anyhow::Result<i64> {
    let started = Instant::now();
    let filters: SearchFilters = serde_json::from_str(&task.filters).unwrap_or_default();

    let outcome = rag.chat_turn(&task.prompt, &[], 10, &filters).await;
    let duration_ms = started.elapsed().as_millis() as i64;

    let result_id = match outcome {
        Ok(outcome) => {
            let real_nodes: Vec<&ScoredNode> =
                outcome.nodes.iter().filter(|n| n.source != "system").collect();
            let status = if real_nodes.is_empty() {
                TaskStatus::NoResults
            } else {
                TaskStatus::Success
            };

            let sources = json!(filter_sources_for_display(
                &outcome.nodes,
                0.0,
                RESULT_SOURCE_LIMIT
            ));

            store
                .add_result(
                    task.id,
                    &outcome.answer,
                    &outcome.condensed_query,
                    &sources,
                    outcome.cost_usd,
                    duration_ms,
                    status,
                    None,
                )
                .await?
        }
        Err(e) => {
            warn!("Task {} failed: {}", task.id, e);
            store
                .add_result(
                    task.id,
                    "",
                    &task.prompt,
                    &json!([]),
                    0.0,
                    duration_ms,
                    TaskStatus::Error,
                    Some(&e.to_string()),
                )
                .await?
        }
    };

    Ok(result_id)
}
