// src/scheduler/store.rs
// Durable task store with result history

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::schedule::compute_next_run;
use super::types::{ScheduleType, ScheduledTask, TaskResult, TaskStatus};

fn to_db_time(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                prompt TEXT NOT NULL,
                schedule_type TEXT NOT NULL DEFAULT 'daily',
                schedule_value TEXT NOT NULL DEFAULT '08:00',
                timezone TEXT NOT NULL DEFAULT 'Asia/Jerusalem',
                enabled BOOLEAN DEFAULT TRUE,
                filters TEXT NOT NULL DEFAULT '{}',
                next_run_at TIMESTAMP,
                last_run_at TIMESTAMP,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                answer TEXT NOT NULL DEFAULT '',
                prompt_used TEXT NOT NULL DEFAULT '',
                sources TEXT NOT NULL DEFAULT '[]',
                cost_usd REAL DEFAULT 0,
                duration_ms INTEGER DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'success',
                error_message TEXT,
                executed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                rating INTEGER DEFAULT 0,
                FOREIGN KEY (task_id) REFERENCES scheduled_tasks(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_tasks_next_run ON scheduled_tasks(next_run_at)",
            "CREATE INDEX IF NOT EXISTS idx_results_task ON task_results(task_id)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }

        Ok(())
    }

    // ========================================================================
    // TASK CRUD
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    pub async fn create_task(
        &self,
        name: &str,
        description: &str,
        prompt: &str,
        schedule_type: ScheduleType,
        schedule_value: &str,
        timezone: &str,
        filters: &serde_json::Value,
        enabled: bool,
    ) -> Result<ScheduledTask> {
        let next_run = if enabled {
            compute_next_run(schedule_type, schedule_value, timezone, Utc::now())
                .map(to_db_time)
        } else {
            None
        };

        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_tasks
                (name, description, prompt, schedule_type, schedule_value,
                 timezone, enabled, filters, next_run_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(prompt)
        .bind(schedule_type.as_str())
        .bind(schedule_value)
        .bind(timezone)
        .bind(enabled)
        .bind(filters.to_string())
        .bind(&next_run)
        .execute(&self.pool)
        .await?;

        let task = self
            .get_task(result.last_insert_rowid())
            .await?
            .ok_or_else(|| anyhow!("Failed to read back created task"))?;
        info!("Created scheduled task {}: {}", task.id, task.name);
        Ok(task)
    }

    pub async fn get_task(&self, task_id: i64) -> Result<Option<ScheduledTask>> {
        let task =
            sqlx::query_as::<_, ScheduledTask>("SELECT * FROM scheduled_tasks WHERE id = ?")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(task)
    }

    pub async fn list_tasks(&self, include_disabled: bool) -> Result<Vec<ScheduledTask>> {
        let query = if include_disabled {
            "SELECT * FROM scheduled_tasks ORDER BY name COLLATE NOCASE"
        } else {
            "SELECT * FROM scheduled_tasks WHERE enabled = TRUE ORDER BY name COLLATE NOCASE"
        };
        let tasks = sqlx::query_as::<_, ScheduledTask>(query)
            .fetch_all(&self.pool)
            .await?;
        Ok(tasks)
    }

    /// Update mutable task fields; schedule changes recompute next_run_at
    #[allow(clippy::too_many_arguments)]
    pub async fn update_task(
        &self,
        task_id: i64,
        name: Option<&str>,
        description: Option<&str>,
        prompt: Option<&str>,
        schedule_type: Option<ScheduleType>,
        schedule_value: Option<&str>,
        timezone: Option<&str>,
        filters: Option<&serde_json::Value>,
    ) -> Result<Option<ScheduledTask>> {
        let Some(existing) = self.get_task(task_id).await? else {
            return Ok(None);
        };

        let schedule_type_final = schedule_type
            .map(|s| s.as_str().to_string())
            .unwrap_or(existing.schedule_type.clone());
        let schedule_value_final = schedule_value
            .map(|s| s.to_string())
            .unwrap_or(existing.schedule_value.clone());
        let timezone_final = timezone
            .map(|s| s.to_string())
            .unwrap_or(existing.timezone.clone());

        let schedule_changed = schedule_type.is_some()
            || schedule_value.is_some()
            || timezone.is_some();
        let next_run = if existing.enabled && schedule_changed {
            schedule_type_final
                .parse::<ScheduleType>()
                .ok()
                .and_then(|st| {
                    compute_next_run(st, &schedule_value_final, &timezone_final, Utc::now())
                })
                .map(to_db_time)
        } else {
            existing.next_run_at.clone()
        };

        sqlx::query(
            r#"
            UPDATE scheduled_tasks SET
                name = ?, description = ?, prompt = ?,
                schedule_type = ?, schedule_value = ?, timezone = ?,
                filters = ?, next_run_at = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(name.unwrap_or(existing.name.as_str()))
        .bind(description.unwrap_or(existing.description.as_str()))
        .bind(prompt.unwrap_or(existing.prompt.as_str()))
        .bind(&schedule_type_final)
        .bind(&schedule_value_final)
        .bind(&timezone_final)
        .bind(
            filters
                .map(|f| f.to_string())
                .unwrap_or(existing.filters.clone()),
        )
        .bind(&next_run)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        self.get_task(task_id).await
    }

    pub async fn delete_task(&self, task_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scheduled_tasks WHERE id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Toggle a task. Disabling clears next_run_at; enabling recomputes
    /// it. Returns the new enabled state.
    pub async fn toggle_task(&self, task_id: i64) -> Result<Option<bool>> {
        let Some(task) = self.get_task(task_id).await? else {
            return Ok(None);
        };

        let enabling = !task.enabled;
        let next_run = if enabling {
            task.schedule_type
                .parse::<ScheduleType>()
                .ok()
                .and_then(|st| {
                    compute_next_run(st, &task.schedule_value, &task.timezone, Utc::now())
                })
                .map(to_db_time)
        } else {
            None
        };

        sqlx::query(
            "UPDATE scheduled_tasks SET enabled = ?, next_run_at = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(enabling)
        .bind(&next_run)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        info!(
            "Task {} {}",
            task_id,
            if enabling { "enabled" } else { "disabled" }
        );
        Ok(Some(enabling))
    }

    // ========================================================================
    // DISPATCH SUPPORT
    // ========================================================================

    /// Enabled tasks whose next_run_at is due
    pub async fn get_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let tasks = sqlx::query_as::<_, ScheduledTask>(
            r#"
            SELECT * FROM scheduled_tasks
            WHERE enabled = TRUE AND next_run_at IS NOT NULL AND next_run_at <= ?
            ORDER BY next_run_at
            "#,
        )
        .bind(to_db_time(now))
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    /// Advance a task after a run: set last_run_at and recompute a
    /// strictly-future next_run_at.
    pub async fn advance_after_run(&self, task: &ScheduledTask, now: DateTime<Utc>) -> Result<()> {
        let next_run = task
            .schedule_type
            .parse::<ScheduleType>()
            .ok()
            .and_then(|st| compute_next_run(st, &task.schedule_value, &task.timezone, now))
            .map(to_db_time);

        sqlx::query(
            "UPDATE scheduled_tasks SET last_run_at = ?, next_run_at = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(to_db_time(now))
        .bind(&next_run)
        .bind(task.id)
        .execute(&self.pool)
        .await?;

        debug!("Task {} advanced to next run {:?}", task.id, next_run);
        Ok(())
    }

    // ========================================================================
    // RESULTS
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    pub async fn add_result(
        &self,
        task_id: i64,
        answer: &str,
        prompt_used: &str,
        sources: &serde_json::Value,
        cost_usd: f64,
        duration_ms: i64,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO task_results
                (task_id, answer, prompt_used, sources, cost_usd, duration_ms, status, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task_id)
        .bind(answer)
        .bind(prompt_used)
        .bind(sources.to_string())
        .bind(cost_usd)
        .bind(duration_ms)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_results(&self, task_id: i64, limit: i64) -> Result<Vec<TaskResult>> {
        let results = sqlx::query_as::<_, TaskResult>(
            "SELECT * FROM task_results WHERE task_id = ? ORDER BY executed_at DESC LIMIT ?",
        )
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(results)
    }

    pub async fn get_result_count(&self, task_id: i64) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM task_results WHERE task_id = ?")
                .bind(task_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Rate a result {-1, 0, +1}. Touches nothing else on the row.
    pub async fn rate_result(&self, result_id: i64, rating: i64) -> Result<bool> {
        if !(-1..=1).contains(&rating) {
            return Err(anyhow!("Rating must be -1, 0, or 1"));
        }
        let result = sqlx::query("UPDATE task_results SET rating = ? WHERE id = ?")
            .bind(rating)
            .bind(result_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
