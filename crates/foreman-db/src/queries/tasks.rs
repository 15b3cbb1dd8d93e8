//! Database query functions for the `task_queue` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{AutonomyLevel, Task, TaskStatus, TaskType};

/// Fields accepted when enqueuing a new task. Mirrors the `input` argument
/// to `enqueue()`.
pub struct NewTask<'a> {
    pub project_id: &'a str,
    pub roadmap_id: Option<&'a str>,
    pub parent_task_id: Option<Uuid>,
    pub priority: i32,
    pub title: &'a str,
    pub description: &'a str,
    pub task_type: TaskType,
    pub agent_persona: &'a str,
    pub autonomy_level: AutonomyLevel,
    pub max_retries: i32,
    pub estimated_duration_s: Option<i64>,
    pub input_data: Json,
}

/// Insert a new task row with status `pending`.
pub async fn insert_task(pool: &SqlitePool, new: &NewTask<'_>) -> Result<Task> {
    let id = Uuid::new_v4();
    let approval_required = new.autonomy_level.approval_required();
    let status = TaskStatus::Pending;

    sqlx::query(
        "INSERT INTO task_queue (\
            id, project_id, roadmap_id, parent_task_id, priority, title, description, \
            task_type, agent_persona, autonomy_level, approval_required, status, \
            retry_count, max_retries, estimated_duration_s, input_data \
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
    )
    .bind(id)
    .bind(new.project_id)
    .bind(new.roadmap_id)
    .bind(new.parent_task_id)
    .bind(new.priority)
    .bind(new.title)
    .bind(new.description)
    .bind(new.task_type)
    .bind(new.agent_persona)
    .bind(new.autonomy_level)
    .bind(approval_required)
    .bind(status)
    .bind(new.max_retries)
    .bind(new.estimated_duration_s)
    .bind(&new.input_data)
    .execute(pool)
    .await
    .context("failed to insert task")?;

    get_task(pool, id)
        .await?
        .context("inserted task vanished before it could be re-read")
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &SqlitePool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM task_queue WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List tasks for a project, newest-created last.
pub async fn list_tasks_for_project(pool: &SqlitePool, project_id: &str) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM task_queue WHERE project_id = ? ORDER BY created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for project")?;

    Ok(tasks)
}

/// List the direct children of a task (those whose `parent_task_id`
/// matches), used to answer `hierarchy` queries.
pub async fn list_children(pool: &SqlitePool, parent_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM task_queue WHERE parent_task_id = ? ORDER BY created_at ASC",
    )
    .bind(parent_id)
    .fetch_all(pool)
    .await
    .context("failed to list task children")?;

    Ok(tasks)
}

/// Atomically transition a task from one status to another, with optional
/// timestamp and payload fields applied in the same statement.
///
/// Uses optimistic locking: the `WHERE` clause requires the current status
/// to equal `from`, so concurrent transitions never race. Returns the
/// number of rows affected (0 means the status did not match, or the task
/// does not exist).
#[allow(clippy::too_many_arguments)]
pub async fn transition_status(
    pool: &SqlitePool,
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    actual_duration_s: Option<i64>,
    output_data: Option<&Json>,
    error_message: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE task_queue \
         SET status = ?, \
             started_at = COALESCE(?, started_at), \
             completed_at = COALESCE(?, completed_at), \
             actual_duration_s = COALESCE(?, actual_duration_s), \
             output_data = COALESCE(?, output_data), \
             error_message = COALESCE(?, error_message) \
         WHERE id = ? AND status = ?",
    )
    .bind(to)
    .bind(started_at)
    .bind(completed_at)
    .bind(actual_duration_s)
    .bind(output_data)
    .bind(error_message)
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition task status")?;

    Ok(result.rows_affected())
}

/// Force a task's status regardless of its current value, used by
/// `cancel()` which must win even over an in-flight transition.
pub async fn force_status(
    pool: &SqlitePool,
    task_id: Uuid,
    to: TaskStatus,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE task_queue \
         SET status = ?, \
             completed_at = COALESCE(?, completed_at), \
             error_message = COALESCE(?, error_message) \
         WHERE id = ?",
    )
    .bind(to)
    .bind(completed_at)
    .bind(error_message)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to force task status")?;

    Ok(result.rows_affected())
}

/// Re-queue a task after a retryable failure: `status -> pending`,
/// `retry_count += 1`, input_data replaced with the enriched bag.
pub async fn requeue_for_retry(
    pool: &SqlitePool,
    task_id: Uuid,
    input_data: &Json,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE task_queue \
         SET status = 'pending', retry_count = retry_count + 1, input_data = ? \
         WHERE id = ? AND status = 'running'",
    )
    .bind(input_data)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to requeue task for retry")?;

    Ok(result.rows_affected())
}

/// Update a task's priority (the `reorder` operation).
pub async fn update_priority(pool: &SqlitePool, task_id: Uuid, priority: i32) -> Result<u64> {
    let result = sqlx::query("UPDATE task_queue SET priority = ? WHERE id = ?")
        .bind(priority)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to update task priority")?;

    Ok(result.rows_affected())
}

/// Update a task's autonomy level, recomputing `approval_required`.
pub async fn update_autonomy_level(
    pool: &SqlitePool,
    task_id: Uuid,
    level: AutonomyLevel,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE task_queue SET autonomy_level = ?, approval_required = ? WHERE id = ?",
    )
    .bind(level)
    .bind(level.approval_required())
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to update task autonomy level")?;

    Ok(result.rows_affected())
}

/// Set the gate a task is currently waiting on (or clear it with `None`).
pub async fn set_approval_checkpoint(
    pool: &SqlitePool,
    task_id: Uuid,
    gate_id: Option<Uuid>,
) -> Result<u64> {
    let result = sqlx::query("UPDATE task_queue SET approval_checkpoint = ? WHERE id = ?")
        .bind(gate_id)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to set approval checkpoint")?;

    Ok(result.rows_affected())
}

/// Insert a dependency edge: `task_id` depends on (is blocked by)
/// `depends_on`.
pub async fn insert_dependency(pool: &SqlitePool, task_id: Uuid, depends_on: Uuid) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_dependencies (task_id, depends_on) VALUES (?, ?) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(depends_on)
    .execute(pool)
    .await
    .context("failed to insert task dependency")?;

    Ok(())
}

/// IDs of the tasks that `task_id` depends on.
pub async fn get_dependencies(pool: &SqlitePool, task_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT depends_on FROM task_dependencies WHERE task_id = ?")
            .bind(task_id)
            .fetch_all(pool)
            .await
            .context("failed to get task dependencies")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// IDs of the tasks that depend on (are blocked by) `task_id`.
pub async fn get_dependents(pool: &SqlitePool, task_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT task_id FROM task_dependencies WHERE depends_on = ?")
            .bind(task_id)
            .fetch_all(pool)
            .await
            .context("failed to get task dependents")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Tasks in `pending` or `queued` status for a project, ordered by the
/// scheduler's own rule: priority descending, then creation time
/// ascending. The caller (the ready-task selection kernel) additionally
/// filters by dependency satisfaction, which is cheaper to do in Rust than
/// to express as a portable recursive SQL query.
pub async fn list_dispatch_candidates(pool: &SqlitePool, project_id: &str) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM task_queue \
         WHERE project_id = ? AND status IN ('pending', 'queued') \
         ORDER BY priority DESC, created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list dispatch candidates")?;

    Ok(tasks)
}

/// Status counts for a project's tasks.
#[derive(Debug, Clone, Default)]
pub struct ProjectProgress {
    pub pending: i64,
    pub queued: i64,
    pub running: i64,
    pub waiting_approval: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
}

/// Get a summary of task counts by status for a given project.
pub async fn get_project_progress(pool: &SqlitePool, project_id: &str) -> Result<ProjectProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) as cnt FROM task_queue WHERE project_id = ? GROUP BY status",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to get project progress")?;

    let mut progress = ProjectProgress::default();
    for (status, count) in &rows {
        match status.as_str() {
            "pending" => progress.pending = *count,
            "queued" => progress.queued = *count,
            "running" => progress.running = *count,
            "waiting_approval" => progress.waiting_approval = *count,
            "completed" => progress.completed = *count,
            "failed" => progress.failed = *count,
            "cancelled" => progress.cancelled = *count,
            _ => {}
        }
        progress.total += count;
    }
    Ok(progress)
}

/// Tasks currently `running`, used by the watchdog sweep.
pub async fn list_running_tasks(pool: &SqlitePool, project_id: &str) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM task_queue WHERE project_id = ? AND status = 'running'",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list running tasks")?;

    Ok(tasks)
}
