//! Database query functions for the `task_execution_metrics` table.
//!
//! One row is opened when a task attempt starts running and closed when
//! that attempt reaches a terminal or retry outcome.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::TaskExecutionMetric;

pub async fn open_metric(pool: &SqlitePool, task_id: Uuid, attempt: i32) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO task_execution_metrics (task_id, attempt, started_at) VALUES (?, ?, ?)",
    )
    .bind(task_id)
    .bind(attempt)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("failed to open task execution metric")?;

    Ok(result.last_insert_rowid())
}

pub async fn close_metric(
    pool: &SqlitePool,
    metric_id: i64,
    completed_at: DateTime<Utc>,
    actual_duration_s: i64,
    outcome: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE task_execution_metrics \
         SET completed_at = ?, actual_duration_s = ?, outcome = ? \
         WHERE id = ?",
    )
    .bind(completed_at)
    .bind(actual_duration_s)
    .bind(outcome)
    .bind(metric_id)
    .execute(pool)
    .await
    .context("failed to close task execution metric")?;

    Ok(())
}

/// Close whichever attempt row for `task_id` is still open. Used by the
/// supervisor's watchdog, which intervenes on a stuck task before
/// `execute_task` itself reaches a terminal branch and closes its own
/// metric row.
pub async fn close_open_metric_for_task(
    pool: &SqlitePool,
    task_id: Uuid,
    completed_at: DateTime<Utc>,
    actual_duration_s: i64,
    outcome: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE task_execution_metrics \
         SET completed_at = ?, actual_duration_s = ?, outcome = ? \
         WHERE task_id = ? AND completed_at IS NULL",
    )
    .bind(completed_at)
    .bind(actual_duration_s)
    .bind(outcome)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to close open task execution metric")?;

    Ok(())
}

pub async fn list_metrics_for_task(
    pool: &SqlitePool,
    task_id: Uuid,
) -> Result<Vec<TaskExecutionMetric>> {
    let rows = sqlx::query_as::<_, TaskExecutionMetric>(
        "SELECT * FROM task_execution_metrics WHERE task_id = ? ORDER BY attempt ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list task execution metrics")?;

    Ok(rows)
}
