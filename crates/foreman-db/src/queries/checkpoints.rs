//! Database query functions for the `task_checkpoints` table: an
//! append-only log of state transitions and context enrichments, the
//! nearest persisted analogue to an audit trail this system offers (see
//! the Non-goal on replay/audit logs beyond persisted row history).

use anyhow::{Context, Result};
use serde_json::Value as Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::TaskCheckpoint;

pub async fn record(
    pool: &SqlitePool,
    task_id: Uuid,
    event_type: &str,
    payload: &Json,
) -> Result<()> {
    sqlx::query("INSERT INTO task_checkpoints (task_id, event_type, payload) VALUES (?, ?, ?)")
        .bind(task_id)
        .bind(event_type)
        .bind(payload)
        .execute(pool)
        .await
        .context("failed to record task checkpoint")?;

    Ok(())
}

pub async fn list_for_task(pool: &SqlitePool, task_id: Uuid) -> Result<Vec<TaskCheckpoint>> {
    let rows = sqlx::query_as::<_, TaskCheckpoint>(
        "SELECT * FROM task_checkpoints WHERE task_id = ? ORDER BY id ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list task checkpoints")?;

    Ok(rows)
}
