//! Database query functions for the `approval_gates` table.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value as Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{ApprovalGate, GateStatus, GateType};

/// Insert a new pending gate for a task.
///
/// The partial unique index on `approval_gates(task_id) WHERE status =
/// 'pending'` enforces invariant 4 (at most one pending gate per task) at
/// the storage layer; a conflict here surfaces as an `sqlx::Error` the
/// caller should treat as "a pending gate already exists".
pub async fn insert_gate(
    pool: &SqlitePool,
    task_id: Uuid,
    gate_type: GateType,
    title: &str,
    description: Option<&str>,
    review_data: Option<&Json>,
) -> Result<ApprovalGate> {
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO approval_gates (id, task_id, gate_type, title, description, review_data, status) \
         VALUES (?, ?, ?, ?, ?, ?, 'pending')",
    )
    .bind(id)
    .bind(task_id)
    .bind(gate_type)
    .bind(title)
    .bind(description)
    .bind(review_data)
    .execute(pool)
    .await
    .context("failed to insert approval gate")?;

    get_gate(pool, id)
        .await?
        .context("inserted gate vanished before it could be re-read")
}

pub async fn get_gate(pool: &SqlitePool, id: Uuid) -> Result<Option<ApprovalGate>> {
    let gate = sqlx::query_as::<_, ApprovalGate>("SELECT * FROM approval_gates WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch approval gate")?;

    Ok(gate)
}

/// The current pending gate for a task, if any.
pub async fn get_pending_gate_for_task(
    pool: &SqlitePool,
    task_id: Uuid,
) -> Result<Option<ApprovalGate>> {
    let gate = sqlx::query_as::<_, ApprovalGate>(
        "SELECT * FROM approval_gates WHERE task_id = ? AND status = 'pending'",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch pending gate")?;

    Ok(gate)
}

pub async fn list_gates_for_task(pool: &SqlitePool, task_id: Uuid) -> Result<Vec<ApprovalGate>> {
    let gates = sqlx::query_as::<_, ApprovalGate>(
        "SELECT * FROM approval_gates WHERE task_id = ? ORDER BY created_at ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list gates for task")?;

    Ok(gates)
}

/// All pending gates across a project's tasks, used by the supervisor's
/// auto-approval sweep.
pub async fn list_pending_gates_for_project(
    pool: &SqlitePool,
    project_id: &str,
) -> Result<Vec<ApprovalGate>> {
    let gates = sqlx::query_as::<_, ApprovalGate>(
        "SELECT g.* FROM approval_gates g \
         JOIN task_queue t ON t.id = g.task_id \
         WHERE t.project_id = ? AND g.status = 'pending' \
         ORDER BY g.created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list pending gates for project")?;

    Ok(gates)
}

/// Resolve a pending gate. Returns the number of rows affected: 0 means
/// the gate was not `pending` (already resolved), matching the "second
/// call is a no-op" idempotence property.
pub async fn resolve_gate(
    pool: &SqlitePool,
    gate_id: Uuid,
    status: GateStatus,
    approver: Option<&str>,
    notes: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE approval_gates \
         SET status = ?, approver = ?, notes = ?, resolved_at = ? \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(status)
    .bind(approver)
    .bind(notes)
    .bind(Utc::now())
    .bind(gate_id)
    .execute(pool)
    .await
    .context("failed to resolve approval gate")?;

    Ok(result.rows_affected())
}
