//! The ready-task selection kernel: picks the next dependency-satisfied
//! task in priority order, refining supervised-pending tasks into a
//! pre-execution gate instead of dispatching them directly.

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use foreman_db::models::{AutonomyLevel, GateType, Task, TaskStatus};
use foreman_db::queries::{gates, tasks};

/// Scan dispatch candidates in `priority DESC, created_at ASC` order and
/// return the first one whose dependencies are all `completed`. A
/// `supervised` task still in `pending` is not dispatched: instead a
/// manual pre-execution gate is created for it and the scan continues.
pub async fn select_ready_task(pool: &SqlitePool, project_id: &str) -> Result<Option<Task>> {
    let candidates = tasks::list_dispatch_candidates(pool, project_id).await?;

    for task in candidates {
        if !dependencies_satisfied(pool, &task).await? {
            continue;
        }

        if task.autonomy_level == AutonomyLevel::Supervised && task.status == TaskStatus::Pending {
            gate_before_dispatch(pool, &task).await?;
            continue;
        }

        return Ok(Some(task));
    }

    Ok(None)
}

async fn dependencies_satisfied(pool: &SqlitePool, task: &Task) -> Result<bool> {
    let dep_ids = tasks::get_dependencies(pool, task.id).await?;
    for dep_id in dep_ids {
        match tasks::get_task(pool, dep_id).await? {
            Some(dep) if dep.status == TaskStatus::Completed => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

async fn gate_before_dispatch(pool: &SqlitePool, task: &Task) -> Result<()> {
    let gate = gates::insert_gate(
        pool,
        task.id,
        GateType::Manual,
        "Pre-execution approval",
        None,
        None,
    )
    .await?;

    tasks::set_approval_checkpoint(pool, task.id, Some(gate.id)).await?;

    let rows = tasks::transition_status(
        pool,
        task.id,
        TaskStatus::Pending,
        TaskStatus::WaitingApproval,
        None,
        None,
        None,
        None,
        None,
    )
    .await?;

    if rows == 0 {
        bail!(
            "optimistic lock failed gating task {} before dispatch",
            task.id
        );
    }

    Ok(())
}
