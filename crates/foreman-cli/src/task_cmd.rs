//! `foreman task` commands: enqueue, cancel, and reorder tasks.

use anyhow::{Context, Result};
use foreman_core::queue::QueueEngine;
use foreman_db::models::{AutonomyLevel, TaskType};
use foreman_db::queries::tasks::NewTask;
use serde_json::json;
use uuid::Uuid;

/// Enqueue one new task.
#[allow(clippy::too_many_arguments)]
pub async fn run_enqueue(
    queue: &QueueEngine,
    title: &str,
    description: &str,
    task_type: TaskType,
    agent_persona: &str,
    autonomy_level: AutonomyLevel,
    priority: i32,
    parent_task_id: Option<&str>,
    prompt: Option<&str>,
) -> Result<()> {
    let parent_task_id = parent_task_id
        .map(Uuid::parse_str)
        .transpose()
        .context("invalid parent task ID")?;

    let input_data = match prompt {
        Some(p) => json!({ "prompt": p }),
        None => json!({}),
    };

    let task = queue
        .enqueue(&NewTask {
            project_id: queue.project_id(),
            roadmap_id: None,
            parent_task_id,
            priority,
            title,
            description,
            task_type,
            agent_persona,
            autonomy_level,
            max_retries: 3,
            estimated_duration_s: None,
            input_data,
        })
        .await?;

    println!("Enqueued task {} ({})", task.id, task.title);
    Ok(())
}

/// Cancel a task, killing its LLM session if it is running.
pub async fn run_cancel(queue: &QueueEngine, task_id_str: &str) -> Result<()> {
    let task_id = Uuid::parse_str(task_id_str).with_context(|| format!("invalid task ID: {task_id_str}"))?;
    if queue.cancel(task_id).await? {
        println!("Task {task_id} cancelled.");
    } else {
        println!("Task {task_id} was already terminal or does not exist; no change made.");
    }
    Ok(())
}

/// Change a task's dispatch priority (higher runs first).
pub async fn run_reorder(queue: &QueueEngine, task_id_str: &str, priority: i32) -> Result<()> {
    let task_id = Uuid::parse_str(task_id_str).with_context(|| format!("invalid task ID: {task_id_str}"))?;
    let rows = queue.reorder(task_id, priority).await?;
    if rows == 0 {
        println!("Task {task_id} not found; no change made.");
    } else {
        println!("Task {task_id} priority set to {priority}.");
    }
    Ok(())
}

/// Add a `task_id` depends-on `depends_on_id` blocking edge.
pub async fn run_depend(queue: &QueueEngine, task_id_str: &str, depends_on_str: &str) -> Result<()> {
    let task_id = Uuid::parse_str(task_id_str).with_context(|| format!("invalid task ID: {task_id_str}"))?;
    let depends_on = Uuid::parse_str(depends_on_str).with_context(|| format!("invalid task ID: {depends_on_str}"))?;
    queue.add_dependency(task_id, depends_on).await?;
    println!("Task {task_id} now depends on {depends_on}.");
    Ok(())
}
