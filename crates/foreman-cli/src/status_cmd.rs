//! `foreman status`/`foreman show` commands: project progress and
//! per-task detail.

use anyhow::{Context, Result};
use foreman_core::queue::QueueEngine;
use foreman_db::queries::tasks;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Show progress counts and a one-line-per-task listing for the project.
pub async fn run_status(pool: &SqlitePool, queue: &QueueEngine) -> Result<()> {
    let progress = tasks::get_project_progress(pool, queue.project_id()).await?;
    println!("Project: {}", queue.project_id());
    println!("Progress: {}/{} completed", progress.completed, progress.total);
    println!(
        "  pending={} queued={} running={} waiting_approval={} completed={} failed={} cancelled={}",
        progress.pending,
        progress.queued,
        progress.running,
        progress.waiting_approval,
        progress.completed,
        progress.failed,
        progress.cancelled,
    );
    println!();

    let all_tasks = queue.list().await?;
    if all_tasks.is_empty() {
        println!("No tasks queued.");
        return Ok(());
    }

    println!("Tasks:");
    for task in &all_tasks {
        let status_icon = match task.status.to_string().as_str() {
            "pending" => ".",
            "queued" => ">",
            "running" => "*",
            "waiting_approval" => "?",
            "completed" => "+",
            "failed" => "!",
            "cancelled" => "x",
            _ => " ",
        };
        println!(
            "  [{}] {} ({}, priority {}, {})",
            status_icon, task.title, task.task_type, task.priority, task.status
        );
    }

    Ok(())
}

/// Show full detail for a single task.
pub async fn run_show(queue: &QueueEngine, task_id_str: &str) -> Result<()> {
    let task_id = Uuid::parse_str(task_id_str).with_context(|| format!("invalid task ID: {task_id_str}"))?;
    let task = queue
        .get(task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    println!("Task: {} ({})", task.title, task.id);
    println!("Type: {}", task.task_type);
    println!("Status: {}", task.status);
    println!("Autonomy: {}", task.autonomy_level);
    println!("Priority: {}", task.priority);
    println!("Retries: {}/{}", task.retry_count, task.max_retries);
    if let Some(parent) = task.parent_task_id {
        println!("Parent: {parent}");
    }
    if let Some(started) = task.started_at {
        println!("Started: {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(completed) = task.completed_at {
        println!("Completed: {}", completed.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(error) = &task.error_message {
        println!("Error: {error}");
    }
    if let Some(output) = &task.output_data {
        println!("Output: {output}");
    }

    let children = queue.hierarchy(task.id).await?;
    if !children.is_empty() {
        println!("Subtasks:");
        for child in &children {
            println!("  [{}] {} ({})", child.status, child.title, child.id);
        }
    }

    Ok(())
}
