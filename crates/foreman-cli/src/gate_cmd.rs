//! `foreman gate` commands: list, approve, and reject approval gates.

use anyhow::{Context, Result};
use foreman_core::queue::QueueEngine;
use uuid::Uuid;

/// List every gate recorded against a task, most recent first.
pub async fn run_list(queue: &QueueEngine, task_id_str: &str) -> Result<()> {
    let task_id = Uuid::parse_str(task_id_str).with_context(|| format!("invalid task ID: {task_id_str}"))?;

    let gates = queue.list_gates(task_id).await?;
    if gates.is_empty() {
        println!("No gates recorded for task {task_id}.");
        return Ok(());
    }

    for gate in &gates {
        println!(
            "  [{}] {} ({}) - {}",
            gate.id, gate.title, gate.gate_type, gate.status
        );
        if let Some(approver) = &gate.approver {
            println!("    resolved by {approver}");
        }
    }

    Ok(())
}

/// Approve a pending gate, returning its task to `queued` (or directly to
/// `completed` for a post-execution review gate).
pub async fn run_approve(queue: &QueueEngine, gate_id_str: &str, approver: &str, notes: Option<&str>) -> Result<()> {
    let gate_id = Uuid::parse_str(gate_id_str).with_context(|| format!("invalid gate ID: {gate_id_str}"))?;

    match queue.approve_gate(gate_id, approver, notes).await? {
        Some(gate) => println!("Gate {gate_id} approved for task {}.", gate.task_id),
        None => println!("Gate {gate_id} was not pending; no change made."),
    }
    Ok(())
}

/// Reject a pending gate, cancelling its task.
pub async fn run_reject(queue: &QueueEngine, gate_id_str: &str, approver: &str, notes: Option<&str>) -> Result<()> {
    let gate_id = Uuid::parse_str(gate_id_str).with_context(|| format!("invalid gate ID: {gate_id_str}"))?;

    match queue.reject_gate(gate_id, approver, notes).await? {
        Some(gate) => println!("Gate {gate_id} rejected; task {} cancelled.", gate.task_id),
        None => println!("Gate {gate_id} was not pending; no change made."),
    }
    Ok(())
}
