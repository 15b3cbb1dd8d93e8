//! Integration tests for the task/gate command flow the `foreman` binary
//! wires up, exercised here directly against `foreman-core`'s queue engine
//! over an in-memory SQLite pool.

use std::sync::Arc;

use foreman_core::llm::ScriptedDriver;
use foreman_core::queue::QueueEngine;
use foreman_db::models::{AutonomyLevel, GateType, TaskStatus, TaskType};
use foreman_db::queries::tasks::NewTask;
use serde_json::json;
use uuid::Uuid;

fn engine(pool: sqlx::SqlitePool) -> Arc<QueueEngine> {
    QueueEngine::new(pool, Arc::new(ScriptedDriver::always_ok()), "proj", "/tmp")
}

fn new_task(title: &'static str) -> NewTask<'static> {
    NewTask {
        project_id: "proj",
        roadmap_id: None,
        parent_task_id: None,
        priority: 50,
        title,
        description: "",
        task_type: TaskType::CodeGeneration,
        agent_persona: "developer",
        autonomy_level: AutonomyLevel::Auto,
        max_retries: 3,
        estimated_duration_s: None,
        input_data: json!({"prompt": "print hello world"}),
    }
}

#[tokio::test]
async fn enqueue_then_cancel_roundtrip() {
    let pool = foreman_test_utils::create_test_pool().await;
    let queue = engine(pool);

    let task = queue.enqueue(&new_task("Write hello world")).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.input_data["prompt"], "print hello world");

    assert!(queue.cancel(task.id).await.unwrap());
    let cancelled = queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn reorder_changes_priority() {
    let pool = foreman_test_utils::create_test_pool().await;
    let queue = engine(pool);

    let task = queue.enqueue(&new_task("Some task")).await.unwrap();
    queue.reorder(task.id, 90).await.unwrap();

    let updated = queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(updated.priority, 90);
}

#[tokio::test]
async fn dependency_cycle_is_rejected() {
    let pool = foreman_test_utils::create_test_pool().await;
    let queue = engine(pool);

    let a = queue.enqueue(&new_task("A")).await.unwrap();
    let b = queue.enqueue(&new_task("B")).await.unwrap();

    queue.add_dependency(a.id, b.id).await.unwrap();
    assert!(queue.add_dependency(b.id, a.id).await.is_err());
}

#[tokio::test]
async fn unknown_task_id_operations_are_reported_as_no_op() {
    let pool = foreman_test_utils::create_test_pool().await;
    let queue = engine(pool);

    let ghost = Uuid::new_v4();
    assert!(!queue.cancel(ghost).await.unwrap());
    assert_eq!(queue.reorder(ghost, 10).await.unwrap(), 0);
}

#[tokio::test]
async fn gate_approve_then_reject_is_idempotent() {
    let pool = foreman_test_utils::create_test_pool().await;
    let queue = engine(pool);

    let task = queue.enqueue(&new_task("Needs approval")).await.unwrap();
    let gate = queue
        .create_gate(task.id, GateType::Manual, "Pre-check", None, None)
        .await
        .unwrap();

    assert!(queue.approve_gate(gate.id, "alice", None).await.unwrap().is_some());
    let updated = queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(updated.status, TaskStatus::Queued);

    // Second resolution of an already-resolved gate is a documented no-op.
    assert!(queue.reject_gate(gate.id, "alice", None).await.unwrap().is_none());
    let unchanged = queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, TaskStatus::Queued);
}
