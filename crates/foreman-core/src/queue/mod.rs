//! Task Queue Engine (component C): persists tasks, orders them by
//! priority and dependency satisfaction, drives the execution state
//! machine, manages approval gates, and fans out typed events.
//!
//! Grounded in the same orchestrator shape this workspace already used for
//! DAG-driven agent dispatch (a driver loop owning a single in-flight
//! task, a typed result/event surface, tracing at every state change),
//! generalized from a one-shot plan run to a long-lived, pausable queue.

pub mod cycle;
pub mod events;
pub mod execution;
pub mod scheduler;
pub mod state_machine;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde_json::{json, Value as Json};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use foreman_db::models::{ApprovalGate, AutonomyLevel, GateStatus, GateType, Task, TaskStatus};
use foreman_db::queries::tasks::NewTask;
use foreman_db::queries::{gates, tasks};

use crate::llm::LlmDriver;

pub use events::{EventBus, TaskQueueEvent};

/// A live, per-project task queue. Cheap to hold behind an `Arc`: the
/// driver loop and every public method share the same connection pool and
/// event bus.
pub struct QueueEngine {
    pool: SqlitePool,
    driver: Arc<dyn LlmDriver>,
    project_id: String,
    project_path: PathBuf,
    events: EventBus,
    running: AtomicBool,
    paused: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl QueueEngine {
    pub fn new(
        pool: SqlitePool,
        driver: Arc<dyn LlmDriver>,
        project_id: impl Into<String>,
        project_path: impl Into<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            driver,
            project_id: project_id.into(),
            project_path: project_path.into(),
            events: EventBus::new(),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TaskQueueEvent> {
        self.events.subscribe()
    }

    /// Cancel whatever LLM session is currently in flight, without
    /// touching task status. Used by the supervisor's watchdog, which
    /// drives its own retry/fail transition after killing the session.
    pub async fn cancel_llm_session(&self) -> Result<()> {
        self.driver.cancel_current().await
    }

    /// Emit a `task-failed` event onto this queue's bus for a task the
    /// supervisor's watchdog already drove to `failed` itself. Keeps the
    /// watchdog's terminal transition visible on the same event stream
    /// every other failure path uses, satisfying the causal
    /// queued/started/completed-or-failed ordering for task events.
    pub fn emit_task_failed(&self, task_id: Uuid, error_text: &str) {
        self.events.emit(TaskQueueEvent::TaskFailed {
            task_id,
            data: json!({ "error": error_text }),
            timestamp: Utc::now(),
        });
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // -- producer-facing contract -----------------------------------------

    pub async fn enqueue(&self, new: &NewTask<'_>) -> Result<Task> {
        let task = tasks::insert_task(&self.pool, new).await?;
        self.events.emit(TaskQueueEvent::TaskQueued {
            task_id: task.id,
            timestamp: Utc::now(),
        });
        Ok(task)
    }

    /// Add a blocking dependency edge, refusing it if it would close a
    /// cycle in the project's dependency graph.
    pub async fn add_dependency(&self, task_id: Uuid, depends_on: Uuid) -> Result<()> {
        cycle::check_no_cycle(&self.pool, task_id, depends_on).await?;
        tasks::insert_dependency(&self.pool, task_id, depends_on).await
    }

    pub async fn update_status(&self, task_id: Uuid, to: TaskStatus) -> Result<Option<Task>> {
        let task = match tasks::get_task(&self.pool, task_id).await? {
            Some(t) => t,
            None => return Ok(None),
        };

        if !state_machine::is_valid_transition(task.status, to) {
            bail!(
                "invalid state transition {} -> {} for task {}",
                task.status,
                to,
                task_id
            );
        }

        let now = Utc::now();
        let started_at = (to == TaskStatus::Running).then_some(now);
        let completed_at =
            matches!(to, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled).then_some(now);
        let actual_duration_s = match (task.started_at, completed_at) {
            (Some(started), Some(completed)) => Some((completed - started).num_seconds()),
            _ => None,
        };

        let rows = tasks::transition_status(
            &self.pool,
            task_id,
            task.status,
            to,
            started_at,
            completed_at,
            actual_duration_s,
            None,
            None,
        )
        .await?;

        if rows == 0 {
            bail!("optimistic lock failed updating task {task_id} to {to}");
        }

        tasks::get_task(&self.pool, task_id).await
    }

    pub async fn cancel(&self, task_id: Uuid) -> Result<bool> {
        let task = match tasks::get_task(&self.pool, task_id).await? {
            Some(t) => t,
            None => return Ok(false),
        };
        if task.status.is_terminal() {
            return Ok(false);
        }

        if task.status == TaskStatus::Running {
            self.driver.cancel_current().await?;
        }

        let rows = tasks::force_status(&self.pool, task_id, TaskStatus::Cancelled, Some(Utc::now()), None).await?;
        if rows > 0 {
            self.events.emit(TaskQueueEvent::TaskCancelled {
                task_id,
                timestamp: Utc::now(),
            });
        }
        Ok(rows > 0)
    }

    pub async fn reorder(&self, task_id: Uuid, priority: i32) -> Result<u64> {
        tasks::update_priority(&self.pool, task_id, priority).await
    }

    pub async fn update_autonomy_level(&self, task_id: Uuid, level: AutonomyLevel) -> Result<u64> {
        tasks::update_autonomy_level(&self.pool, task_id, level).await
    }

    pub async fn create_gate(
        &self,
        task_id: Uuid,
        gate_type: GateType,
        title: &str,
        description: Option<&str>,
        review_data: Option<&Json>,
    ) -> Result<ApprovalGate> {
        let gate = gates::insert_gate(&self.pool, task_id, gate_type, title, description, review_data).await?;
        tasks::set_approval_checkpoint(&self.pool, task_id, Some(gate.id)).await?;
        tasks::force_status(&self.pool, task_id, TaskStatus::WaitingApproval, None, None).await?;
        self.events.emit(TaskQueueEvent::TaskApprovalRequired {
            task_id,
            data: serde_json::json!({ "gate_id": gate.id }),
            timestamp: Utc::now(),
        });
        Ok(gate)
    }

    /// Approve a pending gate. A `review` (post-execution) gate finalises
    /// its task directly to `completed` using the output already captured
    /// at gate-creation time; any other gate type returns the task to
    /// `queued` so the scheduler dispatches it normally. Idempotent: a
    /// gate that is no longer `pending` resolves to `Ok(None)`.
    pub async fn approve_gate(
        &self,
        gate_id: Uuid,
        approver: &str,
        notes: Option<&str>,
    ) -> Result<Option<ApprovalGate>> {
        let rows = gates::resolve_gate(&self.pool, gate_id, GateStatus::Approved, Some(approver), notes).await?;
        if rows == 0 {
            return Ok(None);
        }
        let gate = gates::get_gate(&self.pool, gate_id)
            .await?
            .context("approved gate vanished before it could be re-read")?;

        match gate.gate_type {
            GateType::Review => {
                let completed_at = Utc::now();
                tasks::force_status(&self.pool, gate.task_id, TaskStatus::Completed, Some(completed_at), None).await?;
                self.events.emit(TaskQueueEvent::TaskCompleted {
                    task_id: gate.task_id,
                    data: gate.review_data.clone().unwrap_or_else(|| serde_json::json!({})),
                    timestamp: completed_at,
                });
            }
            _ => {
                tasks::force_status(&self.pool, gate.task_id, TaskStatus::Queued, None, None).await?;
            }
        }

        Ok(Some(gate))
    }

    pub async fn reject_gate(
        &self,
        gate_id: Uuid,
        approver: &str,
        notes: Option<&str>,
    ) -> Result<Option<ApprovalGate>> {
        let rows = gates::resolve_gate(&self.pool, gate_id, GateStatus::Rejected, Some(approver), notes).await?;
        if rows == 0 {
            return Ok(None);
        }
        let gate = gates::get_gate(&self.pool, gate_id)
            .await?
            .context("rejected gate vanished before it could be re-read")?;

        tasks::force_status(
            &self.pool,
            gate.task_id,
            TaskStatus::Cancelled,
            Some(Utc::now()),
            Some("Rejected at approval gate"),
        )
        .await?;
        self.events.emit(TaskQueueEvent::TaskCancelled {
            task_id: gate.task_id,
            timestamp: Utc::now(),
        });

        Ok(Some(gate))
    }

    // -- lifecycle ----------------------------------------------------------

    pub async fn start_queue(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.paused.store(false, Ordering::SeqCst);

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if let Err(e) = engine.run().await {
                tracing::error!(project_id = %engine.project_id, error = %e, "queue execution loop exited with an error");
            }
        });
        *self.loop_handle.lock().await = Some(handle);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.events.emit(TaskQueueEvent::QueuePaused { timestamp: Utc::now() });
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.events.emit(TaskQueueEvent::QueueResumed { timestamp: Utc::now() });
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.loop_handle.lock().await.take() {
            handle.abort();
        }
    }

    async fn run(&self) -> Result<()> {
        self.events.emit(TaskQueueEvent::QueueStarted { timestamp: Utc::now() });
        tracing::info!(project_id = %self.project_id, "queue execution loop started");

        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if self.paused.load(Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }

            match scheduler::select_ready_task(&self.pool, &self.project_id).await? {
                Some(task) => {
                    let task_id = task.id;
                    if let Err(e) = execution::execute_task(
                        &self.pool,
                        self.driver.as_ref(),
                        &self.events,
                        &self.project_path,
                        task,
                    )
                    .await
                    {
                        let _ = tasks::force_status(
                            &self.pool,
                            task_id,
                            TaskStatus::Failed,
                            Some(Utc::now()),
                            Some(&e.to_string()),
                        )
                        .await;
                        return Err(e);
                    }
                }
                None => {
                    let progress = tasks::get_project_progress(&self.pool, &self.project_id).await?;
                    if progress.pending == 0 && progress.queued == 0 && progress.waiting_approval == 0 {
                        self.events.emit(TaskQueueEvent::QueueCompleted { timestamp: Utc::now() });
                        self.running.store(false, Ordering::SeqCst);
                        break;
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }

        tracing::info!(project_id = %self.project_id, "queue execution loop stopped");
        Ok(())
    }

    // -- read views -----------------------------------------------------

    pub async fn get(&self, task_id: Uuid) -> Result<Option<Task>> {
        tasks::get_task(&self.pool, task_id).await
    }

    pub async fn list(&self) -> Result<Vec<Task>> {
        tasks::list_tasks_for_project(&self.pool, &self.project_id).await
    }

    pub async fn hierarchy(&self, parent_id: Uuid) -> Result<Vec<Task>> {
        tasks::list_children(&self.pool, parent_id).await
    }

    pub async fn list_gates(&self, task_id: Uuid) -> Result<Vec<ApprovalGate>> {
        gates::list_gates_for_task(&self.pool, task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedDriver;
    use foreman_db::models::TaskType;
    use serde_json::json;

    fn engine(pool: SqlitePool) -> Arc<QueueEngine> {
        QueueEngine::new(pool, Arc::new(ScriptedDriver::always_ok()), "proj", "/tmp")
    }

    fn new_task() -> NewTask<'static> {
        NewTask {
            project_id: "proj",
            roadmap_id: None,
            parent_task_id: None,
            priority: 50,
            title: "title",
            description: "description",
            task_type: TaskType::CodeGeneration,
            agent_persona: "developer",
            autonomy_level: AutonomyLevel::Auto,
            max_retries: 3,
            estimated_duration_s: None,
            input_data: json!({}),
        }
    }

    #[tokio::test]
    async fn enqueue_inserts_pending_task_and_emits_event() {
        let pool = foreman_test_utils::create_test_pool().await;
        let engine = engine(pool);
        let mut rx = engine.subscribe();

        let task = engine.enqueue(&new_task()).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, TaskQueueEvent::TaskQueued { .. }));
    }

    #[tokio::test]
    async fn cancel_before_start_yields_cancelled_with_no_started_at() {
        let pool = foreman_test_utils::create_test_pool().await;
        let engine = engine(pool);
        let task = engine.enqueue(&new_task()).await.unwrap();

        assert!(engine.cancel(task.id).await.unwrap());

        let cancelled = engine.get(task.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(cancelled.started_at.is_none());
    }

    #[tokio::test]
    async fn cancel_on_terminal_task_is_a_no_op() {
        let pool = foreman_test_utils::create_test_pool().await;
        let engine = engine(pool);
        let task = engine.enqueue(&new_task()).await.unwrap();
        assert!(engine.cancel(task.id).await.unwrap());
        assert!(!engine.cancel(task.id).await.unwrap());
    }

    #[tokio::test]
    async fn add_dependency_rejects_cycles() {
        let pool = foreman_test_utils::create_test_pool().await;
        let engine = engine(pool);
        let a = engine.enqueue(&new_task()).await.unwrap();
        let b = engine.enqueue(&new_task()).await.unwrap();

        engine.add_dependency(a.id, b.id).await.unwrap();
        assert!(engine.add_dependency(b.id, a.id).await.is_err());
    }

    #[tokio::test]
    async fn create_gate_sets_waiting_approval() {
        let pool = foreman_test_utils::create_test_pool().await;
        let engine = engine(pool);
        let task = engine.enqueue(&new_task()).await.unwrap();

        let gate = engine
            .create_gate(task.id, GateType::Manual, "Pre-check", None, None)
            .await
            .unwrap();

        let updated = engine.get(task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::WaitingApproval);
        assert_eq!(updated.approval_checkpoint, Some(gate.id));
    }

    #[tokio::test]
    async fn approve_manual_gate_queues_task() {
        let pool = foreman_test_utils::create_test_pool().await;
        let engine = engine(pool);
        let task = engine.enqueue(&new_task()).await.unwrap();
        let gate = engine
            .create_gate(task.id, GateType::Manual, "Pre-check", None, None)
            .await
            .unwrap();

        let approved = engine.approve_gate(gate.id, "alice", None).await.unwrap();
        assert!(approved.is_some());

        let updated = engine.get(task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn approve_review_gate_completes_task_directly() {
        let pool = foreman_test_utils::create_test_pool().await;
        let engine = engine(pool);
        let task = engine.enqueue(&new_task()).await.unwrap();
        let gate = engine
            .create_gate(
                task.id,
                GateType::Review,
                "Review output",
                None,
                Some(&json!({"result": "done"})),
            )
            .await
            .unwrap();

        engine.approve_gate(gate.id, "alice", None).await.unwrap();

        let updated = engine.get(task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn reject_gate_cancels_task_with_reason() {
        let pool = foreman_test_utils::create_test_pool().await;
        let engine = engine(pool);
        let task = engine.enqueue(&new_task()).await.unwrap();
        let gate = engine
            .create_gate(task.id, GateType::Manual, "Pre-check", None, None)
            .await
            .unwrap();

        engine.reject_gate(gate.id, "alice", None).await.unwrap();

        let updated = engine.get(task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Cancelled);
        assert_eq!(updated.error_message.as_deref(), Some("Rejected at approval gate"));
    }

    #[tokio::test]
    async fn approve_or_reject_twice_is_idempotent() {
        let pool = foreman_test_utils::create_test_pool().await;
        let engine = engine(pool);
        let task = engine.enqueue(&new_task()).await.unwrap();
        let gate = engine
            .create_gate(task.id, GateType::Manual, "Pre-check", None, None)
            .await
            .unwrap();

        assert!(engine.approve_gate(gate.id, "alice", None).await.unwrap().is_some());
        assert!(engine.reject_gate(gate.id, "alice", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn start_queue_runs_enqueued_task_to_completion() {
        let pool = foreman_test_utils::create_test_pool().await;
        let engine = engine(pool);
        let _task = engine.enqueue(&new_task()).await.unwrap();

        engine.start_queue().await;

        let mut attempts = 0;
        loop {
            let tasks = engine.list().await.unwrap();
            if tasks.iter().all(|t| t.status.is_terminal()) {
                break;
            }
            attempts += 1;
            if attempts > 50 {
                panic!("queue did not reach a terminal state in time");
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        engine.stop().await;
        let tasks = engine.list().await.unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
    }
}
