//! Autonomous Supervisor (component D): a long-lived loop that starts and
//! idle-stops the queue, sweeps pending gates for auto-approval using the
//! Approval Resolver, and watchdogs stuck `running` tasks.
//!
//! Grounded in the same outer-loop-plus-timers shape this workspace's
//! orchestrator used for a single plan run, generalized to a continuous
//! loop over an indefinite stream of enqueued work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use foreman_db::models::TaskStatus;
use foreman_db::queries::{gates, metrics, tasks};

use crate::classifier;
use crate::queue::{QueueEngine, TaskQueueEvent};
use crate::resolver;

pub mod events;
pub use events::{SupervisorEvent, SupervisorEventBus};

const WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);
const MONITOR_INTERVAL: Duration = Duration::from_secs(30);
const WATCHDOG_FLOOR_S: i64 = 600;

/// Configuration captured by `start_continuous`.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub project_id: String,
    pub check_interval: Duration,
    pub auto_approve_threshold: i32,
    pub max_idle: Duration,
    pub enable_auto_approval: bool,
}

/// Monotonically-accumulating counters plus a bounded recent-error log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisorStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_auto_approved: u64,
    pub tasks_manual_approval: u64,
    pub recent_errors: Vec<String>,
    pub run_time_ms: u64,
}

const MAX_RECENT_ERRORS: usize = 20;

impl SupervisorStats {
    fn push_error(&mut self, error: String) {
        self.recent_errors.push(error);
        if self.recent_errors.len() > MAX_RECENT_ERRORS {
            self.recent_errors.remove(0);
        }
    }
}

struct SupervisorState {
    stats: SupervisorStats,
    last_activity_at: chrono::DateTime<Utc>,
}

/// The supervisor: owns a queue engine and drives it continuously.
pub struct Supervisor {
    pool: SqlitePool,
    queue: Arc<QueueEngine>,
    config: SupervisorConfig,
    state: Mutex<SupervisorState>,
    running: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
    events: SupervisorEventBus,
}

impl Supervisor {
    pub fn new(pool: SqlitePool, queue: Arc<QueueEngine>, config: SupervisorConfig) -> Arc<Self> {
        Arc::new(Self {
            pool,
            queue,
            config,
            state: Mutex::new(SupervisorState {
                stats: SupervisorStats::default(),
                last_activity_at: Utc::now(),
            }),
            running: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
            events: SupervisorEventBus::new(),
        })
    }

    pub async fn stats(&self) -> SupervisorStats {
        self.state.lock().await.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub fn pause(&self) {
        self.queue.pause();
        self.events.emit(SupervisorEvent::AutonomousPaused { timestamp: Utc::now() });
    }

    pub fn resume(&self) {
        self.queue.resume();
        self.events.emit(SupervisorEvent::AutonomousResumed { timestamp: Utc::now() });
    }

    /// Start the main loop plus the watchdog and monitor timers, all as
    /// independently-spawned tasks sharing this supervisor via `Arc`.
    pub async fn start_continuous(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut handles = self.handles.lock().await;

        let main = Arc::clone(self);
        handles.push(tokio::spawn(async move { main.main_loop().await }));

        let watchdog = Arc::clone(self);
        handles.push(tokio::spawn(async move { watchdog.watchdog_loop().await }));

        let monitor = Arc::clone(self);
        handles.push(tokio::spawn(async move { monitor.monitor_loop().await }));

        let counters = Arc::clone(self);
        let mut rx = self.queue.subscribe();
        handles.push(tokio::spawn(async move { counters.event_counter_loop(&mut rx).await }));

        self.events.emit(SupervisorEvent::AutonomousStarted { timestamp: Utc::now() });
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.stop().await;
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
        self.events.emit(SupervisorEvent::AutonomousStopped { timestamp: Utc::now() });
    }

    async fn main_loop(&self) {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let outcome = self.tick().await;

            match outcome {
                Ok(should_stop) => {
                    if should_stop {
                        self.running.store(false, Ordering::SeqCst);
                        break;
                    }
                    tokio::time::sleep(self.config.check_interval).await;
                }
                Err(e) => {
                    let mut state = self.state.lock().await;
                    state.stats.push_error(e.to_string());
                    drop(state);
                    tracing::warn!(project_id = %self.config.project_id, error = %e, "autonomous loop error, backing off");
                    self.events.emit(SupervisorEvent::AutonomousError {
                        message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    tokio::time::sleep(self.config.check_interval * 2).await;
                }
            }
        }
    }

    /// One iteration of the main loop. Returns `Ok(true)` if the loop
    /// should stop (idle timeout reached).
    async fn tick(&self) -> Result<bool> {
        if self.config.enable_auto_approval {
            self.auto_approval_sweep().await?;
        }

        if !self.queue.is_running() {
            let progress = tasks::get_project_progress(&self.pool, &self.config.project_id).await?;
            let has_pending_work = progress.pending > 0 || progress.queued > 0;

            if has_pending_work {
                self.queue.start_queue().await;
                self.touch_activity().await;
            } else {
                let idle_for = Utc::now() - self.state.lock().await.last_activity_at;
                if idle_for.to_std().unwrap_or_default() > self.config.max_idle {
                    tracing::info!(project_id = %self.config.project_id, "autonomous idle timeout reached");
                    self.events.emit(SupervisorEvent::AutonomousIdleTimeout { timestamp: Utc::now() });
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    async fn touch_activity(&self) {
        self.state.lock().await.last_activity_at = Utc::now();
    }

    /// For every pending gate in the project, score the underlying task's
    /// output with the Approval Resolver and auto-approve iff
    /// `can_auto_approve && score >= auto_approve_threshold`.
    async fn auto_approval_sweep(&self) -> Result<()> {
        let pending_gates = gates::list_pending_gates_for_project(&self.pool, &self.config.project_id).await?;

        for gate in pending_gates {
            let task = match tasks::get_task(&self.pool, gate.task_id).await? {
                Some(t) => t,
                None => continue,
            };

            let output = task
                .output_data
                .as_ref()
                .and_then(|v| v.get("result"))
                .and_then(|v| v.as_str());

            let assessment = resolver::assess(task.task_type, output);

            if assessment.can_auto_approve && assessment.score >= self.config.auto_approve_threshold {
                self.queue.approve_gate(gate.id, "autonomous-supervisor", None).await?;
                self.state.lock().await.stats.tasks_auto_approved += 1;
                self.events.emit(SupervisorEvent::AutoApproved {
                    task_id: task.id,
                    gate_id: gate.id,
                    timestamp: Utc::now(),
                });
            } else {
                self.state.lock().await.stats.tasks_manual_approval += 1;
                self.events.emit(SupervisorEvent::ManualApprovalRequired {
                    task_id: task.id,
                    gate_id: gate.id,
                    timestamp: Utc::now(),
                });
            }
        }

        Ok(())
    }

    /// Every 60s: find running tasks whose elapsed time exceeds
    /// `max(2 * estimated_duration_s, WATCHDOG_FLOOR_S)`, the floor
    /// applying whether or not an estimate was given. Cancel, enrich, and
    /// either retry or fail the task.
    async fn watchdog_loop(&self) {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(WATCHDOG_INTERVAL).await;
            if let Err(e) = self.watchdog_sweep().await {
                let mut state = self.state.lock().await;
                state.stats.push_error(e.to_string());
            }
        }
    }

    async fn watchdog_sweep(&self) -> Result<()> {
        let running = tasks::list_running_tasks(&self.pool, &self.config.project_id).await?;
        let now = Utc::now();

        for task in running {
            let Some(started_at) = task.started_at else {
                continue;
            };
            let elapsed_s = (now - started_at).num_seconds();
            let timeout_s = task
                .estimated_duration_s
                .map(|estimate| (estimate * 2).max(WATCHDOG_FLOOR_S))
                .unwrap_or(WATCHDOG_FLOOR_S);

            if elapsed_s <= timeout_s {
                continue;
            }

            tracing::warn!(task_id = %task.id, elapsed_s, timeout_s, "watchdog: task exceeded its time bound");
            self.events.emit(SupervisorEvent::TaskStuck { task_id: task.id, timestamp: now });
            self.queue.cancel_llm_session().await.ok();

            let note = format!(
                "Previous attempt timed out after {} s. Please be more concise.",
                task.estimated_duration_s.unwrap_or(timeout_s)
            );
            let classification =
                classifier::classify(&self.pool, "watchdog timeout", task.retry_count, task.max_retries).await?;

            if classification.retryable {
                let enriched = classifier::enrich_input(
                    &task.input_data,
                    &note,
                    "watchdog timeout",
                    classification.action,
                    classification.matched_pattern_id,
                );
                tasks::requeue_for_retry(&self.pool, task.id, &enriched).await?;
                metrics::close_open_metric_for_task(&self.pool, task.id, now, elapsed_s, "retry").await?;
                self.events
                    .emit(SupervisorEvent::TaskRetried { task_id: task.id, timestamp: Utc::now() });
            } else {
                let rows =
                    tasks::force_status(&self.pool, task.id, TaskStatus::Failed, Some(now), Some(&note)).await?;
                metrics::close_open_metric_for_task(&self.pool, task.id, now, elapsed_s, "failed").await?;
                if rows > 0 {
                    self.queue.emit_task_failed(task.id, &note);
                }
                let mut state = self.state.lock().await;
                state.stats.tasks_failed += 1;
            }
        }

        Ok(())
    }

    /// Track `tasks_completed`/`tasks_failed` by listening to the queue's
    /// own event stream, per the "subscribes to task-event to update
    /// counters" design.
    async fn event_counter_loop(&self, rx: &mut tokio::sync::broadcast::Receiver<TaskQueueEvent>) {
        loop {
            match rx.recv().await {
                Ok(TaskQueueEvent::TaskCompleted { .. }) => {
                    self.state.lock().await.stats.tasks_completed += 1;
                    self.touch_activity().await;
                }
                Ok(TaskQueueEvent::TaskFailed { .. }) => {
                    self.state.lock().await.stats.tasks_failed += 1;
                    self.touch_activity().await;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    /// Every 30s: refresh `run_time_ms` and emit an `autonomous-progress`
    /// snapshot carrying the current stats.
    async fn monitor_loop(&self) {
        let start = std::time::Instant::now();
        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(MONITOR_INTERVAL).await;
            let mut state = self.state.lock().await;
            state.stats.run_time_ms = start.elapsed().as_millis() as u64;
            let snapshot = state.stats.clone();
            drop(state);
            self.events.emit(SupervisorEvent::AutonomousProgress {
                stats: snapshot,
                timestamp: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedDriver;
    use foreman_db::models::{AutonomyLevel, GateType, TaskType};
    use foreman_db::queries::tasks::NewTask;
    use serde_json::json;

    fn queue(pool: SqlitePool) -> Arc<QueueEngine> {
        QueueEngine::new(pool, Arc::new(ScriptedDriver::always_ok()), "proj", "/tmp")
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            project_id: "proj".to_string(),
            check_interval: Duration::from_millis(20),
            auto_approve_threshold: 70,
            max_idle: Duration::from_secs(2),
            enable_auto_approval: true,
        }
    }

    #[tokio::test]
    async fn auto_approval_sweep_approves_high_score_low_risk_output() {
        let pool = foreman_test_utils::create_test_pool().await;
        let q = queue(pool.clone());
        let supervisor = Supervisor::new(pool.clone(), Arc::clone(&q), config());

        let task = q
            .enqueue(&NewTask {
                project_id: "proj",
                roadmap_id: None,
                parent_task_id: None,
                priority: 50,
                title: "doc",
                description: "doc",
                task_type: TaskType::Documentation,
                agent_persona: "documentation",
                autonomy_level: AutonomyLevel::ApprovalGates,
                max_retries: 3,
                estimated_duration_s: None,
                input_data: json!({}),
            })
            .await
            .unwrap();

        let output = json!({"result": "# Usage\n\nExample:\n```\nfoo()\n```\nMore padding text for completeness."});
        tasks::transition_status(
            &pool,
            task.id,
            TaskStatus::Pending,
            TaskStatus::Running,
            Some(Utc::now()),
            None,
            None,
            None,
            None,
        )
        .await
        .unwrap();
        let gate = gates::insert_gate(&pool, task.id, GateType::Review, "Review", None, Some(&output))
            .await
            .unwrap();
        tasks::set_approval_checkpoint(&pool, task.id, Some(gate.id)).await.unwrap();
        tasks::transition_status(
            &pool,
            task.id,
            TaskStatus::Running,
            TaskStatus::WaitingApproval,
            None,
            None,
            None,
            Some(&output),
            None,
        )
        .await
        .unwrap();

        supervisor.auto_approval_sweep().await.unwrap();

        let updated = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Completed);
        assert_eq!(supervisor.stats().await.tasks_auto_approved, 1);
    }

    #[tokio::test]
    async fn auto_approval_sweep_leaves_critical_risk_gate_pending() {
        let pool = foreman_test_utils::create_test_pool().await;
        let q = queue(pool.clone());
        let supervisor = Supervisor::new(pool.clone(), Arc::clone(&q), config());

        let task = q
            .enqueue(&NewTask {
                project_id: "proj",
                roadmap_id: None,
                parent_task_id: None,
                priority: 50,
                title: "cleanup",
                description: "cleanup",
                task_type: TaskType::Deployment,
                agent_persona: "devops",
                autonomy_level: AutonomyLevel::ApprovalGates,
                max_retries: 3,
                estimated_duration_s: None,
                input_data: json!({}),
            })
            .await
            .unwrap();

        let output = json!({"result": "ran rm -rf /var to clean up temp files during deployment, long explanation follows."});
        tasks::transition_status(
            &pool,
            task.id,
            TaskStatus::Pending,
            TaskStatus::Running,
            Some(Utc::now()),
            None,
            None,
            None,
            None,
        )
        .await
        .unwrap();
        let gate = gates::insert_gate(&pool, task.id, GateType::Review, "Review", None, Some(&output))
            .await
            .unwrap();
        tasks::set_approval_checkpoint(&pool, task.id, Some(gate.id)).await.unwrap();
        tasks::transition_status(
            &pool,
            task.id,
            TaskStatus::Running,
            TaskStatus::WaitingApproval,
            None,
            None,
            None,
            Some(&output),
            None,
        )
        .await
        .unwrap();

        supervisor.auto_approval_sweep().await.unwrap();

        let updated = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::WaitingApproval);
        assert_eq!(supervisor.stats().await.tasks_manual_approval, 1);
    }
}
