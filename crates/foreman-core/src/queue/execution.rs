//! Execution of one dispatched task: mark it running, build the prompt,
//! drive the LLM session to completion, and branch on the outcome.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value as Json};
use sqlx::SqlitePool;

use foreman_db::models::{AutonomyLevel, GateType, Task, TaskStatus};
use foreman_db::queries::{gates, metrics, tasks};

use crate::classifier;
use crate::llm::{LlmDriver, LlmEvent};

use super::events::{EventBus, TaskQueueEvent};

/// Run one task end to end: `running` -> (gate | completed | pending | failed).
pub async fn execute_task(
    pool: &SqlitePool,
    driver: &dyn LlmDriver,
    events: &EventBus,
    project_path: &Path,
    task: Task,
) -> Result<()> {
    let started_at = Utc::now();
    let rows = tasks::transition_status(
        pool,
        task.id,
        task.status,
        TaskStatus::Running,
        Some(started_at),
        None,
        None,
        None,
        None,
    )
    .await
    .context("failed to mark task running")?;

    if rows == 0 {
        // Lost the race to another dispatcher; nothing to do.
        return Ok(());
    }
    events.emit(TaskQueueEvent::TaskStarted {
        task_id: task.id,
        timestamp: started_at,
    });

    let metric_id = metrics::open_metric(pool, task.id, task.retry_count + 1)
        .await
        .context("failed to open task execution metric")?;

    let prompt = build_prompt(&task);
    let session_id = format!("task_{}", task.id);

    let mut stream = match driver
        .send(&session_id, &prompt, project_path, &task.agent_persona)
        .await
    {
        Ok(stream) => stream,
        Err(e) => return handle_error(pool, events, &task, started_at, metric_id, &e.to_string()).await,
    };

    let mut final_content = None;
    let mut error_text = None;

    while let Some(event) = stream.next().await {
        match event {
            LlmEvent::Stream { content, .. } => {
                events.emit(TaskQueueEvent::TaskProgress {
                    task_id: task.id,
                    data: json!({ "content": content }),
                    timestamp: Utc::now(),
                });
            }
            LlmEvent::Complete { content, .. } => final_content = Some(content),
            LlmEvent::Error { error, .. } => error_text = Some(error),
        }
    }

    match (final_content, error_text) {
        (Some(content), _) => handle_complete(pool, events, &task, started_at, metric_id, content).await,
        (None, Some(error)) => handle_error(pool, events, &task, started_at, metric_id, &error).await,
        (None, None) => {
            handle_error(
                pool,
                events,
                &task,
                started_at,
                metric_id,
                "LLM session ended without completing",
            )
            .await
        }
    }
}

/// Build the prompt from `input_data.prompt` (verbatim if present) or the
/// task's description/title, prefixed with context and parent-output
/// sections when those input fields are present.
fn build_prompt(task: &Task) -> String {
    let obj = task.input_data.as_object();
    let field = |name: &str| obj.and_then(|o| o.get(name)).and_then(|v| v.as_str());

    let mut body = field("prompt").map(str::to_string).unwrap_or_else(|| {
        if !task.description.is_empty() {
            task.description.clone()
        } else {
            task.title.clone()
        }
    });

    if let Some(context) = field("context").filter(|s| !s.is_empty()) {
        body = format!("Context:\n{context}\n\nTask:\n{body}");
    }
    if let Some(parent_output) = field("parent_output").filter(|s| !s.is_empty()) {
        body = format!("Previous output:\n{parent_output}\n\n{body}");
    }

    body
}

async fn handle_complete(
    pool: &SqlitePool,
    events: &EventBus,
    task: &Task,
    started_at: chrono::DateTime<Utc>,
    metric_id: i64,
    content: String,
) -> Result<()> {
    let output = json!({ "result": content });
    let completed_at = Utc::now();
    let actual_duration_s = (completed_at - started_at).num_seconds();

    if task.autonomy_level == AutonomyLevel::ApprovalGates {
        let gate = gates::insert_gate(
            pool,
            task.id,
            GateType::Review,
            "Review output",
            None,
            Some(&output),
        )
        .await?;
        tasks::set_approval_checkpoint(pool, task.id, Some(gate.id)).await?;
        let rows = tasks::transition_status(
            pool,
            task.id,
            TaskStatus::Running,
            TaskStatus::WaitingApproval,
            None,
            None,
            None,
            Some(&output),
            None,
        )
        .await?;
        if rows > 0 {
            events.emit(TaskQueueEvent::TaskApprovalRequired {
                task_id: task.id,
                data: json!({ "gate_id": gate.id }),
                timestamp: Utc::now(),
            });
        }
        metrics::close_metric(pool, metric_id, completed_at, actual_duration_s, "waiting_approval").await?;
    } else {
        let rows = tasks::transition_status(
            pool,
            task.id,
            TaskStatus::Running,
            TaskStatus::Completed,
            None,
            Some(completed_at),
            Some(actual_duration_s),
            Some(&output),
            None,
        )
        .await?;
        if rows > 0 {
            // A retried task that finally succeeds credits the pattern
            // blamed for its earlier failure, closing the learning loop
            // `record_outcome`'s `false` calls in `handle_error` open.
            if let Some(pattern_id) = classifier::retry_pattern_id(&task.input_data) {
                classifier::record_outcome(pool, Some(pattern_id), task.id, "retry succeeded", true).await?;
            }
            events.emit(TaskQueueEvent::TaskCompleted {
                task_id: task.id,
                data: output,
                timestamp: completed_at,
            });
        }
        metrics::close_metric(pool, metric_id, completed_at, actual_duration_s, "completed").await?;
    }

    Ok(())
}

async fn handle_error(
    pool: &SqlitePool,
    events: &EventBus,
    task: &Task,
    started_at: chrono::DateTime<Utc>,
    metric_id: i64,
    error_text: &str,
) -> Result<()> {
    let classification = classifier::classify(pool, error_text, task.retry_count, task.max_retries).await?;
    let completed_at = Utc::now();
    let actual_duration_s = (completed_at - started_at).num_seconds();

    if classification.retryable {
        let enriched: Json = classifier::enrich_input(
            &task.input_data,
            classification.context_enrichment.as_deref().unwrap_or(""),
            error_text,
            classification.action,
            classification.matched_pattern_id,
        );
        tasks::requeue_for_retry(pool, task.id, &enriched).await?;
        classifier::record_outcome(pool, classification.matched_pattern_id, task.id, error_text, false).await?;
        metrics::close_metric(pool, metric_id, completed_at, actual_duration_s, "retry").await?;
    } else {
        let rows = tasks::transition_status(
            pool,
            task.id,
            TaskStatus::Running,
            TaskStatus::Failed,
            None,
            Some(completed_at),
            Some(actual_duration_s),
            None,
            Some(error_text),
        )
        .await?;
        classifier::record_outcome(pool, classification.matched_pattern_id, task.id, error_text, false).await?;
        if rows > 0 {
            events.emit(TaskQueueEvent::TaskFailed {
                task_id: task.id,
                data: json!({ "error": error_text }),
                timestamp: completed_at,
            });
        }
        metrics::close_metric(pool, metric_id, completed_at, actual_duration_s, "failed").await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedDriver, ScriptedResponse};
    use foreman_db::models::TaskType;
    use foreman_db::queries::tasks::{insert_task, NewTask};
    use std::path::PathBuf;

    async fn make_task(pool: &SqlitePool, autonomy: AutonomyLevel, input: Json) -> Task {
        insert_task(
            pool,
            &NewTask {
                project_id: "proj",
                roadmap_id: None,
                parent_task_id: None,
                priority: 50,
                title: "Write hello world",
                description: "Write hello world",
                task_type: TaskType::CodeGeneration,
                agent_persona: "developer",
                autonomy_level: autonomy,
                max_retries: 3,
                estimated_duration_s: None,
                input_data: input,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn happy_path_auto_task_completes() {
        let pool = foreman_test_utils::create_test_pool().await;
        let task = make_task(&pool, AutonomyLevel::Auto, json!({})).await;

        let driver = ScriptedDriver::new(vec![ScriptedResponse::Complete(
            "Here is the code:\n```js\nconsole.log('hi')\n```".to_string(),
        )]);
        let events = EventBus::new();

        execute_task(&pool, &driver, &events, &PathBuf::from("/tmp"), task.clone())
            .await
            .unwrap();

        let updated = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Completed);
        assert!(updated.output_data.is_some());
    }

    #[tokio::test]
    async fn approval_gates_task_creates_review_gate_instead_of_completing() {
        let pool = foreman_test_utils::create_test_pool().await;
        let task = make_task(&pool, AutonomyLevel::ApprovalGates, json!({})).await;

        let driver = ScriptedDriver::new(vec![ScriptedResponse::Complete("done".to_string())]);
        let events = EventBus::new();

        execute_task(&pool, &driver, &events, &PathBuf::from("/tmp"), task.clone())
            .await
            .unwrap();

        let updated = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::WaitingApproval);
        assert!(updated.approval_checkpoint.is_some());
    }

    #[tokio::test]
    async fn transient_error_requeues_to_pending() {
        let pool = foreman_test_utils::create_test_pool().await;
        let task = make_task(&pool, AutonomyLevel::Auto, json!({})).await;

        let driver = ScriptedDriver::new(vec![ScriptedResponse::Error("ETIMEDOUT connect".to_string())]);
        let events = EventBus::new();

        execute_task(&pool, &driver, &events, &PathBuf::from("/tmp"), task.clone())
            .await
            .unwrap();

        let updated = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Pending);
        assert_eq!(updated.retry_count, 1);
    }

    #[tokio::test]
    async fn structural_error_fails_without_retry() {
        let pool = foreman_test_utils::create_test_pool().await;
        let task = make_task(&pool, AutonomyLevel::Auto, json!({})).await;

        let driver = ScriptedDriver::new(vec![ScriptedResponse::Error(
            "EACCES: permission denied".to_string(),
        )]);
        let events = EventBus::new();

        execute_task(&pool, &driver, &events, &PathBuf::from("/tmp"), task.clone())
            .await
            .unwrap();

        let updated = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Failed);
        assert_eq!(updated.retry_count, 0);
    }

    #[tokio::test]
    async fn fixable_error_enriches_input_with_context() {
        let pool = foreman_test_utils::create_test_pool().await;
        let task = make_task(&pool, AutonomyLevel::Auto, json!({"prompt": "Read foo.md"})).await;

        let driver = ScriptedDriver::new(vec![ScriptedResponse::Error(
            "ENOENT: no such file or directory".to_string(),
        )]);
        let events = EventBus::new();

        execute_task(&pool, &driver, &events, &PathBuf::from("/tmp"), task.clone())
            .await
            .unwrap();

        let updated = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Pending);
        let previous_errors = updated.input_data["previous_errors"].as_array().unwrap();
        assert_eq!(previous_errors.len(), 1);
    }

    #[test]
    fn build_prompt_prefers_explicit_prompt_and_prepends_context() {
        let task = Task {
            id: uuid::Uuid::new_v4(),
            project_id: "proj".to_string(),
            roadmap_id: None,
            parent_task_id: None,
            priority: 50,
            title: "title".to_string(),
            description: "description".to_string(),
            task_type: TaskType::CodeGeneration,
            agent_persona: "developer".to_string(),
            autonomy_level: AutonomyLevel::Auto,
            approval_required: false,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            estimated_duration_s: None,
            actual_duration_s: None,
            input_data: json!({"prompt": "explicit prompt", "context": "some context"}),
            output_data: None,
            error_message: None,
            approval_checkpoint: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        let prompt = build_prompt(&task);
        assert_eq!(prompt, "Context:\nsome context\n\nTask:\nexplicit prompt");
    }
}
