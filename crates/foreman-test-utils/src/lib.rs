//! Shared test utilities for `foreman` integration tests.
//!
//! Builds a migrated in-memory SQLite pool per test -- no shared fixture or
//! container is needed since the store is embedded.

use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use foreman_db::models::{AutonomyLevel, GateType, Task, TaskType};
use foreman_db::queries::tasks::NewTask;
use foreman_db::{config::DbConfig, pool};

/// Create a fresh in-memory database with all migrations applied.
///
/// Each call opens a distinct SQLite memory database (they do not share
/// state), so tests that each call this once are fully isolated.
pub async fn create_test_pool() -> SqlitePool {
    let config = DbConfig::in_memory();
    let db_pool = pool::create_pool(&config)
        .await
        .expect("failed to open in-memory database");

    pool::run_migrations(&db_pool, pool::default_migrations_path())
        .await
        .expect("migrations should succeed");

    db_pool
}

/// Insert a task with sensible defaults, overridable via the closure.
pub async fn insert_test_task(
    db_pool: &SqlitePool,
    project_id: &str,
    configure: impl FnOnce(&mut TestTaskBuilder),
) -> Task {
    let mut builder = TestTaskBuilder::new(project_id);
    configure(&mut builder);
    builder.insert(db_pool).await
}

/// Builder for a test task, defaulting to an auto-autonomy code-generation
/// task at priority 50.
pub struct TestTaskBuilder {
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub agent_persona: String,
    pub autonomy_level: AutonomyLevel,
    pub priority: i32,
    pub max_retries: i32,
    pub estimated_duration_s: Option<i64>,
    pub prompt: Option<String>,
}

impl TestTaskBuilder {
    pub fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            title: "test task".to_string(),
            description: "a task created for tests".to_string(),
            task_type: TaskType::CodeGeneration,
            agent_persona: "developer".to_string(),
            autonomy_level: AutonomyLevel::Auto,
            priority: 50,
            max_retries: 3,
            estimated_duration_s: None,
            prompt: None,
        }
    }

    pub async fn insert(self, db_pool: &SqlitePool) -> Task {
        let mut input_data = json!({});
        if let Some(prompt) = &self.prompt {
            input_data["prompt"] = json!(prompt);
        }

        let new_task = NewTask {
            project_id: &self.project_id,
            roadmap_id: None,
            parent_task_id: None,
            priority: self.priority,
            title: &self.title,
            description: &self.description,
            task_type: self.task_type,
            agent_persona: &self.agent_persona,
            autonomy_level: self.autonomy_level,
            max_retries: self.max_retries,
            estimated_duration_s: self.estimated_duration_s,
            input_data,
        };

        foreman_db::queries::tasks::insert_task(db_pool, &new_task)
            .await
            .expect("failed to insert test task")
    }
}

/// Insert a pending gate for the given task.
pub async fn insert_test_gate(
    db_pool: &SqlitePool,
    task_id: Uuid,
    gate_type: GateType,
) -> foreman_db::models::ApprovalGate {
    foreman_db::queries::gates::insert_gate(db_pool, task_id, gate_type, "test gate", None, None)
        .await
        .expect("failed to insert test gate")
}

/// Current UTC time, re-exported so integration tests elsewhere in the
/// workspace don't need a direct `chrono` dependency just for this.
pub fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}
