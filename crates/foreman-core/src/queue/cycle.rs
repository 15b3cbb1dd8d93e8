//! Dependency-cycle detection at enqueue time.
//!
//! The ready-task selection kernel assumes the dependency graph is acyclic;
//! a cycle would starve every task on it forever. `insert_dependency` alone
//! never checks this, so callers that add an edge must run this check
//! first and refuse the edge if it would close a cycle.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use foreman_db::queries::tasks;

/// Return an error if adding the edge `task_id depends_on depends_on_id`
/// would create a cycle, i.e. if `depends_on_id` can already reach
/// `task_id` by following existing `depends_on` edges.
pub async fn check_no_cycle(pool: &SqlitePool, task_id: Uuid, depends_on_id: Uuid) -> Result<()> {
    if task_id == depends_on_id {
        bail!("task {task_id} cannot depend on itself");
    }

    let mut stack = vec![depends_on_id];
    let mut visited = std::collections::HashSet::new();

    while let Some(current) = stack.pop() {
        if current == task_id {
            bail!("adding dependency {task_id} -> {depends_on_id} would create a cycle");
        }
        if !visited.insert(current) {
            continue;
        }
        stack.extend(tasks::get_dependencies(pool, current).await?);
    }

    Ok(())
}
