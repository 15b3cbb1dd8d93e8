use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::DbConfig;

/// Create a connection pool for the embedded store.
///
/// A single connection is used so that writes are serialised by `sqlx`'s
/// own pool queue; readers that only need a snapshot can still use the same
/// pool since SQLite's WAL-less default already lock-free-reads committed
/// data between writes.
pub async fn create_pool(config: &DbConfig) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(&config.database_url)
        .with_context(|| format!("invalid database url {}", config.database_url))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(opts)
        .await
        .with_context(|| format!("failed to open database at {}", config.database_url))?;

    Ok(pool)
}

/// Run all pending migrations from the given directory against the pool.
///
/// Uses a runtime `Migrator` so that no database file needs to exist at
/// compile time (unlike the `sqlx::migrate!()` macro).
pub async fn run_migrations(pool: &SqlitePool, migrations_dir: &Path) -> Result<()> {
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .with_context(|| {
            format!(
                "failed to load migrations from {}",
                migrations_dir.display()
            )
        })?;

    migrator
        .run(pool)
        .await
        .context("failed to run database migrations")?;

    info!("migrations applied successfully");
    Ok(())
}

/// A single-writer lock with bounded retry, matching the persistence
/// layer's "serialised-write embedded relational store" contract.
///
/// SQLite already serialises writers at the file-lock level, but
/// contending writers get `SQLITE_BUSY` rather than queueing; this wraps
/// every write sequence in a process-local mutex plus a short retry loop
/// so transient busy errors are absorbed instead of surfacing to callers.
#[derive(Clone)]
pub struct WriteLock {
    inner: Arc<Mutex<()>>,
}

impl Default for WriteLock {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
        }
    }
}

impl WriteLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `op`, retrying a bounded number of times on `SQLITE_BUSY`-style
    /// contention. The mutex guarantees at most one writer per process;
    /// the retry loop absorbs contention from other processes or
    /// connections sharing the same file.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let _guard = self.inner.lock().await;
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if is_busy(&e) && attempt < 5 => {
                    attempt += 1;
                    warn!(attempt, "database busy, retrying write");
                    tokio::time::sleep(Duration::from_millis(20 * attempt as u64)).await;
                }
                Err(e) => return Err(e).context("write failed"),
            }
        }
    }
}

fn is_busy(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("5"))
}

/// Return the row count for every user table in the database.
pub async fn table_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' \
         ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .context("failed to list tables")?;

    let mut counts = Vec::with_capacity(tables.len());
    for (table_name,) in &tables {
        // Table names come from sqlite_master so they are safe identifiers.
        let query = format!("SELECT COUNT(*) FROM {table_name}");
        let count: (i64,) = sqlx::query_as(&query)
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table_name}"))?;
        counts.push((table_name.clone(), count.0));
    }
    Ok(counts)
}

/// Return the default path to the migrations directory shipped with
/// `foreman-db`.
///
/// At runtime this resolves relative to the `foreman-db` crate's source
/// tree via the `CARGO_MANIFEST_DIR` compile-time env. For installed
/// binaries (where the source tree is absent) the migrations should be
/// embedded at compile time by the caller instead.
pub fn default_migrations_path() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_pool_in_memory_and_migrate() {
        let config = DbConfig::in_memory();
        let pool = create_pool(&config).await.expect("pool");
        run_migrations(&pool, default_migrations_path())
            .await
            .expect("migrations");

        let counts = table_counts(&pool).await.expect("counts");
        let names: Vec<&str> = counts.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"task_queue"));
        assert!(names.contains(&"approval_gates"));
        assert!(names.contains(&"task_dependencies"));
        assert!(names.contains(&"error_patterns"));
        assert!(names.contains(&"task_execution_metrics"));
        assert!(names.contains(&"task_checkpoints"));
    }

    #[tokio::test]
    async fn write_lock_runs_once_on_success() {
        let lock = WriteLock::new();
        let result: Result<i32, sqlx::Error> = lock.run(|| async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
