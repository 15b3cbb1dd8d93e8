//! Persistence layer for the task orchestrator: connection pool,
//! migrations, row models, and one prepared-statement query module per
//! table. Scheduling and gating semantics live in `foreman-core`; this
//! crate only knows how to read and write rows.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;

pub use config::DbConfig;
pub use pool::{create_pool, default_migrations_path, run_migrations, table_counts, WriteLock};
