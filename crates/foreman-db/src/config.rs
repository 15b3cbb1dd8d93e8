use std::env;

/// Database configuration.
///
/// Reads from the `FOREMAN_DATABASE_URL` environment variable, falling back
/// to a local SQLite file when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full `sqlx` SQLite connection URL, e.g. `sqlite://./foreman.db` or
    /// `sqlite::memory:`.
    pub database_url: String,
}

impl DbConfig {
    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "sqlite://./foreman.db";

    /// Build a config from the environment.
    ///
    /// Priority: `FOREMAN_DATABASE_URL` env var, then the compile-time
    /// default.
    pub fn from_env() -> Self {
        let database_url =
            env::var("FOREMAN_DATABASE_URL").unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self { database_url }
    }

    /// Build a config from an explicit URL (useful for tests and CLI flags).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// An in-memory database, useful for tests.
    pub fn in_memory() -> Self {
        Self::new("sqlite::memory:")
    }

    /// Whether this config points at an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
