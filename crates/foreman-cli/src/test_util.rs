//! Test-only helpers shared across this crate's unit tests.

use std::sync::{Mutex, OnceLock};

/// Tests that mutate process environment variables (`FOREMAN_DATABASE_URL`,
/// `FOREMAN_LLM_BINARY`, `HOME`, `XDG_CONFIG_HOME`) must not run
/// concurrently with each other; acquire this lock for the duration of the
/// mutation.
pub fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}
