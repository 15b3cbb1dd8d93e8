//! Database query functions for the `error_patterns` table.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::models::ErrorPattern;

/// All patterns in the declared seed order (the Error Classifier scans
/// them in this order, first match wins).
pub async fn list_patterns(pool: &SqlitePool) -> Result<Vec<ErrorPattern>> {
    let patterns =
        sqlx::query_as::<_, ErrorPattern>("SELECT * FROM error_patterns ORDER BY created_at ASC")
            .fetch_all(pool)
            .await
            .context("failed to list error patterns")?;

    Ok(patterns)
}

/// Record a retry outcome against the pattern that classified it,
/// updating its running success-rate mean and incrementing its
/// occurrence counter. `(rate * occ + (success ? 1 : 0)) / (occ + 1)`.
pub async fn record_outcome(pool: &SqlitePool, pattern_id: uuid::Uuid, success: bool) -> Result<()> {
    let observed = if success { 1.0 } else { 0.0 };
    sqlx::query(
        "UPDATE error_patterns \
         SET success_rate = (success_rate * occurrences + ?) / (occurrences + 1), \
             occurrences = occurrences + 1 \
         WHERE id = ?",
    )
    .bind(observed)
    .bind(pattern_id)
    .execute(pool)
    .await
    .context("failed to record classifier outcome")?;

    Ok(())
}

/// Increment a pattern's occurrence count without recording a retry
/// outcome (used for escalating/non-retryable matches, which still count
/// as an observed match but have no success/failure to record yet).
pub async fn increment_occurrences(pool: &SqlitePool, pattern_id: uuid::Uuid) -> Result<()> {
    sqlx::query("UPDATE error_patterns SET occurrences = occurrences + 1 WHERE id = ?")
        .bind(pattern_id)
        .execute(pool)
        .await
        .context("failed to increment pattern occurrences")?;

    Ok(())
}
