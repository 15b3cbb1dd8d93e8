//! Error Classifier (component A): pattern-matches an error string against
//! the seeded/learned pattern table, recommends a retry strategy, and
//! learns success rates from observed outcomes.

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::{json, Value as Json};
use sqlx::SqlitePool;
use uuid::Uuid;

use foreman_db::models::{ErrorKind, ErrorResolution};
use foreman_db::queries::{checkpoints, error_patterns};

/// The outcome of classifying one error string.
#[derive(Debug, Clone)]
pub struct ClassifyResult {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub action: ErrorResolution,
    pub context_enrichment: Option<String>,
    pub max_retries: i32,
    /// The seeded pattern that matched, if any -- threaded through to
    /// [`record_outcome`] so learning updates the right row.
    pub matched_pattern_id: Option<Uuid>,
}

/// Classify an error string given the task's current retry posture.
///
/// Scans the seeded regex table in declared order (first match wins). On a
/// match, increments that pattern's occurrence count and returns its
/// resolution with `max_retries` fixed at 5 for `transient` errors, 3
/// otherwise. On no match, falls back to a heuristic: an error mentioning
/// "temporary", "retry", or "again" is `transient`/`retry`; anything else is
/// `unknown`/`retry_with_context`, retryable only while `retry_count <
/// max_retries`.
pub async fn classify(
    pool: &SqlitePool,
    error_text: &str,
    retry_count: i32,
    max_retries: i32,
) -> Result<ClassifyResult> {
    let patterns = error_patterns::list_patterns(pool)
        .await
        .context("failed to load error patterns for classification")?;

    for pattern in &patterns {
        let re = Regex::new(&pattern.regex)
            .with_context(|| format!("seeded pattern {:?} has an invalid regex", pattern.name))?;
        if re.is_match(error_text) {
            error_patterns::increment_occurrences(pool, pattern.id).await?;

            let action = pattern.resolution.effective_action();
            let retryable = !matches!(action, ErrorResolution::Escalate);
            let max_retries = if pattern.kind == ErrorKind::Transient { 5 } else { 3 };

            return Ok(ClassifyResult {
                kind: pattern.kind,
                retryable,
                action,
                context_enrichment: pattern.context_enrichment.clone(),
                max_retries,
                matched_pattern_id: Some(pattern.id),
            });
        }
    }

    let heuristic = Regex::new(r"(?i)temporary|retry|again").expect("static regex is valid");
    let (kind, action) = if heuristic.is_match(error_text) {
        (ErrorKind::Transient, ErrorResolution::Retry)
    } else {
        (ErrorKind::Unknown, ErrorResolution::RetryWithContext)
    };

    Ok(ClassifyResult {
        kind,
        retryable: retry_count < max_retries,
        action,
        context_enrichment: Some(format!(
            "Previous attempt failed with: {}",
            truncate_chars(error_text, 200)
        )),
        max_retries,
        matched_pattern_id: None,
    })
}

/// Persist a retry outcome: updates the matched pattern's running
/// success-rate mean (no-op if nothing matched) and appends a checkpoint
/// row recording the observation for audit purposes. `matched_pattern_id`
/// is threaded through explicitly (rather than a full [`ClassifyResult`])
/// so a later successful completion can report a retried task's eventual
/// success against the pattern that was blamed for its earlier failure.
pub async fn record_outcome(
    pool: &SqlitePool,
    matched_pattern_id: Option<Uuid>,
    task_id: Uuid,
    error_text: &str,
    success: bool,
) -> Result<()> {
    if let Some(pattern_id) = matched_pattern_id {
        error_patterns::record_outcome(pool, pattern_id, success).await?;
    }

    checkpoints::record(
        pool,
        task_id,
        "classifier_outcome",
        &json!({
            "error": error_text,
            "success": success,
            "pattern_id": matched_pattern_id,
        }),
    )
    .await
}

/// Build the enriched input bag for a retry-with-context: appends the
/// enrichment text to `context`, appends the failing error message to
/// `previous_errors[]`, sets `retry_hint` when `action` is
/// `retry_with_context`, and records `matched_pattern_id` under
/// `retry_pattern_id` so [`retry_pattern_id`] can read it back once the
/// retried attempt finishes.
pub fn enrich_input(
    input_data: &Json,
    enrichment: &str,
    previous_error: &str,
    action: ErrorResolution,
    matched_pattern_id: Option<Uuid>,
) -> Json {
    let mut data = match input_data {
        Json::Object(_) => input_data.clone(),
        _ => json!({}),
    };
    let obj = data.as_object_mut().expect("just ensured this is an object");

    let old_context = obj.get("context").and_then(|v| v.as_str()).unwrap_or("");
    obj.insert("context".to_string(), json!(format!("{old_context}\n\n{enrichment}")));

    let mut previous_errors: Vec<Json> = obj
        .get("previous_errors")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    previous_errors.push(json!(previous_error));
    obj.insert("previous_errors".to_string(), Json::Array(previous_errors));

    if action == ErrorResolution::RetryWithContext {
        obj.insert("retry_hint".to_string(), json!(enrichment));
    }

    match matched_pattern_id {
        Some(id) => {
            obj.insert("retry_pattern_id".to_string(), json!(id));
        }
        None => {
            obj.remove("retry_pattern_id");
        }
    }

    data
}

/// Read back the pattern id a previous [`enrich_input`] call recorded
/// under `retry_pattern_id`, if any.
pub fn retry_pattern_id(input_data: &Json) -> Option<Uuid> {
    input_data
        .get("retry_pattern_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
