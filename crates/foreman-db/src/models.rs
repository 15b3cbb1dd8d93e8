use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Runtime status of a task as it moves through the execution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    WaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are sticky except via an explicit re-queue path.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::WaitingApproval => "waiting_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "waiting_approval" => Ok(Self::WaitingApproval),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid task status: {0:?}")]
pub struct TaskStatusParseError(pub String);

// ---------------------------------------------------------------------------

/// Per-task policy governing whether approval gates surround execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    Auto,
    Supervised,
    ApprovalGates,
}

impl AutonomyLevel {
    /// `approval_required` is derived from the autonomy level: only `auto`
    /// tasks skip gating entirely.
    pub fn approval_required(self) -> bool {
        !matches!(self, Self::Auto)
    }
}

impl fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Supervised => "supervised",
            Self::ApprovalGates => "approval_gates",
        };
        f.write_str(s)
    }
}

impl FromStr for AutonomyLevel {
    type Err = AutonomyLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "supervised" => Ok(Self::Supervised),
            "approval_gates" => Ok(Self::ApprovalGates),
            other => Err(AutonomyLevelParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid autonomy level: {0:?}")]
pub struct AutonomyLevelParseError(pub String);

// ---------------------------------------------------------------------------

/// The kind of work a task represents. Drives the Approval Resolver's
/// type-specific output checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CodeGeneration,
    Testing,
    SecurityAudit,
    Deployment,
    Refactoring,
    BugFix,
    Documentation,
    Decomposition,
    CodeReview,
    TechDecision,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CodeGeneration => "code_generation",
            Self::Testing => "testing",
            Self::SecurityAudit => "security_audit",
            Self::Deployment => "deployment",
            Self::Refactoring => "refactoring",
            Self::BugFix => "bug_fix",
            Self::Documentation => "documentation",
            Self::Decomposition => "decomposition",
            Self::CodeReview => "code_review",
            Self::TechDecision => "tech_decision",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskType {
    type Err = TaskTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code_generation" => Ok(Self::CodeGeneration),
            "testing" => Ok(Self::Testing),
            "security_audit" => Ok(Self::SecurityAudit),
            "deployment" => Ok(Self::Deployment),
            "refactoring" => Ok(Self::Refactoring),
            "bug_fix" => Ok(Self::BugFix),
            "documentation" => Ok(Self::Documentation),
            "decomposition" => Ok(Self::Decomposition),
            "code_review" => Ok(Self::CodeReview),
            "tech_decision" => Ok(Self::TechDecision),
            other => Err(TaskTypeParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid task type: {0:?}")]
pub struct TaskTypeParseError(pub String);

// ---------------------------------------------------------------------------

/// The kind of checkpoint an approval gate represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    Manual,
    Review,
    Automatic,
    Compliance,
}

impl fmt::Display for GateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::Review => "review",
            Self::Automatic => "automatic",
            Self::Compliance => "compliance",
        };
        f.write_str(s)
    }
}

impl FromStr for GateType {
    type Err = GateTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "review" => Ok(Self::Review),
            "automatic" => Ok(Self::Automatic),
            "compliance" => Ok(Self::Compliance),
            other => Err(GateTypeParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid gate type: {0:?}")]
pub struct GateTypeParseError(pub String);

// ---------------------------------------------------------------------------

/// Resolution status of an approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl FromStr for GateStatus {
    type Err = GateStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(GateStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid gate status: {0:?}")]
pub struct GateStatusParseError(pub String);

// ---------------------------------------------------------------------------

/// Classification kind assigned to a failed task's error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Fixable,
    Structural,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Fixable => "fixable",
            Self::Structural => "structural",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for ErrorKind {
    type Err = ErrorKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "fixable" => Ok(Self::Fixable),
            "structural" => Ok(Self::Structural),
            "unknown" => Ok(Self::Unknown),
            other => Err(ErrorKindParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid error kind: {0:?}")]
pub struct ErrorKindParseError(pub String);

// ---------------------------------------------------------------------------

/// The resolution a seeded error pattern recommends on match.
///
/// `DifferentAgent` is carried for fidelity with the pattern table's
/// original vocabulary but is never distinguished from `RetryWithContext`
/// in [`crate::models::ErrorResolution::effective_action`] -- see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorResolution {
    Retry,
    RetryWithContext,
    Escalate,
    DifferentAgent,
}

impl ErrorResolution {
    /// Collapse to the action the classifier actually hands back to the
    /// queue engine.
    pub fn effective_action(self) -> ErrorResolution {
        match self {
            Self::DifferentAgent => Self::RetryWithContext,
            other => other,
        }
    }
}

impl fmt::Display for ErrorResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Retry => "retry",
            Self::RetryWithContext => "retry_with_context",
            Self::Escalate => "escalate",
            Self::DifferentAgent => "different_agent",
        };
        f.write_str(s)
    }
}

impl FromStr for ErrorResolution {
    type Err = ErrorResolutionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(Self::Retry),
            "retry_with_context" => Ok(Self::RetryWithContext),
            "escalate" => Ok(Self::Escalate),
            "different_agent" => Ok(Self::DifferentAgent),
            other => Err(ErrorResolutionParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid error resolution: {0:?}")]
pub struct ErrorResolutionParseError(pub String);

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A unit of LLM work, the row stored in `task_queue`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub project_id: String,
    pub roadmap_id: Option<String>,
    pub parent_task_id: Option<Uuid>,
    pub priority: i32,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub agent_persona: String,
    pub autonomy_level: AutonomyLevel,
    pub approval_required: bool,
    pub status: TaskStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub estimated_duration_s: Option<i64>,
    pub actual_duration_s: Option<i64>,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub approval_checkpoint: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A pause point blocking a task from progressing until a decision is
/// recorded, the row stored in `approval_gates`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApprovalGate {
    pub id: Uuid,
    pub task_id: Uuid,
    pub gate_type: GateType,
    pub title: String,
    pub description: Option<String>,
    pub review_data: Option<serde_json::Value>,
    pub status: GateStatus,
    pub approver: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A directed "blocks" edge: `task_id` cannot dispatch until `depends_on`
/// reaches `completed`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskDependency {
    pub task_id: Uuid,
    pub depends_on: Uuid,
}

/// A seeded or learned error-matching rule, the row stored in
/// `error_patterns`. Unlike the in-process table described in spec, this
/// port persists the table so occurrence counts and learned success rates
/// survive process restarts.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ErrorPattern {
    pub id: Uuid,
    pub name: String,
    pub regex: String,
    pub kind: ErrorKind,
    pub resolution: ErrorResolution,
    pub context_enrichment: Option<String>,
    pub occurrences: i64,
    pub success_rate: f64,
    pub created_at: DateTime<Utc>,
}

/// One row per task attempt, recording how long the attempt ran and how
/// it ended. Stored in `task_execution_metrics`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskExecutionMetric {
    pub id: i64,
    pub task_id: Uuid,
    pub attempt: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub actual_duration_s: Option<i64>,
    pub outcome: Option<String>,
}

/// An append-only log entry describing a state transition or context
/// enrichment applied to a task. Stored in `task_checkpoints`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskCheckpoint {
    pub id: i64,
    pub task_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Pending,
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::WaitingApproval,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        assert!("nope".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_status_is_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::WaitingApproval.is_terminal());
    }

    #[test]
    fn autonomy_level_display_roundtrip() {
        let variants = [
            AutonomyLevel::Auto,
            AutonomyLevel::Supervised,
            AutonomyLevel::ApprovalGates,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: AutonomyLevel = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn autonomy_level_approval_required() {
        assert!(!AutonomyLevel::Auto.approval_required());
        assert!(AutonomyLevel::Supervised.approval_required());
        assert!(AutonomyLevel::ApprovalGates.approval_required());
    }

    #[test]
    fn task_type_display_roundtrip() {
        let variants = [
            TaskType::CodeGeneration,
            TaskType::Testing,
            TaskType::SecurityAudit,
            TaskType::Deployment,
            TaskType::Refactoring,
            TaskType::BugFix,
            TaskType::Documentation,
            TaskType::Decomposition,
            TaskType::CodeReview,
            TaskType::TechDecision,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskType = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn gate_type_display_roundtrip() {
        let variants = [
            GateType::Manual,
            GateType::Review,
            GateType::Automatic,
            GateType::Compliance,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: GateType = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn gate_status_display_roundtrip() {
        let variants = [GateStatus::Pending, GateStatus::Approved, GateStatus::Rejected];
        for v in &variants {
            let s = v.to_string();
            let parsed: GateStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn error_kind_display_roundtrip() {
        let variants = [
            ErrorKind::Transient,
            ErrorKind::Fixable,
            ErrorKind::Structural,
            ErrorKind::Unknown,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: ErrorKind = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn error_resolution_display_roundtrip() {
        let variants = [
            ErrorResolution::Retry,
            ErrorResolution::RetryWithContext,
            ErrorResolution::Escalate,
            ErrorResolution::DifferentAgent,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: ErrorResolution = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn different_agent_collapses_to_retry_with_context() {
        assert_eq!(
            ErrorResolution::DifferentAgent.effective_action(),
            ErrorResolution::RetryWithContext
        );
        assert_eq!(ErrorResolution::Retry.effective_action(), ErrorResolution::Retry);
    }
}
