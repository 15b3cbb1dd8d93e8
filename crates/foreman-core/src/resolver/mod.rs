//! Approval Resolver (component B): scores a task's output for
//! auto-approval eligibility. Pure function of `(task_type, output)`; no
//! side effects, no persistence.

use regex::Regex;
use serde::{Deserialize, Serialize};

use foreman_db::models::TaskType;

/// Risk level assigned to a task's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Low,
    Medium,
    High,
    Critical,
}

/// One named check run against the output, with its own 0-100 score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub score: i32,
    pub details: String,
}

/// The result of assessing a task's output.
/// Transient -- never persisted, computed fresh on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub score: i32,
    pub risk: Risk,
    pub can_auto_approve: bool,
    pub reasons: Vec<String>,
    pub checks: Vec<Check>,
}

const DANGEROUS_VERBS: &[&str] = &["delete production", "drop database", "rm -rf"];
const SECRET_MUTATION_PHRASES: &[&str] = &["rotate secret", "update credentials", "change password"];

/// Score an output string for a task of the given type.
///
/// `output` is `None` when the task produced nothing (e.g. a pre-execution
/// gate being swept before the task has run).
pub fn assess(task_type: TaskType, output: Option<&str>) -> QualityAssessment {
    let mut reasons = Vec::new();

    let completeness = completeness_check(output);
    if !completeness.passed {
        reasons.push(completeness.details.clone());
    }

    // No output is an immediate critical refusal; nothing else to check.
    let Some(output) = output else {
        return QualityAssessment {
            score: completeness.score,
            risk: Risk::Critical,
            can_auto_approve: false,
            reasons,
            checks: vec![completeness],
        };
    };

    let type_checks = type_specific_checks(task_type, output);
    for check in &type_checks {
        if !check.passed {
            reasons.push(check.details.clone());
        }
    }

    let mut checks = vec![completeness];
    checks.extend(type_checks);

    let score = mean_score(&checks);
    let risk = assess_risk(task_type, output);

    let minimum = match risk {
        Risk::Critical => None,
        Risk::High => Some(90),
        Risk::Medium => Some(80),
        Risk::Low => Some(70),
    };

    let can_auto_approve = match minimum {
        None => false,
        Some(threshold) => score >= threshold,
    };

    if matches!(risk, Risk::Critical) {
        reasons.push("risk is critical; auto-approval is never permitted".to_string());
    } else if !can_auto_approve {
        reasons.push(format!(
            "score {score} is below the {risk:?} risk threshold of {}",
            minimum.unwrap_or(0)
        ));
    }

    QualityAssessment {
        score,
        risk,
        can_auto_approve,
        reasons,
        checks,
    }
}

fn completeness_check(output: Option<&str>) -> Check {
    let Some(output) = output else {
        return Check {
            name: "completeness".to_string(),
            passed: false,
            score: 0,
            details: "No output produced".to_string(),
        };
    };

    let failure_pattern = Regex::new(r"(?i)error|failed|exception|cannot|unable").expect("static regex is valid");

    let (score, details) = if output.len() < 50 {
        (20, "Output is suspiciously short".to_string())
    } else if failure_pattern.is_match(output) {
        (40, "Output mentions a failure keyword".to_string())
    } else {
        (100, "Output looks complete".to_string())
    };

    Check {
        name: "completeness".to_string(),
        passed: score == 100,
        score,
        details,
    }
}

fn type_specific_checks(task_type: TaskType, output: &str) -> Vec<Check> {
    match task_type {
        TaskType::CodeGeneration | TaskType::Refactoring | TaskType::BugFix => {
            vec![
                has_fenced_code_block(output),
                no_placeholder_markers(output),
                no_hardcoded_secrets(output),
            ]
        }
        TaskType::Testing => vec![has_test_structure(output), has_assertions(output)],
        TaskType::SecurityAudit => vec![mentions_vulnerability(output), mentions_recommendation(output)],
        TaskType::Documentation => vec![has_markdown_headers(output), has_examples(output)],
        _ => vec![Check {
            name: "generic".to_string(),
            passed: true,
            score: 80,
            details: "No type-specific checks apply".to_string(),
        }],
    }
}

fn has_fenced_code_block(output: &str) -> Check {
    let passed = output.contains("```");
    Check {
        name: "has_fenced_code_block".to_string(),
        passed,
        score: if passed { 100 } else { 30 },
        details: if passed {
            "output contains a fenced code block".to_string()
        } else {
            "output has no fenced code block".to_string()
        },
    }
}

fn no_placeholder_markers(output: &str) -> Check {
    let re = Regex::new(r"TODO|FIXME|HACK|XXX").expect("static regex is valid");
    let passed = !re.is_match(output);
    Check {
        name: "no_placeholder_markers".to_string(),
        passed,
        score: if passed { 100 } else { 60 },
        details: if passed {
            "no TODO/FIXME/HACK/XXX markers found".to_string()
        } else {
            "output contains a TODO/FIXME/HACK/XXX marker".to_string()
        },
    }
}

fn no_hardcoded_secrets(output: &str) -> Check {
    let re = Regex::new(r#"(?i)(api[_-]?key|secret|password)\s*[:=]\s*['"][^'"]{6,}['"]"#)
        .expect("static regex is valid");
    let passed = !re.is_match(output);
    Check {
        name: "no_hardcoded_secrets".to_string(),
        passed,
        score: if passed { 100 } else { 0 },
        details: if passed {
            "no hard-coded secret patterns found".to_string()
        } else {
            "output appears to contain a hard-coded secret".to_string()
        },
    }
}

fn has_test_structure(output: &str) -> Check {
    let re = Regex::new(r"describe\(|it\(|test\(|expect|assert").expect("static regex is valid");
    let passed = re.is_match(output);
    Check {
        name: "has_test_structure".to_string(),
        passed,
        score: if passed { 100 } else { 40 },
        details: if passed {
            "output has test structural keywords".to_string()
        } else {
            "output has no test structural keywords".to_string()
        },
    }
}

fn has_assertions(output: &str) -> Check {
    let re = Regex::new(r"assert|expect\(").expect("static regex is valid");
    let passed = re.is_match(output);
    Check {
        name: "has_assertions".to_string(),
        passed,
        score: if passed { 100 } else { 30 },
        details: if passed {
            "output contains assertions".to_string()
        } else {
            "output has no assertions".to_string()
        },
    }
}

fn mentions_vulnerability(output: &str) -> Check {
    let re = Regex::new(r"(?i)vulnerability|CVE|risk|severity").expect("static regex is valid");
    let passed = re.is_match(output);
    Check {
        name: "mentions_vulnerability".to_string(),
        passed,
        score: if passed { 100 } else { 50 },
        details: if passed {
            "output discusses vulnerability/risk/severity".to_string()
        } else {
            "output does not mention vulnerability/risk/severity".to_string()
        },
    }
}

fn mentions_recommendation(output: &str) -> Check {
    let re = Regex::new(r"(?i)recommend|should|must|mitigate|patch|fix").expect("static regex is valid");
    let passed = re.is_match(output);
    Check {
        name: "mentions_recommendation".to_string(),
        passed,
        score: if passed { 100 } else { 60 },
        details: if passed {
            "output includes a recommendation".to_string()
        } else {
            "output has no actionable recommendation".to_string()
        },
    }
}

fn has_markdown_headers(output: &str) -> Check {
    let re = Regex::new(r"(?m)^#{1,6}\s").expect("static regex is valid");
    let passed = re.is_match(output);
    Check {
        name: "has_markdown_headers".to_string(),
        passed,
        score: if passed { 100 } else { 50 },
        details: if passed {
            "output has markdown headers".to_string()
        } else {
            "output has no markdown headers".to_string()
        },
    }
}

fn has_examples(output: &str) -> Check {
    let passed = output.contains("```") || output.to_lowercase().contains("example");
    Check {
        name: "has_examples".to_string(),
        passed,
        score: if passed { 100 } else { 70 },
        details: if passed {
            "output includes examples or code fences".to_string()
        } else {
            "output has no examples or code fences".to_string()
        },
    }
}

fn assess_risk(task_type: TaskType, output: &str) -> Risk {
    let lower = output.to_lowercase();

    if DANGEROUS_VERBS.iter().any(|v| lower.contains(v)) {
        return Risk::Critical;
    }
    if matches!(task_type, TaskType::Deployment | TaskType::SecurityAudit) {
        return Risk::High;
    }
    if SECRET_MUTATION_PHRASES.iter().any(|p| lower.contains(p)) {
        return Risk::High;
    }
    if matches!(task_type, TaskType::CodeGeneration | TaskType::Refactoring) {
        return Risk::Medium;
    }
    Risk::Low
}

fn mean_score(checks: &[Check]) -> i32 {
    if checks.is_empty() {
        return 50;
    }
    let sum: i32 = checks.iter().map(|c| c.score).sum();
    sum / checks.len() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_output_is_critical_and_never_approved() {
        let assessment = assess(TaskType::CodeGeneration, None);
        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.risk, Risk::Critical);
        assert!(!assessment.can_auto_approve);
        assert!(assessment.reasons.iter().any(|r| r.contains("No output produced")));
    }

    #[test]
    fn happy_path_code_generation_auto_approves() {
        let output = "Here is the code:\n```js\nconsole.log('hi')\n```\n(well-formed, no placeholders, no secrets, reasonably long text to pass completeness)";
        let assessment = assess(TaskType::CodeGeneration, Some(output));
        assert_eq!(assessment.risk, Risk::Medium);
        assert!(assessment.score >= 80);
        assert!(assessment.can_auto_approve);
    }

    #[test]
    fn placeholder_marker_lowers_score() {
        let output = "```js\n// TODO: finish this\nconsole.log('hi')\n```\nSome explanation padding to pass length check comfortably.";
        let assessment = assess(TaskType::CodeGeneration, Some(output));
        assert!(assessment.reasons.iter().any(|r| r.contains("TODO")));
    }

    #[test]
    fn hardcoded_secret_zeroes_that_check() {
        let output = "```js\nconst apiKey = \"sk-aaaaaaaaaaaaaaaa\";\n```\nSome padding text to pass the length check.";
        let assessment = assess(TaskType::CodeGeneration, Some(output));
        let secret_check = assessment.checks.iter().find(|c| c.name == "no_hardcoded_secrets").unwrap();
        assert_eq!(secret_check.score, 0);
        assert!(!secret_check.passed);
    }

    #[test]
    fn deployment_tasks_are_high_risk() {
        let output = "Deployment completed successfully to staging with the usual rollback plan in place.";
        let assessment = assess(TaskType::Deployment, Some(output));
        assert_eq!(assessment.risk, Risk::High);
    }

    #[test]
    fn dangerous_verb_is_always_critical() {
        let output = "I ran rm -rf /var/lib/data to clean up, here's a long explanation of the cleanup process.";
        let assessment = assess(TaskType::Documentation, Some(output));
        assert_eq!(assessment.risk, Risk::Critical);
        assert!(!assessment.can_auto_approve);
    }

    #[test]
    fn testing_task_checks_structure_and_assertions() {
        let output = "describe('adds', () => { it('works', () => { expect(1+1).toBe(2) }) }) -- long enough text.";
        let assessment = assess(TaskType::Testing, Some(output));
        assert!(assessment.checks.iter().all(|c| c.passed));
    }

    #[test]
    fn documentation_task_checks_headers_and_examples() {
        let output = "# Usage\n\nHere is an example:\n```\nfoo()\n```\nAdditional padding text for completeness length.";
        let assessment = assess(TaskType::Documentation, Some(output));
        assert!(assessment.checks.iter().all(|c| c.passed));
    }

    #[test]
    fn security_audit_task_checks_vulnerability_and_recommendation() {
        let output = "We found a high severity vulnerability (CVE-2024-0001). We recommend patching immediately.";
        let assessment = assess(TaskType::SecurityAudit, Some(output));
        assert_eq!(assessment.risk, Risk::High);
        assert!(assessment.checks.iter().all(|c| c.passed));
    }

    #[test]
    fn empty_checks_defaults_to_fifty() {
        assert_eq!(mean_score(&[]), 50);
    }

    #[test]
    fn short_output_fails_completeness() {
        let assessment = assess(TaskType::TechDecision, Some("too short"));
        let completeness = &assessment.checks[0];
        assert_eq!(completeness.score, 20);
    }
}
