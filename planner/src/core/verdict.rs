//! Evaluation verdicts: the single authoritative approval signal.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How serious an evaluator finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Info,
}

impl Severity {
    /// Critical and major findings are incompatible with approval.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Critical | Self::Major)
    }
}

/// A single finding reported by an evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub category: String,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub suggested_fix: Option<String>,
}

impl Issue {
    pub fn new(
        category: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            severity,
            description: description.into(),
            suggested_fix: None,
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

/// Structured judgment of a draft artifact.
///
/// `approved` is authoritative: the orchestrator never second-guesses it,
/// even when the issue list says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationVerdict {
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl EvaluationVerdict {
    pub fn approve() -> Self {
        Self {
            approved: true,
            issues: Vec::new(),
        }
    }

    pub fn reject(issues: Vec<Issue>) -> Self {
        Self {
            approved: false,
            issues,
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    pub fn blocking_issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|issue| issue.severity.is_blocking())
    }

    /// False when an approved verdict still lists critical or major issues.
    pub fn is_consistent(&self) -> bool {
        !self.approved || self.blocking_issues().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_verdict_without_issue_list() {
        let verdict = EvaluationVerdict::from_value(&json!({"approved": false})).expect("parse");
        assert!(!verdict.approved);
        assert!(verdict.issues.is_empty());
    }

    #[test]
    fn rejects_unknown_severity() {
        let value = json!({
            "approved": false,
            "issues": [{"category": "c", "severity": "catastrophic", "description": "d"}]
        });
        assert!(EvaluationVerdict::from_value(&value).is_err());
    }

    #[test]
    fn approved_verdict_with_major_issue_is_inconsistent() {
        let mut verdict = EvaluationVerdict::approve();
        assert!(verdict.is_consistent());

        verdict
            .issues
            .push(Issue::new("macros", Severity::Minor, "protein slightly low"));
        assert!(verdict.is_consistent());

        verdict
            .issues
            .push(Issue::new("calories", Severity::Major, "400 kcal over"));
        assert!(!verdict.is_consistent());
        assert_eq!(verdict.blocking_issues().count(), 1);
    }

    #[test]
    fn rejected_verdict_without_issues_is_consistent() {
        assert!(EvaluationVerdict::reject(Vec::new()).is_consistent());
    }
}
