use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MalformedInput,
    EmptyResult,
    RowCount,
    MissingField,
    EmptyField,
    InvalidType,
    OutOfRange,
    Inconsistent,
    Duplicate,
    Ordering,
    LowCoverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataPresence {
    Empty,
    Invalid,
    Valid,
}

impl fmt::Display for DataPresence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataPresence::Empty => "empty",
            DataPresence::Invalid => "invalid",
            DataPresence::Valid => "valid",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
    pub row_index: Option<usize>,
}

impl ValidationIssue {
    pub fn new(
        field: impl Into<String>,
        kind: IssueKind,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            kind,
            severity,
            message: message.into(),
            expected: None,
            actual: None,
            row_index: None,
        }
    }

    pub fn error(field: impl Into<String>, kind: IssueKind, message: impl Into<String>) -> Self {
        Self::new(field, kind, Severity::Error, message)
    }

    pub fn warning(field: impl Into<String>, kind: IssueKind, message: impl Into<String>) -> Self {
        Self::new(field, kind, Severity::Warning, message)
    }

    pub fn info(field: impl Into<String>, kind: IssueKind, message: impl Into<String>) -> Self {
        Self::new(field, kind, Severity::Info, message)
    }

    pub fn expected(mut self, value: impl Into<Value>) -> Self {
        self.expected = Some(value.into());
        self
    }

    pub fn actual(mut self, value: impl Into<Value>) -> Self {
        self.actual = Some(value.into());
        self
    }

    pub fn at_row(mut self, index: usize) -> Self {
        self.row_index = Some(index);
        self
    }
}

/// Outcome of validating one result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub issues: Vec<ValidationIssue>,
    pub quality_score: f64,
    pub data_presence: DataPresence,
    pub row_count: usize,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            error_count: 0,
            warning_count: 0,
            info_count: 0,
            issues: Vec::new(),
            quality_score: 0.0,
            data_presence: DataPresence::Valid,
            row_count: 0,
        }
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Error => self.error_count += 1,
            Severity::Warning => self.warning_count += 1,
            Severity::Info => self.info_count += 1,
        }
        self.is_valid = self.error_count == 0;
        self.issues.push(issue);
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn has_issue_containing(&self, needle: &str) -> bool {
        self.issues.iter().any(|i| i.message.contains(needle))
    }

    /// One-line description of the issues, errors first.
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            return "no issues".to_string();
        }
        let mut messages: Vec<&ValidationIssue> = self.issues.iter().collect();
        messages.sort_by_key(|i| match i.severity {
            Severity::Error => 0,
            Severity::Warning => 1,
            Severity::Info => 2,
        });
        messages
            .iter()
            .map(|i| i.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
