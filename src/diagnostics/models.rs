use crate::query::{ErrorKind, ExecutionError};
use crate::validation::ValidationIssue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of one query for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDiagnostic {
    pub query_id: String,
    pub execution_time_ms: f64,
    pub success: bool,
    pub row_count: usize,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub quality_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_issues: Vec<ValidationIssue>,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default)]
    pub attempts: u32,
}

impl QueryDiagnostic {
    pub fn failure(
        query_id: impl Into<String>,
        execution_time_ms: f64,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            execution_time_ms,
            success: false,
            row_count: 0,
            error: Some(message.into()),
            error_kind: Some(kind),
            quality_score: None,
            validation_issues: Vec::new(),
            from_cache: false,
            attempts: 0,
        }
    }

    /// Failure record for a terminal executor error. Data-quality failures
    /// keep the issues and score that caused them.
    pub fn from_execution_error(err: &ExecutionError, execution_time_ms: f64) -> Self {
        let mut diagnostic = Self::failure(
            err.query_id.clone(),
            execution_time_ms,
            err.kind(),
            err.error.to_string(),
        );
        diagnostic.attempts = err.attempts;
        if let Some(validation) = err.error.validation_result() {
            diagnostic.row_count = validation.row_count;
            diagnostic.quality_score = Some(validation.quality_score);
            diagnostic.validation_issues = validation.issues.clone();
        }
        diagnostic
    }

    pub fn has_data(&self) -> bool {
        self.success && self.row_count > 0
    }
}

/// Per-subject roll-up of every query diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub subject_id: i64,
    pub total_queries: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub total_execution_time_ms: f64,
    pub data_availability: BTreeMap<String, bool>,
    pub diagnostics: Vec<QueryDiagnostic>,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl DiagnosticReport {
    /// Assemble a report from finished diagnostics. Counters are derived here
    /// so they always agree with the list.
    pub fn from_diagnostics(
        subject_id: i64,
        diagnostics: Vec<QueryDiagnostic>,
        recommendations: Vec<String>,
    ) -> Self {
        let successful_queries = diagnostics.iter().filter(|d| d.success).count();
        let data_availability = diagnostics
            .iter()
            .map(|d| (d.query_id.clone(), d.has_data()))
            .collect();
        Self {
            subject_id,
            total_queries: diagnostics.len(),
            successful_queries,
            failed_queries: diagnostics.len() - successful_queries,
            total_execution_time_ms: diagnostics.iter().map(|d| d.execution_time_ms).sum(),
            data_availability,
            diagnostics,
            recommendations,
            generated_at: Utc::now(),
        }
    }

    /// Stand-in for a subject whose diagnostic run never finished: every
    /// query is recorded as failed with the same error.
    pub fn synthetic_failure<I, S>(subject_id: i64, query_ids: I, kind: ErrorKind, message: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let diagnostics: Vec<QueryDiagnostic> = query_ids
            .into_iter()
            .map(|id| QueryDiagnostic::failure(id, 0.0, kind, message))
            .collect();
        let recommendation = format!("Diagnostic run for subject {subject_id} did not complete: {message}");
        Self::from_diagnostics(subject_id, diagnostics, vec![recommendation])
    }

    pub fn diagnostic(&self, query_id: &str) -> Option<&QueryDiagnostic> {
        self.diagnostics.iter().find(|d| d.query_id == query_id)
    }

    pub fn is_successful(&self) -> bool {
        self.failed_queries == 0
    }
}
