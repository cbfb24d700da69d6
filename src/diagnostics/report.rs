//! Per-subject diagnostic reports.

use super::models::{DiagnosticReport, QueryDiagnostic};
use crate::config::DiagnosticsConfig;
use crate::query::{NamedQuery, QueryExecutor, SchemaAdapter};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info};

/// Runs every catalog query for one subject and rolls the outcomes into a
/// `DiagnosticReport`. Failures become diagnostics, never errors.
#[derive(Clone)]
pub struct DiagnosticReportBuilder {
    executor: Arc<QueryExecutor>,
    adapter: Arc<dyn SchemaAdapter>,
    config: DiagnosticsConfig,
}

impl DiagnosticReportBuilder {
    pub fn new(
        executor: Arc<QueryExecutor>,
        adapter: Arc<dyn SchemaAdapter>,
        config: DiagnosticsConfig,
    ) -> Self {
        Self {
            executor,
            adapter,
            config,
        }
    }

    pub fn executor(&self) -> &Arc<QueryExecutor> {
        &self.executor
    }

    pub fn query_ids(&self) -> Vec<String> {
        self.adapter.queries().into_iter().map(|q| q.id).collect()
    }

    pub async fn build_diagnostic_report(&self, subject_id: i64) -> DiagnosticReport {
        let started = Instant::now();
        let queries = self.adapter.queries();
        let slots = Arc::new(Semaphore::new(
            self.config.max_concurrent_queries_per_subject.max(1),
        ));

        let runs = queries.iter().map(|query| {
            let slots = Arc::clone(&slots);
            async move {
                // The semaphore lives for this call only and is never closed.
                let _permit = slots.acquire().await.ok();
                self.diagnose_query(query, subject_id).await
            }
        });
        let diagnostics = join_all(runs).await;

        let recommendations = self.recommendations(&diagnostics);
        let report = DiagnosticReport::from_diagnostics(subject_id, diagnostics, recommendations);

        info!(
            subject_id,
            total = report.total_queries,
            failed = report.failed_queries,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Diagnostic report built"
        );
        report
    }

    async fn diagnose_query(&self, query: &NamedQuery, subject_id: i64) -> QueryDiagnostic {
        let started = Instant::now();
        let result = self.executor.execute_query(query, subject_id).await;
        let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(outcome) => {
                let validation = match outcome.validation {
                    Some(validation) => validation,
                    None => self.executor.validator().validate(query, &outcome.rows),
                };
                debug!(
                    subject_id,
                    query_id = %query.id,
                    rows = outcome.rows.len(),
                    from_cache = outcome.from_cache,
                    "Query diagnosed"
                );
                QueryDiagnostic {
                    query_id: query.id.clone(),
                    execution_time_ms,
                    success: true,
                    row_count: outcome.rows.len(),
                    error: None,
                    error_kind: None,
                    quality_score: Some(validation.quality_score),
                    validation_issues: validation.issues,
                    from_cache: outcome.from_cache,
                    attempts: outcome.attempts,
                }
            }
            Err(err) => QueryDiagnostic::from_execution_error(&err, execution_time_ms),
        }
    }

    fn recommendations(&self, diagnostics: &[QueryDiagnostic]) -> Vec<String> {
        recommend(diagnostics, &self.config)
    }
}

/// Rule-based advice for one subject's diagnostics.
pub fn recommend(diagnostics: &[QueryDiagnostic], config: &DiagnosticsConfig) -> Vec<String> {
    let slow_ms = config.slow_query_threshold_ms as f64;
    let mut recommendations = Vec::new();

    for d in diagnostics {
        if !d.success {
            let kind = d
                .error_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            recommendations.push(format!(
                "Fix connectivity for {}: query failed with {}",
                d.query_id, kind
            ));
            continue;
        }
        if d.row_count == 0 {
            recommendations.push(format!(
                "Investigate missing data for {}: query returned no rows",
                d.query_id
            ));
        }
        if let Some(score) = d.quality_score {
            if score < config.low_quality_threshold {
                recommendations.push(format!(
                    "Review data quality for {}: quality score {:.2}",
                    d.query_id, score
                ));
            }
        }
        if d.execution_time_ms > slow_ms {
            recommendations.push(format!(
                "Optimize performance for {}: took {:.2}s",
                d.query_id,
                d.execution_time_ms / 1000.0
            ));
        }
    }

    if recommendations.is_empty() {
        recommendations.push("All queries executed successfully with good data quality".to_string());
    }
    recommendations
}
