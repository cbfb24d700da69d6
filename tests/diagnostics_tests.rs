//! Report building, bulk analysis, pattern detection and health scoring over
//! a scripted backend.

mod test_helpers;

use query_diagnostics::config::{BulkConfig, DiagnosticsConfig, PatternConfig};
use query_diagnostics::diagnostics::bulk::aggregate;
use query_diagnostics::diagnostics::health::summarize;
use query_diagnostics::diagnostics::{
    DiagnosticReport, DiagnosticReportBuilder, HealthDashboard, Pattern, PatternDetector, PatternSeverity, PatternType,
    QueryDiagnostic,
};
use query_diagnostics::query::{ErrorKind, QueryError};
use std::sync::Arc;
use std::time::Duration;
use test_helpers::*;
use tokio::time::Instant;

fn bulk_config() -> BulkConfig {
    BulkConfig {
        workers: 4,
        sample_size: 10,
        default_range_start: 1,
        default_range_end: 10,
        overall_timeout_seconds: 300,
        max_unsampled_subjects: 1_000,
    }
}

/// Categories fail with a connection error for subjects 1 through 6.
fn six_of_ten_failing() -> ScriptedBackend {
    ScriptedBackend::new(|text, subject| match text {
        CATEGORIES if subject <= 6 => Step::Fail(QueryError::connection("connection refused")),
        other => healthy_step(other),
    })
}

#[tokio::test]
async fn test_healthy_subject_report() {
    let backend = Arc::new(ScriptedBackend::healthy());
    let builder = report_builder(backend, false);

    let report = builder.build_diagnostic_report(42).await;

    assert_eq!(report.subject_id, 42);
    assert_eq!(report.total_queries, 3);
    assert_eq!(report.successful_queries, 3);
    assert_eq!(report.failed_queries, 0);
    assert!(report.data_availability.values().all(|has_data| *has_data));
    assert_eq!(report.recommendations.len(), 1);
    assert!(report.recommendations[0].starts_with("All queries executed successfully"));

    let summary = report.diagnostic(SUMMARY).unwrap();
    assert!(summary.quality_score.unwrap() > 0.8);
    assert_eq!(summary.row_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failures_become_diagnostics() {
    let backend = Arc::new(six_of_ten_failing());
    let builder = report_builder(backend, false);

    let report = builder.build_diagnostic_report(2).await;

    assert_eq!(report.total_queries, 3);
    assert_eq!(report.failed_queries, 1);
    assert_eq!(report.successful_queries + report.failed_queries, report.total_queries);

    let failed = report.diagnostic(CATEGORIES).unwrap();
    assert!(!failed.success);
    assert_eq!(failed.error_kind, Some(ErrorKind::ConnectionError));
    assert_eq!(failed.attempts, 4);
    assert!(!report.data_availability[CATEGORIES]);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.starts_with("Fix connectivity for category_preferences")));
}

#[tokio::test]
async fn test_empty_optional_result_is_missing_data_not_failure() {
    let backend = Arc::new(ScriptedBackend::new(|text, _| match text {
        CATEGORIES => Step::Rows(Vec::new()),
        other => healthy_step(other),
    }));
    let report = report_builder(backend, false).build_diagnostic_report(3).await;

    let categories = report.diagnostic(CATEGORIES).unwrap();
    assert!(categories.success);
    assert_eq!(categories.row_count, 0);
    assert!(!report.data_availability[CATEGORIES]);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.starts_with("Investigate missing data for category_preferences")));
}

#[tokio::test]
async fn test_invalid_subject_report_has_no_store_calls() {
    let backend = Arc::new(ScriptedBackend::healthy());
    let report = report_builder(backend.clone(), true)
        .build_diagnostic_report(0)
        .await;

    assert_eq!(report.failed_queries, 3);
    assert!(report
        .diagnostics
        .iter()
        .all(|d| d.error_kind == Some(ErrorKind::ValidationError)));
    assert_eq!(backend.total_calls(), 0);
}

fn slow_backend() -> Arc<ScriptedBackend> {
    let backend = Arc::new(ScriptedBackend::healthy());
    for query in [SUMMARY, CATEGORIES, TIMELINE] {
        backend.set_latency(query, Duration::from_millis(100));
    }
    backend
}

#[tokio::test(start_paused = true)]
async fn test_per_subject_limit_serializes_queries() {
    let serial = DiagnosticReportBuilder::new(
        executor_with(slow_backend(), fast_executor_config(), false),
        Arc::new(test_catalog()),
        DiagnosticsConfig {
            max_concurrent_queries_per_subject: 1,
            ..DiagnosticsConfig::default()
        },
    );
    let started = Instant::now();
    let report = serial.build_diagnostic_report(7).await;
    assert_eq!(report.successful_queries, 3);
    assert!(started.elapsed() >= Duration::from_millis(300));

    let concurrent = report_builder(slow_backend(), false);
    let started = Instant::now();
    let report = concurrent.build_diagnostic_report(7).await;
    assert_eq!(report.successful_queries, 3);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn test_report_building_is_idempotent_without_cache() {
    let backend = Arc::new(ScriptedBackend::healthy());
    let builder = report_builder(backend.clone(), false);

    let first = builder.build_diagnostic_report(5).await;
    let second = builder.build_diagnostic_report(5).await;

    assert_eq!(first.total_queries, second.total_queries);
    assert_eq!(first.successful_queries, second.successful_queries);
    assert_eq!(backend.total_calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_analysis_aggregates_failures() {
    let backend = Arc::new(six_of_ten_failing());
    let analyzer = bulk_analyzer(backend, bulk_config());

    let result = analyzer.run_bulk_analysis(1, 10, None, true).await;

    assert_eq!(result.total_subjects, 10);
    assert_eq!(result.analyzed_subjects, 10);
    assert_eq!(result.successful_subjects, 4);
    assert_eq!(result.failed_subjects, 6);
    assert_eq!(result.failure_patterns["category_preferences:ConnectionError"], 6);
    assert!((result.query_success_rates[CATEGORIES] - 0.4).abs() < 1e-9);
    assert!((result.query_success_rates[SUMMARY] - 1.0).abs() < 1e-9);
    assert!((result.query_availability_rates[TIMELINE] - 1.0).abs() < 1e-9);
    assert_eq!(result.timing_stats[CATEGORIES].count, 4);

    for (query_id, tally) in &result.query_tallies {
        let failures: usize = result
            .failure_patterns
            .iter()
            .filter(|(key, _)| key.starts_with(&format!("{query_id}:")))
            .map(|(_, count)| *count)
            .sum();
        assert_eq!(failures, tally.attempts - tally.successes);
    }

    assert!(result
        .recommendations
        .iter()
        .any(|r| r.starts_with("CRITICAL: category_preferences succeeds for only 40.0%")));
    assert!(result
        .recommendations
        .iter()
        .any(|r| r.contains("category_preferences:ConnectionError affects 6 subjects")));
}

#[tokio::test(start_paused = true)]
async fn test_sequential_and_parallel_runs_agree() {
    let backend = Arc::new(six_of_ten_failing());
    let analyzer = bulk_analyzer(backend, bulk_config());

    let parallel = analyzer.run_bulk_analysis(1, 10, None, true).await;
    let sequential = analyzer.run_bulk_analysis(1, 10, None, false).await;

    assert_eq!(parallel.successful_subjects, sequential.successful_subjects);
    assert_eq!(parallel.failure_patterns, sequential.failure_patterns);
    assert_eq!(parallel.query_tallies, sequential.query_tallies);
    assert_ne!(parallel.run_id, sequential.run_id);
    assert!(!sequential.parallel);
}

#[tokio::test]
async fn test_bulk_sampling() {
    let backend = Arc::new(ScriptedBackend::healthy());
    let analyzer = bulk_analyzer(backend.clone(), bulk_config());

    let result = analyzer.run_bulk_analysis(1, 100, Some(10), true).await;

    assert_eq!(result.total_subjects, 100);
    assert_eq!(result.analyzed_subjects, 10);
    assert_eq!(result.sample_size, Some(10));
    assert_eq!(backend.total_calls(), 30);
}

#[tokio::test]
async fn test_unsampled_wide_range_falls_back_to_sampling() {
    let backend = Arc::new(ScriptedBackend::healthy());
    let analyzer = bulk_analyzer(backend.clone(), bulk_config());

    let result = analyzer.run_bulk_analysis(1, 5_000, None, true).await;

    assert_eq!(result.total_subjects, 5_000);
    assert_eq!(result.analyzed_subjects, 10);
    assert_eq!(result.sample_size, Some(10));
    assert_eq!(backend.total_calls(), 30);
}

#[tokio::test]
async fn test_huge_range_does_not_overflow() {
    let backend = Arc::new(ScriptedBackend::healthy());
    let analyzer = bulk_analyzer(backend, bulk_config());

    let result = analyzer.run_bulk_analysis(-1, i64::MAX, None, true).await;

    assert_eq!(result.range_start, 1);
    assert_eq!(result.analyzed_subjects, 10);
    assert_eq!(result.failed_subjects, 0);
}

#[tokio::test]
async fn test_non_positive_start_is_clamped_to_first_subject() {
    let backend = Arc::new(ScriptedBackend::healthy());
    let (result, reports) = bulk_analyzer(backend, bulk_config())
        .run_bulk_analysis_with_reports(-2, 3, None, true)
        .await;

    assert_eq!(result.range_start, 1);
    assert_eq!(result.total_subjects, 3);
    assert_eq!(result.failed_subjects, 0);
    assert_eq!(
        reports.iter().map(|r| r.subject_id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(reports
        .iter()
        .flat_map(|r| &r.diagnostics)
        .all(|d| d.error_kind != Some(ErrorKind::ValidationError)));
}

#[tokio::test(start_paused = true)]
async fn test_bulk_deadline_records_pending_subjects_as_timed_out() {
    let backend = Arc::new(ScriptedBackend::new(|text, subject| {
        if subject >= 3 {
            Step::Hang
        } else {
            healthy_step(text)
        }
    }));
    let config = BulkConfig {
        overall_timeout_seconds: 1,
        ..bulk_config()
    };
    let (result, reports) = bulk_analyzer(backend, config)
        .run_bulk_analysis_with_reports(1, 5, None, true)
        .await;

    assert_eq!(reports.len(), 5);
    assert_eq!(result.timed_out_subjects, 3);
    assert_eq!(result.successful_subjects, 2);
    assert_eq!(result.failure_patterns["preference_timeline:TimeoutError"], 3);
    assert!(reports[2..].iter().all(|r| r.failed_queries == 3));
    assert!(result
        .recommendations
        .iter()
        .any(|r| r.contains("did not finish within the 1s bulk deadline")));
}

#[tokio::test]
async fn test_panicking_subject_does_not_abort_batch() {
    let backend = Arc::new(ScriptedBackend::new(|text, subject| {
        if subject == 4 && text == TIMELINE {
            panic!("driver bug");
        }
        healthy_step(text)
    }));
    let (result, reports) = bulk_analyzer(backend, bulk_config())
        .run_bulk_analysis_with_reports(1, 5, None, true)
        .await;

    assert_eq!(reports.len(), 5);
    assert_eq!(result.failed_subjects, 1);
    let broken = reports.iter().find(|r| r.subject_id == 4).unwrap();
    assert!(broken
        .diagnostics
        .iter()
        .all(|d| d.error_kind == Some(ErrorKind::UnexpectedError)));
}

#[tokio::test(start_paused = true)]
async fn test_shared_failure_becomes_one_critical_pattern() {
    let backend = Arc::new(six_of_ten_failing());
    let (_, reports) = bulk_analyzer(backend, bulk_config())
        .run_bulk_analysis_with_reports(1, 10, None, true)
        .await;

    let patterns = PatternDetector::new(PatternConfig::default()).detect_patterns(&reports);
    let failures: Vec<&Pattern> = patterns
        .iter()
        .filter(|p| p.pattern_type == PatternType::Failure)
        .collect();

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].affected_subjects, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(failures[0].affected_queries, vec![CATEGORIES.to_string()]);
    assert_eq!(failures[0].severity, PatternSeverity::Critical);
    assert!((failures[0].confidence - 0.6).abs() < 1e-9);
    assert_eq!(patterns[0].severity, PatternSeverity::Critical);
}

#[tokio::test]
async fn test_healthy_system_scores_high() {
    let backend = Arc::new(ScriptedBackend::healthy());
    let dashboard = HealthDashboard::new(
        bulk_analyzer(backend, bulk_config()),
        PatternDetector::default(),
    );

    let summary = dashboard.generate_health_summary(10, Some((1, 20))).await;

    assert_eq!(summary.subjects_checked, 10);
    assert!(summary.overall_health_score >= 95.0);
    assert!(summary.critical_patterns.is_empty());
    assert!(summary.trending_issues.is_empty());
    assert_eq!(summary.system_recommendations.len(), 1);
    assert!(summary.system_recommendations[0].starts_with("System healthy"));
}

#[test]
fn test_degraded_system_with_critical_pattern_scores_low() {
    let reports: Vec<DiagnosticReport> = (1..=10)
        .map(|id| {
            let d = if id <= 4 {
                QueryDiagnostic {
                    query_id: "q".to_string(),
                    execution_time_ms: 20.0,
                    success: true,
                    row_count: 2,
                    error: None,
                    error_kind: None,
                    quality_score: Some(0.9),
                    validation_issues: Vec::new(),
                    from_cache: false,
                    attempts: 1,
                }
            } else {
                QueryDiagnostic::failure("q", 20.0, ErrorKind::ConnectionError, "refused")
            };
            DiagnosticReport::from_diagnostics(id, vec![d], Vec::new())
        })
        .collect();
    let bulk = aggregate(&reports, &["q".to_string()]);
    let critical = Pattern {
        pattern_type: PatternType::Failure,
        name: "q:ConnectionError".to_string(),
        affected_queries: vec!["q".to_string()],
        affected_subjects: (5..=10).collect(),
        severity: PatternSeverity::Critical,
        description: "q fails".to_string(),
        recommended_actions: vec!["Check database availability".to_string()],
        confidence: 0.6,
    };

    let summary = summarize(&bulk, vec![critical]);

    assert!((summary.success_rate_percent - 40.0).abs() < 1e-9);
    assert!(summary.overall_health_score <= 50.0);
    assert_eq!(summary.critical_patterns.len(), 1);
    assert!(summary.system_recommendations[0].starts_with("URGENT"));
}
