//! System-level health roll-up of a bulk run and its detected patterns.

use super::bulk::{BulkAnalysisResult, BulkAnalyzer};
use super::patterns::{Pattern, PatternDetector, PatternSeverity, PatternType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceSummary {
    /// Mean successful execution time per query, seconds.
    pub mean_seconds: BTreeMap<String, f64>,
    pub slowest_query: Option<String>,
    pub slowest_mean_seconds: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvailabilitySummary {
    /// Availability per query, percent.
    pub per_query: BTreeMap<String, f64>,
    pub mean_percent: f64,
    pub least_available_query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub generated_at: DateTime<Utc>,
    pub run_id: Uuid,
    pub subjects_checked: usize,
    pub failed_subjects: usize,
    /// In `[0, 100]`.
    pub overall_health_score: f64,
    pub success_rate_percent: f64,
    pub critical_patterns: Vec<Pattern>,
    pub warning_patterns: Vec<Pattern>,
    pub performance_summary: PerformanceSummary,
    pub availability_summary: AvailabilitySummary,
    pub trending_issues: Vec<String>,
    pub system_recommendations: Vec<String>,
}

/// Health score from query-level success, mean availability (both percent)
/// and pattern severities, clamped to `[0, 100]`.
pub fn health_score(success_pct: f64, availability_pct: f64, patterns: &[Pattern]) -> f64 {
    let count = |severity: PatternSeverity| patterns.iter().filter(|p| p.severity == severity).count() as f64;

    let score = 100.0
        - 0.5 * (90.0 - success_pct).max(0.0)
        - 15.0 * count(PatternSeverity::Critical)
        - 8.0 * count(PatternSeverity::High)
        - 3.0 * count(PatternSeverity::Medium)
        - 0.3 * (80.0 - availability_pct).max(0.0);

    score.clamp(0.0, 100.0)
}

fn trending_issues(patterns: &[Pattern]) -> Vec<String> {
    let of_type = |t: PatternType| patterns.iter().filter(|p| p.pattern_type == t).count();
    let mut issues = Vec::new();

    let failures = of_type(PatternType::Failure);
    if failures >= 2 {
        issues.push(format!("Increasing failure rates ({failures} failure patterns)"));
    }
    let performance = of_type(PatternType::Performance);
    if performance >= 1 {
        issues.push(format!("Performance degradation ({performance} queries affected)"));
    }
    let availability = of_type(PatternType::Availability);
    if availability >= 1 {
        issues.push(format!("Availability issues ({availability} queries affected)"));
    }
    issues
}

fn system_recommendations(
    bulk: &BulkAnalysisResult,
    critical: &[Pattern],
    warnings: &[Pattern],
) -> Vec<String> {
    let mut recommendations = Vec::new();

    if !critical.is_empty() {
        let names: Vec<&str> = critical.iter().map(|p| p.name.as_str()).collect();
        recommendations.push(format!(
            "URGENT: {} critical pattern(s) need immediate attention: {}",
            critical.len(),
            names.join(", ")
        ));
        for pattern in critical {
            if let Some(action) = pattern.recommended_actions.first() {
                recommendations.push(format!("URGENT: {} ({})", action, pattern.name));
            }
        }
    }

    let success = bulk.overall_success_rate() * 100.0;
    if bulk.analyzed_subjects == 0 {
        recommendations.push("No subjects were analyzed; health cannot be assessed".to_string());
    } else if success < 50.0 {
        recommendations.push(format!(
            "CRITICAL: query success rate is {success:.1}%; check database connectivity"
        ));
    } else if success < 80.0 {
        recommendations.push(format!(
            "WARNING: query success rate is {success:.1}%; investigate failing queries"
        ));
    }

    for (query_id, rate) in &bulk.query_success_rates {
        if *rate < 0.5 && bulk.analyzed_subjects > 0 {
            recommendations.push(format!(
                "CRITICAL: {query_id} succeeds for only {:.1}% of subjects",
                rate * 100.0
            ));
        }
    }

    for pattern in warnings.iter().filter(|p| p.severity == PatternSeverity::High) {
        if let Some(action) = pattern.recommended_actions.first() {
            recommendations.push(format!("{} ({})", action, pattern.name));
        }
    }

    if recommendations.is_empty() {
        recommendations.push(format!(
            "System healthy: {success:.1}% query success rate across {} subjects",
            bulk.analyzed_subjects
        ));
    }
    recommendations
}

/// Fold a bulk result and the patterns detected over the same batch into a
/// `HealthSummary`.
pub fn summarize(bulk: &BulkAnalysisResult, patterns: Vec<Pattern>) -> HealthSummary {
    let success_pct = bulk.overall_success_rate() * 100.0;
    let availability_pct = bulk.mean_availability_rate() * 100.0;
    let score = health_score(success_pct, availability_pct, &patterns);
    let trending = trending_issues(&patterns);

    let (critical, warnings): (Vec<Pattern>, Vec<Pattern>) = patterns
        .into_iter()
        .partition(|p| p.severity == PatternSeverity::Critical);

    let mean_seconds: BTreeMap<String, f64> = bulk
        .timing_stats
        .iter()
        .map(|(id, stats)| (id.clone(), stats.mean))
        .collect();
    let slowest = mean_seconds
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(id, mean)| (id.clone(), *mean));

    let per_query: BTreeMap<String, f64> = bulk
        .query_availability_rates
        .iter()
        .map(|(id, rate)| (id.clone(), rate * 100.0))
        .collect();
    let least_available = per_query
        .iter()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(id, _)| id.clone());

    HealthSummary {
        generated_at: Utc::now(),
        run_id: bulk.run_id,
        subjects_checked: bulk.analyzed_subjects,
        failed_subjects: bulk.failed_subjects,
        overall_health_score: score,
        success_rate_percent: success_pct,
        system_recommendations: system_recommendations(bulk, &critical, &warnings),
        critical_patterns: critical,
        warning_patterns: warnings,
        performance_summary: PerformanceSummary {
            slowest_mean_seconds: slowest.as_ref().map_or(0.0, |(_, mean)| *mean),
            slowest_query: slowest.map(|(id, _)| id),
            mean_seconds,
        },
        availability_summary: AvailabilitySummary {
            per_query,
            mean_percent: availability_pct,
            least_available_query: least_available,
        },
        trending_issues: trending,
    }
}

pub struct HealthDashboard {
    analyzer: BulkAnalyzer,
    detector: PatternDetector,
}

impl HealthDashboard {
    pub fn new(analyzer: BulkAnalyzer, detector: PatternDetector) -> Self {
        Self { analyzer, detector }
    }

    pub fn analyzer(&self) -> &BulkAnalyzer {
        &self.analyzer
    }

    /// Sample subjects from `range` (or the configured default range), run a
    /// parallel bulk analysis, detect patterns and score the result.
    pub async fn generate_health_summary(
        &self,
        sample_size: usize,
        range: Option<(i64, i64)>,
    ) -> HealthSummary {
        let config = self.analyzer.config();
        let (start, end) =
            range.unwrap_or((config.default_range_start, config.default_range_end));

        let (bulk, reports) = self
            .analyzer
            .run_bulk_analysis_with_reports(start, end, Some(sample_size), true)
            .await;
        let patterns = self.detector.detect_patterns(&reports);
        let summary = summarize(&bulk, patterns);

        info!(
            run_id = %summary.run_id,
            score = summary.overall_health_score,
            critical = summary.critical_patterns.len(),
            warnings = summary.warning_patterns.len(),
            "Health summary generated"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(severity: PatternSeverity, pattern_type: PatternType) -> Pattern {
        Pattern {
            pattern_type,
            name: format!("{severity}_pattern"),
            affected_queries: vec!["q".to_string()],
            affected_subjects: vec![1],
            severity,
            description: String::new(),
            recommended_actions: vec!["Do something".to_string()],
            confidence: 0.5,
        }
    }

    #[test]
    fn test_perfect_run_scores_full_marks() {
        assert_eq!(health_score(100.0, 100.0, &[]), 100.0);
    }

    #[test]
    fn test_score_penalties() {
        let patterns = vec![
            pattern(PatternSeverity::Critical, PatternType::Failure),
            pattern(PatternSeverity::High, PatternType::Availability),
            pattern(PatternSeverity::Medium, PatternType::Performance),
        ];
        // 100 - 0.5*20 - 15 - 8 - 3 - 0.3*30
        let score = health_score(70.0, 50.0, &patterns);
        assert!((score - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_is_clamped() {
        let patterns: Vec<Pattern> = (0..10)
            .map(|_| pattern(PatternSeverity::Critical, PatternType::Failure))
            .collect();
        assert_eq!(health_score(0.0, 0.0, &patterns), 0.0);
    }

    #[test]
    fn test_trending_issues() {
        let patterns = vec![
            pattern(PatternSeverity::High, PatternType::Failure),
            pattern(PatternSeverity::Low, PatternType::Failure),
            pattern(PatternSeverity::Medium, PatternType::Performance),
        ];
        let issues = trending_issues(&patterns);
        assert_eq!(issues.len(), 2);
        assert!(issues[0].starts_with("Increasing failure rates"));
        assert!(issues[1].starts_with("Performance degradation"));
    }
}
