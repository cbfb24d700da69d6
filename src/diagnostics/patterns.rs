//! Systemic pattern detection over a batch of diagnostic reports.

use super::models::DiagnosticReport;
use super::stats::TimingStats;
use crate::config::PatternConfig;
use crate::query::ErrorKind;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Failure,
    Performance,
    Quality,
    Availability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl PatternSeverity {
    pub fn rank(&self) -> u8 {
        match self {
            PatternSeverity::Low => 1,
            PatternSeverity::Medium => 2,
            PatternSeverity::High => 3,
            PatternSeverity::Critical => 4,
        }
    }

    /// Severity of a failure group by share of affected subjects.
    pub fn from_affected_fraction(fraction: f64) -> Self {
        if fraction >= 0.5 {
            PatternSeverity::Critical
        } else if fraction >= 0.25 {
            PatternSeverity::High
        } else if fraction >= 0.1 {
            PatternSeverity::Medium
        } else {
            PatternSeverity::Low
        }
    }
}

impl fmt::Display for PatternSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PatternSeverity::Low => "low",
            PatternSeverity::Medium => "medium",
            PatternSeverity::High => "high",
            PatternSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_type: PatternType,
    pub name: String,
    pub affected_queries: Vec<String>,
    pub affected_subjects: Vec<i64>,
    pub severity: PatternSeverity,
    pub description: String,
    pub recommended_actions: Vec<String>,
    /// In `[0, 1]`.
    pub confidence: f64,
}

fn sample_confidence(samples: usize, cap: f64) -> f64 {
    (samples as f64 / 10.0).min(cap)
}

/// Scans report batches for failure, performance, quality and availability
/// patterns. Never fails; sparse input yields fewer patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternDetector {
    config: PatternConfig,
}

impl PatternDetector {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    /// Every detected pattern, most severe first, then most confident.
    pub fn detect_patterns(&self, reports: &[DiagnosticReport]) -> Vec<Pattern> {
        let mut patterns = Vec::new();
        patterns.extend(self.failure_patterns(reports));
        patterns.extend(self.performance_patterns(reports));
        patterns.extend(self.quality_patterns(reports));
        patterns.extend(self.availability_patterns(reports));

        patterns.sort_by(|a, b| {
            b.severity.rank().cmp(&a.severity.rank()).then_with(|| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(Ordering::Equal)
            })
        });
        debug!(
            reports = reports.len(),
            patterns = patterns.len(),
            "Pattern detection complete"
        );
        patterns
    }

    pub fn failure_patterns(&self, reports: &[DiagnosticReport]) -> Vec<Pattern> {
        let mut groups: BTreeMap<(String, ErrorKind), BTreeSet<i64>> = BTreeMap::new();
        for report in reports {
            for d in report.diagnostics.iter().filter(|d| !d.success) {
                let kind = d.error_kind.unwrap_or(ErrorKind::UnexpectedError);
                groups
                    .entry((d.query_id.clone(), kind))
                    .or_default()
                    .insert(report.subject_id);
            }
        }

        let total = reports.len();
        groups
            .into_iter()
            .filter(|(_, subjects)| subjects.len() >= self.config.min_affected_subjects)
            .map(|((query_id, kind), subjects)| {
                let affected = subjects.len();
                let fraction = affected as f64 / total as f64;
                Pattern {
                    pattern_type: PatternType::Failure,
                    name: format!("{query_id}:{kind}"),
                    description: format!(
                        "{query_id} fails with {kind} for {affected} of {total} subjects ({:.1}%)",
                        fraction * 100.0
                    ),
                    recommended_actions: failure_actions(kind, &query_id),
                    affected_queries: vec![query_id],
                    affected_subjects: subjects.into_iter().collect(),
                    severity: PatternSeverity::from_affected_fraction(fraction),
                    confidence: sample_confidence(affected, 0.9),
                }
            })
            .collect()
    }

    pub fn performance_patterns(&self, reports: &[DiagnosticReport]) -> Vec<Pattern> {
        let mut patterns = Vec::new();
        for (query_id, samples) in successful_timings(reports) {
            let seconds: Vec<f64> = samples.iter().map(|(_, s)| *s).collect();
            let Some(stats) = TimingStats::from_samples(&seconds) else {
                continue;
            };

            if stats.mean > self.config.slow_mean_seconds {
                let severity = if stats.mean < self.config.very_slow_mean_seconds {
                    PatternSeverity::Medium
                } else {
                    PatternSeverity::High
                };
                patterns.push(Pattern {
                    pattern_type: PatternType::Performance,
                    name: format!("slow_query:{query_id}"),
                    affected_subjects: samples
                        .iter()
                        .filter(|(_, s)| *s > self.config.slow_mean_seconds)
                        .map(|(id, _)| *id)
                        .collect(),
                    description: format!(
                        "{query_id} averages {:.2}s over {} successful executions",
                        stats.mean, stats.count
                    ),
                    recommended_actions: vec![
                        format!("Review the execution plan of {query_id}"),
                        "Check indexes on the filtered columns".to_string(),
                        "Consider caching or precomputing the result".to_string(),
                    ],
                    affected_queries: vec![query_id.clone()],
                    severity,
                    confidence: sample_confidence(stats.count, 0.9),
                });
            }

            if stats.is_variable(self.config.variability_ratio) {
                patterns.push(Pattern {
                    pattern_type: PatternType::Performance,
                    name: format!("variable_performance:{query_id}"),
                    affected_subjects: Vec::new(),
                    description: format!(
                        "{query_id} execution time varies widely (mean {:.2}s, stdev {:.2}s)",
                        stats.mean, stats.stdev
                    ),
                    recommended_actions: vec![
                        "Check for lock contention or pool saturation".to_string(),
                        format!("Compare slow and fast subjects for {query_id}"),
                    ],
                    affected_queries: vec![query_id],
                    severity: PatternSeverity::Medium,
                    confidence: sample_confidence(stats.count, 0.8),
                });
            }
        }
        patterns
    }

    pub fn quality_patterns(&self, reports: &[DiagnosticReport]) -> Vec<Pattern> {
        let mut scores: BTreeMap<String, Vec<(i64, f64)>> = BTreeMap::new();
        for report in reports {
            for d in &report.diagnostics {
                if let Some(score) = d.quality_score.filter(|s| s.is_finite()) {
                    scores
                        .entry(d.query_id.clone())
                        .or_default()
                        .push((report.subject_id, score));
                }
            }
        }

        let mut patterns = Vec::new();
        for (query_id, samples) in scores {
            let mean = samples.iter().map(|(_, s)| s).sum::<f64>() / samples.len() as f64;
            if mean >= self.config.low_quality_mean {
                continue;
            }
            let severity = if mean < self.config.very_low_quality {
                PatternSeverity::High
            } else {
                PatternSeverity::Medium
            };
            patterns.push(Pattern {
                pattern_type: PatternType::Quality,
                name: format!("low_data_quality:{query_id}"),
                affected_subjects: samples
                    .iter()
                    .filter(|(_, s)| *s < self.config.very_low_quality)
                    .map(|(id, _)| *id)
                    .collect(),
                description: format!(
                    "{query_id} has mean quality score {mean:.2} over {} results",
                    samples.len()
                ),
                recommended_actions: vec![
                    format!("Audit source data feeding {query_id}"),
                    "Check for missing or inconsistent required fields".to_string(),
                ],
                affected_queries: vec![query_id],
                severity,
                confidence: sample_confidence(samples.len(), 0.9),
            });
        }
        patterns
    }

    pub fn availability_patterns(&self, reports: &[DiagnosticReport]) -> Vec<Pattern> {
        let mut seen: BTreeMap<String, (usize, Vec<i64>)> = BTreeMap::new();
        for report in reports {
            for d in &report.diagnostics {
                let entry = seen.entry(d.query_id.clone()).or_default();
                entry.0 += 1;
                if !d.has_data() {
                    entry.1.push(report.subject_id);
                }
            }
        }

        let mut patterns = Vec::new();
        for (query_id, (attempts, missing)) in seen {
            let rate = (attempts - missing.len()) as f64 / attempts as f64;
            if rate >= self.config.low_availability {
                continue;
            }
            let severity = if rate < self.config.very_low_availability {
                PatternSeverity::Critical
            } else {
                PatternSeverity::High
            };
            patterns.push(Pattern {
                pattern_type: PatternType::Availability,
                name: format!("low_availability:{query_id}"),
                description: format!(
                    "{query_id} returned data for only {:.1}% of {attempts} subjects",
                    rate * 100.0
                ),
                recommended_actions: vec![
                    format!("Verify that source data exists for {query_id}"),
                    "Check data ingestion for the affected subjects".to_string(),
                ],
                affected_queries: vec![query_id],
                affected_subjects: missing,
                severity,
                confidence: sample_confidence(attempts, 0.9),
            });
        }
        patterns
    }
}

/// Successful execution times per query as `(subject_id, seconds)`.
fn successful_timings(reports: &[DiagnosticReport]) -> BTreeMap<String, Vec<(i64, f64)>> {
    let mut timings: BTreeMap<String, Vec<(i64, f64)>> = BTreeMap::new();
    for report in reports {
        for d in report.diagnostics.iter().filter(|d| d.success) {
            timings
                .entry(d.query_id.clone())
                .or_default()
                .push((report.subject_id, d.execution_time_ms / 1000.0));
        }
    }
    timings
}

fn failure_actions(kind: ErrorKind, query_id: &str) -> Vec<String> {
    match kind {
        ErrorKind::ConnectionError => vec![
            "Check database availability and network path".to_string(),
            "Review connection pool sizing and saturation".to_string(),
        ],
        ErrorKind::TimeoutError => vec![
            format!("Profile {query_id} for slow plans"),
            "Review statement timeout and pool wait settings".to_string(),
        ],
        ErrorKind::DataQualityError => vec![
            format!("Inspect validation issues reported for {query_id}"),
            "Audit upstream data for the affected subjects".to_string(),
        ],
        ErrorKind::ValidationError => vec![
            "Verify subject identifiers passed to the diagnostics".to_string(),
        ],
        ErrorKind::UnexpectedError => vec![
            format!("Inspect logs for {query_id} failures"),
        ],
    }
}
