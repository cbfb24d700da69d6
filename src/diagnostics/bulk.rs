//! Diagnostic runs across many subjects.

use super::models::DiagnosticReport;
use super::report::DiagnosticReportBuilder;
use super::stats::TimingStats;
use crate::config::BulkConfig;
use crate::query::ErrorKind;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Attempt counters for one query id across a bulk run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryTally {
    pub attempts: usize,
    pub successes: usize,
    /// Successes that returned at least one row.
    pub with_data: usize,
}

impl QueryTally {
    pub fn success_rate(&self) -> f64 {
        ratio(self.successes, self.attempts)
    }

    pub fn availability_rate(&self) -> f64 {
        ratio(self.with_data, self.attempts)
    }

    pub fn failures(&self) -> usize {
        self.attempts - self.successes
    }
}

/// Quality scores of one query bucketed into bands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityDistribution {
    /// Score of at least 0.8
    pub excellent: usize,
    /// Score in [0.6, 0.8)
    pub good: usize,
    /// Score in [0.4, 0.6)
    pub fair: usize,
    /// Score below 0.4
    pub poor: usize,
    pub mean: Option<f64>,
}

impl QualityDistribution {
    fn from_scores(scores: &[f64]) -> Self {
        let mut dist = Self::default();
        for &score in scores {
            match score {
                s if s >= 0.8 => dist.excellent += 1,
                s if s >= 0.6 => dist.good += 1,
                s if s >= 0.4 => dist.fair += 1,
                _ => dist.poor += 1,
            }
        }
        if !scores.is_empty() {
            dist.mean = Some(scores.iter().sum::<f64>() / scores.len() as f64);
        }
        dist
    }

    pub fn total(&self) -> usize {
        self.excellent + self.good + self.fair + self.poor
    }
}

/// Aggregate of one bulk run. Rates are fractions in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkAnalysisResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub range_start: i64,
    pub range_end: i64,
    pub sample_size: Option<usize>,
    pub parallel: bool,
    /// Subjects in the requested range.
    pub total_subjects: usize,
    pub analyzed_subjects: usize,
    /// Subjects with no failed query.
    pub successful_subjects: usize,
    pub failed_subjects: usize,
    /// Subjects cut off by the run deadline, included in `failed_subjects`.
    pub timed_out_subjects: usize,
    pub query_tallies: BTreeMap<String, QueryTally>,
    pub query_success_rates: BTreeMap<String, f64>,
    pub query_availability_rates: BTreeMap<String, f64>,
    pub timing_stats: BTreeMap<String, TimingStats>,
    /// `"{query_id}:{error_kind}"` to number of failed executions.
    pub failure_patterns: BTreeMap<String, usize>,
    pub quality_distribution: BTreeMap<String, QualityDistribution>,
    pub recommendations: Vec<String>,
}

impl BulkAnalysisResult {
    /// Query-level success rate across every subject and query.
    pub fn overall_success_rate(&self) -> f64 {
        let (attempts, successes) = self
            .query_tallies
            .values()
            .fold((0, 0), |(a, s), t| (a + t.attempts, s + t.successes));
        ratio(successes, attempts)
    }

    /// Mean of the per-query availability rates.
    pub fn mean_availability_rate(&self) -> f64 {
        if self.query_availability_rates.is_empty() {
            return 0.0;
        }
        self.query_availability_rates.values().sum::<f64>()
            / self.query_availability_rates.len() as f64
    }

    pub fn subject_success_rate(&self) -> f64 {
        ratio(self.successful_subjects, self.analyzed_subjects)
    }
}

/// Requested subject range. Subject ids are positive, so the start is
/// clamped to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectRange {
    pub start: i64,
    pub end: i64,
}

impl SubjectRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start: start.max(1),
            end,
        }
    }

    pub fn len(&self) -> usize {
        if self.end < self.start {
            return 0;
        }
        let len = i128::from(self.end) - i128::from(self.start) + 1;
        usize::try_from(len).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every id in the range, or a random sample of `sample` ids when that is
    /// smaller. The result is sorted.
    pub fn select(&self, sample: Option<usize>) -> Vec<i64> {
        let len = self.len();
        match sample {
            Some(n) if n < len => {
                let mut rng = rand::thread_rng();
                let mut ids: Vec<i64> = index::sample(&mut rng, len, n)
                    .into_iter()
                    .map(|offset| self.start + offset as i64)
                    .collect();
                ids.sort_unstable();
                ids
            }
            _ if len == 0 => Vec::new(),
            _ => (self.start..=self.end).collect(),
        }
    }
}

pub struct BulkAnalyzer {
    builder: DiagnosticReportBuilder,
    config: BulkConfig,
}

impl BulkAnalyzer {
    pub fn new(builder: DiagnosticReportBuilder, config: BulkConfig) -> Self {
        Self { builder, config }
    }

    pub fn builder(&self) -> &DiagnosticReportBuilder {
        &self.builder
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    pub async fn run_bulk_analysis(
        &self,
        start: i64,
        end: i64,
        sample: Option<usize>,
        parallel: bool,
    ) -> BulkAnalysisResult {
        self.run_bulk_analysis_with_reports(start, end, sample, parallel)
            .await
            .0
    }

    /// Bulk run that also hands back the per-subject reports, for pattern
    /// detection over the same batch.
    pub async fn run_bulk_analysis_with_reports(
        &self,
        start: i64,
        end: i64,
        sample: Option<usize>,
        parallel: bool,
    ) -> (BulkAnalysisResult, Vec<DiagnosticReport>) {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let range = SubjectRange::new(start, end);
        let sample = match sample {
            None if range.len() > self.config.max_unsampled_subjects => {
                warn!(
                    start = range.start,
                    end,
                    limit = self.config.max_unsampled_subjects,
                    sample_size = self.config.sample_size,
                    "Range too wide for a full run, sampling instead"
                );
                Some(self.config.sample_size)
            }
            other => other,
        };
        let subjects = range.select(sample);

        info!(
            %run_id,
            start = range.start,
            end,
            subjects = subjects.len(),
            parallel,
            "Starting bulk analysis"
        );

        let (reports, timed_out) = self.collect_reports(&subjects, parallel).await;

        let mut result = aggregate(&reports, &self.builder.query_ids());
        result.run_id = run_id;
        result.started_at = started_at;
        result.completed_at = Utc::now();
        result.range_start = range.start;
        result.range_end = end;
        result.sample_size = sample;
        result.parallel = parallel;
        result.total_subjects = range.len();
        result.timed_out_subjects = timed_out;
        result.recommendations = bulk_recommendations(&result, self.config.overall_timeout_seconds);

        info!(
            %run_id,
            analyzed = result.analyzed_subjects,
            failed = result.failed_subjects,
            timed_out,
            success_rate = result.overall_success_rate(),
            "Bulk analysis complete"
        );
        (result, reports)
    }

    /// One report per subject, in subject order. Panicking runs and runs cut
    /// off by the overall deadline are replaced by synthetic failed reports.
    async fn collect_reports(
        &self,
        subjects: &[i64],
        parallel: bool,
    ) -> (Vec<DiagnosticReport>, usize) {
        let concurrency = if parallel { self.config.workers.max(1) } else { 1 };
        let deadline = Instant::now() + self.config.overall_timeout();
        let query_ids = self.builder.query_ids();

        let mut runs = stream::iter(subjects.iter().copied())
            .map(|subject_id| async move {
                let outcome = AssertUnwindSafe(self.builder.build_diagnostic_report(subject_id))
                    .catch_unwind()
                    .await;
                (subject_id, outcome)
            })
            .buffer_unordered(concurrency);

        let mut reports = Vec::with_capacity(subjects.len());
        let mut finished = HashSet::with_capacity(subjects.len());
        loop {
            match timeout_at(deadline, runs.next()).await {
                Ok(Some((subject_id, Ok(report)))) => {
                    finished.insert(subject_id);
                    reports.push(report);
                }
                Ok(Some((subject_id, Err(_)))) => {
                    error!(subject_id, "Diagnostic run panicked");
                    finished.insert(subject_id);
                    reports.push(DiagnosticReport::synthetic_failure(
                        subject_id,
                        query_ids.iter().cloned(),
                        ErrorKind::UnexpectedError,
                        "diagnostic run aborted unexpectedly",
                    ));
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        pending = subjects.len() - finished.len(),
                        "Bulk analysis deadline reached"
                    );
                    break;
                }
            }
        }
        drop(runs);

        let message = format!(
            "bulk analysis deadline of {}s exceeded",
            self.config.overall_timeout_seconds
        );
        let mut timed_out = 0;
        for &subject_id in subjects {
            if !finished.contains(&subject_id) {
                timed_out += 1;
                reports.push(DiagnosticReport::synthetic_failure(
                    subject_id,
                    query_ids.iter().cloned(),
                    ErrorKind::TimeoutError,
                    &message,
                ));
            }
        }

        reports.sort_by_key(|r| r.subject_id);
        (reports, timed_out)
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Fold per-subject reports into bulk statistics. Run metadata (ids, range,
/// timestamps, recommendations) is left for the caller to fill in.
pub fn aggregate(reports: &[DiagnosticReport], query_ids: &[String]) -> BulkAnalysisResult {
    let mut tallies: BTreeMap<String, QueryTally> = query_ids
        .iter()
        .map(|id| (id.clone(), QueryTally::default()))
        .collect();
    let mut timings: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut scores: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut failure_patterns: BTreeMap<String, usize> = BTreeMap::new();

    for report in reports {
        for d in &report.diagnostics {
            let tally = tallies.entry(d.query_id.clone()).or_default();
            tally.attempts += 1;
            if d.success {
                tally.successes += 1;
                if d.row_count > 0 {
                    tally.with_data += 1;
                }
                timings
                    .entry(d.query_id.clone())
                    .or_default()
                    .push(d.execution_time_ms / 1000.0);
                if let Some(score) = d.quality_score {
                    scores.entry(d.query_id.clone()).or_default().push(score);
                }
            } else {
                let kind = d.error_kind.unwrap_or(ErrorKind::UnexpectedError);
                *failure_patterns
                    .entry(format!("{}:{}", d.query_id, kind))
                    .or_insert(0) += 1;
            }
        }
    }

    let successful_subjects = reports.iter().filter(|r| r.is_successful()).count();

    BulkAnalysisResult {
        run_id: Uuid::nil(),
        started_at: Utc::now(),
        completed_at: Utc::now(),
        range_start: 0,
        range_end: 0,
        sample_size: None,
        parallel: false,
        total_subjects: reports.len(),
        analyzed_subjects: reports.len(),
        successful_subjects,
        failed_subjects: reports.len() - successful_subjects,
        timed_out_subjects: 0,
        query_success_rates: tallies
            .iter()
            .map(|(id, t)| (id.clone(), t.success_rate()))
            .collect(),
        query_availability_rates: tallies
            .iter()
            .map(|(id, t)| (id.clone(), t.availability_rate()))
            .collect(),
        timing_stats: timings
            .iter()
            .filter_map(|(id, samples)| TimingStats::from_samples(samples).map(|s| (id.clone(), s)))
            .collect(),
        quality_distribution: scores
            .iter()
            .map(|(id, s)| (id.clone(), QualityDistribution::from_scores(s)))
            .collect(),
        query_tallies: tallies,
        failure_patterns,
        recommendations: Vec::new(),
    }
}

/// Threshold-driven advice for a finished bulk run.
pub fn bulk_recommendations(result: &BulkAnalysisResult, deadline_seconds: u64) -> Vec<String> {
    let mut recommendations = Vec::new();

    if result.analyzed_subjects == 0 {
        recommendations.push(format!(
            "No subjects were analyzed in range {}..={}; check the requested range",
            result.range_start, result.range_end
        ));
        return recommendations;
    }

    let success = result.overall_success_rate() * 100.0;
    if success < 50.0 {
        recommendations.push(format!(
            "CRITICAL: overall query success rate is {success:.1}%; check database connectivity and query health"
        ));
    } else if success < 80.0 {
        recommendations.push(format!(
            "WARNING: overall query success rate is {success:.1}%; investigate failing queries"
        ));
    }

    let failing: BTreeSet<&String> = result
        .query_success_rates
        .iter()
        .filter(|(_, rate)| **rate < 0.5)
        .map(|(id, _)| id)
        .collect();
    for query_id in failing {
        let rate = result.query_success_rates[query_id] * 100.0;
        recommendations.push(format!(
            "CRITICAL: {query_id} succeeds for only {rate:.1}% of subjects"
        ));
    }

    let subjects = result.analyzed_subjects as f64;
    for (pattern, count) in &result.failure_patterns {
        let share = *count as f64 / subjects;
        if share > 0.1 {
            recommendations.push(format!(
                "Failure pattern {pattern} affects {count} subjects ({:.1}%)",
                share * 100.0
            ));
        }
    }

    if result.timed_out_subjects > 0 {
        recommendations.push(format!(
            "{} subjects did not finish within the {deadline_seconds}s bulk deadline",
            result.timed_out_subjects
        ));
    }

    if recommendations.is_empty() {
        recommendations.push(format!(
            "System operating normally: {success:.1}% query success rate across {} subjects",
            result.analyzed_subjects
        ));
    }
    recommendations
}
