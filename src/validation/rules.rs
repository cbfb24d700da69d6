//! Per-query-kind validation rules.

use super::result::{IssueKind, ValidationIssue, ValidationResult};
use super::scoring::ScoringConstants;
use crate::query::models::{ResultRow, RowExpectation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Closed set of known query kinds. Anything else takes the `Other` branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QueryKind {
    ImagePreferenceSummary,
    CategoryPreferences,
    PreferenceTimeline,
    Other(String),
}

impl From<String> for QueryKind {
    fn from(value: String) -> Self {
        QueryKind::from_query_id(&value)
    }
}

impl From<QueryKind> for String {
    fn from(kind: QueryKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl QueryKind {
    pub fn from_query_id(id: &str) -> Self {
        match id {
            "image_preference_summary" => QueryKind::ImagePreferenceSummary,
            "category_preferences" => QueryKind::CategoryPreferences,
            "preference_timeline" => QueryKind::PreferenceTimeline,
            other => QueryKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            QueryKind::ImagePreferenceSummary => "image_preference_summary",
            QueryKind::CategoryPreferences => "category_preferences",
            QueryKind::PreferenceTimeline => "preference_timeline",
            QueryKind::Other(id) => id,
        }
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            QueryKind::ImagePreferenceSummary => {
                &["total_image_count", "response_count", "response_rate"]
            }
            QueryKind::CategoryPreferences => {
                &["category", "selection_count", "total_count", "preference_rate"]
            }
            QueryKind::PreferenceTimeline => &["period", "response_count"],
            QueryKind::Other(_) => &[],
        }
    }

    pub fn default_row_expectation(&self) -> RowExpectation {
        match self {
            QueryKind::ImagePreferenceSummary => RowExpectation::Exact { count: 1 },
            QueryKind::CategoryPreferences | QueryKind::PreferenceTimeline => {
                RowExpectation::AtLeast { min: 1 }
            }
            QueryKind::Other(_) => RowExpectation::Any,
        }
    }

    /// Whether an empty result set is a plausible answer rather than a fault.
    pub fn empty_is_plausible(&self) -> bool {
        !matches!(self, QueryKind::ImagePreferenceSummary)
    }

    /// Kinds that get extra executor attempts.
    pub fn is_priority(&self) -> bool {
        matches!(self, QueryKind::ImagePreferenceSummary)
    }

    /// Run the kind's field-level checks and return its coverage ratio, if the
    /// kind defines one.
    pub fn check_rows(
        &self,
        rows: &[ResultRow],
        constants: &ScoringConstants,
        result: &mut ValidationResult,
    ) -> Option<f64> {
        match self {
            QueryKind::ImagePreferenceSummary => check_summary(rows, constants, result),
            QueryKind::CategoryPreferences => check_categories(rows, constants, result),
            QueryKind::PreferenceTimeline => {
                check_timeline(rows, result);
                None
            }
            QueryKind::Other(_) => {
                check_column_consistency(rows, result);
                None
            }
        }
    }
}

/// Numeric view of a JSON value; numeric strings count (Postgres `numeric`
/// can arrive either way).
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub(crate) fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

/// Read a numeric field; report non-numeric values and negative counts.
fn numeric_field(
    row: &ResultRow,
    field: &str,
    index: usize,
    non_negative: bool,
    result: &mut ValidationResult,
) -> Option<f64> {
    let value = row.get(field)?;
    if value.is_null() {
        return None;
    }
    let Some(number) = as_number(value) else {
        result.push(
            ValidationIssue::error(
                field,
                IssueKind::InvalidType,
                format!("{field} is not numeric"),
            )
            .actual(value.clone())
            .at_row(index),
        );
        return None;
    };
    if non_negative && number < 0.0 {
        result.push(
            ValidationIssue::error(
                field,
                IssueKind::OutOfRange,
                format!("{field} {number} is negative"),
            )
            .expected(">= 0")
            .actual(number)
            .at_row(index),
        );
    }
    Some(number)
}

fn check_rate_range(field: &str, rate: f64, index: usize, result: &mut ValidationResult) {
    if !(0.0..=100.0).contains(&rate) {
        result.push(
            ValidationIssue::error(
                field,
                IssueKind::OutOfRange,
                format!("{field} {rate} outside valid range 0-100"),
            )
            .expected("0-100")
            .actual(rate)
            .at_row(index),
        );
    }
}

/// `count <= total`, then the stated rate against `100 * count / total`.
#[allow(clippy::too_many_arguments)]
fn check_count_pair(
    count_field: &str,
    total_field: &str,
    rate_field: &str,
    count: Option<f64>,
    total: Option<f64>,
    rate: Option<f64>,
    index: usize,
    constants: &ScoringConstants,
    result: &mut ValidationResult,
) {
    let (Some(count), Some(total)) = (count, total) else {
        return;
    };

    if count > total {
        result.push(
            ValidationIssue::error(
                count_field,
                IssueKind::Inconsistent,
                format!("{count_field} {count} exceeds total count {total} ({total_field})"),
            )
            .expected(format!("<= {total}"))
            .actual(count)
            .at_row(index),
        );
    }

    if let Some(rate) = rate {
        if total > 0.0 {
            let computed = 100.0 * count / total;
            if (computed - rate).abs() > constants.rate_tolerance {
                result.push(
                    ValidationIssue::warning(
                        rate_field,
                        IssueKind::Inconsistent,
                        format!(
                            "{rate_field} {rate:.2} differs from computed {computed:.2} by more than {:.1} points",
                            constants.rate_tolerance
                        ),
                    )
                    .expected(computed)
                    .actual(rate)
                    .at_row(index),
                );
            }
        } else if rate != 0.0 {
            result.push(
                ValidationIssue::warning(
                    rate_field,
                    IssueKind::Inconsistent,
                    format!("{rate_field} {rate:.2} reported with zero {total_field}"),
                )
                .expected(0.0)
                .actual(rate)
                .at_row(index),
            );
        }
    }
}

fn check_summary(
    rows: &[ResultRow],
    constants: &ScoringConstants,
    result: &mut ValidationResult,
) -> Option<f64> {
    let mut coverage = None;
    for (index, row) in rows.iter().enumerate() {
        let total = numeric_field(row, "total_image_count", index, true, result);
        let count = numeric_field(row, "response_count", index, true, result);
        let rate = numeric_field(row, "response_rate", index, false, result);

        if let Some(rate) = rate {
            check_rate_range("response_rate", rate, index, result);
        }
        check_count_pair(
            "response_count",
            "total_image_count",
            "response_rate",
            count,
            total,
            rate,
            index,
            constants,
            result,
        );

        if total == Some(0.0) {
            result.push(
                ValidationIssue::warning(
                    "total_image_count",
                    IssueKind::EmptyResult,
                    "subject has no images assigned",
                )
                .at_row(index),
            );
        }

        if index == 0 {
            coverage = rate.map(|r| (r / 100.0).clamp(0.0, 1.0));
        }
    }

    if let Some(c) = coverage {
        if c < constants.low_coverage_threshold {
            result.push(
                ValidationIssue::info(
                    "response_rate",
                    IssueKind::LowCoverage,
                    format!("response coverage {:.0}% is low", c * 100.0),
                )
                .expected(format!(">= {:.0}%", constants.low_coverage_threshold * 100.0)),
            );
        }
    }
    coverage
}

fn check_categories(
    rows: &[ResultRow],
    constants: &ScoringConstants,
    result: &mut ValidationResult,
) -> Option<f64> {
    let mut seen = HashSet::new();
    let mut answered = 0usize;

    for (index, row) in rows.iter().enumerate() {
        if let Some(category) = row.get("category").and_then(Value::as_str) {
            if !seen.insert(category.to_string()) {
                result.push(
                    ValidationIssue::warning(
                        "category",
                        IssueKind::Duplicate,
                        format!("category '{category}' appears more than once"),
                    )
                    .actual(category)
                    .at_row(index),
                );
            }
        }

        let selected = numeric_field(row, "selection_count", index, true, result);
        let total = numeric_field(row, "total_count", index, true, result);
        let rate = numeric_field(row, "preference_rate", index, false, result);

        if let Some(rate) = rate {
            check_rate_range("preference_rate", rate, index, result);
        }
        check_count_pair(
            "selection_count",
            "total_count",
            "preference_rate",
            selected,
            total,
            rate,
            index,
            constants,
            result,
        );

        if total.is_some_and(|t| t > 0.0) {
            answered += 1;
        }
    }

    if rows.is_empty() {
        return None;
    }
    let coverage = answered as f64 / rows.len() as f64;
    if coverage < constants.low_coverage_threshold {
        result.push(ValidationIssue::info(
            "total_count",
            IssueKind::LowCoverage,
            format!(
                "only {answered} of {} categories have responses",
                rows.len()
            ),
        ));
    }
    Some(coverage)
}

fn check_timeline(rows: &[ResultRow], result: &mut ValidationResult) {
    let mut previous: Option<String> = None;
    let mut seen = HashSet::new();

    for (index, row) in rows.iter().enumerate() {
        numeric_field(row, "response_count", index, true, result);

        let Some(period) = row.get("period").filter(|v| !is_blank(Some(v))) else {
            continue;
        };
        let period = match period {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        if !seen.insert(period.clone()) {
            result.push(
                ValidationIssue::warning(
                    "period",
                    IssueKind::Duplicate,
                    format!("period {period} appears more than once"),
                )
                .at_row(index),
            );
        }
        if let Some(prev) = &previous {
            if period < *prev {
                result.push(
                    ValidationIssue::warning(
                        "period",
                        IssueKind::Ordering,
                        format!("period {period} is out of order after {prev}"),
                    )
                    .at_row(index),
                );
            }
        }
        previous = Some(period);
    }
}

fn check_column_consistency(rows: &[ResultRow], result: &mut ValidationResult) {
    let Some(first) = rows.first() else {
        return;
    };
    let expected: HashSet<&String> = first.keys().collect();
    for (index, row) in rows.iter().enumerate().skip(1) {
        let columns: HashSet<&String> = row.keys().collect();
        if columns != expected {
            result.push(
                ValidationIssue::warning(
                    "*",
                    IssueKind::Inconsistent,
                    "row columns differ from the first row",
                )
                .at_row(index),
            );
        }
    }
}
