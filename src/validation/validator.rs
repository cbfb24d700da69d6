use super::result::{DataPresence, IssueKind, ValidationIssue, ValidationResult};
use super::rules::{is_blank, QueryKind};
use super::scoring::ScoringConstants;
use crate::query::models::{NamedQuery, ResultRow, RowExpectation};
use serde_json::Value;
use tracing::debug;

/// Turns result sets into `ValidationResult`s. Never fails.
#[derive(Debug, Clone, Default)]
pub struct ResultValidator {
    constants: ScoringConstants,
}

impl ResultValidator {
    pub fn new(constants: ScoringConstants) -> Self {
        Self { constants }
    }

    pub fn constants(&self) -> &ScoringConstants {
        &self.constants
    }

    /// Validate rows returned for a named query.
    pub fn validate(&self, query: &NamedQuery, rows: &[ResultRow]) -> ValidationResult {
        self.validate_rows(&query.kind, query.expected_rows, rows)
    }

    /// Validate rows with the kind's default row expectation.
    pub fn validate_kind(&self, kind: &QueryKind, rows: &[ResultRow]) -> ValidationResult {
        self.validate_rows(kind, kind.default_row_expectation(), rows)
    }

    /// Validate an opaque JSON result: `null`, a single record, or an array of
    /// records. Anything else is classified `invalid`.
    pub fn validate_value(&self, kind: &QueryKind, data: &Value) -> ValidationResult {
        let mut malformed = Vec::new();
        let rows: Vec<ResultRow> = match data {
            Value::Null => {
                malformed.push(ValidationIssue::error(
                    "*",
                    IssueKind::MalformedInput,
                    "result set is missing (null)",
                ));
                Vec::new()
            }
            Value::Object(map) => vec![map.clone()],
            Value::Array(items) => items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| match item {
                    Value::Object(map) => Some(map.clone()),
                    other => {
                        malformed.push(
                            ValidationIssue::error(
                                "*",
                                IssueKind::MalformedInput,
                                "row is not a record",
                            )
                            .actual(other.clone())
                            .at_row(index),
                        );
                        None
                    }
                })
                .collect(),
            other => {
                malformed.push(
                    ValidationIssue::error(
                        "*",
                        IssueKind::MalformedInput,
                        "result set is not a list of records",
                    )
                    .actual(other.clone()),
                );
                Vec::new()
            }
        };

        if malformed.is_empty() {
            return self.validate_kind(kind, &rows);
        }

        let mut result = self.validate_kind(kind, &rows);
        for issue in malformed {
            result.push(issue);
        }
        result.data_presence = DataPresence::Invalid;
        result.quality_score = self.constants.score(
            result.error_count,
            result.warning_count,
            None,
            self.completeness(kind, &rows),
        );
        result
    }

    pub fn validate_rows(
        &self,
        kind: &QueryKind,
        expectation: RowExpectation,
        rows: &[ResultRow],
    ) -> ValidationResult {
        let mut result = ValidationResult::new();
        result.row_count = rows.len();

        if rows.is_empty() {
            self.check_empty(kind, expectation, &mut result);
            result.data_presence = DataPresence::Empty;
            result.quality_score = 0.0;
            return result;
        }

        if !expectation.accepts(rows.len()) {
            result.push(
                ValidationIssue::error(
                    "*",
                    IssueKind::RowCount,
                    format!(
                        "expected {} rows, got {}",
                        expectation.describe(),
                        rows.len()
                    ),
                )
                .expected(expectation.describe())
                .actual(rows.len()),
            );
        }

        self.check_required_fields(kind, rows, &mut result);
        let coverage = kind.check_rows(rows, &self.constants, &mut result);
        let completeness = self.completeness(kind, rows);

        result.quality_score = self.constants.score(
            result.error_count,
            result.warning_count,
            coverage,
            completeness,
        );
        result.data_presence = if result.error_count > 0 {
            DataPresence::Invalid
        } else {
            DataPresence::Valid
        };

        debug!(
            kind = %kind,
            rows = rows.len(),
            errors = result.error_count,
            warnings = result.warning_count,
            quality_score = result.quality_score,
            "Validated result set"
        );
        result
    }

    fn check_empty(&self, kind: &QueryKind, expectation: RowExpectation, result: &mut ValidationResult) {
        if expectation.accepts(0) || kind.empty_is_plausible() {
            result.push(ValidationIssue::warning(
                "*",
                IssueKind::EmptyResult,
                "no rows returned",
            ));
        } else {
            result.push(
                ValidationIssue::error(
                    "*",
                    IssueKind::EmptyResult,
                    format!("no rows returned; expected {} rows", expectation.describe()),
                )
                .expected(expectation.describe())
                .actual(0),
            );
        }
    }

    /// One issue per required field, naming how many rows lack it.
    fn check_required_fields(&self, kind: &QueryKind, rows: &[ResultRow], result: &mut ValidationResult) {
        for field in kind.required_fields() {
            let missing: Vec<usize> = rows
                .iter()
                .enumerate()
                .filter(|(_, row)| !row.contains_key(*field))
                .map(|(index, _)| index)
                .collect();
            let blank = rows
                .iter()
                .filter(|row| row.contains_key(*field) && is_blank(row.get(*field)))
                .count();

            if !missing.is_empty() {
                let mut issue = ValidationIssue::error(
                    *field,
                    IssueKind::MissingField,
                    format!(
                        "required field {field} missing in {} of {} rows",
                        missing.len(),
                        rows.len()
                    ),
                );
                if missing.len() == 1 {
                    issue = issue.at_row(missing[0]);
                }
                result.push(issue);
            }
            if blank > 0 {
                result.push(ValidationIssue::warning(
                    *field,
                    IssueKind::EmptyField,
                    format!("required field {field} empty in {blank} of {} rows", rows.len()),
                ));
            }
        }
    }

    /// Share of rows with every required field present and non-empty.
    fn completeness(&self, kind: &QueryKind, rows: &[ResultRow]) -> f64 {
        if rows.is_empty() {
            return 0.0;
        }
        let required = kind.required_fields();
        let complete = rows
            .iter()
            .filter(|row| required.iter().all(|f| !is_blank(row.get(*f))))
            .count();
        complete as f64 / rows.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: Value) -> Vec<ResultRow> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_healthy_summary_scores_high() {
        let validator = ResultValidator::default();
        let result = validator.validate_kind(
            &QueryKind::ImagePreferenceSummary,
            &rows(json!([{"total_image_count": 100, "response_count": 85, "response_rate": 85}])),
        );
        assert!(result.is_valid);
        assert_eq!(result.data_presence, DataPresence::Valid);
        assert!(result.quality_score > 0.8);
    }

    #[test]
    fn test_overflowing_summary_is_invalid() {
        let validator = ResultValidator::default();
        let result = validator.validate_kind(
            &QueryKind::ImagePreferenceSummary,
            &rows(json!([{"total_image_count": 100, "response_count": 150, "response_rate": 150}])),
        );
        assert!(!result.is_valid);
        assert_eq!(result.data_presence, DataPresence::Invalid);
        assert!(result.has_issue_containing("exceeds total count"));
        assert!(result.has_issue_containing("outside valid range 0-100"));
    }

    #[test]
    fn test_empty_is_never_invalid() {
        let validator = ResultValidator::default();

        let plausible = validator.validate_kind(&QueryKind::CategoryPreferences, &[]);
        assert_eq!(plausible.data_presence, DataPresence::Empty);
        assert!(plausible.is_valid);
        assert_eq!(plausible.warning_count, 1);

        let required = validator.validate_kind(&QueryKind::ImagePreferenceSummary, &[]);
        assert_eq!(required.data_presence, DataPresence::Empty);
        assert!(!required.is_valid);
        assert_eq!(required.quality_score, 0.0);
    }

    #[test]
    fn test_missing_and_blank_fields_reduce_completeness() {
        let validator = ResultValidator::default();
        let result = validator.validate_kind(
            &QueryKind::PreferenceTimeline,
            &rows(json!([
                {"period": "2024-01-01", "response_count": 2},
                {"period": "", "response_count": 1},
                {"response_count": 4}
            ])),
        );
        assert_eq!(result.error_count, 1);
        assert!(result.has_issue_containing("required field period missing in 1 of 3 rows"));
        assert!(result.has_issue_containing("required field period empty in 1 of 3 rows"));
        // (1 - 0.2 - 0.05) * 1/3
        assert!((result.quality_score - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_row_count_expectation() {
        let validator = ResultValidator::default();
        let query = NamedQuery::new("image_preference_summary", "SELECT");
        let two = rows(json!([
            {"total_image_count": 1, "response_count": 1, "response_rate": 100},
            {"total_image_count": 1, "response_count": 1, "response_rate": 100}
        ]));
        let result = validator.validate(&query, &two);
        assert!(result.has_issue_containing("expected exactly 1 rows, got 2"));
    }

    #[test]
    fn test_malformed_input_is_invalid() {
        let validator = ResultValidator::default();
        let kind = QueryKind::CategoryPreferences;

        let null = validator.validate_value(&kind, &Value::Null);
        assert_eq!(null.data_presence, DataPresence::Invalid);
        assert!(null.error_count >= 1);

        let scalar = validator.validate_value(&kind, &json!(42));
        assert_eq!(scalar.data_presence, DataPresence::Invalid);

        let mixed = validator.validate_value(&kind, &json!([1, "x"]));
        assert_eq!(mixed.error_count, 2);
        assert_eq!(mixed.data_presence, DataPresence::Invalid);
        assert!((0.0..=1.0).contains(&mixed.quality_score));

        let empty = validator.validate_value(&kind, &json!([]));
        assert_eq!(empty.data_presence, DataPresence::Empty);
    }
}
