use serde::{Deserialize, Serialize};

/// Calibration constants for quality scoring and rate checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConstants {
    pub error_penalty: f64,
    pub warning_penalty: f64,
    pub high_coverage_threshold: f64,
    pub high_coverage_bonus: f64,
    pub medium_coverage_threshold: f64,
    pub medium_coverage_bonus: f64,
    /// Coverage below this earns an informational issue.
    pub low_coverage_threshold: f64,
    /// Allowed drift, in percentage points, between a stated rate and the
    /// rate recomputed from its counts.
    pub rate_tolerance: f64,
}

impl Default for ScoringConstants {
    fn default() -> Self {
        Self {
            error_penalty: 0.2,
            warning_penalty: 0.05,
            high_coverage_threshold: 0.8,
            high_coverage_bonus: 0.1,
            medium_coverage_threshold: 0.5,
            medium_coverage_bonus: 0.05,
            low_coverage_threshold: 0.3,
            rate_tolerance: 1.0,
        }
    }
}

impl ScoringConstants {
    pub fn coverage_bonus(&self, coverage: Option<f64>) -> f64 {
        match coverage {
            Some(c) if c >= self.high_coverage_threshold => self.high_coverage_bonus,
            Some(c) if c >= self.medium_coverage_threshold => self.medium_coverage_bonus,
            _ => 0.0,
        }
    }

    /// Deterministic quality score clamped to `[0, 1]`.
    ///
    /// `completeness` is the share of rows with every required field present
    /// and non-empty.
    pub fn score(
        &self,
        error_count: usize,
        warning_count: usize,
        coverage: Option<f64>,
        completeness: f64,
    ) -> f64 {
        let base = 1.0 - error_count as f64 * self.error_penalty
            - warning_count as f64 * self.warning_penalty
            + self.coverage_bonus(coverage);
        let completeness = if completeness.is_finite() {
            completeness.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let score = base * completeness;
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}
