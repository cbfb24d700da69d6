use serde::{Deserialize, Serialize};

/// Summary statistics over a set of execution times, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation; zero with fewer than two samples.
    pub stdev: f64,
}

impl TimingStats {
    /// `None` for an empty sample. Non-finite values are ignored.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let mut values: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let median = if count % 2 == 0 {
            (values[count / 2 - 1] + values[count / 2]) / 2.0
        } else {
            values[count / 2]
        };
        let stdev = if count > 1 {
            let variance =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        Some(Self {
            count,
            mean,
            median,
            min: values[0],
            max: values[count - 1],
            stdev,
        })
    }

    /// Whether spread is large relative to the mean.
    pub fn is_variable(&self, ratio: f64) -> bool {
        self.count > 1 && self.stdev > ratio * self.mean
    }
}
