//! Statistical outlier detection over per-cycle threat feature vectors.
//!
//! The scorer only sees the [`OutlierStrategy`] / [`OutlierModel`] pair, so the
//! statistical method can be swapped without touching scoring. Models hold no state
//! beyond what `fit` derives from the rolling buffer it is given; they are refitted
//! every cycle.

use serde::{Deserialize, Serialize};

use crate::error::ScoringError;

/// A fitted model that classifies a single feature vector.
pub trait OutlierModel: Send {
    /// Returns `true` when `sample` is an outlier relative to the fitted history.
    fn classify(&self, sample: &[f64]) -> bool;
}

/// Produces an [`OutlierModel`] from a window of historical feature vectors.
pub trait OutlierStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn fit(&self, history: &[Vec<f64>]) -> Result<Box<dyn OutlierModel>, ScoringError>;
}

/// Built-in outlier strategies, selectable from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutlierMethod {
    /// Z-score deviation from the per-dimension mean.
    ZScore {
        /// Deviations (in standard deviations) beyond which a dimension is an outlier.
        threshold: f64,
    },
    /// Interquartile range fences (robust to outliers in the history itself).
    Iqr {
        /// IQR multiplier (1.5 default, 1.0 strict, 3.0 lenient).
        multiplier: f64,
    },
}

impl Default for OutlierMethod {
    fn default() -> Self {
        OutlierMethod::ZScore { threshold: 2.0 }
    }
}

impl OutlierMethod {
    pub fn into_strategy(self) -> Box<dyn OutlierStrategy> {
        match self {
            OutlierMethod::ZScore { threshold } => Box::new(ZScoreStrategy::new(threshold)),
            OutlierMethod::Iqr { multiplier } => Box::new(IqrStrategy::new(multiplier)),
        }
    }
}

/// Per-dimension z-score strategy. A vector is an outlier when any dimension deviates
/// from its historical mean by more than `threshold` standard deviations.
#[derive(Debug, Clone)]
pub struct ZScoreStrategy {
    threshold: f64,
}

impl ZScoreStrategy {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.max(0.1),
        }
    }
}

struct ZScoreModel {
    means: Vec<f64>,
    std_devs: Vec<f64>,
    threshold: f64,
}

impl OutlierModel for ZScoreModel {
    fn classify(&self, sample: &[f64]) -> bool {
        sample
            .iter()
            .zip(self.means.iter().zip(&self.std_devs))
            .any(|(value, (mean, std_dev))| {
                if *std_dev < f64::EPSILON {
                    (value - mean).abs() > f64::EPSILON
                } else {
                    (value - mean).abs() / std_dev > self.threshold
                }
            })
    }
}

impl OutlierStrategy for ZScoreStrategy {
    fn name(&self) -> &str {
        "z_score"
    }

    fn fit(&self, history: &[Vec<f64>]) -> Result<Box<dyn OutlierModel>, ScoringError> {
        let width = validate_history(history)?;
        let mut means = Vec::with_capacity(width);
        let mut std_devs = Vec::with_capacity(width);
        for dim in 0..width {
            let column = column(history, dim);
            let m = mean(&column);
            means.push(m);
            std_devs.push(std_deviation(&column, m));
        }
        Ok(Box::new(ZScoreModel {
            means,
            std_devs,
            threshold: self.threshold,
        }))
    }
}

/// Per-dimension interquartile-range strategy.
#[derive(Debug, Clone)]
pub struct IqrStrategy {
    multiplier: f64,
}

impl IqrStrategy {
    pub fn new(multiplier: f64) -> Self {
        Self {
            multiplier: multiplier.max(0.1),
        }
    }
}

struct IqrModel {
    fences: Vec<(f64, f64)>,
}

impl OutlierModel for IqrModel {
    fn classify(&self, sample: &[f64]) -> bool {
        sample
            .iter()
            .zip(&self.fences)
            .any(|(value, (lower, upper))| value < lower || value > upper)
    }
}

impl OutlierStrategy for IqrStrategy {
    fn name(&self) -> &str {
        "iqr"
    }

    fn fit(&self, history: &[Vec<f64>]) -> Result<Box<dyn OutlierModel>, ScoringError> {
        let width = validate_history(history)?;
        if history.len() < 4 {
            return Err(ScoringError::DegenerateModel {
                reason: format!("IQR needs at least 4 samples, got {}", history.len()),
            });
        }
        let fences = (0..width)
            .map(|dim| {
                let mut sorted = column(history, dim);
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let q1 = percentile(&sorted, 25.0);
                let q3 = percentile(&sorted, 75.0);
                let iqr = q3 - q1;
                (q1 - self.multiplier * iqr, q3 + self.multiplier * iqr)
            })
            .collect();
        Ok(Box::new(IqrModel { fences }))
    }
}

/// Check the history is non-empty, rectangular and finite. Returns its width.
fn validate_history(history: &[Vec<f64>]) -> Result<usize, ScoringError> {
    let Some(first) = history.first() else {
        return Err(ScoringError::DegenerateModel {
            reason: "empty history".into(),
        });
    };
    let width = first.len();
    for row in history {
        if row.len() != width {
            return Err(ScoringError::DimensionMismatch {
                expected: width,
                actual: row.len(),
            });
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(ScoringError::DegenerateModel {
                reason: "history contains non-finite values".into(),
            });
        }
    }
    Ok(width)
}

fn column(history: &[Vec<f64>], dim: usize) -> Vec<f64> {
    history.iter().map(|row| row[dim]).collect()
}

/// Compute the mean of a slice.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population standard deviation given a precomputed mean.
pub fn std_deviation(data: &[f64], mean_val: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let variance = data.iter().map(|x| (x - mean_val).powi(2)).sum::<f64>() / data.len() as f64;
    variance.sqrt()
}

/// Least-squares slope of `data` against its index.
pub fn linear_slope(data: &[f64]) -> f64 {
    let n = data.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(data);
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in data.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den < f64::EPSILON { 0.0 } else { num / den }
}

/// Compute a percentile from sorted data using linear interpolation.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}
