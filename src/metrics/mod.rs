/// Metrics and scoring.
///
/// A `ScoringScheme` holds weighted metrics and applies them to joined
/// observation/prediction rows, one threshold at a time. Categorical metrics
/// (probability of detection, false alarm ratio, critical success index)
/// compare both series against the threshold value; continuous metrics
/// (Pearson correlation, normalized Nash-Sutcliffe, linear temporal trend
/// of absolute error) run over the rows where the observed value meets the
/// threshold.
///
/// Every metric reports a raw `value` and a normalized value in [0, 1] that
/// scales against the metric and threshold weights. Undefined results (no
/// events, too few points, zero variance) come back as NaN and are excluded
/// from aggregate totals downstream.

use std::collections::BTreeMap;

use crate::errors::EvaluationError;
use crate::frames::{Frame, Row};

// ----------------------------------------------------------------------------
// Thresholds
// ----------------------------------------------------------------------------

/// A threshold value: one number for every row, or a series keyed by a
/// row-level key column (day of year for seasonal thresholds).
#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdValue {
    Scalar(f64),
    Series(BTreeMap<String, f64>),
}

/// A fully materialized threshold, ready to apply to joined rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub name: String,
    pub weight: f64,
    pub value: ThresholdValue,
    /// Key columns for series thresholds. The observed key is preferred;
    /// the predicted key is the fallback when only that side carries one.
    pub observed_key: Option<String>,
    pub predicted_key: Option<String>,
}

impl Threshold {
    pub fn scalar(name: impl Into<String>, weight: f64, value: f64) -> Self {
        Threshold {
            name: name.into(),
            weight,
            value: ThresholdValue::Scalar(value),
            observed_key: None,
            predicted_key: None,
        }
    }

    /// The threshold value applying to one row, or None when a series
    /// threshold has no entry for the row's key.
    pub fn value_for(&self, row: &Row) -> Option<f64> {
        match &self.value {
            ThresholdValue::Scalar(value) => Some(*value),
            ThresholdValue::Series(series) => {
                let key_column = self
                    .observed_key
                    .as_deref()
                    .or(self.predicted_key.as_deref())?;
                let key = row.get(key_column)?.key_string();
                series.get(&key).copied()
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Metrics
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    ProbabilityOfDetection,
    FalseAlarmRatio,
    CriticalSuccessIndex,
    PearsonCorrelation,
    NormalizedNashSutcliffe,
    LinearErrorTrend,
}

impl MetricKind {
    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::ProbabilityOfDetection => "probability_of_detection",
            MetricKind::FalseAlarmRatio => "false_alarm_ratio",
            MetricKind::CriticalSuccessIndex => "critical_success_index",
            MetricKind::PearsonCorrelation => "pearson_correlation_coefficient",
            MetricKind::NormalizedNashSutcliffe => "normalized_nash_sutcliffe",
            MetricKind::LinearErrorTrend => "linear_temporal_trend_of_absolute_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metric {
    pub kind: MetricKind,
    pub weight: f64,
}

const METRIC_NAMES: &[(&str, MetricKind)] = &[
    ("probabilityofdetection", MetricKind::ProbabilityOfDetection),
    ("pod", MetricKind::ProbabilityOfDetection),
    ("falsealarmratio", MetricKind::FalseAlarmRatio),
    ("far", MetricKind::FalseAlarmRatio),
    ("criticalsuccessindex", MetricKind::CriticalSuccessIndex),
    ("csi", MetricKind::CriticalSuccessIndex),
    ("pearsoncorrelationcoefficient", MetricKind::PearsonCorrelation),
    ("pearsoncorrelation", MetricKind::PearsonCorrelation),
    ("normalizednashsutcliffe", MetricKind::NormalizedNashSutcliffe),
    (
        "normalizednashsutcliffeefficiency",
        MetricKind::NormalizedNashSutcliffe,
    ),
    ("nnse", MetricKind::NormalizedNashSutcliffe),
    (
        "lineartemporaltrendofabsoluteerror",
        MetricKind::LinearErrorTrend,
    ),
    ("trendofabsoluteerror", MetricKind::LinearErrorTrend),
];

/// Lookup keys ignore case, spaces, underscores, and hyphens, so
/// "Probability of Detection" and "probability_of_detection" both resolve.
fn canonical(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

pub fn metric_exists(name: &str) -> bool {
    let key = canonical(name);
    METRIC_NAMES.iter().any(|(candidate, _)| *candidate == key)
}

pub fn get_metric(name: &str, weight: f64) -> Result<Metric, EvaluationError> {
    let key = canonical(name);
    METRIC_NAMES
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, kind)| Metric { kind: *kind, weight })
        .ok_or_else(|| EvaluationError::UnknownMetric(name.to_string()))
}

// ----------------------------------------------------------------------------
// Scores
// ----------------------------------------------------------------------------

/// One metric evaluated against one threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub metric: &'static str,
    /// The metric's raw value (correlation coefficient, raw POD).
    pub value: f64,
    /// The raw value mapped into [0, 1], NaN when undefined.
    pub normalized: f64,
    /// normalized x metric weight x threshold weight.
    pub scaled_value: f64,
    /// metric weight x threshold weight; the most this score can contribute.
    pub weight: f64,
}

impl Score {
    pub fn is_defined(&self) -> bool {
        !self.normalized.is_nan()
    }
}

/// All scores for one evaluated location pair, keyed by threshold.
#[derive(Debug, Clone, Default)]
pub struct MetricResults {
    pub thresholds: Vec<(String, Vec<Score>)>,
}

impl MetricResults {
    /// Sum of scaled values over defined scores.
    pub fn total(&self) -> f64 {
        self.scores().filter(|s| s.is_defined()).map(|s| s.scaled_value).sum()
    }

    /// Sum of weights over defined scores; the highest `total` could be.
    pub fn maximum(&self) -> f64 {
        self.scores().filter(|s| s.is_defined()).map(|s| s.weight).sum()
    }

    pub fn scores(&self) -> impl Iterator<Item = &Score> {
        self.thresholds.iter().flat_map(|(_, scores)| scores.iter())
    }

    /// Normalized values of every defined score.
    pub fn normalized_values(&self) -> Vec<f64> {
        self.scores()
            .filter(|s| s.is_defined())
            .map(|s| s.normalized)
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Scheme
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScoringScheme {
    metrics: Vec<Metric>,
}

impl ScoringScheme {
    pub fn new(metrics: Vec<Metric>) -> Self {
        ScoringScheme { metrics }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Sum of metric weights; the scheme's contribution to one threshold.
    pub fn total_weight(&self) -> f64 {
        self.metrics.iter().map(|metric| metric.weight).sum()
    }

    /// Score one location pair's joined rows against each threshold.
    pub fn score(
        &self,
        data: &Frame,
        observed_field: &str,
        predicted_field: &str,
        thresholds: &[Threshold],
    ) -> MetricResults {
        let mut results = MetricResults::default();

        for threshold in thresholds {
            let pairs = collect_pairs(data, observed_field, predicted_field, threshold);
            let mut scores = Vec::with_capacity(self.metrics.len());
            for metric in &self.metrics {
                let (value, normalized) = compute(metric.kind, &pairs);
                let weight = metric.weight * threshold.weight;
                scores.push(Score {
                    metric: metric.kind.name(),
                    value,
                    normalized,
                    scaled_value: normalized * weight,
                    weight,
                });
            }
            results.thresholds.push((threshold.name.clone(), scores));
        }

        results
    }
}

/// (observed, predicted, threshold value) for every row where all three
/// resolve to numbers.
fn collect_pairs(
    data: &Frame,
    observed_field: &str,
    predicted_field: &str,
    threshold: &Threshold,
) -> Vec<(f64, f64, f64)> {
    data.rows()
        .iter()
        .filter_map(|row| {
            let observed = row.get(observed_field)?.as_number()?;
            let predicted = row.get(predicted_field)?.as_number()?;
            let cutoff = threshold.value_for(row)?;
            Some((observed, predicted, cutoff))
        })
        .collect()
}

fn compute(kind: MetricKind, pairs: &[(f64, f64, f64)]) -> (f64, f64) {
    match kind {
        MetricKind::ProbabilityOfDetection => probability_of_detection(pairs),
        MetricKind::FalseAlarmRatio => false_alarm_ratio(pairs),
        MetricKind::CriticalSuccessIndex => critical_success_index(pairs),
        MetricKind::PearsonCorrelation => pearson_correlation(pairs),
        MetricKind::NormalizedNashSutcliffe => normalized_nash_sutcliffe(pairs),
        MetricKind::LinearErrorTrend => linear_error_trend(pairs),
    }
}

// ----------------------------------------------------------------------------
// Categorical metrics
// ----------------------------------------------------------------------------

struct Contingency {
    hits: f64,
    misses: f64,
    false_alarms: f64,
}

fn contingency(pairs: &[(f64, f64, f64)]) -> Contingency {
    let mut table = Contingency {
        hits: 0.0,
        misses: 0.0,
        false_alarms: 0.0,
    };
    for (observed, predicted, cutoff) in pairs {
        let observed_event = observed >= cutoff;
        let predicted_event = predicted >= cutoff;
        match (observed_event, predicted_event) {
            (true, true) => table.hits += 1.0,
            (true, false) => table.misses += 1.0,
            (false, true) => table.false_alarms += 1.0,
            (false, false) => {}
        }
    }
    table
}

fn probability_of_detection(pairs: &[(f64, f64, f64)]) -> (f64, f64) {
    let table = contingency(pairs);
    let events = table.hits + table.misses;
    if events == 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let pod = table.hits / events;
    (pod, pod)
}

fn false_alarm_ratio(pairs: &[(f64, f64, f64)]) -> (f64, f64) {
    let table = contingency(pairs);
    let warnings = table.hits + table.false_alarms;
    if warnings == 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let far = table.false_alarms / warnings;
    // A low false alarm ratio is the good outcome.
    (far, 1.0 - far)
}

fn critical_success_index(pairs: &[(f64, f64, f64)]) -> (f64, f64) {
    let table = contingency(pairs);
    let denominator = table.hits + table.misses + table.false_alarms;
    if denominator == 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let csi = table.hits / denominator;
    (csi, csi)
}

// ----------------------------------------------------------------------------
// Continuous metrics
// ----------------------------------------------------------------------------

/// Continuous metrics run over the rows where the observed value meets the
/// threshold, so each threshold scores the behavior above its own cutoff.
fn filtered(pairs: &[(f64, f64, f64)]) -> Vec<(f64, f64)> {
    pairs
        .iter()
        .filter(|(observed, _, cutoff)| observed >= cutoff)
        .map(|(observed, predicted, _)| (*observed, *predicted))
        .collect()
}

fn pearson_correlation(pairs: &[(f64, f64, f64)]) -> (f64, f64) {
    let points = filtered(pairs);
    if points.len() < 2 {
        return (f64::NAN, f64::NAN);
    }

    let n = points.len() as f64;
    let mean_observed: f64 = points.iter().map(|(o, _)| o).sum::<f64>() / n;
    let mean_predicted: f64 = points.iter().map(|(_, p)| p).sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut observed_variance = 0.0;
    let mut predicted_variance = 0.0;
    for (observed, predicted) in &points {
        let od = observed - mean_observed;
        let pd = predicted - mean_predicted;
        covariance += od * pd;
        observed_variance += od * od;
        predicted_variance += pd * pd;
    }

    if observed_variance == 0.0 || predicted_variance == 0.0 {
        return (f64::NAN, f64::NAN);
    }

    let r = covariance / (observed_variance.sqrt() * predicted_variance.sqrt());
    // Anticorrelation earns nothing rather than a negative contribution.
    (r, r.max(0.0))
}

fn normalized_nash_sutcliffe(pairs: &[(f64, f64, f64)]) -> (f64, f64) {
    let points = filtered(pairs);
    if points.len() < 2 {
        return (f64::NAN, f64::NAN);
    }

    let n = points.len() as f64;
    let mean_observed: f64 = points.iter().map(|(o, _)| o).sum::<f64>() / n;

    let mut error_sum = 0.0;
    let mut variance_sum = 0.0;
    for (observed, predicted) in &points {
        error_sum += (observed - predicted).powi(2);
        variance_sum += (observed - mean_observed).powi(2);
    }

    if variance_sum == 0.0 {
        return (f64::NAN, f64::NAN);
    }

    let nse = 1.0 - error_sum / variance_sum;
    // 1 / (2 - NSE) maps (-inf, 1] onto (0, 1] with a perfect fit at 1.
    let normalized = 1.0 / (2.0 - nse);
    (nse, normalized)
}

/// Least-squares slope of the absolute error against the sample index.
/// Rows arrive in x-axis order from the join, so the index stands in for
/// time. A flat or shrinking error earns full credit; a growing error loses
/// credit in proportion to how fast it grows relative to its mean.
fn linear_error_trend(pairs: &[(f64, f64, f64)]) -> (f64, f64) {
    let points = filtered(pairs);
    if points.len() < 2 {
        return (f64::NAN, f64::NAN);
    }

    let errors: Vec<f64> = points
        .iter()
        .map(|(observed, predicted)| (predicted - observed).abs())
        .collect();
    let n = errors.len() as f64;
    let mean_index = (n - 1.0) / 2.0;
    let mean_error: f64 = errors.iter().sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut index_variance = 0.0;
    for (index, error) in errors.iter().enumerate() {
        let index_delta = index as f64 - mean_index;
        covariance += index_delta * (error - mean_error);
        index_variance += index_delta * index_delta;
    }
    let slope = covariance / index_variance;

    // A positive slope implies a positive mean error, so the division is
    // safe in the growing branch.
    let normalized = if slope <= 0.0 {
        1.0
    } else {
        (1.0 - slope / mean_error).max(0.0)
    };
    (slope, normalized)
}
