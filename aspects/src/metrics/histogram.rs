use super::internal::MetricCore;
use super::MetricsError;
use std::sync::Arc;

/// Default bucket upper bounds, in seconds, suitable for request latencies.
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Per-series histogram state.
///
/// `bucket_counts` holds cumulative counts: slot `i` counts observations
/// `x ≤ bounds[i]`. The vector is sized lazily on first observation.
#[derive(Default)]
pub(super) struct HistogramSeries {
    pub(super) bucket_counts: Vec<u64>,
    pub(super) sum: f64,
    pub(super) count: u64,
}

impl HistogramSeries {
    pub(super) fn observe(&mut self, bounds: &[f64], value: f64) {
        if self.bucket_counts.len() != bounds.len() {
            self.bucket_counts = vec![0; bounds.len()];
        }

        for (slot, bound) in self.bucket_counts.iter_mut().zip(bounds) {
            if value <= *bound {
                *slot += 1;
            }
        }

        self.sum += value;
        self.count += 1;
    }
}

/// A bucketed distribution metric.
///
/// Observing a value increments every bucket whose upper bound is at least
/// that value, so stored counts are already cumulative in the Prometheus
/// `le` sense.
#[derive(Clone)]
pub struct Histogram {
    core: Arc<MetricCore<HistogramSeries>>,
    bounds: Arc<Vec<f64>>,
}

impl Histogram {
    pub(super) fn new(name: String, label_names: Vec<String>, buckets: &[f64]) -> Self {
        let mut bounds: Vec<f64> = buckets
            .iter()
            .copied()
            .filter(|b| b.is_finite())
            .collect();

        bounds.sort_by(|a, b| a.partial_cmp(b).expect("finite bounds"));
        bounds.dedup();

        Self {
            core: MetricCore::new(name, label_names),
            bounds: Arc::new(bounds),
        }
    }

    pub(super) fn core(&self) -> &MetricCore<HistogramSeries> {
        &self.core
    }

    /// The configured bucket upper bounds, ascending.
    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Records an observation into the series selected by `labels`.
    pub fn observe(&self, labels: &[&str], value: f64) -> Result<(), MetricsError> {
        let bounds = Arc::clone(&self.bounds);

        self.core
            .with_series(labels, |series| series.observe(&bounds, value))
    }

    /// Snapshot of the series selected by `labels`, if it has observations.
    pub fn snapshot(&self, labels: &[&str]) -> Result<Option<HistogramSnapshot>, MetricsError> {
        let bounds = Arc::clone(&self.bounds);

        self.core.read_series(labels, |series| HistogramSnapshot {
            buckets: bounds
                .iter()
                .copied()
                .zip(series.bucket_counts.iter().copied())
                .collect(),
            sum: series.sum,
            count: series.count,
        })
    }
}

/// Point-in-time view of one histogram series.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramSnapshot {
    /// `(upper_bound, cumulative_count)` pairs, ascending by bound.
    pub buckets: Vec<(f64, u64)>,
    /// Sum of all observed values.
    pub sum: f64,
    /// Total number of observations.
    pub count: u64,
}
