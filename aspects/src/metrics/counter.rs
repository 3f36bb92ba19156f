use super::internal::MetricCore;
use super::MetricsError;
use std::sync::Arc;

/// A monotonically non-decreasing metric.
///
/// Handles are cheap to clone; clones address the same underlying series.
#[derive(Clone)]
pub struct Counter {
    core: Arc<MetricCore<f64>>,
}

impl Counter {
    pub(super) fn new(name: String, label_names: Vec<String>) -> Self {
        Self {
            core: MetricCore::new(name, label_names),
        }
    }

    pub(super) fn core(&self) -> &MetricCore<f64> {
        &self.core
    }

    /// Increments the series selected by `labels` by one.
    pub fn inc(&self, labels: &[&str]) -> Result<(), MetricsError> {
        self.inc_by(labels, 1.0)
    }

    /// Increments the series selected by `labels` by `delta`.
    ///
    /// Counters are monotonic; a negative or non-finite `delta` is ignored.
    pub fn inc_by(&self, labels: &[&str], delta: f64) -> Result<(), MetricsError> {
        self.core.with_series(labels, |value| {
            if delta.is_finite() && delta > 0.0 {
                *value += delta;
            }
        })
    }

    /// Current value of the series selected by `labels`, if it has ever been
    /// observed.
    pub fn value(&self, labels: &[&str]) -> Result<Option<f64>, MetricsError> {
        self.core.read_series(labels, |value| *value)
    }
}
