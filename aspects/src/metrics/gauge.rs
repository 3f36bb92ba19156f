use super::internal::MetricCore;
use super::MetricsError;
use std::sync::Arc;

/// A metric holding an arbitrary value that can go up and down.
#[derive(Clone, Debug)]
pub struct Gauge {
    core: Arc<MetricCore<f64>>,
}

impl Gauge {
    pub(super) fn new(name: String, label_names: Vec<String>) -> Self {
        Self {
            core: MetricCore::new(name, label_names),
        }
    }

    pub(super) fn core(&self) -> &MetricCore<f64> {
        &self.core
    }

    /// Sets the series selected by `labels` to `value`.
    pub fn set(&self, labels: &[&str], value: f64) -> Result<(), MetricsError> {
        self.core.with_series(labels, |v| *v = value)
    }

    /// Increments the series selected by `labels` by one.
    pub fn inc(&self, labels: &[&str]) -> Result<(), MetricsError> {
        self.add(labels, 1.0)
    }

    /// Decrements the series selected by `labels` by one.
    pub fn dec(&self, labels: &[&str]) -> Result<(), MetricsError> {
        self.add(labels, -1.0)
    }

    /// Adds `delta` (which may be negative) to the series selected by
    /// `labels`.
    pub fn add(&self, labels: &[&str], delta: f64) -> Result<(), MetricsError> {
        self.core.with_series(labels, |v| *v += delta)
    }

    /// Subtracts `delta` from the series selected by `labels`.
    pub fn sub(&self, labels: &[&str], delta: f64) -> Result<(), MetricsError> {
        self.add(labels, -delta)
    }

    /// Current value of the series selected by `labels`, if set.
    pub fn value(&self, labels: &[&str]) -> Result<Option<f64>, MetricsError> {
        self.core.read_series(labels, |v| *v)
    }
}
