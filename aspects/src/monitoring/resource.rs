use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default number of samples retained per monitor.
pub const DEFAULT_SAMPLE_WINDOW: usize = 256;

/// Category of a monitored resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Processor utilisation.
    Cpu,
    /// Memory consumption.
    Memory,
    /// Disk usage or throughput.
    Disk,
    /// Network throughput or error rates.
    Network,
    /// Anything application-specific.
    Custom,
}

/// One collected measurement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// The measured value.
    pub value: f64,
    /// When it was collected.
    pub collected_at: DateTime<Utc>,
}

type Collector = Arc<dyn Fn() -> crate::Result<f64> + Send + Sync>;

/// A periodic measurement source.
///
/// The monitoring loop invokes the collector whenever at least `interval`
/// has passed since the previous sample; results land in a bounded window
/// of [`DEFAULT_SAMPLE_WINDOW`] samples. A failing collector skips the
/// sample and never disturbs the loop.
#[derive(Clone)]
pub struct ResourceMonitor {
    name: String,
    kind: ResourceKind,
    interval: Duration,
    threshold: Option<f64>,
    collector: Collector,
}

impl ResourceMonitor {
    /// Creates a monitor collecting every `interval`.
    pub fn new(
        name: impl Into<String>,
        kind: ResourceKind,
        interval: Duration,
        collector: impl Fn() -> crate::Result<f64> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            interval,
            threshold: None,
            collector: Arc::new(collector),
        }
    }

    /// Attaches an advisory threshold, surfaced in dashboards.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// The monitor's unique name, also usable as an alert condition metric.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resource category.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// The collection interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The advisory threshold, if any.
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    /// Runs the collector once.
    pub(super) fn collect(&self) -> crate::Result<ResourceSample> {
        (self.collector)().map(|value| ResourceSample {
            value,
            collected_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_wraps_the_value_with_a_timestamp() {
        let monitor = ResourceMonitor::new("cpu", ResourceKind::Cpu, Duration::from_secs(1), || {
            Ok(42.5)
        });
        let sample = monitor.collect().unwrap();

        assert_eq!(sample.value, 42.5);
    }

    #[test]
    fn collector_errors_propagate() {
        let monitor =
            ResourceMonitor::new("disk", ResourceKind::Disk, Duration::from_secs(1), || {
                Err("statvfs failed".into())
            });

        assert!(monitor.collect().is_err());
    }
}
