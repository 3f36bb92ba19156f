//! Metrics-related functionality.
//!
//! Aspects provides a simple and ergonomic interface to typed metric
//! primitives:
//!
//! - Use [`Registry`] factory methods ([`Registry::counter`],
//!   [`Registry::gauge`], [`Registry::histogram`], [`Registry::summary`],
//!   [`Registry::timer`]) to define metrics.
//! - Metric handles are cheap to clone and safe to update from any thread.
//! - Use [`Registry::export_prometheus`], [`Registry::export_json`] and
//!   [`Registry::export_graphite`] to obtain reports programmatically.
//!
//! Labeled metrics hold one independent series per label-value tuple. The
//! label arity is fixed when the metric is registered and every observation
//! is checked against it.
//!
//! ```
//! use aspects::metrics::Registry;
//!
//! let registry = Registry::new();
//! let requests = registry.counter("requests_total", &["method"]).unwrap();
//!
//! requests.inc(&["GET"]).unwrap();
//! requests.inc(&["POST"]).unwrap();
//!
//! let text = registry.export_prometheus();
//! assert!(text.contains(r#"requests_total{method="GET"} 1"#));
//! ```

mod counter;
mod export;
mod gauge;
mod histogram;
mod internal;
mod summary;
mod timer;

pub use counter::Counter;
pub use gauge::Gauge;
pub use histogram::{Histogram, HistogramSnapshot, DEFAULT_BUCKETS};
pub use summary::{Summary, DEFAULT_SUMMARY_WINDOW};
pub use timer::{Timer, TimerGuard};

use crate::util::is_valid_metric_name;
use indexmap::IndexMap;
use internal::Metric;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// Errors produced by metric registration and observation.
///
/// All of these indicate programming errors on the caller side; export
/// operations never fail.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The metric name violates the `[A-Za-z_][A-Za-z0-9_]*` convention.
    #[error("invalid metric or label name `{0}`")]
    InvalidName(String),

    /// The name is already registered with a different metric kind.
    #[error("metric `{name}` is already registered as {existing}, requested {requested}")]
    TypeConflict {
        /// The conflicting metric name.
        name: String,
        /// Kind the name was first registered with.
        existing: MetricKind,
        /// Kind requested by the failing call.
        requested: MetricKind,
    },

    /// The name is already registered with a different label set.
    #[error("metric `{0}` is already registered with different label names")]
    LabelNamesConflict(String),

    /// An observation carried the wrong number of label values.
    #[error("metric `{metric}` expects {expected} label value(s), got {got}")]
    LabelArity {
        /// The metric being observed.
        metric: String,
        /// Label arity fixed at registration.
        expected: usize,
        /// Arity supplied by the failing observation.
        got: usize,
    },
}

/// The kind of a registered metric.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonically non-decreasing value.
    Counter,
    /// Arbitrary value that can go up and down.
    Gauge,
    /// Bucketed distribution with sum and count.
    Histogram,
    /// Sliding-window quantile estimator.
    Summary,
    /// Histogram specialised for elapsed-time observations.
    Timer,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
            MetricKind::Timer => "timer",
        };

        f.write_str(name)
    }
}

/// A registry mapping metric names to metrics.
///
/// Registering a name twice with the same kind returns a handle to the
/// existing metric; a different kind fails with
/// [`MetricsError::TypeConflict`].
#[derive(Default)]
pub struct Registry {
    metrics: RwLock<IndexMap<String, Metric>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or looks up) a counter.
    pub fn counter(&self, name: &str, label_names: &[&str]) -> Result<Counter, MetricsError> {
        self.register(name, label_names, MetricKind::Counter, Counter::new, |m| {
            match m {
                Metric::Counter(c) => Some(c.clone()),
                _ => None,
            }
        })
    }

    /// Registers (or looks up) a gauge.
    pub fn gauge(&self, name: &str, label_names: &[&str]) -> Result<Gauge, MetricsError> {
        self.register(name, label_names, MetricKind::Gauge, Gauge::new, |m| match m {
            Metric::Gauge(g) => Some(g.clone()),
            _ => None,
        })
    }

    /// Registers (or looks up) a histogram with the default bucket layout.
    pub fn histogram(&self, name: &str, label_names: &[&str]) -> Result<Histogram, MetricsError> {
        self.histogram_with_buckets(name, label_names, DEFAULT_BUCKETS)
    }

    /// Registers (or looks up) a histogram with explicit bucket upper bounds.
    ///
    /// Buckets are fixed at first registration; later calls return the
    /// existing histogram regardless of the buckets they pass.
    pub fn histogram_with_buckets(
        &self,
        name: &str,
        label_names: &[&str],
        buckets: &[f64],
    ) -> Result<Histogram, MetricsError> {
        self.register(
            name,
            label_names,
            MetricKind::Histogram,
            |name, labels| Histogram::new(name, labels, buckets),
            |m| match m {
                Metric::Histogram(h) => Some(h.clone()),
                _ => None,
            },
        )
    }

    /// Registers (or looks up) a summary with the default sample window.
    pub fn summary(&self, name: &str, label_names: &[&str]) -> Result<Summary, MetricsError> {
        self.register(name, label_names, MetricKind::Summary, Summary::new, |m| {
            match m {
                Metric::Summary(s) => Some(s.clone()),
                _ => None,
            }
        })
    }

    /// Registers (or looks up) a timer.
    pub fn timer(&self, name: &str, label_names: &[&str]) -> Result<Timer, MetricsError> {
        self.register(name, label_names, MetricKind::Timer, Timer::new, |m| match m {
            Metric::Timer(t) => Some(t.clone()),
            _ => None,
        })
    }

    /// Names of all registered metrics, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.metrics.read().keys().cloned().collect()
    }

    /// Removes a metric and all its series. Unknown names are a no-op.
    pub fn unregister(&self, name: &str) {
        self.metrics.write().shift_remove(name);
    }

    fn register<M>(
        &self,
        name: &str,
        label_names: &[&str],
        kind: MetricKind,
        build: impl FnOnce(String, Vec<String>) -> M,
        downcast: impl Fn(&Metric) -> Option<M>,
    ) -> Result<M, MetricsError>
    where
        M: Into<Metric> + Clone,
    {
        if !is_valid_metric_name(name) {
            return Err(MetricsError::InvalidName(name.to_owned()));
        }

        for label in label_names {
            if !is_valid_metric_name(label) {
                return Err(MetricsError::InvalidName((*label).to_owned()));
            }
        }

        let mut metrics = self.metrics.write();

        if let Some(existing) = metrics.get(name) {
            if existing.kind() != kind {
                return Err(MetricsError::TypeConflict {
                    name: name.to_owned(),
                    existing: existing.kind(),
                    requested: kind,
                });
            }

            let labels_match = existing
                .label_names()
                .iter()
                .map(String::as_str)
                .eq(label_names.iter().copied());

            if !labels_match {
                return Err(MetricsError::LabelNamesConflict(name.to_owned()));
            }

            return Ok(downcast(existing).expect("kind already checked"));
        }

        let labels = label_names.iter().map(|l| (*l).to_owned()).collect();
        let metric = build(name.to_owned(), labels);

        metrics.insert(name.to_owned(), metric.clone().into());

        Ok(metric)
    }
}

/// Returns the process-wide convenience registry.
///
/// This is just a lazily constructed [`Registry`] value; code under test
/// should prefer passing an explicit registry so assertions don't observe
/// metrics registered elsewhere in the process.
pub fn default_registry() -> &'static Registry {
    static DEFAULT: Lazy<Registry> = Lazy::new(Registry::new);

    &DEFAULT
}
