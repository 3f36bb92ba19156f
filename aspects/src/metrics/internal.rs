use super::{Counter, Gauge, Histogram, MetricKind, MetricsError, Summary, Timer};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// A registered metric of any kind.
pub(super) enum Metric {
    Counter(Counter),
    Gauge(Gauge),
    Histogram(Histogram),
    Summary(Summary),
    Timer(Timer),
}

impl Metric {
    pub(super) fn kind(&self) -> MetricKind {
        match self {
            Metric::Counter(_) => MetricKind::Counter,
            Metric::Gauge(_) => MetricKind::Gauge,
            Metric::Histogram(_) => MetricKind::Histogram,
            Metric::Summary(_) => MetricKind::Summary,
            Metric::Timer(_) => MetricKind::Timer,
        }
    }

    pub(super) fn label_names(&self) -> &[String] {
        match self {
            Metric::Counter(c) => c.core().label_names(),
            Metric::Gauge(g) => g.core().label_names(),
            Metric::Histogram(h) => h.core().label_names(),
            Metric::Summary(s) => s.core().label_names(),
            Metric::Timer(t) => t.core().label_names(),
        }
    }
}

impl From<Counter> for Metric {
    fn from(value: Counter) -> Self {
        Metric::Counter(value)
    }
}

impl From<Gauge> for Metric {
    fn from(value: Gauge) -> Self {
        Metric::Gauge(value)
    }
}

impl From<Histogram> for Metric {
    fn from(value: Histogram) -> Self {
        Metric::Histogram(value)
    }
}

impl From<Summary> for Metric {
    fn from(value: Summary) -> Self {
        Metric::Summary(value)
    }
}

impl From<Timer> for Metric {
    fn from(value: Timer) -> Self {
        Metric::Timer(value)
    }
}

/// Shared per-metric state: identity plus the label-tuple → series mapping.
///
/// The whole mapping sits behind one mutex; updates to one series are
/// serialised with updates to its siblings, which comfortably covers the
/// "no torn histogram" consistency contract.
#[derive(Debug)]
pub(super) struct MetricCore<S> {
    name: String,
    label_names: Vec<String>,
    series: Mutex<IndexMap<Vec<String>, S>>,
}

impl<S> MetricCore<S> {
    pub(super) fn new(name: String, label_names: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            name,
            label_names,
            series: Mutex::new(IndexMap::new()),
        })
    }

    pub(super) fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn label_names(&self) -> &[String] {
        &self.label_names
    }

    fn check_arity(&self, labels: &[&str]) -> Result<(), MetricsError> {
        if labels.len() != self.label_names.len() {
            return Err(MetricsError::LabelArity {
                metric: self.name.clone(),
                expected: self.label_names.len(),
                got: labels.len(),
            });
        }

        Ok(())
    }

    /// Runs `f` against the series selected by `labels`, creating it first
    /// if needed.
    pub(super) fn with_series<R>(
        &self,
        labels: &[&str],
        f: impl FnOnce(&mut S) -> R,
    ) -> Result<R, MetricsError>
    where
        S: Default,
    {
        self.check_arity(labels)?;

        let key: Vec<String> = labels.iter().map(|l| (*l).to_owned()).collect();
        let mut series = self.series.lock();

        Ok(f(series.entry(key).or_default()))
    }

    /// Runs `f` against the series selected by `labels` if it exists.
    pub(super) fn read_series<R>(
        &self,
        labels: &[&str],
        f: impl FnOnce(&S) -> R,
    ) -> Result<Option<R>, MetricsError> {
        self.check_arity(labels)?;

        let key: Vec<String> = labels.iter().map(|l| (*l).to_owned()).collect();
        let series = self.series.lock();

        Ok(series.get(&key).map(f))
    }

    /// Snapshots every series through `f`, in first-observation order.
    pub(super) fn collect<R>(&self, f: impl Fn(&S) -> R) -> Vec<(Vec<String>, R)> {
        self.series
            .lock()
            .iter()
            .map(|(labels, state)| (labels.clone(), f(state)))
            .collect()
    }
}
