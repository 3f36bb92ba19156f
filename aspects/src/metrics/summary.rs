use super::internal::MetricCore;
use super::MetricsError;
use crate::util::Ring;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Number of most-recent samples a summary retains per series.
pub const DEFAULT_SUMMARY_WINDOW: usize = 1024;

pub(super) struct SummarySeries {
    pub(super) window: Ring<f64>,
    pub(super) sum: f64,
    pub(super) count: u64,
}

impl Default for SummarySeries {
    fn default() -> Self {
        Self {
            window: Ring::new(DEFAULT_SUMMARY_WINDOW),
            sum: 0.0,
            count: 0,
        }
    }
}

/// Nearest-rank quantile over a sorted window: the sample at index
/// `⌊q·(n−1)+0.5⌋`, clamped to the window.
pub(super) fn nearest_rank(q: f64, sorted: &[f64]) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let n = sorted.len();
    let idx = (q * (n - 1) as f64 + 0.5).floor() as usize;

    Some(sorted[idx.min(n - 1)])
}

impl SummarySeries {
    pub(super) fn sorted_window(&self) -> Vec<f64> {
        let mut values: Vec<f64> = self.window.iter().copied().collect();

        values.sort_by(|a, b| a.partial_cmp(b).expect("no NaN samples"));
        values
    }
}

/// A sliding-window quantile estimator.
///
/// Retains the last [`DEFAULT_SUMMARY_WINDOW`] samples per series in
/// insertion order; quantiles are computed against a sorted copy on query.
#[derive(Clone)]
pub struct Summary {
    core: Arc<MetricCore<SummarySeries>>,
}

impl Summary {
    pub(super) fn new(name: String, label_names: Vec<String>) -> Self {
        Self {
            core: MetricCore::new(name, label_names),
        }
    }

    pub(super) fn core(&self) -> &MetricCore<SummarySeries> {
        &self.core
    }

    /// Records an observation into the series selected by `labels`.
    ///
    /// NaN observations are ignored; they have no meaningful rank.
    pub fn observe(&self, labels: &[&str], value: f64) -> Result<(), MetricsError> {
        self.core.with_series(labels, |series| {
            if value.is_nan() {
                return;
            }

            series.window.push(value);
            series.sum += value;
            series.count += 1;
        })
    }

    /// The requested quantiles of the series selected by `labels`.
    ///
    /// Quantiles are keyed by their printed form (e.g. `"0.5"`). An empty or
    /// absent series yields an empty map.
    pub fn quantiles(
        &self,
        labels: &[&str],
        quantiles: &[f64],
    ) -> Result<BTreeMap<String, f64>, MetricsError> {
        let result = self.core.read_series(labels, |series| {
            let sorted = series.sorted_window();

            quantiles
                .iter()
                .filter_map(|q| nearest_rank(*q, &sorted).map(|v| (format!("{q}"), v)))
                .collect::<BTreeMap<_, _>>()
        })?;

        Ok(result.unwrap_or_default())
    }

    /// Total number of observations ever recorded for the series.
    pub fn count(&self, labels: &[&str]) -> Result<u64, MetricsError> {
        Ok(self
            .core
            .read_series(labels, |series| series.count)?
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantiles_use_nearest_rank() {
        let s = Summary::new("sizes".to_owned(), vec![]);

        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            s.observe(&[], v).unwrap();
        }

        let q = s.quantiles(&[], &[0.0, 0.5, 1.0]).unwrap();

        assert_eq!(q["0"], 10.0);
        assert_eq!(q["0.5"], 30.0);
        assert_eq!(q["1"], 50.0);
    }

    #[test]
    fn empty_summary_returns_empty_map() {
        let s = Summary::new("sizes".to_owned(), vec![]);

        assert!(s.quantiles(&[], &[0.5, 0.99]).unwrap().is_empty());
    }

    #[test]
    fn window_is_bounded() {
        let s = Summary::new("sizes".to_owned(), vec![]);

        for i in 0..(DEFAULT_SUMMARY_WINDOW + 100) {
            s.observe(&[], i as f64).unwrap();
        }

        // The minimum retained sample is the first one that survived the
        // window, while the lifetime count keeps the full total.
        let q = s.quantiles(&[], &[0.0]).unwrap();

        assert_eq!(q["0"], 100.0);
        assert_eq!(s.count(&[]).unwrap(), (DEFAULT_SUMMARY_WINDOW + 100) as u64);
    }
}
