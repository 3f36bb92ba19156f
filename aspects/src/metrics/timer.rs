use super::histogram::{Histogram, HistogramSnapshot, DEFAULT_BUCKETS};
use super::internal::MetricCore;
use super::MetricsError;
use std::time::{Duration, Instant};

/// A histogram specialised for elapsed-time observations, in seconds.
#[derive(Clone)]
pub struct Timer {
    hist: Histogram,
}

impl Timer {
    pub(super) fn new(name: String, label_names: Vec<String>) -> Self {
        Self {
            hist: Histogram::new(name, label_names, DEFAULT_BUCKETS),
        }
    }

    pub(super) fn core(&self) -> &MetricCore<super::histogram::HistogramSeries> {
        self.hist.core()
    }

    pub(super) fn bounds(&self) -> &[f64] {
        self.hist.bounds()
    }

    /// Starts timing; the returned guard records the elapsed time when
    /// stopped (or dropped).
    pub fn start(&self, labels: &[&str]) -> Result<TimerGuard, MetricsError> {
        // Surface arity errors at start time rather than at the drop site.
        self.hist.snapshot(labels)?;

        Ok(TimerGuard {
            timer: self.clone(),
            labels: labels.iter().map(|l| (*l).to_owned()).collect(),
            started_at: Instant::now(),
            stopped: false,
        })
    }

    /// Records an already-measured duration.
    pub fn observe_duration(
        &self,
        labels: &[&str],
        duration: Duration,
    ) -> Result<(), MetricsError> {
        self.hist.observe(labels, duration.as_secs_f64())
    }

    /// Snapshot of the series selected by `labels`.
    pub fn snapshot(&self, labels: &[&str]) -> Result<Option<HistogramSnapshot>, MetricsError> {
        self.hist.snapshot(labels)
    }
}

/// Guard returned by [`Timer::start`].
///
/// Call [`stop`](TimerGuard::stop) to record and retrieve the elapsed
/// seconds; a guard that is dropped without being stopped records the
/// elapsed time anyway.
pub struct TimerGuard {
    timer: Timer,
    labels: Vec<String>,
    started_at: Instant,
    stopped: bool,
}

impl TimerGuard {
    /// Stops the timer, records the observation and returns the elapsed
    /// seconds.
    pub fn stop(mut self) -> f64 {
        self.stopped = true;
        self.record()
    }

    fn record(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let labels: Vec<&str> = self.labels.iter().map(String::as_str).collect();

        // Arity was validated by `start`; the unlikely failure here would be
        // a bug in this module rather than in the caller.
        let _ = self.timer.hist.observe(&labels, elapsed);

        elapsed
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        if !self.stopped {
            self.record();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_records_an_observation() {
        let t = Timer::new("op_duration_seconds".to_owned(), vec![]);
        let guard = t.start(&[]).unwrap();
        let elapsed = guard.stop();

        assert!(elapsed >= 0.0);

        let snapshot = t.snapshot(&[]).unwrap().unwrap();

        assert_eq!(snapshot.count, 1);
        assert!((snapshot.sum - elapsed).abs() < 1e-9);
    }

    #[test]
    fn dropping_an_unstopped_guard_still_records() {
        let t = Timer::new("op_duration_seconds".to_owned(), vec![]);

        drop(t.start(&[]).unwrap());

        assert_eq!(t.snapshot(&[]).unwrap().unwrap().count, 1);
    }

    #[test]
    fn start_checks_label_arity() {
        let t = Timer::new("op_duration_seconds".to_owned(), vec!["op".to_owned()]);

        assert!(t.start(&[]).is_err());
        assert!(t.start(&["read"]).is_ok());
    }
}
