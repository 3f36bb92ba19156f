//! Export formats for the metric registry.
//!
//! Three formats are supported, none of which can fail:
//!
//! - Prometheus text: one `name{labels} value` line per series, with
//!   `_bucket`/`_sum`/`_count` expansion for histograms and timers and
//!   `quantile` labels for summaries.
//! - JSON: a structured object suitable for programmatic consumption.
//! - Graphite plaintext: dotted paths with `label=value` segments and a Unix
//!   timestamp.

use super::internal::Metric;
use super::summary::nearest_rank;
use super::Registry;
use serde_json::json;

/// Quantiles reported for summaries by the exporters.
const SUMMARY_EXPORT_QUANTILES: &[f64] = &[0.5, 0.9, 0.95, 0.99];

impl Registry {
    /// Renders all metrics in the Prometheus text exposition format.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        for (name, metric) in self.metrics.read().iter() {
            match metric {
                Metric::Counter(c) => {
                    for (labels, value) in c.core().collect(|v| *v) {
                        push_simple_line(&mut out, name, c.core().label_names(), &labels, value);
                    }
                }
                Metric::Gauge(g) => {
                    for (labels, value) in g.core().collect(|v| *v) {
                        push_simple_line(&mut out, name, g.core().label_names(), &labels, value);
                    }
                }
                Metric::Histogram(h) => {
                    let series = h.core().collect(|s| (s.bucket_counts.clone(), s.sum, s.count));

                    push_histogram_lines(&mut out, name, h.core().label_names(), h.bounds(), &series);
                }
                Metric::Timer(t) => {
                    let series = t.core().collect(|s| (s.bucket_counts.clone(), s.sum, s.count));

                    push_histogram_lines(&mut out, name, t.core().label_names(), t.bounds(), &series);
                }
                Metric::Summary(s) => {
                    let series = s.core().collect(|s| (s.sorted_window(), s.sum, s.count));

                    for (labels, (sorted, sum, count)) in &series {
                        for q in SUMMARY_EXPORT_QUANTILES {
                            if let Some(v) = nearest_rank(*q, sorted) {
                                let mut pairs = label_pairs(s.core().label_names(), labels);

                                pairs.push(("quantile".to_owned(), format!("{q}")));
                                push_line(&mut out, name, &pairs, v);
                            }
                        }

                        let pairs = label_pairs(s.core().label_names(), labels);

                        push_line(&mut out, &format!("{name}_sum"), &pairs, *sum);
                        push_line(&mut out, &format!("{name}_count"), &pairs, *count as f64);
                    }
                }
            }
        }

        out
    }

    /// Renders all metrics as a JSON object keyed by metric name.
    pub fn export_json(&self) -> serde_json::Value {
        let mut root = serde_json::Map::new();

        for (name, metric) in self.metrics.read().iter() {
            let entry = match metric {
                Metric::Counter(c) => json!({
                    "kind": "counter",
                    "labels": c.core().label_names(),
                    "series": c
                        .core()
                        .collect(|v| *v)
                        .into_iter()
                        .map(|(labels, value)| {
                            json!({
                                "labels": label_object(c.core().label_names(), &labels),
                                "value": value,
                            })
                        })
                        .collect::<Vec<_>>(),
                }),
                Metric::Gauge(g) => json!({
                    "kind": "gauge",
                    "labels": g.core().label_names(),
                    "series": g
                        .core()
                        .collect(|v| *v)
                        .into_iter()
                        .map(|(labels, value)| {
                            json!({
                                "labels": label_object(g.core().label_names(), &labels),
                                "value": value,
                            })
                        })
                        .collect::<Vec<_>>(),
                }),
                Metric::Histogram(h) => {
                    histogram_json("histogram", h.core(), h.bounds())
                }
                Metric::Timer(t) => histogram_json("timer", t.core(), t.bounds()),
                Metric::Summary(s) => json!({
                    "kind": "summary",
                    "labels": s.core().label_names(),
                    "series": s
                        .core()
                        .collect(|series| (series.sorted_window(), series.sum, series.count))
                        .into_iter()
                        .map(|(labels, (sorted, sum, count))| {
                            let quantiles: serde_json::Map<String, serde_json::Value> =
                                SUMMARY_EXPORT_QUANTILES
                                    .iter()
                                    .filter_map(|q| {
                                        nearest_rank(*q, &sorted)
                                            .map(|v| (format!("{q}"), json!(v)))
                                    })
                                    .collect();

                            json!({
                                "labels": label_object(s.core().label_names(), &labels),
                                "count": count,
                                "sum": sum,
                                "quantiles": quantiles,
                            })
                        })
                        .collect::<Vec<_>>(),
                }),
            };

            root.insert(name.clone(), entry);
        }

        serde_json::Value::Object(root)
    }

    /// Renders all metrics in the Graphite plaintext protocol, stamped with
    /// the current wall-clock time.
    pub fn export_graphite(&self) -> String {
        self.export_graphite_at(chrono::Utc::now().timestamp())
    }

    /// Renders all metrics in the Graphite plaintext protocol with an
    /// explicit Unix timestamp. Histograms, timers and summaries contribute
    /// their `sum` and `count` under dotted suffixes.
    pub fn export_graphite_at(&self, unix_secs: i64) -> String {
        let mut out = String::new();

        for (name, metric) in self.metrics.read().iter() {
            match metric {
                Metric::Counter(c) => {
                    for (labels, value) in c.core().collect(|v| *v) {
                        let path = graphite_path(name, c.core().label_names(), &labels, None);

                        push_graphite_line(&mut out, &path, value, unix_secs);
                    }
                }
                Metric::Gauge(g) => {
                    for (labels, value) in g.core().collect(|v| *v) {
                        let path = graphite_path(name, g.core().label_names(), &labels, None);

                        push_graphite_line(&mut out, &path, value, unix_secs);
                    }
                }
                Metric::Histogram(h) => {
                    graphite_sum_count(&mut out, name, h.core(), unix_secs);
                }
                Metric::Timer(t) => {
                    graphite_sum_count(&mut out, name, t.core(), unix_secs);
                }
                Metric::Summary(s) => {
                    for (labels, (sum, count)) in s.core().collect(|s| (s.sum, s.count)) {
                        let sum_path =
                            graphite_path(name, s.core().label_names(), &labels, Some("sum"));
                        let count_path =
                            graphite_path(name, s.core().label_names(), &labels, Some("count"));

                        push_graphite_line(&mut out, &sum_path, sum, unix_secs);
                        push_graphite_line(&mut out, &count_path, count as f64, unix_secs);
                    }
                }
            }
        }

        out
    }
}

fn histogram_json(
    kind: &str,
    core: &super::internal::MetricCore<super::histogram::HistogramSeries>,
    bounds: &[f64],
) -> serde_json::Value {
    json!({
        "kind": kind,
        "labels": core.label_names(),
        "series": core
            .collect(|s| (s.bucket_counts.clone(), s.sum, s.count))
            .into_iter()
            .map(|(labels, (counts, sum, count))| {
                let buckets: Vec<_> = bounds
                    .iter()
                    .zip(counts.iter().chain(std::iter::repeat(&0)))
                    .map(|(le, c)| json!({"le": le, "count": c}))
                    .collect();

                json!({
                    "labels": label_object(core.label_names(), &labels),
                    "count": count,
                    "sum": sum,
                    "buckets": buckets,
                })
            })
            .collect::<Vec<_>>(),
    })
}

fn graphite_sum_count(
    out: &mut String,
    name: &str,
    core: &super::internal::MetricCore<super::histogram::HistogramSeries>,
    unix_secs: i64,
) {
    for (labels, (sum, count)) in core.collect(|s| (s.sum, s.count)) {
        let sum_path = graphite_path(name, core.label_names(), &labels, Some("sum"));
        let count_path = graphite_path(name, core.label_names(), &labels, Some("count"));

        push_graphite_line(out, &sum_path, sum, unix_secs);
        push_graphite_line(out, &count_path, count as f64, unix_secs);
    }
}

fn push_histogram_lines(
    out: &mut String,
    name: &str,
    label_names: &[String],
    bounds: &[f64],
    series: &[(Vec<String>, (Vec<u64>, f64, u64))],
) {
    for (labels, (counts, sum, count)) in series {
        for (bound, bucket_count) in bounds.iter().zip(counts.iter().chain(std::iter::repeat(&0))) {
            let mut pairs = label_pairs(label_names, labels);

            pairs.push(("le".to_owned(), format!("{bound}")));
            push_line(out, &format!("{name}_bucket"), &pairs, *bucket_count as f64);
        }

        let mut inf_pairs = label_pairs(label_names, labels);

        inf_pairs.push(("le".to_owned(), "+Inf".to_owned()));
        push_line(out, &format!("{name}_bucket"), &inf_pairs, *count as f64);

        let pairs = label_pairs(label_names, labels);

        push_line(out, &format!("{name}_sum"), &pairs, *sum);
        push_line(out, &format!("{name}_count"), &pairs, *count as f64);
    }
}

fn push_simple_line(
    out: &mut String,
    name: &str,
    label_names: &[String],
    labels: &[String],
    value: f64,
) {
    push_line(out, name, &label_pairs(label_names, labels), value);
}

fn push_line(out: &mut String, name: &str, pairs: &[(String, String)], value: f64) {
    out.push_str(name);

    if !pairs.is_empty() {
        out.push('{');

        for (i, (k, v)) in pairs.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }

            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&escape_label_value(v));
            out.push('"');
        }

        out.push('}');
    }

    out.push(' ');
    out.push_str(&format!("{value}"));
    out.push('\n');
}

fn push_graphite_line(out: &mut String, path: &str, value: f64, unix_secs: i64) {
    out.push_str(&format!("{path} {value} {unix_secs}\n"));
}

fn graphite_path(
    name: &str,
    label_names: &[String],
    labels: &[String],
    suffix: Option<&str>,
) -> String {
    let mut path = name.to_owned();

    for (k, v) in label_names.iter().zip(labels) {
        path.push('.');
        path.push_str(k);
        path.push('=');
        path.push_str(v);
    }

    if let Some(suffix) = suffix {
        path.push('.');
        path.push_str(suffix);
    }

    path
}

fn label_pairs(label_names: &[String], labels: &[String]) -> Vec<(String, String)> {
    label_names
        .iter()
        .cloned()
        .zip(labels.iter().cloned())
        .collect()
}

fn label_object(label_names: &[String], labels: &[String]) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = label_names
        .iter()
        .zip(labels)
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();

    serde_json::Value::Object(map)
}

fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());

    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }

    escaped
}
