use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Urgency of an alert.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational; no action expected.
    Info,
    /// Needs attention soon.
    Warning,
    /// Needs immediate attention.
    Critical,
}

/// Comparison operator of an alert condition.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpOp {
    /// `value < threshold`
    Lt,
    /// `value <= threshold`
    Le,
    /// `value == threshold`
    Eq,
    /// `value != threshold`
    Ne,
    /// `value >= threshold`
    Ge,
    /// `value > threshold`
    Gt,
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Ge => ">=",
            CmpOp::Gt => ">",
        };

        f.write_str(symbol)
    }
}

impl CmpOp {
    /// Applies the operator to `value` against `threshold`.
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            CmpOp::Lt => value < threshold,
            CmpOp::Le => value <= threshold,
            CmpOp::Eq => value == threshold,
            CmpOp::Ne => value != threshold,
            CmpOp::Ge => value >= threshold,
            CmpOp::Gt => value > threshold,
        }
    }
}

/// The predicate an [`AlertRule`] evaluates against a metric.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertCondition {
    /// Name of the resource monitor or custom metric to inspect.
    pub metric: String,
    /// Comparison operator.
    pub op: CmpOp,
    /// Threshold compared against the latest value.
    pub threshold: f64,
    /// When set, the condition must hold continuously for this long before
    /// the rule fires.
    pub sustained: Option<Duration>,
}

/// A named, severity-classified alerting rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule name.
    pub name: String,
    /// Severity stamped onto produced alerts.
    pub severity: AlertSeverity,
    /// The evaluated predicate.
    pub condition: AlertCondition,
}

impl AlertRule {
    /// Creates a rule that fires on the first true observation.
    pub fn new(
        name: impl Into<String>,
        severity: AlertSeverity,
        metric: impl Into<String>,
        op: CmpOp,
        threshold: f64,
    ) -> Self {
        Self {
            name: name.into(),
            severity,
            condition: AlertCondition {
                metric: metric.into(),
                op,
                threshold,
                sustained: None,
            },
        }
    }

    /// Requires the condition to hold for `duration` before firing.
    pub fn sustained_for(mut self, duration: Duration) -> Self {
        self.condition.sustained = Some(duration);
        self
    }
}

/// A produced alert.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Alert {
    /// Name of the rule that fired.
    pub rule: String,
    /// Severity of the rule.
    pub severity: AlertSeverity,
    /// Human-readable description of the violation.
    pub message: String,
    /// Context captured at firing time (metric name, value, threshold).
    pub metadata: BTreeMap<String, String>,
    /// When the rule fired.
    pub fired_at: DateTime<Utc>,
}

/// Edge-detection state of one rule.
///
/// A rule fires once per truth edge: after firing it stays silent until a
/// false observation re-arms it. With a sustained duration, the first true
/// observation opens a pending phase and the rule fires only once the
/// condition has held for the full duration; any false observation resets
/// the pending phase.
#[derive(Debug, Default)]
pub(super) struct RuleState {
    pending_since: Option<Instant>,
    firing: bool,
}

impl RuleState {
    pub(super) fn observe(
        &mut self,
        rule: &AlertRule,
        value: f64,
        now: Instant,
    ) -> Option<Alert> {
        if !rule.condition.op.holds(value, rule.condition.threshold) {
            self.pending_since = None;
            self.firing = false;

            return None;
        }

        if self.firing {
            return None;
        }

        if let Some(required) = rule.condition.sustained {
            let since = *self.pending_since.get_or_insert(now);

            if now.duration_since(since) < required {
                return None;
            }
        }

        self.firing = true;
        self.pending_since = None;

        Some(build_alert(rule, value))
    }
}

fn build_alert(rule: &AlertRule, value: f64) -> Alert {
    let mut metadata = BTreeMap::new();

    metadata.insert("metric".to_owned(), rule.condition.metric.clone());
    metadata.insert("value".to_owned(), format!("{value}"));
    metadata.insert("threshold".to_owned(), format!("{}", rule.condition.threshold));

    Alert {
        rule: rule.name.clone(),
        severity: rule.severity,
        message: format!(
            "{}: {} {} {} (observed {})",
            rule.name, rule.condition.metric, rule.condition.op, rule.condition.threshold, value,
        ),
        metadata,
        fired_at: Utc::now(),
    }
}
