use super::{Notification, Severity};
use serde::{Deserialize, Serialize};

/// A reusable notification shape with `{var}` placeholders.
///
/// Placeholders are substituted from a parameter map; a placeholder with no
/// matching parameter is left as the literal `{var}` text.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Template {
    /// Template name, used by `create_from_template`.
    pub name: String,
    /// Title with `{var}` placeholders.
    pub title: String,
    /// Message with `{var}` placeholders.
    pub message: String,
    /// Severity applied unless overridden by a `severity` parameter.
    pub severity: Severity,
}

impl Template {
    /// Creates a template.
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            message: message.into(),
            severity,
        }
    }

    /// Instantiates the template with the given parameters.
    ///
    /// Values are stringified JSON-style, except plain strings which render
    /// without quotes. A `severity` parameter naming a [`Severity`] variant
    /// overrides the template's default.
    pub fn render(&self, params: &serde_json::Map<String, serde_json::Value>) -> Notification {
        let severity = params
            .get("severity")
            .and_then(|value| value.as_str())
            .and_then(Severity::parse)
            .unwrap_or(self.severity);

        Notification::new(
            substitute(&self.title, params),
            substitute(&self.message, params),
            severity,
        )
    }
}

fn substitute(text: &str, params: &serde_json::Map<String, serde_json::Value>) -> String {
    let mut out = text.to_owned();

    for (key, value) in params {
        let placeholder = format!("{{{key}}}");

        if !out.contains(&placeholder) {
            continue;
        }

        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        out = out.replace(&placeholder, &rendered);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn placeholders_are_substituted() {
        let template = Template::new(
            "disk",
            "Disk {disk} almost full",
            "Disk {disk} is at {percent}% capacity",
            Severity::High,
        );
        let notification = template.render(&params(&[
            ("disk", json!("/dev/sda1")),
            ("percent", json!(93)),
        ]));

        assert_eq!(notification.title, "Disk /dev/sda1 almost full");
        assert_eq!(notification.message, "Disk /dev/sda1 is at 93% capacity");
        assert_eq!(notification.severity, Severity::High);
    }

    #[test]
    fn unknown_placeholders_stay_literal() {
        let template = Template::new("t", "Hello {name}", "{missing} here", Severity::Info);
        let notification = template.render(&params(&[("name", json!("ada"))]));

        assert_eq!(notification.title, "Hello ada");
        assert_eq!(notification.message, "{missing} here");
    }

    #[test]
    fn severity_parameter_overrides_the_default() {
        let template = Template::new("t", "x", "y", Severity::Info);
        let notification = template.render(&params(&[("severity", json!("critical"))]));

        assert_eq!(notification.severity, Severity::Critical);
    }

    #[test]
    fn unparsable_severity_keeps_the_default() {
        let template = Template::new("t", "x", "y", Severity::Medium);
        let notification = template.render(&params(&[("severity", json!("loud"))]));

        assert_eq!(notification.severity, Severity::Medium);
    }
}
