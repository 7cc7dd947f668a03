//! Minimal Prometheus text-format rendering shared by the API and worker processes.

use std::fmt::Write as _;

/// A single named gauge or counter sample, rendered as one Prometheus exposition line.
pub struct Metric {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

impl Metric {
    pub fn new(name: &'static str, help: &'static str, value: f64) -> Self {
        Self {
            name,
            help,
            labels: Vec::new(),
            value,
        }
    }

    pub fn with_label(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.labels.push((key, value.into()));
        self
    }
}

/// Render a set of metrics in Prometheus text exposition format, grouping `HELP`/`TYPE`
/// headers once per metric name.
pub fn render(metrics: &[Metric]) -> String {
    let mut out = String::new();
    let mut seen = std::collections::HashSet::new();

    for metric in metrics {
        if seen.insert(metric.name) {
            let _ = writeln!(out, "# HELP {} {}", metric.name, metric.help);
            let _ = writeln!(out, "# TYPE {} gauge", metric.name);
        }
        if metric.labels.is_empty() {
            let _ = writeln!(out, "{} {}", metric.name, metric.value);
        } else {
            let labels = metric
                .labels
                .iter()
                .map(|(k, v)| format!("{k}=\"{v}\""))
                .collect::<Vec<_>>()
                .join(",");
            let _ = writeln!(out, "{}{{{}}} {}", metric.name, labels, metric.value);
        }
    }
    out
}
