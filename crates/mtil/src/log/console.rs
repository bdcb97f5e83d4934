//! Console logging backend.

use super::{MetricLogger, Metrics};

/// Prints metrics through `tracing`, one line per metric group.
pub struct ConsoleLogger;

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self
    }
}

/// Render metrics as `group: a=1.0000, b=2.0000` lines. Names without a
/// slash land in the `misc` group.
pub(crate) fn format_grouped(metrics: &Metrics) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current: Option<&str> = None;
    for (name, value) in metrics {
        let (group, key) = name.rsplit_once('/').unwrap_or(("misc", name.as_str()));
        if current != Some(group) {
            lines.push(format!("{}: {}={:.4}", group, key, value));
            current = Some(group);
        } else if let Some(line) = lines.last_mut() {
            line.push_str(&format!(", {}={:.4}", key, value));
        }
    }
    lines
}

impl MetricLogger for ConsoleLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        tracing::info!("Step {}: {} = {:.4}", step, name, value);
    }

    fn log_metrics(&self, metrics: &Metrics, step: u64) {
        for line in format_grouped(metrics) {
            tracing::info!("Step {}: {}", step, line);
        }
    }
}
