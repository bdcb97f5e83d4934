//! Metric logger traits and composites.

use super::Metrics;

/// Backend receiving scalar metrics.
pub trait MetricLogger: Send + Sync {
    /// Log a single scalar.
    fn log_scalar(&self, name: &str, value: f64, step: u64);

    /// Log every metric of an update under the same step.
    fn log_metrics(&self, metrics: &Metrics, step: u64) {
        for (name, value) in metrics {
            self.log_scalar(name, *value, step);
        }
    }

    /// Flush pending writes.
    fn close(&self) {}
}

/// Discards everything.
pub struct NoOpLogger;

impl MetricLogger for NoOpLogger {
    fn log_scalar(&self, _name: &str, _value: f64, _step: u64) {}
    fn log_metrics(&self, _metrics: &Metrics, _step: u64) {}
}

/// Dispatches to multiple backends.
#[derive(Default)]
pub struct CompositeLogger {
    loggers: Vec<Box<dyn MetricLogger>>,
}

impl CompositeLogger {
    pub fn new(loggers: Vec<Box<dyn MetricLogger>>) -> Self {
        Self { loggers }
    }

    pub fn add(&mut self, logger: Box<dyn MetricLogger>) {
        self.loggers.push(logger);
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }
}

impl MetricLogger for CompositeLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        for logger in &self.loggers {
            logger.log_scalar(name, value, step);
        }
    }

    fn log_metrics(&self, metrics: &Metrics, step: u64) {
        for logger in &self.loggers {
            logger.log_metrics(metrics, step);
        }
    }

    fn close(&self) {
        for logger in &self.loggers {
            logger.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<(String, f64, u64)>>>,
    }

    impl MetricLogger for Recorder {
        fn log_scalar(&self, name: &str, value: f64, step: u64) {
            self.seen
                .lock()
                .unwrap()
                .push((name.to_string(), value, step));
        }
    }

    #[test]
    fn test_composite_fans_out() {
        let a = Recorder::default();
        let b = Recorder::default();
        let mut composite = CompositeLogger::new(vec![Box::new(a.clone())]);
        composite.add(Box::new(b.clone()));
        assert_eq!(composite.len(), 2);

        let mut metrics = Metrics::new();
        metrics.insert("losses/pi_loss".to_string(), 0.5);
        metrics.insert("returns/mean".to_string(), 1.0);
        composite.log_metrics(&metrics, 3);

        for recorder in [a, b] {
            let seen = recorder.seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[0], ("losses/pi_loss".to_string(), 0.5, 3));
        }
    }
}
