use crate::util::errors::Error;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use tokio::time::Instant;
use tracing::warn;

#[derive(Clone)]
pub struct Metrics {
    pub operations: IntCounterVec,
    pub failures: IntCounterVec,
    pub teardown_skipped: IntCounter,
    pub operation_duration: HistogramVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let operation_duration = HistogramVec::new(
            histogram_opts!(
                "janitor_operation_duration_seconds",
                "The duration of an operation to complete in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["operation"],
        )
        .unwrap_or_else(|e| panic!("invalid histogram definition: {e}"));
        let failures = IntCounterVec::new(
            opts!("janitor_operation_errors_total", "failed operations"),
            &["operation", "error"],
        )
        .unwrap_or_else(|e| panic!("invalid counter definition: {e}"));
        let operations = IntCounterVec::new(opts!("janitor_operations_total", "operations"), &["operation"])
            .unwrap_or_else(|e| panic!("invalid counter definition: {e}"));
        let teardown_skipped = IntCounter::new(
            "janitor_teardown_skipped_total",
            "objects or listings left unprocessed by a best-effort teardown",
        )
        .unwrap_or_else(|e| panic!("invalid counter definition: {e}"));
        Metrics {
            operations,
            failures,
            teardown_skipped,
            operation_duration,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.operation_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.operations.clone()))?;
        registry.register(Box::new(self.teardown_skipped.clone()))?;
        Ok(self)
    }

    pub fn operation_failure(&self, operation: &str, e: &Error) {
        warn!(operation, error = %e, "operation failed");
        self.failures
            .with_label_values(&[operation, e.metric_label().as_ref()])
            .inc()
    }

    pub fn teardown_skipped(&self, count: usize) {
        self.teardown_skipped.inc_by(count as u64);
    }

    pub fn count_and_measure(&self, operation: &str) -> OperationMeasurer {
        self.operations.with_label_values(&[operation]).inc();
        OperationMeasurer {
            start: Instant::now(),
            metric: self.operation_duration.clone(),
            operation: operation.to_string(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct OperationMeasurer {
    start: Instant,
    metric: HistogramVec,
    operation: String,
}

impl Drop for OperationMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[self.operation.as_str()])
            .observe(duration);
    }
}
