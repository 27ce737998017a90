//! Reconciler metrics
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the embedding process.

use std::time::Duration;

/// Metrics for one resource kind's reconciler
#[derive(Clone)]
pub struct ReconcilerMetrics {
    /// Counter for create/read/update/delete calls
    pub operations: ::metrics::Counter,
    /// Counter for mutating gateway calls issued
    pub mutations: ::metrics::Counter,
    /// Counter for operations that returned an error
    pub errors: ::metrics::Counter,
    /// Histogram for time spent in convergence waits
    pub convergence_wait: ::metrics::Histogram,
}

impl ReconcilerMetrics {
    /// Create metrics labelled with the resource kind (`topic`, `role_binding`)
    pub fn new(kind: &'static str) -> Self {
        Self {
            operations: ::metrics::counter!(
                "cplatform_reconciler_operations_total",
                "kind" => kind
            ),
            mutations: ::metrics::counter!("cplatform_reconciler_mutations_total", "kind" => kind),
            errors: ::metrics::counter!("cplatform_reconciler_errors_total", "kind" => kind),
            convergence_wait: ::metrics::histogram!(
                "cplatform_convergence_wait_seconds",
                "kind" => kind
            ),
        }
    }

    pub(crate) fn record_wait(&self, elapsed: Duration) {
        self.convergence_wait.record(elapsed.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder() {
        // No recorder installed: handles are no-ops
        let metrics = ReconcilerMetrics::new("topic");
        metrics.operations.increment(1);
        metrics.mutations.increment(2);
        metrics.errors.increment(1);
        metrics.record_wait(Duration::from_millis(1500));
    }
}
