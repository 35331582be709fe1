// Metrics Sink Port (explicit dependency instead of a process-wide registry)

use tracing::debug;

/// Histogram of successful query latency in seconds, labeled (name, source_id)
pub const QUERY_LATENCY_METRIC: &str = "loader_query_duration_seconds";

/// Counter of failed execute attempts, labeled (name, source_id)
pub const EXECUTION_ERROR_METRIC: &str = "loader_execution_error_total";

/// Receiver of the signals emitted by connections
pub trait MetricsSink: Send + Sync {
    fn observe_query_latency(&self, name: &str, source_id: &str, seconds: f64);

    fn inc_execution_error(&self, name: &str, source_id: &str);
}

/// Discards everything
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn observe_query_latency(&self, _name: &str, _source_id: &str, _seconds: f64) {}

    fn inc_execution_error(&self, _name: &str, _source_id: &str) {}
}

/// Emits each signal as a debug event under the `migra::metrics` target,
/// for deployments where a log pipeline stands in for a metrics backend
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn observe_query_latency(&self, name: &str, source_id: &str, seconds: f64) {
        debug!(
            target: "migra::metrics",
            metric = QUERY_LATENCY_METRIC,
            name = %name,
            source_id = %source_id,
            value = seconds,
            "observe"
        );
    }

    fn inc_execution_error(&self, name: &str, source_id: &str) {
        debug!(
            target: "migra::metrics",
            metric = EXECUTION_ERROR_METRIC,
            name = %name,
            source_id = %source_id,
            "inc"
        );
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Mutex, PoisonError};

    type Labels = (String, String);

    /// Records every signal for assertions
    #[derive(Default)]
    pub struct RecordingMetrics {
        latencies: Mutex<Vec<(Labels, f64)>>,
        execution_errors: Mutex<HashMap<Labels, u64>>,
    }

    impl RecordingMetrics {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn latency_observations(&self, name: &str, source_id: &str) -> Vec<f64> {
            self.latencies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|((n, s), _)| n == name && s == source_id)
                .map(|(_, v)| *v)
                .collect()
        }

        pub fn execution_errors(&self, name: &str, source_id: &str) -> u64 {
            self.execution_errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&(name.to_string(), source_id.to_string()))
                .copied()
                .unwrap_or(0)
        }

        /// Number of signals of any kind
        pub fn total_signals(&self) -> u64 {
            let latencies = self
                .latencies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len() as u64;
            let errors: u64 = self
                .execution_errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .sum();
            latencies + errors
        }
    }

    impl MetricsSink for RecordingMetrics {
        fn observe_query_latency(&self, name: &str, source_id: &str, seconds: f64) {
            self.latencies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(((name.to_string(), source_id.to_string()), seconds));
        }

        fn inc_execution_error(&self, name: &str, source_id: &str) {
            *self
                .execution_errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry((name.to_string(), source_id.to_string()))
                .or_insert(0) += 1;
        }
    }
}
