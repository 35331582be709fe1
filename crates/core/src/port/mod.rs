// Port Layer - Interfaces for external dependencies

pub mod database;
pub mod metrics;

// Re-exports
pub use database::{BaseDb, ConnectionRecovery, DbConnector, DbHandle};
pub use metrics::{MetricsSink, NoopMetrics, TracingMetrics};
