// Application Layer - Retry loop, classification and pool lifecycle

pub mod classify;
pub mod connection;
pub mod constants;
pub mod context;
#[cfg(any(test, feature = "fault-injection"))]
pub mod fault;
pub mod pool;
pub mod retry;
pub mod truncate;

// Re-exports
pub use classify::{classify, ErrorClass, IdempotentKind};
pub use connection::Connection;
pub use context::{cancel_channel, CancelHandle, CancelReason, OpContext};
#[cfg(any(test, feature = "fault-injection"))]
pub use fault::{FaultInjector, EXECUTE_FAULT_POINT};
pub use pool::{BaseDbRecovery, ConnectionPool, PoolOptions};
pub use retry::{BackoffShape, RetryAction, RetryPolicy};
