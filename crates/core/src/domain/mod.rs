// Domain Layer - Values, raw driver errors and the target descriptor

pub mod config;
pub mod driver_error;
pub mod value;

// Re-exports
pub use config::TargetConfig;
pub use driver_error::{DriverError, DriverErrorKind};
pub use value::{ResultSet, SqlValue};
