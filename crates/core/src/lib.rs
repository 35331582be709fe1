// Migra Core - Resilient SQL execution for the bulk loader
// NO database driver dependencies: adapters implement the ports

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{ErrorScope, LoadError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
