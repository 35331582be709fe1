// Migra Infrastructure - MySQL Adapter
// Implements: DbConnector, BaseDb, DbHandle over a sqlx MySQL pool

mod connection;
mod error;
mod handle;
mod value;

pub use connection::{connect_options, MySqlBaseDb, MySqlConnector};
pub use error::map_sqlx_error;
pub use handle::MySqlHandle;

// Note: sqlx::Error conversion goes through map_sqlx_error because of the
// orphan rules (cannot implement From<sqlx::Error> for DriverError here)
