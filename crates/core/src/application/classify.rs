//! Error classification for downstream driver failures
//!
//! Pure predicates: nothing here touches a connection. The retry loop decides
//! what to do with the class (see `retry::RetryPolicy::decide`).

use crate::domain::{DriverError, DriverErrorKind};
use std::fmt;
use std::io;

/// MySQL / TiDB error numbers the classifier knows about
pub mod error_code {
    pub const ER_DB_CREATE_EXISTS: u16 = 1007;
    pub const ER_TABLE_EXISTS: u16 = 1050;
    pub const ER_SERVER_SHUTDOWN: u16 = 1053;
    pub const ER_DUP_ENTRY: u16 = 1062;
    pub const ER_UNKNOWN: u16 = 1105;
    pub const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
    pub const ER_LOCK_DEADLOCK: u16 = 1213;
    pub const ER_QUERY_INTERRUPTED: u16 = 1317;
    pub const ER_CONNECTION_KILLED: u16 = 1927;
    pub const CR_SERVER_GONE_ERROR: u16 = 2006;
    pub const CR_SERVER_LOST: u16 = 2013;
    pub const ER_WRITE_CONFLICT_IN_TIDB: u16 = 8005;
    pub const ER_TABLE_LOCKED: u16 = 8020;
    pub const ER_PD_SERVER_TIMEOUT: u16 = 9001;
    pub const ER_TIKV_SERVER_TIMEOUT: u16 = 9002;
    pub const ER_TIKV_SERVER_BUSY: u16 = 9003;
    pub const ER_RESOLVE_LOCK_TIMEOUT: u16 = 9004;
    pub const ER_REGION_UNAVAILABLE: u16 = 9005;
    pub const ER_WRITE_CONFLICT: u16 = 9007;
}

use error_code::*;

/// Outcome of classifying one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Handle is unusable; replace it before the next attempt
    ConnectionLost,
    /// Transient statement-level condition; wait and try again
    Retryable,
    Fatal,
    /// Desired end state already holds
    Idempotent(IdempotentKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotentKind {
    DatabaseExists,
    TableExists,
    DuplicateEntry,
}

impl fmt::Display for IdempotentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdempotentKind::DatabaseExists => "database already exists",
            IdempotentKind::TableExists => "table already exists",
            IdempotentKind::DuplicateEntry => "duplicate entry",
        };
        f.write_str(s)
    }
}

const CONNECTION_LOST_MESSAGES: &[&str] = &[
    "bad connection",
    "invalid connection",
    "broken pipe",
    "connection reset",
];

/// Classify a raw driver error
///
/// Precedence: connection loss, then idempotent outcomes, then retryable
/// conditions; everything else is fatal.
pub fn classify(err: &DriverError) -> ErrorClass {
    if is_connection_error(err) {
        return ErrorClass::ConnectionLost;
    }
    if let Some(kind) = idempotent_kind(err) {
        return ErrorClass::Idempotent(kind);
    }
    if is_retryable_error(err) {
        return ErrorClass::Retryable;
    }
    ErrorClass::Fatal
}

/// Transport or driver-level loss of the underlying handle
pub fn is_connection_error(err: &DriverError) -> bool {
    match err.kind() {
        DriverErrorKind::BadConnection => true,
        DriverErrorKind::Io(kind) => {
            matches!(
                kind,
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::NotConnected
            ) || mentions_connection_loss(err.message())
        }
        DriverErrorKind::Database => matches!(
            err.code(),
            Some(CR_SERVER_GONE_ERROR | CR_SERVER_LOST | ER_SERVER_SHUTDOWN | ER_CONNECTION_KILLED)
        ),
        DriverErrorKind::Other => mentions_connection_loss(err.message()),
        DriverErrorKind::PoolTimedOut | DriverErrorKind::PoolClosed => false,
    }
}

fn mentions_connection_loss(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    CONNECTION_LOST_MESSAGES.iter().any(|m| lower.contains(m))
}

/// Dialect-specific transient conditions
pub fn is_retryable_error(err: &DriverError) -> bool {
    if err.kind() != DriverErrorKind::Database {
        return false;
    }
    matches!(
        err.code(),
        Some(
            ER_UNKNOWN
                | ER_LOCK_WAIT_TIMEOUT
                | ER_LOCK_DEADLOCK
                | ER_QUERY_INTERRUPTED
                | ER_WRITE_CONFLICT_IN_TIDB
                | ER_TABLE_LOCKED
                | ER_PD_SERVER_TIMEOUT
                | ER_TIKV_SERVER_TIMEOUT
                | ER_TIKV_SERVER_BUSY
                | ER_RESOLVE_LOCK_TIMEOUT
                | ER_REGION_UNAVAILABLE
                | ER_WRITE_CONFLICT
        )
    )
}

pub fn idempotent_kind(err: &DriverError) -> Option<IdempotentKind> {
    if err.kind() != DriverErrorKind::Database {
        return None;
    }
    match err.code()? {
        ER_DB_CREATE_EXISTS => Some(IdempotentKind::DatabaseExists),
        ER_TABLE_EXISTS => Some(IdempotentKind::TableExists),
        ER_DUP_ENTRY => Some(IdempotentKind::DuplicateEntry),
        _ => None,
    }
}
