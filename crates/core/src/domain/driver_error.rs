// Raw driver error, independent of the client library that produced it

use std::fmt;
use std::io;

/// Where a driver failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Server answered with an error packet; `code` holds the server error number
    Database,
    /// Socket-level failure
    Io(io::ErrorKind),
    /// The handle is unusable (closed, desynchronized protocol stream, crashed worker)
    BadConnection,
    /// No connection became available from the base handle in time
    PoolTimedOut,
    /// The base handle has been closed
    PoolClosed,
    Other,
}

/// Error as reported by an underlying database handle, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    kind: DriverErrorKind,
    code: Option<u16>,
    sqlstate: Option<String>,
    message: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            sqlstate: None,
            message: message.into(),
        }
    }

    /// Server error carrying a MySQL error number
    pub fn database(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            ..Self::new(DriverErrorKind::Database, message)
        }
    }

    pub fn io(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Io(kind), message)
    }

    pub fn bad_connection(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::BadConnection, message)
    }

    pub fn pool_closed(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::PoolClosed, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Other, message)
    }

    pub fn with_code(mut self, code: Option<u16>) -> Self {
        self.code = code;
        self
    }

    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    pub fn kind(&self) -> DriverErrorKind {
        self.kind
    }

    pub fn code(&self) -> Option<u16> {
        self.code
    }

    pub fn sqlstate(&self) -> Option<&str> {
        self.sqlstate.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.sqlstate.as_deref()) {
            (Some(code), Some(state)) => write!(f, "Error {} ({}): {}", code, state, self.message),
            (Some(code), None) => write!(f, "Error {}: {}", code, self.message),
            _ => match self.kind {
                DriverErrorKind::Io(kind) => write!(f, "io error ({:?}): {}", kind, self.message),
                DriverErrorKind::BadConnection => write!(f, "bad connection: {}", self.message),
                DriverErrorKind::PoolTimedOut => {
                    write!(f, "timed out waiting for connection: {}", self.message)
                }
                DriverErrorKind::PoolClosed => write!(f, "pool closed: {}", self.message),
                DriverErrorKind::Database | DriverErrorKind::Other => f.write_str(&self.message),
            },
        }
    }
}

impl std::error::Error for DriverError {}
