// Central Error Type for the loader connection layer

use crate::application::classify::{classify, ErrorClass, IdempotentKind};
use crate::application::context::CancelReason;
use crate::domain::DriverError;
use std::fmt;
use thiserror::Error;

/// Which side of the migration an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    NotSet,
    Upstream,
    Downstream,
    Internal,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorScope::NotSet => "not-set",
            ErrorScope::Upstream => "upstream",
            ErrorScope::Downstream => "downstream",
            ErrorScope::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of a connection-layer operation
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("database connection not valid: {0}")]
    InvalidConnection(String),

    #[error("connection lost: {0}")]
    ConnectionLost(DriverError),

    #[error("retryable statement error: {0}")]
    Retryable(DriverError),

    #[error("statement failed: {0}")]
    Fatal(DriverError),

    #[error("{kind}: {source}")]
    Idempotent {
        kind: IdempotentKind,
        source: DriverError,
    },

    #[error("reset connection failed: {0}")]
    ResetFailure(DriverError),

    #[error("operation cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("target database error: {0}")]
    Database(DriverError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("[scope={scope}] {source}")]
    Scoped {
        scope: ErrorScope,
        source: Box<LoadError>,
    },
}

/// Result type alias using LoadError
pub type Result<T> = std::result::Result<T, LoadError>;

impl LoadError {
    /// Build the terminal error for a driver failure from its classification
    pub fn from_driver(err: DriverError) -> Self {
        let class = classify(&err);
        Self::from_classified(class, err)
    }

    pub fn from_classified(class: ErrorClass, err: DriverError) -> Self {
        match class {
            ErrorClass::ConnectionLost => LoadError::ConnectionLost(err),
            ErrorClass::Retryable => LoadError::Retryable(err),
            ErrorClass::Fatal => LoadError::Fatal(err),
            ErrorClass::Idempotent(kind) => LoadError::Idempotent { kind, source: err },
        }
    }

    /// Tag with a scope; an already scoped error keeps its original scope
    pub fn with_scope(self, scope: ErrorScope) -> Self {
        match self {
            LoadError::Scoped { .. } => self,
            other => LoadError::Scoped {
                scope,
                source: Box::new(other),
            },
        }
    }

    pub fn scope(&self) -> ErrorScope {
        match self {
            LoadError::Scoped { scope, .. } => *scope,
            _ => ErrorScope::NotSet,
        }
    }

    /// The error without its scope tag
    pub fn root(&self) -> &LoadError {
        match self {
            LoadError::Scoped { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn driver_error(&self) -> Option<&DriverError> {
        match self.root() {
            LoadError::ConnectionLost(e)
            | LoadError::Retryable(e)
            | LoadError::Fatal(e)
            | LoadError::ResetFailure(e)
            | LoadError::Database(e)
            | LoadError::Idempotent { source: e, .. } => Some(e),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), LoadError::Cancelled(_))
    }

    pub fn idempotent_kind(&self) -> Option<IdempotentKind> {
        match self.root() {
            LoadError::Idempotent { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Desired end state already holds; replay-aware callers may treat this as success
    pub fn is_idempotent(&self) -> bool {
        self.idempotent_kind().is_some()
    }

    pub fn is_db_exists(&self) -> bool {
        self.idempotent_kind() == Some(IdempotentKind::DatabaseExists)
    }

    pub fn is_table_exists(&self) -> bool {
        self.idempotent_kind() == Some(IdempotentKind::TableExists)
    }

    pub fn is_dup_entry(&self) -> bool {
        self.idempotent_kind() == Some(IdempotentKind::DuplicateEntry)
    }
}
