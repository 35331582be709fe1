// sqlx error mapping

use migra_core::domain::{DriverError, DriverErrorKind};
use sqlx::mysql::MySqlDatabaseError;

/// Map a sqlx error to a driver-neutral `DriverError`
///
/// Server errors keep their MySQL error number and SQLSTATE so the classifier
/// can act on them; transport failures keep their io kind.
pub fn map_sqlx_error(err: sqlx::Error) -> DriverError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let number = db_err
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|e| e.number());
            let mapped =
                DriverError::new(DriverErrorKind::Database, db_err.message()).with_code(number);
            match db_err.code() {
                Some(sqlstate) => mapped.with_sqlstate(sqlstate),
                None => mapped,
            }
        }
        sqlx::Error::Io(io_err) => DriverError::io(io_err.kind(), io_err.to_string()),
        // Stream is desynchronized or the connection worker died: handle is unusable
        sqlx::Error::Protocol(_) | sqlx::Error::WorkerCrashed => {
            DriverError::bad_connection(err.to_string())
        }
        sqlx::Error::PoolTimedOut => {
            DriverError::new(DriverErrorKind::PoolTimedOut, err.to_string())
        }
        sqlx::Error::PoolClosed => DriverError::pool_closed(err.to_string()),
        _ => DriverError::other(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migra_core::application::{classify, ErrorClass};
    use std::io;

    #[test]
    fn test_io_error_keeps_kind() {
        let err = map_sqlx_error(sqlx::Error::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )));
        assert_eq!(err.kind(), DriverErrorKind::Io(io::ErrorKind::ConnectionReset));
        assert_eq!(classify(&err), ErrorClass::ConnectionLost);
    }

    #[test]
    fn test_protocol_error_is_bad_connection() {
        let err = map_sqlx_error(sqlx::Error::Protocol("unexpected packet".to_string()));
        assert_eq!(err.kind(), DriverErrorKind::BadConnection);
        assert_eq!(classify(&err), ErrorClass::ConnectionLost);

        let err = map_sqlx_error(sqlx::Error::WorkerCrashed);
        assert_eq!(classify(&err), ErrorClass::ConnectionLost);
    }

    #[test]
    fn test_pool_errors_are_fatal() {
        let err = map_sqlx_error(sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind(), DriverErrorKind::PoolTimedOut);
        assert_eq!(classify(&err), ErrorClass::Fatal);

        let err = map_sqlx_error(sqlx::Error::PoolClosed);
        assert_eq!(err.kind(), DriverErrorKind::PoolClosed);
        assert_eq!(classify(&err), ErrorClass::Fatal);
    }

    #[test]
    fn test_other_errors() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), DriverErrorKind::Other);
        assert!(err.code().is_none());
    }
}
