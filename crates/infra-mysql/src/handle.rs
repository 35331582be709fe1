// MySQL underlying handle (one pooled sqlx connection)

use crate::error::map_sqlx_error;
use crate::value::{bind_all, decode_rows};
use async_trait::async_trait;
use migra_core::domain::{DriverError, ResultSet, SqlValue};
use migra_core::port::DbHandle;
use sqlx::mysql::{MySql, MySqlConnection};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Executor};
use tracing::warn;

/// Exclusively owned pooled connection
///
/// After `close` the slot is empty and every call fails with a bad-connection
/// error, which the classifier treats as a lost connection.
pub struct MySqlHandle {
    conn: Option<PoolConnection<MySql>>,
}

impl MySqlHandle {
    pub(crate) fn new(conn: PoolConnection<MySql>) -> Self {
        Self { conn: Some(conn) }
    }

    fn conn(&mut self) -> Result<&mut MySqlConnection, DriverError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| DriverError::bad_connection("invalid connection: handle closed"))
    }
}

#[async_trait]
impl DbHandle for MySqlHandle {
    async fn query(
        &mut self,
        statement: &str,
        args: &[SqlValue],
    ) -> Result<ResultSet, DriverError> {
        let conn = self.conn()?;

        // Without arguments use the text protocol, so statements MySQL cannot prepare still run
        let rows = if args.is_empty() {
            conn.fetch_all(statement).await
        } else {
            bind_all(statement, args).fetch_all(&mut *conn).await
        }
        .map_err(map_sqlx_error)?;

        decode_rows(&rows).map_err(map_sqlx_error)
    }

    async fn execute(
        &mut self,
        statements: &[String],
        args: &[Vec<SqlValue>],
    ) -> Result<u64, DriverError> {
        let conn = self.conn()?;
        let mut tx = conn.begin().await.map_err(map_sqlx_error)?;

        let mut affected = 0;
        for (i, statement) in statements.iter().enumerate() {
            let result = match args.get(i).filter(|a| !a.is_empty()) {
                Some(stmt_args) => bind_all(statement, stmt_args).execute(&mut *tx).await,
                None => (&mut *tx).execute(statement.as_str()).await,
            };

            match result {
                Ok(done) => affected += done.rows_affected(),
                Err(e) => {
                    if let Err(rb) = tx.rollback().await {
                        warn!(error = %rb, "failed to rollback transaction");
                    }
                    return Err(map_sqlx_error(e));
                }
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(affected)
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        match self.conn.take() {
            Some(conn) => conn.close().await.map_err(map_sqlx_error),
            None => Ok(()),
        }
    }
}
