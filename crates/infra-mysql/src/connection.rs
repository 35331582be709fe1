// MySQL Connection Pool Setup

use crate::error::map_sqlx_error;
use crate::handle::MySqlHandle;
use async_trait::async_trait;
use migra_core::domain::{DriverError, TargetConfig};
use migra_core::port::{BaseDb, DbConnector, DbHandle};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::sync::Arc;
use tracing::{debug, info};

/// Connect options for a target descriptor
pub fn connect_options(target: &TargetConfig) -> MySqlConnectOptions {
    let options = MySqlConnectOptions::new()
        .host(&target.host)
        .port(target.port)
        .username(&target.user)
        .password(&target.password);

    match &target.database {
        Some(database) => options.database(database),
        None => options,
    }
}

/// Opens a sqlx MySQL pool sized for the loader's workers
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlConnector;

#[async_trait]
impl DbConnector for MySqlConnector {
    async fn connect(
        &self,
        target: &TargetConfig,
        worker_count: usize,
    ) -> Result<Arc<dyn BaseDb>, DriverError> {
        let session: Vec<(String, String)> = target
            .session
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        // One spare slot so a reset never waits behind the workers' own handles
        let max_connections = u32::try_from(worker_count.saturating_add(1)).unwrap_or(u32::MAX);

        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(target.connect_timeout())
            .test_before_acquire(true)
            .after_connect(move |conn, _meta| {
                let session = session.clone();
                Box::pin(async move {
                    // Reset connections must behave like the originals
                    for (name, value) in &session {
                        let sql = format!("SET SESSION {} = ?", name);
                        sqlx::query(&sql).bind(value.as_str()).execute(&mut *conn).await?;
                    }
                    Ok(())
                })
            })
            .connect_with(connect_options(target))
            .await
            .map_err(map_sqlx_error)?;

        info!(
            host = %target.host,
            port = target.port,
            max_connections = max_connections,
            "MySQL pool opened"
        );
        Ok(Arc::new(MySqlBaseDb::new(pool)))
    }
}

/// Base handle backed by a sqlx pool
///
/// `sqlx::Pool` is internally synchronized, so concurrent `get_conn` and
/// `force_close_conn` calls from recovering workers need no extra locking.
#[derive(Debug, Clone)]
pub struct MySqlBaseDb {
    pool: MySqlPool,
}

impl MySqlBaseDb {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl BaseDb for MySqlBaseDb {
    async fn get_conn(&self) -> Result<Box<dyn DbHandle>, DriverError> {
        let conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        Ok(Box::new(MySqlHandle::new(conn)))
    }

    async fn force_close_conn(&self, conn: &mut dyn DbHandle) -> Result<(), DriverError> {
        // Closing detaches the connection from the pool instead of returning it
        conn.close().await
    }

    async fn close(&self) -> Result<(), DriverError> {
        debug!(idle = self.pool.num_idle(), size = self.pool.size(), "closing MySQL pool");
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_from_target() {
        let mut target = TargetConfig::new("db.internal", "loader");
        target.port = 4000;
        target.password = "s3cret".to_string();
        target.database = Some("orders".to_string());

        let options = connect_options(&target);
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 4000);
        assert_eq!(options.get_username(), "loader");
        assert_eq!(options.get_database(), Some("orders"));
    }

    #[tokio::test]
    async fn test_closed_pool_hands_out_nothing() {
        let target = TargetConfig::new("127.0.0.1", "root");
        let pool = MySqlPoolOptions::new().connect_lazy_with(connect_options(&target));
        let base = MySqlBaseDb::new(pool);
        base.close().await.unwrap();

        let err = match base.get_conn().await {
            Ok(_) => panic!("closed pool returned a connection"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), migra_core::domain::DriverErrorKind::PoolClosed);
    }
}
