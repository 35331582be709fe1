// Connection Pool - fixed set of Connections over one base handle

use crate::application::connection::Connection;
#[cfg(any(test, feature = "fault-injection"))]
use crate::application::fault::FaultInjector;
use crate::application::retry::RetryPolicy;
use crate::domain::{DriverError, TargetConfig};
use crate::error::{ErrorScope, LoadError, Result};
use crate::port::{BaseDb, ConnectionRecovery, DbConnector, DbHandle, MetricsSink, NoopMetrics};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Recovery through the pool's base handle: force-close, then mint a replacement
pub struct BaseDbRecovery {
    base: Arc<dyn BaseDb>,
}

impl BaseDbRecovery {
    pub fn new(base: Arc<dyn BaseDb>) -> Self {
        Self { base }
    }
}

#[async_trait]
impl ConnectionRecovery for BaseDbRecovery {
    async fn recover(
        &self,
        current: &mut dyn DbHandle,
    ) -> std::result::Result<Box<dyn DbHandle>, DriverError> {
        if let Err(e) = self.base.force_close_conn(current).await {
            // The old handle is discarded either way
            warn!(error = %e, "failed to close connection in reset");
        }
        self.base.get_conn().await
    }
}

/// Construction options for a pool
pub struct PoolOptions {
    name: String,
    source_id: String,
    worker_count: usize,
    metrics: Arc<dyn MetricsSink>,
    query_policy: RetryPolicy,
    execute_policy: RetryPolicy,
    #[cfg(any(test, feature = "fault-injection"))]
    faults: Option<Arc<FaultInjector>>,
}

impl PoolOptions {
    /// # Arguments
    /// * `name` - Display name of the owning loader
    /// * `source_id` - Upstream source id
    /// * `worker_count` - Number of connections to create
    pub fn new(name: impl Into<String>, source_id: impl Into<String>, worker_count: usize) -> Self {
        Self {
            name: name.into(),
            source_id: source_id.into(),
            worker_count,
            metrics: Arc::new(NoopMetrics),
            query_policy: RetryPolicy::query_default(),
            execute_policy: RetryPolicy::execute_default(),
            #[cfg(any(test, feature = "fault-injection"))]
            faults: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_query_policy(mut self, policy: RetryPolicy) -> Self {
        self.query_policy = policy;
        self
    }

    pub fn with_execute_policy(mut self, policy: RetryPolicy) -> Self {
        self.execute_policy = policy;
        self
    }

    #[cfg(any(test, feature = "fault-injection"))]
    pub fn with_fault_injector(mut self, faults: Arc<FaultInjector>) -> Self {
        self.faults = Some(faults);
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

/// Owns the base handle and the recovery capability handed to each Connection
///
/// Connections hold only a weak reference to the recovery capability, so a
/// connection that outlives its pool fails its next reset instead of keeping
/// the base handle alive.
pub struct ConnectionPool {
    base: Arc<dyn BaseDb>,
    recovery: Arc<dyn ConnectionRecovery>,
    target: TargetConfig,
    size: usize,
}

impl ConnectionPool {
    /// Open the base handle and obtain `worker_count` connections
    ///
    /// All or nothing: on any failure every handle obtained so far is
    /// force-closed, the base handle is closed, and the error is returned
    /// tagged with the downstream scope.
    pub async fn create(
        connector: &dyn DbConnector,
        target: &TargetConfig,
        options: PoolOptions,
    ) -> Result<(Self, Vec<Connection>)> {
        if options.worker_count == 0 {
            return Err(LoadError::Config("worker count must be at least 1".to_string())
                .with_scope(ErrorScope::Downstream));
        }
        target
            .validate()
            .map_err(|msg| LoadError::Config(msg).with_scope(ErrorScope::Downstream))?;

        let base = connector
            .connect(target, options.worker_count)
            .await
            .map_err(|e| LoadError::Database(e).with_scope(ErrorScope::Downstream))?;

        let recovery: Arc<dyn ConnectionRecovery> =
            Arc::new(BaseDbRecovery::new(Arc::clone(&base)));
        let pool = Self {
            base,
            recovery,
            target: target.clone(),
            size: options.worker_count,
        };

        let mut conns = Vec::with_capacity(options.worker_count);
        for _ in 0..options.worker_count {
            match pool.base.get_conn().await {
                Ok(handle) => conns.push(pool.wrap(handle, &options)),
                Err(e) => {
                    pool.discard(conns).await;
                    return Err(LoadError::Database(e).with_scope(ErrorScope::Downstream));
                }
            }
        }

        info!(
            name = %options.name,
            source_id = %options.source_id,
            host = %target.host,
            port = target.port,
            connections = pool.size,
            "connection pool created"
        );
        Ok((pool, conns))
    }

    fn wrap(&self, handle: Box<dyn DbHandle>, options: &PoolOptions) -> Connection {
        let conn = Connection::new(
            options.name.clone(),
            options.source_id.clone(),
            handle,
            Arc::downgrade(&self.recovery),
            Arc::clone(&options.metrics),
        )
        .with_policies(options.query_policy, options.execute_policy);

        #[cfg(any(test, feature = "fault-injection"))]
        let conn = match &options.faults {
            Some(faults) => conn.with_fault_injector(Arc::clone(faults)),
            None => conn,
        };

        conn
    }

    /// Tear down a partially built pool
    async fn discard(self, mut conns: Vec<Connection>) {
        for conn in conns.iter_mut() {
            if let Some(mut handle) = conn.take_handle() {
                if let Err(e) = self.base.force_close_conn(handle.as_mut()).await {
                    warn!(error = %e, "failed to close connection");
                }
            }
        }
        if let Err(e) = self.base.close().await {
            error!(error = %e, "failed to close base database");
        }
    }

    /// Close the base handle
    ///
    /// Connections still held elsewhere fail their next reset with `ResetFailure`.
    pub async fn close(self) -> Result<()> {
        let Self { base, recovery, .. } = self;
        drop(recovery);
        base.close()
            .await
            .map_err(|e| LoadError::Database(e).with_scope(ErrorScope::Downstream))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("target", &self.target)
            .field("size", &self.size)
            .finish()
    }
}
