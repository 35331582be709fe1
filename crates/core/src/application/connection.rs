//! Connection - one underlying handle driven by a retry loop
//!
//! Not safe for concurrent use: every operation takes `&mut self`, so a
//! Connection is driven by exactly one worker at a time. Across connections
//! nothing is shared except the pool's base handle.

use crate::application::classify::classify;
use crate::application::constants::SLOW_OPERATION_THRESHOLD;
use crate::application::context::{CancelReason, OpContext};
#[cfg(any(test, feature = "fault-injection"))]
use crate::application::fault::{FaultInjector, EXECUTE_FAULT_POINT};
use crate::application::pool::BaseDbRecovery;
use crate::application::retry::{RetryAction, RetryPolicy};
use crate::application::truncate;
use crate::domain::{DriverError, ResultSet, SqlValue};
use crate::error::{ErrorScope, LoadError, Result};
use crate::port::{ConnectionRecovery, DbHandle, MetricsSink, NoopMetrics};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};

/// What a single attempt runs
enum Operation<'a> {
    Query {
        statement: &'a str,
        args: &'a [SqlValue],
    },
    Execute {
        statements: &'a [String],
        args: &'a [Vec<SqlValue>],
    },
}

impl Operation<'_> {
    /// (statements, arguments) rendered for log fields
    fn render(&self) -> (String, String) {
        match self {
            Operation::Query { statement, args } => (
                truncate::statement(statement).into_owned(),
                truncate::debug(args),
            ),
            Operation::Execute { statements, args } => {
                (truncate::debug(statements), truncate::debug(args))
            }
        }
    }
}

enum Outcome {
    Rows(ResultSet),
    Executed,
}

enum AttemptError {
    Cancelled(CancelReason),
    Driver(DriverError),
}

/// A live downstream connection with retry and reset-on-connection-loss
pub struct Connection {
    name: String,
    source_id: String,
    scope: ErrorScope,
    handle: Option<Box<dyn DbHandle>>,
    recovery: Weak<dyn ConnectionRecovery>,
    metrics: Arc<dyn MetricsSink>,
    query_policy: RetryPolicy,
    execute_policy: RetryPolicy,
    #[cfg(any(test, feature = "fault-injection"))]
    faults: Option<Arc<FaultInjector>>,
}

impl Connection {
    /// Wrap an underlying handle
    ///
    /// # Arguments
    /// * `name` - Display name, used as a metric/log label
    /// * `source_id` - Upstream source id, used as a metric/log label
    /// * `handle` - Underlying handle, exclusively owned from now on
    /// * `recovery` - Capability used to replace the handle; owned by the pool
    /// * `metrics` - Sink for latency and execution-error signals
    pub fn new(
        name: impl Into<String>,
        source_id: impl Into<String>,
        handle: Box<dyn DbHandle>,
        recovery: Weak<dyn ConnectionRecovery>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            name: name.into(),
            source_id: source_id.into(),
            scope: ErrorScope::Downstream,
            handle: Some(handle),
            recovery,
            metrics,
            query_policy: RetryPolicy::query_default(),
            execute_policy: RetryPolicy::execute_default(),
            #[cfg(any(test, feature = "fault-injection"))]
            faults: None,
        }
    }

    /// Connection without an underlying handle; every operation fails with `InvalidConnection`
    pub fn uninitialized(name: impl Into<String>, source_id: impl Into<String>) -> Self {
        let recovery: Weak<dyn ConnectionRecovery> = Weak::<BaseDbRecovery>::new();
        Self {
            name: name.into(),
            source_id: source_id.into(),
            scope: ErrorScope::Downstream,
            handle: None,
            recovery,
            metrics: Arc::new(NoopMetrics),
            query_policy: RetryPolicy::query_default(),
            execute_policy: RetryPolicy::execute_default(),
            #[cfg(any(test, feature = "fault-injection"))]
            faults: None,
        }
    }

    pub fn with_policies(mut self, query: RetryPolicy, execute: RetryPolicy) -> Self {
        self.query_policy = query;
        self.execute_policy = execute;
        self
    }

    pub fn with_scope(mut self, scope: ErrorScope) -> Self {
        self.scope = scope;
        self
    }

    #[cfg(any(test, feature = "fault-injection"))]
    pub fn with_fault_injector(mut self, faults: Arc<FaultInjector>) -> Self {
        self.faults = Some(faults);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Scope attached to every terminal error from this connection
    pub fn scope(&self) -> ErrorScope {
        self.scope
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn take_handle(&mut self) -> Option<Box<dyn DbHandle>> {
        self.handle.take()
    }

    /// Run one statement and fetch its rows, retrying transient failures
    ///
    /// Up to 10 attempts, 1s apart. A lost connection is reset before the
    /// next attempt; a failed reset ends the call with `ResetFailure`.
    pub async fn query(
        &mut self,
        ctx: &OpContext,
        statement: &str,
        args: &[SqlValue],
    ) -> Result<ResultSet> {
        if self.handle.is_none() {
            return Err(self.invalid());
        }

        let op = Operation::Query { statement, args };
        match self.run(ctx, self.query_policy, &op).await? {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Executed => Ok(ResultSet::default()),
        }
    }

    /// Run a statement batch, retrying the whole batch on transient failures
    ///
    /// An empty batch succeeds without touching the database. Up to 10
    /// attempts with a linearly growing delay (2s, 4s, 6s, ...). Every failed
    /// attempt counts towards the execution-error metric.
    pub async fn execute(
        &mut self,
        ctx: &OpContext,
        statements: &[String],
        args: &[Vec<SqlValue>],
    ) -> Result<()> {
        if statements.is_empty() {
            return Ok(());
        }
        if self.handle.is_none() {
            return Err(self.invalid());
        }

        let op = Operation::Execute { statements, args };
        self.run(ctx, self.execute_policy, &op).await?;
        Ok(())
    }

    /// Replace the underlying handle through the pool's recovery capability
    ///
    /// On failure the current handle is kept (presumed broken) and the error
    /// is returned as `ResetFailure`. Cancellation yields `Cancelled`.
    pub async fn reset(&mut self, ctx: &OpContext) -> Result<()> {
        if self.handle.is_none() {
            return Err(self.invalid());
        }
        let Some(recovery) = self.recovery.upgrade() else {
            return Err(LoadError::ResetFailure(DriverError::pool_closed(
                "connection pool has been closed",
            ))
            .with_scope(self.scope));
        };

        let replaced = match self.handle.as_deref_mut() {
            Some(current) => {
                tokio::select! {
                    biased;
                    reason = ctx.done() => Err(LoadError::Cancelled(reason)),
                    res = recovery.recover(current) => res.map_err(LoadError::ResetFailure),
                }
            }
            None => return Err(self.invalid()),
        };

        let scope = self.scope;
        self.handle = Some(replaced.map_err(|e| e.with_scope(scope))?);
        Ok(())
    }

    async fn run(
        &mut self,
        ctx: &OpContext,
        policy: RetryPolicy,
        op: &Operation<'_>,
    ) -> Result<Outcome> {
        let mut attempt: u32 = 0;
        loop {
            if let Some(reason) = ctx.err() {
                return Err(self.fail(op, LoadError::Cancelled(reason)));
            }

            let started = Instant::now();
            let err = match self.attempt(ctx, op).await {
                Ok(outcome) => {
                    self.succeeded(op, started.elapsed());
                    return Ok(outcome);
                }
                Err(AttemptError::Cancelled(reason)) => {
                    return Err(self.fail(op, LoadError::Cancelled(reason)));
                }
                Err(AttemptError::Driver(err)) => err,
            };

            if matches!(op, Operation::Execute { .. }) {
                self.metrics.inc_execution_error(&self.name, &self.source_id);
            }

            let class = classify(&err);
            let delay = match policy.decide(attempt, class) {
                RetryAction::Fail => {
                    return Err(self.fail(op, LoadError::from_classified(class, err)));
                }
                RetryAction::Retry { delay } => {
                    self.log_retry(op, attempt, &err);
                    delay
                }
                RetryAction::RecoverThenRetry { delay } => {
                    self.recover(ctx, op, attempt, &err).await?;
                    self.log_retry(op, attempt, &err);
                    delay
                }
                RetryAction::RecoverThenFail => {
                    // Leave a live handle behind for the next operation
                    self.recover(ctx, op, attempt, &err).await?;
                    return Err(self.fail(op, LoadError::from_classified(class, err)));
                }
            };

            tokio::select! {
                biased;
                reason = ctx.done() => {
                    return Err(self.fail(op, LoadError::Cancelled(reason)));
                }
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Reset after a lost connection; a failed reset is the terminal error
    async fn recover(
        &mut self,
        ctx: &OpContext,
        op: &Operation<'_>,
        attempt: u32,
        cause: &DriverError,
    ) -> Result<()> {
        let Err(reset_err) = self.reset(ctx).await else {
            return Ok(());
        };
        if !reset_err.is_cancelled() {
            let (query, arguments) = op.render();
            error!(
                connection = %self.name,
                source_id = %self.source_id,
                retry = attempt,
                query = %query,
                arguments = %arguments,
                cause = %cause,
                error = %reset_err,
                "reset connection failed"
            );
        }
        Err(self.fail(op, reset_err))
    }

    async fn attempt(
        &mut self,
        ctx: &OpContext,
        op: &Operation<'_>,
    ) -> std::result::Result<Outcome, AttemptError> {
        #[cfg(any(test, feature = "fault-injection"))]
        {
            if let Some(err) = self.injected_fault(op) {
                return Err(AttemptError::Driver(err));
            }
        }

        let Some(handle) = self.handle.as_deref_mut() else {
            return Err(AttemptError::Driver(DriverError::bad_connection(
                "no underlying handle",
            )));
        };

        let call = async move {
            match op {
                Operation::Query { statement, args } => {
                    handle.query(statement, args).await.map(Outcome::Rows)
                }
                Operation::Execute { statements, args } => handle
                    .execute(statements, args)
                    .await
                    .map(|_| Outcome::Executed),
            }
        };

        tokio::select! {
            biased;
            reason = ctx.done() => Err(AttemptError::Cancelled(reason)),
            res = call => res.map_err(AttemptError::Driver),
        }
    }

    #[cfg(any(test, feature = "fault-injection"))]
    fn injected_fault(&self, op: &Operation<'_>) -> Option<DriverError> {
        let Operation::Execute { statements, .. } = op else {
            return None;
        };
        let err = self
            .faults
            .as_ref()?
            .trigger(EXECUTE_FAULT_POINT, statements)?;
        warn!(
            connection = %self.name,
            failpoint = EXECUTE_FAULT_POINT,
            error = %err,
            "execute statements failed by injected fault"
        );
        Some(err)
    }

    fn succeeded(&self, op: &Operation<'_>, cost: Duration) {
        if let Operation::Query { .. } = op {
            self.metrics
                .observe_query_latency(&self.name, &self.source_id, cost.as_secs_f64());
        }
        if cost <= SLOW_OPERATION_THRESHOLD {
            return;
        }

        let (query, arguments) = op.render();
        match op {
            Operation::Query { .. } => warn!(
                connection = %self.name,
                cost = ?cost,
                query = %query,
                arguments = %arguments,
                "query statement too slow"
            ),
            Operation::Execute { .. } => warn!(
                connection = %self.name,
                cost = ?cost,
                query = %query,
                arguments = %arguments,
                "execute transaction too slow"
            ),
        }
    }

    fn log_retry(&self, op: &Operation<'_>, attempt: u32, err: &DriverError) {
        let (query, arguments) = op.render();
        match op {
            Operation::Query { .. } => warn!(
                connection = %self.name,
                source_id = %self.source_id,
                retry = attempt,
                query = %query,
                arguments = %arguments,
                error = %err,
                "query statement"
            ),
            Operation::Execute { .. } => warn!(
                connection = %self.name,
                source_id = %self.source_id,
                retry = attempt,
                query = %query,
                arguments = %arguments,
                error = %err,
                "execute statements"
            ),
        }
    }

    /// Log a terminal failure and attach this connection's scope
    fn fail(&self, op: &Operation<'_>, err: LoadError) -> LoadError {
        let (query, arguments) = op.render();
        let label = match op {
            Operation::Query { .. } => "query statement failed after retry",
            Operation::Execute { .. } => "execute statements failed after retry",
        };
        if err.is_cancelled() {
            debug!(
                connection = %self.name,
                query = %query,
                arguments = %arguments,
                error = %err,
                "{}",
                label
            );
        } else {
            error!(
                connection = %self.name,
                source_id = %self.source_id,
                query = %query,
                arguments = %arguments,
                error = %err,
                "{}",
                label
            );
        }
        err.with_scope(self.scope)
    }

    fn invalid(&self) -> LoadError {
        LoadError::InvalidConnection(format!("connection {} has no underlying handle", self.name))
            .with_scope(self.scope)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("source_id", &self.source_id)
            .field("scope", &self.scope)
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::classify::error_code;
    use crate::application::context::cancel_channel;
    use crate::application::pool::{ConnectionPool, PoolOptions};
    use crate::application::retry::BackoffShape;
    use crate::domain::TargetConfig;
    use crate::port::database::mocks::{MockConnector, MockDb, Step};
    use crate::port::metrics::mocks::RecordingMetrics;
    use std::io;
    use tokio_test::assert_ok;

    const NAME: &str = "loader";
    const SOURCE: &str = "mysql-replica-01";

    struct Fixture {
        db: Arc<MockDb>,
        metrics: Arc<RecordingMetrics>,
        // recovery capability lives as long as the pool
        _pool: ConnectionPool,
        conn: Connection,
    }

    async fn fixture(steps: Vec<Step>) -> Fixture {
        let db = MockDb::new();
        db.push_steps(steps);
        let metrics = Arc::new(RecordingMetrics::new());
        let options = PoolOptions::new(NAME, SOURCE, 1).with_metrics(metrics.clone());
        let (pool, mut conns) = ConnectionPool::create(
            &MockConnector::new(db.clone()),
            &TargetConfig::new("127.0.0.1", "root"),
            options,
        )
        .await
        .unwrap();
        Fixture {
            db,
            metrics,
            _pool: pool,
            conn: conns.remove(0),
        }
    }

    fn lost() -> Step {
        Step::Fail(DriverError::io(io::ErrorKind::ConnectionReset, "connection reset by peer"))
    }

    fn deadlock(n: usize) -> Step {
        Step::Fail(DriverError::database(
            error_code::ER_LOCK_DEADLOCK,
            format!("Deadlock found #{}", n),
        ))
    }

    fn batch(stmts: &[&str]) -> Vec<String> {
        stmts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_success_records_latency() {
        let mut f = fixture(vec![Step::Rows(ResultSet::new(
            vec!["v".to_string()],
            vec![vec![SqlValue::Int(1)]],
        ))])
        .await;

        let rows = f
            .conn
            .query(&OpContext::background(), "SELECT 1 AS v", &[])
            .await
            .unwrap();
        assert_eq!(rows.get(0, "v"), Some(&SqlValue::Int(1)));
        assert_eq!(f.db.queries(), vec!["SELECT 1 AS v".to_string()]);
        assert_eq!(f.db.attempts(), 1);
        assert_eq!(f.metrics.latency_observations(NAME, SOURCE).len(), 1);
        assert_eq!(f.metrics.execution_errors(NAME, SOURCE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_lost_recovers_each_time() {
        let mut f = fixture(vec![lost(), lost(), lost(), Step::Succeed]).await;
        let handles_before = f.db.get_conn_calls();

        assert_ok!(f.conn.query(&OpContext::background(), "SELECT 1", &[]).await);
        assert_eq!(f.db.attempts(), 4);
        assert_eq!(f.db.force_close_calls(), 3);
        assert_eq!(f.db.get_conn_calls() - handles_before, 3);
        assert_eq!(f.db.open_handles(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_failure_stops_immediately() {
        let mut f = fixture(vec![lost(), Step::Succeed]).await;
        // call 0 minted the pool's only connection; the reset is call 1
        f.db
            .fail_get_conn_at(1, DriverError::io(io::ErrorKind::ConnectionRefused, "refused"));

        let err = f
            .conn
            .query(&OpContext::background(), "SELECT 1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err.root(), LoadError::ResetFailure(_)), "{}", err);
        assert_eq!(err.scope(), ErrorScope::Downstream);
        assert_eq!(
            err.driver_error().map(|e| e.kind()),
            Some(crate::domain::DriverErrorKind::Io(io::ErrorKind::ConnectionRefused))
        );
        assert_eq!(f.db.attempts(), 1);
        assert!(f.conn.is_valid());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_exhausts_budget_with_last_error() {
        let mut f = fixture((0..12).map(deadlock).collect()).await;

        let err = f
            .conn
            .query(&OpContext::background(), "SELECT 1", &[])
            .await
            .unwrap_err();
        assert_eq!(f.db.attempts(), 10);
        assert!(matches!(err.root(), LoadError::Retryable(_)));
        assert_eq!(err.driver_error().unwrap().message(), "Deadlock found #9");
        assert_eq!(f.db.get_conn_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_delay_is_constant() {
        let mut f = fixture((0..4).map(deadlock).collect()).await;

        assert_ok!(f.conn.query(&OpContext::background(), "SELECT 1", &[]).await);
        let starts = f.db.attempt_instants();
        assert_eq!(starts.len(), 5);
        for pair in starts.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_delay_grows() {
        let mut f = fixture((0..4).map(deadlock).collect()).await;

        let stmts = batch(&["INSERT INTO t VALUES (1)"]);
        assert_ok!(f.conn.execute(&OpContext::background(), &stmts, &[]).await);
        let starts = f.db.attempt_instants();
        let gaps: Vec<_> = starts.windows(2).map(|p| p[1] - p[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(6),
                Duration::from_secs(8)
            ]
        );
        assert_eq!(f.metrics.execution_errors(NAME, SOURCE), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_and_idempotent_do_not_retry() {
        let mut f = fixture(vec![
            Step::Fail(DriverError::database(1064, "You have an error in your SQL syntax")),
            Step::Fail(DriverError::database(
                error_code::ER_TABLE_EXISTS,
                "Table 't' already exists",
            )),
        ])
        .await;
        let ctx = OpContext::background();

        let err = f
            .conn
            .execute(&ctx, &batch(&["CREATE TABEL t"]), &[])
            .await
            .unwrap_err();
        assert!(matches!(err.root(), LoadError::Fatal(_)));
        assert_eq!(f.db.attempts(), 1);

        let err = f
            .conn
            .execute(&ctx, &batch(&["CREATE TABLE t (id INT)"]), &[])
            .await
            .unwrap_err();
        assert!(err.is_table_exists());
        assert_eq!(f.db.attempts(), 2);
        assert_eq!(f.metrics.execution_errors(NAME, SOURCE), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let mut f = fixture((0..12).map(deadlock).collect()).await;
        let (handle, ctx) = cancel_channel();

        tokio::spawn(async move {
            sleep(Duration::from_millis(2500)).await;
            handle.cancel();
        });

        let err = f.conn.query(&ctx, "SELECT 1", &[]).await.unwrap_err();
        assert!(err.is_cancelled(), "{}", err);
        assert!(matches!(err.root(), LoadError::Cancelled(CancelReason::Canceled)));
        assert_eq!(f.db.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_call_does_not_reset() {
        let mut f = fixture(vec![Step::Hang]).await;
        let ctx = OpContext::background().with_timeout(Duration::from_secs(3));

        let err = f
            .conn
            .execute(&ctx, &batch(&["INSERT INTO t VALUES (1)"]), &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err.root(),
            LoadError::Cancelled(CancelReason::DeadlineExceeded)
        ));
        assert_eq!(f.db.get_conn_calls(), 1);
        assert_eq!(f.db.force_close_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninitialized_connection() {
        let mut conn = Connection::uninitialized(NAME, SOURCE);
        let ctx = OpContext::background();

        let err = conn.query(&ctx, "SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err.root(), LoadError::InvalidConnection(_)));
        let err = conn
            .execute(&ctx, &batch(&["INSERT INTO t VALUES (1)"]), &[])
            .await
            .unwrap_err();
        assert!(matches!(err.root(), LoadError::InvalidConnection(_)));
        assert_ok!(conn.execute(&ctx, &[], &[]).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch_has_no_side_effects() {
        let mut f = fixture(vec![]).await;
        assert_ok!(f.conn.execute(&OpContext::background(), &[], &[]).await);
        assert_eq!(f.db.attempts(), 0);
        assert_eq!(f.metrics.total_signals(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_query_still_succeeds() {
        let mut f = fixture(vec![Step::Delay(Duration::from_millis(1500))]).await;
        assert_ok!(
            f.conn
                .query(&OpContext::background(), "SELECT SLEEP(1.5)", &[])
                .await
        );
        let observed = f.metrics.latency_observations(NAME, SOURCE);
        assert_eq!(observed.len(), 1);
        assert!(observed[0] >= 1.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_lost_on_last_attempt_still_recovers() {
        let mut f = fixture(vec![lost(), lost()]).await;
        let policy = RetryPolicy::new(2, Duration::from_millis(100), BackoffShape::Stable);
        let mut conn = std::mem::replace(&mut f.conn, Connection::uninitialized(NAME, SOURCE))
            .with_policies(policy, policy);
        let started = Instant::now();

        let err = conn
            .query(&OpContext::background(), "SELECT 1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err.root(), LoadError::ConnectionLost(_)));
        assert_eq!(f.db.attempts(), 2);
        assert_eq!(f.db.force_close_calls(), 2);
        assert_eq!(f.db.open_handles(), 1);
        // no wait after the final attempt
        assert_eq!(started.elapsed(), Duration::from_millis(100));

        // the next operation starts on the fresh handle
        assert_ok!(conn.query(&OpContext::background(), "SELECT 1", &[]).await);
        assert_eq!(f.db.attempts(), 3);
        assert_eq!(f.db.force_close_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_lost_every_attempt_recovers_every_time() {
        let mut f = fixture((0..10).map(|_| lost()).collect()).await;

        let err = f
            .conn
            .query(&OpContext::background(), "SELECT 1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err.root(), LoadError::ConnectionLost(_)));
        assert_eq!(f.db.attempts(), 10);
        assert_eq!(f.db.force_close_calls(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_failure_on_last_attempt() {
        let mut f = fixture(vec![lost()]).await;
        let policy = RetryPolicy::new(1, Duration::ZERO, BackoffShape::Stable);
        let mut conn = std::mem::replace(&mut f.conn, Connection::uninitialized(NAME, SOURCE))
            .with_policies(policy, policy);
        f.db.fail_get_conn_at(1, DriverError::database(1045, "Access denied"));

        let err = conn
            .query(&OpContext::background(), "SELECT 1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err.root(), LoadError::ResetFailure(_)));
        assert_eq!(err.driver_error().and_then(|e| e.code()), Some(1045));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_recovery() {
        let mut f = fixture(vec![lost()]).await;
        f.db.hang_get_conn_at(1);
        let (handle, ctx) = cancel_channel();

        tokio::spawn(async move {
            sleep(Duration::from_secs(3)).await;
            handle.cancel();
        });

        let started = Instant::now();
        let err = f.conn.query(&ctx, "SELECT 1", &[]).await.unwrap_err();
        assert!(err.is_cancelled(), "{}", err);
        assert!(matches!(err.root(), LoadError::Cancelled(CancelReason::Canceled)));
        assert_eq!(err.scope(), ErrorScope::Downstream);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(f.db.attempts(), 1);
        assert_eq!(f.db.get_conn_calls(), 2);
        assert!(f.conn.is_valid());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_uninitialized_is_invalid() {
        let mut conn = Connection::uninitialized(NAME, SOURCE);
        let err = conn.reset(&OpContext::background()).await.unwrap_err();
        assert!(matches!(err.root(), LoadError::InvalidConnection(_)), "{}", err);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_after_pool_dropped() {
        let Fixture { db, conn, _pool, .. } = fixture(vec![lost()]).await;
        let mut conn = conn;
        drop(_pool);

        let err = conn
            .query(&OpContext::background(), "SELECT 1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err.root(), LoadError::ResetFailure(_)));
        assert_eq!(db.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_fault_reproduces_code() {
        let mut f = fixture(vec![]).await;
        let faults = Arc::new(FaultInjector::new());
        faults.arm(EXECUTE_FAULT_POINT, error_code::ER_TABLE_EXISTS, "CREATE TABLE");
        let mut conn = std::mem::replace(&mut f.conn, Connection::uninitialized(NAME, SOURCE))
            .with_fault_injector(faults.clone());
        let ctx = OpContext::background();

        let err = conn
            .execute(&ctx, &batch(&["CREATE TABLE t (id INT)"]), &[])
            .await
            .unwrap_err();
        assert_eq!(
            err.driver_error().and_then(|e| e.code()),
            Some(error_code::ER_TABLE_EXISTS)
        );
        assert!(err.is_table_exists());
        // the fault fires before the handle is reached
        assert_eq!(f.db.attempts(), 0);

        // other batches are untouched
        assert_ok!(conn.execute(&ctx, &batch(&["INSERT INTO t VALUES (1)"]), &[]).await);
        assert_eq!(f.db.attempts(), 1);
    }
}
