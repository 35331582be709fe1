// Database Ports (Interfaces implemented by driver adapters)

use crate::domain::{DriverError, ResultSet, SqlValue, TargetConfig};
use async_trait::async_trait;
use std::sync::Arc;

/// One live database connection, exclusively owned by a single `Connection`
#[async_trait]
pub trait DbHandle: Send {
    /// Run one statement and fetch every row
    async fn query(&mut self, statement: &str, args: &[SqlValue])
        -> Result<ResultSet, DriverError>;

    /// Run a statement batch as one unit
    ///
    /// `args[i]` belongs to `statements[i]`; a missing entry means no arguments.
    /// Returns the total number of affected rows.
    async fn execute(
        &mut self,
        statements: &[String],
        args: &[Vec<SqlValue>],
    ) -> Result<u64, DriverError>;

    /// Close the handle; later calls fail with a bad-connection error
    async fn close(&mut self) -> Result<(), DriverError>;
}

/// Shared source of underlying connections for every Connection in a pool
///
/// Implementations must tolerate concurrent `get_conn` and `force_close_conn`
/// calls from workers recovering independently.
#[async_trait]
pub trait BaseDb: Send + Sync {
    async fn get_conn(&self) -> Result<Box<dyn DbHandle>, DriverError>;

    async fn force_close_conn(&self, conn: &mut dyn DbHandle) -> Result<(), DriverError>;

    /// Release the base handle
    async fn close(&self) -> Result<(), DriverError>;
}

/// Opens the base handle for a target database
#[async_trait]
pub trait DbConnector: Send + Sync {
    /// # Arguments
    /// * `target` - Downstream connection descriptor
    /// * `worker_count` - Number of connections the pool will hold at once
    async fn connect(
        &self,
        target: &TargetConfig,
        worker_count: usize,
    ) -> Result<Arc<dyn BaseDb>, DriverError>;
}

/// Recovery capability a pool hands to each of its connections
#[async_trait]
pub trait ConnectionRecovery: Send + Sync {
    /// Discard `current` and return a replacement
    ///
    /// On error the caller keeps `current`, presumed broken.
    async fn recover(&self, current: &mut dyn DbHandle) -> Result<Box<dyn DbHandle>, DriverError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::future::pending;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;
    use tokio::time::Instant;

    /// Scripted outcome of one query/execute call, consumed in order by any handle
    #[derive(Debug, Clone)]
    pub enum Step {
        Succeed,
        Fail(DriverError),
        /// Return these rows (execute treats it as success)
        Rows(ResultSet),
        /// Succeed after the given delay
        Delay(Duration),
        /// Never complete; only cancellation ends the call
        Hang,
    }

    #[derive(Default)]
    struct MockState {
        steps: VecDeque<Step>,
        get_conn_failures: HashMap<usize, DriverError>,
        get_conn_hangs: HashSet<usize>,
        force_close_error: Option<DriverError>,
        get_conn_calls: usize,
        force_close_calls: usize,
        attempts: Vec<Instant>,
        queries: Vec<String>,
        batches: Vec<Vec<String>>,
        open_handles: usize,
        closed: bool,
    }

    /// Scripted base handle; unscripted calls succeed
    #[derive(Default)]
    pub struct MockDb {
        state: Arc<Mutex<MockState>>,
    }

    impl MockDb {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn state(&self) -> MutexGuard<'_, MockState> {
            lock(&self.state)
        }

        pub fn push_step(&self, step: Step) {
            self.state().steps.push_back(step);
        }

        pub fn push_steps(&self, steps: impl IntoIterator<Item = Step>) {
            self.state().steps.extend(steps);
        }

        /// Make the `call`-th `get_conn` (0-based, counted over the db's lifetime) fail
        pub fn fail_get_conn_at(&self, call: usize, err: DriverError) {
            self.state().get_conn_failures.insert(call, err);
        }

        /// Make the `call`-th `get_conn` never complete
        pub fn hang_get_conn_at(&self, call: usize) {
            self.state().get_conn_hangs.insert(call);
        }

        /// Make every `force_close_conn` report `err` after closing the handle
        pub fn fail_force_close(&self, err: DriverError) {
            self.state().force_close_error = Some(err);
        }

        pub fn get_conn_calls(&self) -> usize {
            self.state().get_conn_calls
        }

        pub fn force_close_calls(&self) -> usize {
            self.state().force_close_calls
        }

        /// Number of query/execute calls that reached a handle
        pub fn attempts(&self) -> usize {
            self.state().attempts.len()
        }

        /// Start time of every query/execute call
        pub fn attempt_instants(&self) -> Vec<Instant> {
            self.state().attempts.clone()
        }

        pub fn queries(&self) -> Vec<String> {
            self.state().queries.clone()
        }

        pub fn batches(&self) -> Vec<Vec<String>> {
            self.state().batches.clone()
        }

        /// Handles handed out and neither closed nor dropped
        pub fn open_handles(&self) -> usize {
            self.state().open_handles
        }

        pub fn is_closed(&self) -> bool {
            self.state().closed
        }
    }

    fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
        state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[async_trait]
    impl BaseDb for MockDb {
        async fn get_conn(&self) -> Result<Box<dyn DbHandle>, DriverError> {
            let hang = {
                let mut state = self.state();
                let call = state.get_conn_calls;
                state.get_conn_calls += 1;
                if state.closed {
                    return Err(DriverError::pool_closed("mock db is closed"));
                }
                if let Some(err) = state.get_conn_failures.remove(&call) {
                    return Err(err);
                }
                state.get_conn_hangs.remove(&call)
            };
            if hang {
                pending::<()>().await;
            }

            self.state().open_handles += 1;
            Ok(Box::new(MockHandle {
                state: Arc::clone(&self.state),
                open: true,
            }))
        }

        async fn force_close_conn(&self, conn: &mut dyn DbHandle) -> Result<(), DriverError> {
            let injected = {
                let mut state = self.state();
                state.force_close_calls += 1;
                state.force_close_error.clone()
            };
            conn.close().await?;
            match injected {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn close(&self) -> Result<(), DriverError> {
            self.state().closed = true;
            Ok(())
        }
    }

    /// Handle produced by `MockDb`
    pub struct MockHandle {
        state: Arc<Mutex<MockState>>,
        open: bool,
    }

    impl MockHandle {
        fn next_step(&self) -> Result<Step, DriverError> {
            if !self.open {
                return Err(DriverError::bad_connection("handle already closed"));
            }
            let mut state = lock(&self.state);
            state.attempts.push(Instant::now());
            Ok(state.steps.pop_front().unwrap_or(Step::Succeed))
        }
    }

    async fn play(step: Step) -> Result<Option<ResultSet>, DriverError> {
        match step {
            Step::Succeed => Ok(None),
            Step::Fail(err) => Err(err),
            Step::Rows(rows) => Ok(Some(rows)),
            Step::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(None)
            }
            Step::Hang => pending().await,
        }
    }

    #[async_trait]
    impl DbHandle for MockHandle {
        async fn query(
            &mut self,
            statement: &str,
            _args: &[SqlValue],
        ) -> Result<ResultSet, DriverError> {
            let step = self.next_step()?;
            lock(&self.state).queries.push(statement.to_string());
            Ok(play(step).await?.unwrap_or_default())
        }

        async fn execute(
            &mut self,
            statements: &[String],
            _args: &[Vec<SqlValue>],
        ) -> Result<u64, DriverError> {
            let step = self.next_step()?;
            lock(&self.state).batches.push(statements.to_vec());
            play(step).await?;
            Ok(statements.len() as u64)
        }

        async fn close(&mut self) -> Result<(), DriverError> {
            if self.open {
                self.open = false;
                lock(&self.state).open_handles -= 1;
            }
            Ok(())
        }
    }

    impl Drop for MockHandle {
        fn drop(&mut self) {
            if self.open {
                lock(&self.state).open_handles -= 1;
            }
        }
    }

    /// Connector returning a shared `MockDb`, or a scripted failure
    pub struct MockConnector {
        db: Arc<MockDb>,
        error: Option<DriverError>,
    }

    impl MockConnector {
        pub fn new(db: Arc<MockDb>) -> Self {
            Self { db, error: None }
        }

        pub fn failing(err: DriverError) -> Self {
            Self {
                db: MockDb::new(),
                error: Some(err),
            }
        }
    }

    #[async_trait]
    impl DbConnector for MockConnector {
        async fn connect(
            &self,
            _target: &TargetConfig,
            _worker_count: usize,
        ) -> Result<Arc<dyn BaseDb>, DriverError> {
            match &self.error {
                Some(err) => Err(err.clone()),
                None => Ok(Arc::clone(&self.db) as Arc<dyn BaseDb>),
            }
        }
    }
}
