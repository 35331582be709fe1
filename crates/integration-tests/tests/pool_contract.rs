//! Pool construction and the loader-facing contract
//!
//! Runs against scripted port implementations; no database required.

use std::io;
use std::sync::Arc;

use migra_core::application::classify::error_code;
use migra_core::application::{ConnectionPool, IdempotentKind, OpContext, PoolOptions};
use migra_core::domain::{DriverError, TargetConfig};
use migra_core::port::database::mocks::{MockConnector, MockDb, Step};
use migra_core::port::metrics::mocks::RecordingMetrics;
use migra_core::{ErrorScope, LoadError};

fn target() -> TargetConfig {
    TargetConfig::new("127.0.0.1", "root")
}

/// Every worker count yields exactly that many usable connections
#[tokio::test]
async fn test_pool_size_matches_worker_count() {
    for workers in 1..=8 {
        let db = MockDb::new();
        let (pool, conns) = ConnectionPool::create(
            &MockConnector::new(db.clone()),
            &target(),
            PoolOptions::new("loader", "source-1", workers),
        )
        .await
        .unwrap();

        assert_eq!(conns.len(), workers);
        assert_eq!(pool.size(), workers);
        assert!(conns.iter().all(|c| c.is_valid()));
        assert_eq!(db.open_handles(), workers);
    }
}

/// A failure at any position leaves nothing open behind
#[tokio::test]
async fn test_pool_failure_leaks_nothing() {
    for failing_call in 0..4 {
        let db = MockDb::new();
        db.fail_get_conn_at(
            failing_call,
            DriverError::database(1040, "Too many connections"),
        );

        let err = ConnectionPool::create(
            &MockConnector::new(db.clone()),
            &target(),
            PoolOptions::new("loader", "source-1", 4),
        )
        .await
        .unwrap_err();

        assert_eq!(err.scope(), ErrorScope::Downstream);
        assert_eq!(err.driver_error().and_then(|e| e.code()), Some(1040));
        assert_eq!(db.open_handles(), 0, "leak after failing call {}", failing_call);
        assert_eq!(db.force_close_calls(), failing_call);
        assert!(db.is_closed());
    }
}

/// Pool of 2; CREATE TABLE on an existing table is reported once, not retried
#[tokio::test(start_paused = true)]
async fn test_existing_table_is_idempotent_outcome() {
    let db = MockDb::new();
    db.push_step(Step::Fail(DriverError::database(
        error_code::ER_TABLE_EXISTS,
        "Table 't' already exists",
    )));
    let metrics = Arc::new(RecordingMetrics::new());

    let (_pool, mut conns) = ConnectionPool::create(
        &MockConnector::new(db.clone()),
        &target(),
        PoolOptions::new("loader", "source-1", 2).with_metrics(metrics.clone()),
    )
    .await
    .unwrap();
    assert_eq!(conns.len(), 2);

    let statements = vec!["CREATE TABLE t (id BIGINT PRIMARY KEY)".to_string()];
    let err = conns[0]
        .execute(&OpContext::background(), &statements, &[])
        .await
        .unwrap_err();

    assert!(err.is_idempotent());
    assert_eq!(err.idempotent_kind(), Some(IdempotentKind::TableExists));
    assert_eq!(err.scope(), ErrorScope::Downstream);
    assert_eq!(db.attempts(), 1);
    assert_eq!(db.force_close_calls(), 0);
    assert_eq!(metrics.execution_errors("loader", "source-1"), 1);
}

/// Workers recover independently and in parallel over the shared base handle
#[tokio::test(start_paused = true)]
async fn test_connections_recover_concurrently() {
    let db = MockDb::new();
    let lost = || Step::Fail(DriverError::io(io::ErrorKind::BrokenPipe, "broken pipe"));
    db.push_steps([lost(), lost(), lost(), lost()]);

    let (pool, conns) = ConnectionPool::create(
        &MockConnector::new(db.clone()),
        &target(),
        PoolOptions::new("loader", "source-1", 4),
    )
    .await
    .unwrap();

    let workers: Vec<_> = conns
        .into_iter()
        .enumerate()
        .map(|(i, mut conn)| {
            tokio::spawn(async move {
                let statements = vec![format!("INSERT INTO t VALUES ({})", i)];
                let result = conn.execute(&OpContext::background(), &statements, &[]).await;
                (conn, result)
            })
        })
        .collect();

    let mut conns = Vec::new();
    for worker in futures::future::join_all(workers).await {
        let (conn, result) = worker.unwrap();
        assert!(result.is_ok());
        conns.push(conn);
    }

    assert_eq!(db.force_close_calls(), 4);
    assert_eq!(db.get_conn_calls(), 8);
    assert_eq!(db.open_handles(), 4);
    assert_eq!(db.batches().len(), 8);

    drop(conns);
    pool.close().await.unwrap();
    assert!(db.is_closed());
}

/// Connections that outlive a closed pool fail their next recovery
#[tokio::test(start_paused = true)]
async fn test_closed_pool_stops_recovery() {
    let db = MockDb::new();
    db.push_step(Step::Fail(DriverError::bad_connection("invalid connection")));

    let (pool, mut conns) = ConnectionPool::create(
        &MockConnector::new(db.clone()),
        &target(),
        PoolOptions::new("loader", "source-1", 1),
    )
    .await
    .unwrap();
    pool.close().await.unwrap();

    let err = conns[0]
        .query(&OpContext::background(), "SELECT 1", &[])
        .await
        .unwrap_err();
    assert!(matches!(err.root(), LoadError::ResetFailure(_)));
    assert_eq!(db.attempts(), 1);
}
