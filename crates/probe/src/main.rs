//! Migra Probe - exercises a loader connection pool against a live target
//!
//! Without statements every connection runs a health check (`SELECT 1`).
//! With statements they are spread round-robin across the workers and
//! executed (or queried with `--query`) through the retrying connections.

mod config;
mod telemetry;

use anyhow::{bail, Result};
use clap::Parser;
use futures::future::join_all;
use migra_core::application::{
    cancel_channel, Connection, ConnectionPool, OpContext, PoolOptions,
};
use migra_core::port::TracingMetrics;
use migra_infra_mysql::MySqlConnector;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const HEALTH_CHECK_STATEMENT: &str = "SELECT 1";

#[derive(Parser, Debug)]
#[command(name = "migra-probe")]
#[command(
    about = "Health-check or replay statements through a Migra connection pool",
    long_about = None
)]
#[command(version)]
struct Args {
    /// Number of connections (one per worker)
    #[arg(short, long, env = "MIGRA_WORKERS", default_value = "4")]
    workers: usize,

    /// Loader name used as metric/log label
    #[arg(long, default_value = "migra-probe")]
    name: String,

    /// Upstream source id used as metric/log label
    #[arg(long, default_value = "probe")]
    source_id: String,

    /// Give up on the whole run after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Run statements as queries and print their rows as JSON lines
    #[arg(long)]
    query: bool,

    /// Statements to run; each is its own batch
    statements: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct WorkerReport {
    succeeded: usize,
    idempotent: usize,
    failed: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Initialize logging
    let _log_guard = telemetry::init_logging()?;
    let run_id = Uuid::new_v4();
    info!(run_id = %run_id, "Migra probe v{} starting...", VERSION);

    // 2. Load configuration
    let target = config::target_from_env()?;

    // 3. Build the pool (all or nothing)
    let options = PoolOptions::new(&args.name, &args.source_id, args.workers)
        .with_metrics(Arc::new(TracingMetrics));
    let (pool, mut conns) = ConnectionPool::create(&MySqlConnector, &target, options).await?;

    // 4. Cancellation: Ctrl+C and the optional run timeout
    let (cancel, mut ctx) = cancel_channel();
    if let Some(secs) = args.timeout_secs {
        ctx = ctx.with_timeout(Duration::from_secs(secs));
    }
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown signal received. Cancelling in-flight statements...");
            cancel.cancel();
        }
    });

    // 5. Run every worker on its own connection
    let assignments = assign(&args.statements, conns.len());
    let reports = join_all(
        conns
            .iter_mut()
            .zip(assignments.iter())
            .map(|(conn, statements)| run_worker(conn, &ctx, statements, args.query)),
    )
    .await;

    let total = reports.iter().fold(WorkerReport::default(), |acc, r| WorkerReport {
        succeeded: acc.succeeded + r.succeeded,
        idempotent: acc.idempotent + r.idempotent,
        failed: acc.failed + r.failed,
    });
    info!(
        run_id = %run_id,
        succeeded = total.succeeded,
        idempotent = total.idempotent,
        failed = total.failed,
        "Probe finished"
    );

    // 6. Teardown: connections go back before the base handle closes
    drop(conns);
    if let Err(e) = pool.close().await {
        error!(error = %e, "Failed to close connection pool");
    }
    telemetry::shutdown_telemetry();

    if total.failed > 0 {
        bail!("{} statement(s) failed", total.failed);
    }
    Ok(())
}

/// Spread statements round-robin; no statements means one health check per worker
fn assign(statements: &[String], workers: usize) -> Vec<Vec<String>> {
    let mut assigned = vec![Vec::new(); workers];
    if statements.is_empty() {
        for batch in assigned.iter_mut() {
            batch.push(HEALTH_CHECK_STATEMENT.to_string());
        }
        return assigned;
    }
    for (i, statement) in statements.iter().enumerate() {
        assigned[i % workers].push(statement.clone());
    }
    assigned
}

async fn run_worker(
    conn: &mut Connection,
    ctx: &OpContext,
    statements: &[String],
    query: bool,
) -> WorkerReport {
    let mut report = WorkerReport::default();

    for (idx, statement) in statements.iter().enumerate() {
        let result = if query || statement == HEALTH_CHECK_STATEMENT {
            conn.query(ctx, statement, &[]).await.map(|rows| {
                for row in &rows.rows {
                    match serde_json::to_string(row) {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!(error = %e, "Failed to render row"),
                    }
                }
            })
        } else {
            conn.execute(ctx, std::slice::from_ref(statement), &[]).await
        };

        match result {
            Ok(()) => report.succeeded += 1,
            // Replayed DDL or rows: the desired state already holds
            Err(e) if e.is_idempotent() => {
                info!(connection = %conn.name(), error = %e, "Statement already applied");
                report.idempotent += 1;
            }
            Err(e) if e.is_cancelled() => {
                warn!(connection = %conn.name(), error = %e, "Worker cancelled");
                report.failed += statements.len() - idx;
                break;
            }
            Err(e) => {
                error!(connection = %conn.name(), error = %e, "Statement failed");
                report.failed += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_round_robin() {
        let statements: Vec<String> = (0..5)
            .map(|i| format!("INSERT INTO t VALUES ({})", i))
            .collect();
        let assigned = assign(&statements, 2);
        assert_eq!(assigned[0].len(), 3);
        assert_eq!(assigned[1].len(), 2);
        assert_eq!(assigned[1][0], "INSERT INTO t VALUES (1)");
    }

    #[test]
    fn test_assign_health_check() {
        let assigned = assign(&[], 3);
        assert!(assigned.iter().all(|a| a == &vec![HEALTH_CHECK_STATEMENT.to_string()]));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "migra-probe",
            "--workers",
            "2",
            "--query",
            "SELECT 1",
            "SELECT 2",
        ]);
        assert_eq!(args.workers, 2);
        assert!(args.query);
        assert_eq!(args.statements.len(), 2);
    }

    #[tokio::test]
    async fn test_worker_counts_outcomes_on_uninitialized_connection() {
        let mut conn = Connection::uninitialized("probe", "test");
        let report = run_worker(
            &mut conn,
            &OpContext::background(),
            &["INSERT INTO t VALUES (1)".to_string()],
            false,
        )
        .await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 0);
    }
}
