// Operation context: cancellation and deadline for one query/execute call

use std::fmt;
use std::future::pending;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why an operation stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Canceled,
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Canceled => f.write_str("context canceled"),
            CancelReason::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

/// Cancellation signal observed by the retry loop
///
/// Cheap to clone; every clone observes the same cancel handle.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    rx: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl OpContext {
    /// Context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Add a deadline; an earlier existing deadline wins
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check
    pub fn err(&self) -> Option<CancelReason> {
        if self.rx.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(CancelReason::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) -> CancelReason {
        let cancelled = async {
            match &self.rx {
                Some(rx) => {
                    let mut rx = rx.clone();
                    // Sender dropped without cancelling: never cancelled
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        pending::<()>().await;
                    }
                }
                None => pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => CancelReason::Canceled,
            _ = expired => CancelReason::DeadlineExceeded,
        }
    }
}

/// Cancels every context created from the same channel
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a cancellable context
pub fn cancel_channel() -> (CancelHandle, OpContext) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx },
        OpContext {
            rx: Some(rx),
            deadline: None,
        },
    )
}
