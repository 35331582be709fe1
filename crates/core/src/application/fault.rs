//! Deterministic fault injection for exercising retry and classification paths
//!
//! Compiled only under `cfg(test)` or the `fault-injection` feature. An armed
//! point makes the next matching single-statement batch fail with a synthetic
//! server error before any database call is made.

use crate::domain::DriverError;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Injection point consulted by `Connection::execute`
pub const EXECUTE_FAULT_POINT: &str = "load-exec-statement-failed";

#[derive(Debug, Clone)]
struct ArmedFault {
    code: u16,
    marker: String,
    /// None: fire on every match until disarmed
    remaining: Option<u32>,
}

/// Registry of armed injection points
#[derive(Debug, Default)]
pub struct FaultInjector {
    points: Mutex<HashMap<String, ArmedFault>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `code` on every matching batch until `disarm` is called
    pub fn arm(&self, point: &str, code: u16, marker: impl Into<String>) {
        self.insert(point, code, marker.into(), None);
    }

    /// Fire `code` on the next `times` matching batches
    pub fn arm_times(&self, point: &str, code: u16, marker: impl Into<String>, times: u32) {
        self.insert(point, code, marker.into(), Some(times));
    }

    pub fn disarm(&self, point: &str) {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(point);
    }

    pub fn is_armed(&self, point: &str) -> bool {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(point)
    }

    /// Synthetic error for `statements` if `point` is armed and the batch matches
    ///
    /// A batch matches when it holds exactly one statement containing the marker.
    pub fn trigger(&self, point: &str, statements: &[String]) -> Option<DriverError> {
        let [only] = statements else {
            return None;
        };

        let mut points = self.points.lock().unwrap_or_else(PoisonError::into_inner);
        let fault = points.get_mut(point)?;
        if !only.contains(fault.marker.as_str()) {
            return None;
        }

        let code = fault.code;
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                points.remove(point);
            }
        }

        debug!(point = %point, code = code, "fault injection fired");
        Some(DriverError::database(
            code,
            format!("injected by fault point {}", point),
        ))
    }

    fn insert(&self, point: &str, code: u16, marker: String, remaining: Option<u32>) {
        let mut points = self.points.lock().unwrap_or_else(PoisonError::into_inner);
        if remaining == Some(0) {
            points.remove(point);
            return;
        }
        points.insert(
            point.to_string(),
            ArmedFault {
                code,
                marker,
                remaining,
            },
        );
    }
}
