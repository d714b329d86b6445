//! Counters and tracing hooks.
//!
//! Counters are plain atomics shared between the evaluator task, connection
//! workers, and the public handle. Export them from the binary layer if a
//! telemetry stack is needed.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Stats {
    requests: AtomicU64,
    drains: AtomicU64,
    statements: AtomicU64,
    failed_statements: AtomicU64,
    connections: AtomicUsize,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub drains: u64,
    pub statements: u64,
    pub failed_statements: u64,
    pub connections: usize,
}

impl Stats {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drain(&self, statements: usize) {
        self.drains.fetch_add(1, Ordering::Relaxed);
        self.statements
            .fetch_add(statements as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_statements.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            drains: self.drains.load(Ordering::Relaxed),
            statements: self.statements.load(Ordering::Relaxed),
            failed_statements: self.failed_statements.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
        }
    }
}

pub fn emit_span(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::trace_span!("scalarpool", event);
    let _enter = span.enter();
    for (k, v) in key_values {
        tracing::trace!(%event, %k, %v, "metric");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = Stats::default();
        stats.record_request();
        stats.record_request();
        stats.record_drain(3);
        stats.record_failure();
        stats.record_connection();
        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                requests: 2,
                drains: 1,
                statements: 3,
                failed_statements: 1,
                connections: 1,
            }
        );
    }
}
