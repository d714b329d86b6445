//! Pool configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::chunk::DEFAULT_MAX_COLUMNS;
use crate::error::{Error, Result};

/// When accumulated requests are turned into statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchWindow {
    /// Drain once the evaluator loop has consumed every request already
    /// queued behind the first one.
    #[default]
    Cycle,
    /// Drain `millis` after the first request of a window arrives.
    Timer { millis: u64 },
    /// Drain only on an explicit flush.
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Driver connection string, e.g. `host=localhost user=postgres dbname=gis`.
    pub connection: String,

    /// Upper bound on open connections. The pool grows lazily up to this.
    pub max_connections: usize,

    /// Connections opened eagerly at construction.
    pub min_connections: usize,

    /// Widest row the engine accepts. Statements never request more columns.
    pub max_columns: usize,

    pub batch_window: BatchWindow,

    /// Drain early once this many requests are pending.
    pub max_batch: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: String::new(),
            max_connections: cpu_count(),
            min_connections: 0,
            max_columns: DEFAULT_MAX_COLUMNS,
            batch_window: BatchWindow::Cycle,
            max_batch: None,
        }
    }
}

impl PoolConfig {
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            ..Self::default()
        }
    }

    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `SCALARPOOL_CONNECTION`: driver connection string
    /// - `SCALARPOOL_MAX_CONNECTIONS`: pool size cap
    /// - `SCALARPOOL_MIN_CONNECTIONS`: connections opened up front
    /// - `SCALARPOOL_MAX_COLUMNS`: engine column limit
    /// - `SCALARPOOL_BATCH_WINDOW_MS`: timer window in ms, or `manual`
    /// - `SCALARPOOL_MAX_BATCH`: size threshold that forces a drain
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`PoolConfig::from_env`] over an arbitrary variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(s) = var("SCALARPOOL_CONNECTION") {
            cfg.connection = s;
        }

        if let Some(s) = var("SCALARPOOL_MAX_CONNECTIONS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_connections = v;
            }
        }

        if let Some(s) = var("SCALARPOOL_MIN_CONNECTIONS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.min_connections = v;
            }
        }

        if let Some(s) = var("SCALARPOOL_MAX_COLUMNS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_columns = v;
            }
        }

        if let Some(s) = var("SCALARPOOL_BATCH_WINDOW_MS") {
            if s.trim().eq_ignore_ascii_case("manual") {
                cfg.batch_window = BatchWindow::Manual;
            } else if let Ok(millis) = s.parse::<u64>() {
                cfg.batch_window = BatchWindow::Timer { millis };
            }
        }

        if let Some(s) = var("SCALARPOOL_MAX_BATCH") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_batch = Some(v);
            }
        }

        cfg
    }

    /// Reject configurations the evaluator cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.connection.trim().is_empty() {
            return Err(Error::Config(
                "must provide a database connection string".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".into()));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::Config(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.max_columns < 2 {
            return Err(Error::Config("max_columns must be at least 2".into()));
        }
        if self.max_batch == Some(0) {
            return Err(Error::Config("max_batch must be at least 1".into()));
        }
        Ok(())
    }
}

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid_once_connection_is_set() {
        let cfg = PoolConfig::new("host=localhost");
        assert!(cfg.max_connections >= 1);
        assert_eq!(cfg.max_columns, 1663);
        assert_eq!(cfg.batch_window, BatchWindow::Cycle);
        cfg.validate().unwrap();
    }

    #[test]
    fn missing_connection_is_rejected() {
        let err = PoolConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("connection string"));
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = PoolConfig::from_vars(vars(&[
            ("SCALARPOOL_CONNECTION", "dbname=gis"),
            ("SCALARPOOL_MAX_CONNECTIONS", "3"),
            ("SCALARPOOL_MAX_COLUMNS", "10"),
            ("SCALARPOOL_BATCH_WINDOW_MS", "25"),
            ("SCALARPOOL_MAX_BATCH", "bogus"),
        ]));
        assert_eq!(cfg.connection, "dbname=gis");
        assert_eq!(cfg.max_connections, 3);
        assert_eq!(cfg.max_columns, 10);
        assert_eq!(cfg.batch_window, BatchWindow::Timer { millis: 25 });
        assert_eq!(cfg.max_batch, None);
    }

    #[test]
    fn manual_window_from_env() {
        let cfg = PoolConfig::from_vars(vars(&[("SCALARPOOL_BATCH_WINDOW_MS", "Manual")]));
        assert_eq!(cfg.batch_window, BatchWindow::Manual);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let mut cfg = PoolConfig::new("x");
        cfg.max_connections = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PoolConfig::new("x");
        cfg.max_connections = 2;
        cfg.min_connections = 3;
        assert!(cfg.validate().is_err());

        let mut cfg = PoolConfig::new("x");
        cfg.max_columns = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn serde_round_trip_keeps_window() {
        let mut cfg = PoolConfig::new("x");
        cfg.batch_window = BatchWindow::Timer { millis: 5 };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: PoolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.batch_window, BatchWindow::Timer { millis: 5 });
    }
}
