//! scalarpool: evaluate scalar SQL expressions through a bounded, auto-batching
//! connection pool.
//!
//! ```no_run
//! # async fn demo() -> scalarpool::Result<()> {
//! use scalarpool::{Evaluator, MemoryDriver, PoolConfig};
//!
//! let evaluator = Evaluator::new(PoolConfig::new("memory"), MemoryDriver::new())?;
//! let two = evaluator.evaluate("1+1");
//! let three = evaluator.evaluate("1+2");
//! assert_eq!(two.await.ok().and_then(|v| v.as_i64()), Some(2));
//! assert_eq!(three.await.ok().and_then(|v| v.as_i64()), Some(3));
//! evaluator.close().await;
//! # Ok(())
//! # }
//! ```

pub use scalarpool_core::{
    catalog, chunk, config, plan_drain, BatchWindow, ChunkPlan, Error, EvalError, Fragment,
    PoolConfig, Result, Row, Scalar,
};
pub use scalarpool_exec::{
    Driver, DriverError, Evaluator, FunctionHandler, MemoryDriver, PendingCall, PendingScalar,
    Session, StatsSnapshot,
};

#[cfg(feature = "postgres")]
pub use scalarpool_exec::PgDriver;
