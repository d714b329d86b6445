#![forbid(unsafe_code)]
//! scalarpool-exec: connections, the pool, batching, and result routing.
//!
//! Requests enter through [`Evaluator`]. A single evaluator task owns the
//! [`Batcher`] and the [`ConnectionPool`]; each [`Connection`] runs its own
//! worker task that executes statements one at a time. Rows come back to the
//! [`dispatch`] layer, which hands every requested scalar to its caller.

pub mod batcher;
pub mod connection;
pub mod dispatch;
pub mod driver;
pub mod evaluator;
pub mod handler;
pub mod memory;
pub mod metrics;
pub mod pool;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use batcher::{BatchState, Batcher, Selection};
pub use connection::{Connection, PendingQuery};
pub use dispatch::{Chunk, Dispatcher};
pub use driver::{Driver, DriverError, Session};
pub use evaluator::{Evaluator, PendingScalar};
pub use handler::{FunctionHandler, PendingCall};
pub use memory::MemoryDriver;
pub use metrics::{Stats, StatsSnapshot};
pub use pool::ConnectionPool;

#[cfg(feature = "postgres")]
pub use postgres::PgDriver;
