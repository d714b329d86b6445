#![forbid(unsafe_code)]
//! scalarpool-core: values, configuration, chunk planning, and the function catalog.
//!
//! Everything here is pure. The exec crate owns connections, the evaluator
//! loop, and all database I/O; it feeds pending expressions into
//! [`chunk::plan_drain`] and routes rows back through the returned plans.

pub mod catalog;
pub mod chunk;
pub mod config;
pub mod error;
pub mod prelude;
pub mod types;

pub use chunk::{plan_drain, ChunkPlan, Fragment, DEFAULT_MAX_COLUMNS};
pub use config::{BatchWindow, PoolConfig};
pub use error::{Error, EvalError, Result};
pub use types::{Row, Scalar};
