//! Convenient re-exports for downstream crates.

pub use crate::catalog::{Catalog, FunctionDef, Literal, TypedLiteral};
pub use crate::chunk::{plan_drain, ChunkPlan, Fragment};
pub use crate::config::{BatchWindow, PoolConfig};
pub use crate::error::{Error, EvalError, Result};
pub use crate::types::{Row, Scalar};
