//! The native database driver contract.
//!
//! A driver opens sessions; a session runs one statement at a time and
//! returns its rows with columns in select-list order.

use async_trait::async_trait;
use thiserror::Error;

use scalarpool_core::Row;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("connect: {0}")]
    Connect(String),
    #[error("query: {0}")]
    Query(String),
    #[error("decode: {0}")]
    Decode(String),
}

#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Establish one session.
    async fn connect(&self, connection: &str) -> Result<Box<dyn Session>, DriverError>;
}

#[async_trait]
pub trait Session: Send + 'static {
    /// Execute `sql` and return every row it produced, in order.
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, DriverError>;
}
