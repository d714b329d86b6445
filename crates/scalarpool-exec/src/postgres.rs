//! PostgreSQL driver on tokio-postgres.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, Config, NoTls};

use scalarpool_core::{Row, Scalar};

use crate::driver::{Driver, DriverError, Session};

#[derive(Debug, Clone)]
pub struct PgDriver {
    connect_timeout: Option<Duration>,
}

impl Default for PgDriver {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl PgDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Driver for PgDriver {
    async fn connect(&self, connection: &str) -> Result<Box<dyn Session>, DriverError> {
        let mut config = Config::from_str(connection)
            .map_err(|err| DriverError::Connect(format!("invalid connection string: {err}")))?;
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout(timeout);
        }
        let (client, conn) = config
            .connect(NoTls)
            .await
            .map_err(|err| DriverError::Connect(err.to_string()))?;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                tracing::error!(%err, "postgres connection error");
            }
        });
        Ok(Box::new(PgSession { client }))
    }
}

struct PgSession {
    client: Client,
}

#[async_trait]
impl Session for PgSession {
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, DriverError> {
        let rows = self
            .client
            .query(sql, &[])
            .await
            .map_err(|err| DriverError::Query(err.to_string()))?;
        rows.iter().map(decode_row).collect()
    }
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Row, DriverError> {
    (0..row.len()).map(|i| decode_column(row, i)).collect()
}

/// How a result column is read back into a [`Scalar`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Unsupported,
}

fn column_kind(ty: &Type) -> ColumnKind {
    const TEXT_LIKE: [Type; 5] = [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME, Type::UNKNOWN];
    if *ty == Type::BOOL {
        ColumnKind::Bool
    } else if *ty == Type::INT2 {
        ColumnKind::Int2
    } else if *ty == Type::INT4 {
        ColumnKind::Int4
    } else if *ty == Type::INT8 {
        ColumnKind::Int8
    } else if *ty == Type::FLOAT4 {
        ColumnKind::Float4
    } else if *ty == Type::FLOAT8 {
        ColumnKind::Float8
    } else if *ty == Type::NUMERIC {
        ColumnKind::Numeric
    } else if TEXT_LIKE.contains(ty) {
        ColumnKind::Text
    } else {
        ColumnKind::Unsupported
    }
}

/// NUMERIC comes back as a float when it fits, else as its exact text.
fn numeric_scalar(value: Decimal) -> Scalar {
    match value.to_f64() {
        Some(v) if v.is_finite() => Scalar::Float(v),
        _ => Scalar::Text(value.to_string()),
    }
}

fn decode_column(row: &tokio_postgres::Row, i: usize) -> Result<Scalar, DriverError> {
    let column = &row.columns()[i];
    let decode = |err: tokio_postgres::Error| DriverError::Decode(err.to_string());
    let value = match column_kind(column.type_()) {
        ColumnKind::Bool => row.try_get::<_, Option<bool>>(i).map_err(decode)?.map(Scalar::Bool),
        ColumnKind::Int2 => row
            .try_get::<_, Option<i16>>(i)
            .map_err(decode)?
            .map(|v| Scalar::Int(v.into())),
        ColumnKind::Int4 => row
            .try_get::<_, Option<i32>>(i)
            .map_err(decode)?
            .map(|v| Scalar::Int(v.into())),
        ColumnKind::Int8 => row.try_get::<_, Option<i64>>(i).map_err(decode)?.map(Scalar::Int),
        ColumnKind::Float4 => row
            .try_get::<_, Option<f32>>(i)
            .map_err(decode)?
            .map(|v| Scalar::Float(v.into())),
        ColumnKind::Float8 => row.try_get::<_, Option<f64>>(i).map_err(decode)?.map(Scalar::Float),
        ColumnKind::Numeric => row
            .try_get::<_, Option<Decimal>>(i)
            .map_err(decode)?
            .map(numeric_scalar),
        ColumnKind::Text => row.try_get::<_, Option<String>>(i).map_err(decode)?.map(Scalar::Text),
        ColumnKind::Unsupported => {
            return Err(DriverError::Decode(format!(
                "column {} has unsupported type {}",
                column.name(),
                column.type_()
            )))
        }
    };
    Ok(value.unwrap_or(Scalar::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn column_types_map_to_scalar_kinds() {
        assert_eq!(column_kind(&Type::BOOL), ColumnKind::Bool);
        assert_eq!(column_kind(&Type::INT2), ColumnKind::Int2);
        assert_eq!(column_kind(&Type::INT8), ColumnKind::Int8);
        assert_eq!(column_kind(&Type::FLOAT8), ColumnKind::Float8);
        assert_eq!(column_kind(&Type::NUMERIC), ColumnKind::Numeric);
        assert_eq!(column_kind(&Type::TEXT), ColumnKind::Text);
        assert_eq!(column_kind(&Type::VARCHAR), ColumnKind::Text);
        assert_eq!(column_kind(&Type::BYTEA), ColumnKind::Unsupported);
        assert_eq!(column_kind(&Type::TIMESTAMPTZ), ColumnKind::Unsupported);
    }

    #[test]
    fn numeric_values_become_floats() {
        let value = Decimal::from_str("1.5").unwrap();
        assert_eq!(numeric_scalar(value), Scalar::Float(1.5));
        let value = Decimal::from_str("-42").unwrap();
        assert_eq!(numeric_scalar(value), Scalar::Float(-42.0));
    }

    #[tokio::test]
    async fn bad_connection_strings_fail_before_connecting() {
        let result = PgDriver::new().connect("port=notanumber").await;
        assert!(matches!(result, Err(DriverError::Connect(_))));
    }
}
