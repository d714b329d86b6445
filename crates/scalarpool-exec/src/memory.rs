//! In-process driver for tests, benches, and dry runs.
//!
//! Statements are parsed with `sqlparser` (PostgreSQL dialect). The driver
//! evaluates the shapes the planner emits (`select e as r`, multi-column
//! selects, parenthesized `union all` branches) over a small scalar
//! language: numeric arithmetic, string concatenation, comparisons, and a
//! handful of functions including a planar `ST_Azimuth`.
//! Every executed statement is recorded together with the session that ran
//! it, so tests can assert on routing.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Query, Select,
    SelectItem, SetExpr, SetOperator, SetQuantifier, Statement, UnaryOperator, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use scalarpool_core::{Row, Scalar};

use crate::driver::{Driver, DriverError, Session};

pub type UserFunction = Arc<dyn Fn(&[Scalar]) -> Result<Scalar, String> + Send + Sync>;

/// A statement as seen by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    /// Order in which the session connected, starting at 0.
    pub session: usize,
    pub sql: String,
}

#[derive(Default)]
struct State {
    delay: Option<Duration>,
    fail_connect: bool,
    fail_when: Vec<String>,
    empty_when: Vec<String>,
    functions: HashMap<String, UserFunction>,
    connects: usize,
    executed: Vec<Executed>,
}

#[derive(Clone, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<State>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep this long inside every statement.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state().delay = Some(delay);
        self
    }

    /// Refuse every connection attempt.
    pub fn fail_connect(self) -> Self {
        self.state().fail_connect = true;
        self
    }

    /// Fail any statement whose text contains `needle`.
    pub fn fail_when(self, needle: impl Into<String>) -> Self {
        self.state().fail_when.push(needle.into());
        self
    }

    /// Return zero rows for any statement whose text contains `needle`.
    pub fn empty_when(self, needle: impl Into<String>) -> Self {
        self.state().empty_when.push(needle.into());
        self
    }

    /// Register a function callable from expressions. Names are case-insensitive.
    pub fn with_function<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&[Scalar]) -> Result<Scalar, String> + Send + Sync + 'static,
    {
        self.state()
            .functions
            .insert(name.to_ascii_lowercase(), Arc::new(f));
        self
    }

    /// Successful and failed connection attempts so far.
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    pub fn statements(&self) -> Vec<Executed> {
        self.state().executed.clone()
    }

    /// Evaluate one statement without a session.
    pub fn execute(&self, sql: &str) -> Result<Vec<Row>, DriverError> {
        let functions = self.state().functions.clone();
        run_statement(sql, &functions).map_err(DriverError::Query)
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn connect(&self, _connection: &str) -> Result<Box<dyn Session>, DriverError> {
        let mut state = self.state();
        let id = state.connects;
        state.connects += 1;
        if state.fail_connect {
            return Err(DriverError::Connect("connection refused".into()));
        }
        drop(state);
        Ok(Box::new(MemorySession {
            id,
            driver: self.clone(),
        }))
    }
}

struct MemorySession {
    id: usize,
    driver: MemoryDriver,
}

#[async_trait]
impl Session for MemorySession {
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, DriverError> {
        let (delay, failing, empty, functions) = {
            let mut state = self.driver.state();
            state.executed.push(Executed {
                session: self.id,
                sql: sql.to_string(),
            });
            let failing = state.fail_when.iter().find(|n| sql.contains(n.as_str())).cloned();
            let empty = state.empty_when.iter().any(|n| sql.contains(n.as_str()));
            (state.delay, failing, empty, state.functions.clone())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(needle) = failing {
            return Err(DriverError::Query(format!("forced failure on '{needle}'")));
        }
        if empty {
            return Ok(Vec::new());
        }
        run_statement(sql, &functions).map_err(DriverError::Query)
    }
}

fn run_statement(sql: &str, functions: &HashMap<String, UserFunction>) -> Result<Vec<Row>, String> {
    let mut statements =
        Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(|err| err.to_string())?;
    let statement = match (statements.pop(), statements.is_empty()) {
        (Some(statement), true) => statement,
        _ => return Err("expected exactly one statement".into()),
    };
    match statement {
        Statement::Query(query) => Interpreter { functions }.query(&query),
        other => Err(format!("unsupported statement: {other}")),
    }
}

struct Interpreter<'a> {
    functions: &'a HashMap<String, UserFunction>,
}

impl Interpreter<'_> {
    fn query(&self, query: &Query) -> Result<Vec<Row>, String> {
        self.set_expr(&query.body)
    }

    /// Rows in branch order: `union all` concatenates left then right.
    fn set_expr(&self, body: &SetExpr) -> Result<Vec<Row>, String> {
        match body {
            SetExpr::Select(select) => self.select(select).map(|row| vec![row]),
            SetExpr::Query(query) => self.query(query),
            SetExpr::SetOperation {
                op: SetOperator::Union,
                set_quantifier: SetQuantifier::All,
                left,
                right,
            } => {
                let mut rows = self.set_expr(left)?;
                rows.extend(self.set_expr(right)?);
                Ok(rows)
            }
            SetExpr::SetOperation { .. } => Err("only union all is supported".into()),
            other => Err(format!("unsupported query body: {other}")),
        }
    }

    fn select(&self, select: &Select) -> Result<Row, String> {
        if !select.from.is_empty() {
            return Err("FROM is not supported".into());
        }
        select
            .projection
            .iter()
            .map(|item| match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    self.expr(expr)
                }
                other => Err(format!("unsupported select item: {other}")),
            })
            .collect()
    }

    fn expr(&self, expr: &Expr) -> Result<Scalar, String> {
        match expr {
            Expr::Value(ValueWithSpan { value, .. }) => literal(value),
            Expr::Nested(inner) => self.expr(inner),
            Expr::UnaryOp { op, expr } => {
                let value = self.expr(expr)?;
                match op {
                    UnaryOperator::Plus => Ok(value),
                    UnaryOperator::Minus => negate(value),
                    other => Err(format!("operator does not exist: {other} {value:?}")),
                }
            }
            Expr::BinaryOp { left, op, right } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                binary(op, &left, &right)
            }
            Expr::Function(function) => {
                let args = self.args(&function.args)?;
                self.call(&function.name.to_string(), &args)
            }
            Expr::Identifier(ident) => Err(format!("column \"{}\" does not exist", ident.value)),
            other => Err(format!("unsupported expression: {other}")),
        }
    }

    fn args(&self, args: &FunctionArguments) -> Result<Vec<Scalar>, String> {
        match args {
            FunctionArguments::None => Ok(Vec::new()),
            FunctionArguments::List(list) => list
                .args
                .iter()
                .map(|arg| match arg {
                    FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => self.expr(expr),
                    other => Err(format!("unsupported function argument: {other}")),
                })
                .collect(),
            _ => Err("subquery arguments are not supported".into()),
        }
    }

    fn call(&self, name: &str, args: &[Scalar]) -> Result<Scalar, String> {
        let lower = name.to_ascii_lowercase();
        if let Some(f) = self.functions.get(&lower) {
            return f(args);
        }
        if args.iter().any(Scalar::is_null) {
            return Ok(Scalar::Null);
        }
        match (lower.as_str(), args) {
            ("pi", []) => Ok(Scalar::Float(PI)),
            ("abs", [Scalar::Int(v)]) => Ok(Scalar::Int(v.wrapping_abs())),
            ("abs", [v]) => numeric_arg(name, v).map(|f| Scalar::Float(f.abs())),
            ("sqrt", [v]) => {
                let f = numeric_arg(name, v)?;
                if f < 0.0 {
                    return Err("cannot take square root of a negative number".into());
                }
                Ok(Scalar::Float(f.sqrt()))
            }
            ("round", [v]) => numeric_arg(name, v).map(|f| Scalar::Float(f.round())),
            ("upper", [v]) => Ok(Scalar::Text(v.to_string().to_uppercase())),
            ("lower", [v]) => Ok(Scalar::Text(v.to_string().to_lowercase())),
            ("length", [v]) => Ok(Scalar::Int(v.to_string().chars().count() as i64)),
            ("st_geogfromtext" | "st_geomfromtext", [Scalar::Text(wkt)]) => {
                parse_point(wkt)?;
                Ok(Scalar::Text(wkt.clone()))
            }
            ("st_azimuth", [Scalar::Text(a), Scalar::Text(b)]) => azimuth(a, b),
            _ => Err(format!("function {name} does not exist")),
        }
    }
}

fn parse_number(text: &str) -> Result<Scalar, String> {
    if !text.contains(['.', 'e', 'E']) {
        if let Ok(v) = text.parse::<i64>() {
            return Ok(Scalar::Int(v));
        }
    }
    text.parse::<f64>()
        .map(Scalar::Float)
        .map_err(|_| format!("invalid number \"{text}\""))
}

fn literal(value: &Value) -> Result<Scalar, String> {
    match value {
        Value::Number(text, _) => parse_number(text),
        Value::SingleQuotedString(text) => Ok(Scalar::Text(text.clone())),
        Value::Boolean(b) => Ok(Scalar::Bool(*b)),
        Value::Null => Ok(Scalar::Null),
        other => Err(format!("unsupported literal: {other}")),
    }
}

fn negate(value: Scalar) -> Result<Scalar, String> {
    match value {
        Scalar::Int(v) => v
            .checked_neg()
            .map(Scalar::Int)
            .ok_or_else(|| "integer out of range".to_string()),
        Scalar::Float(v) => Ok(Scalar::Float(-v)),
        Scalar::Null => Ok(Scalar::Null),
        other => Err(format!("operator does not exist: - {other:?}")),
    }
}

fn binary(op: &BinaryOperator, left: &Scalar, right: &Scalar) -> Result<Scalar, String> {
    match op {
        BinaryOperator::Plus => arith('+', left, right),
        BinaryOperator::Minus => arith('-', left, right),
        BinaryOperator::Multiply => arith('*', left, right),
        BinaryOperator::Divide => arith('/', left, right),
        BinaryOperator::Modulo => arith('%', left, right),
        BinaryOperator::StringConcat => Ok(match (left, right) {
            (Scalar::Null, _) | (_, Scalar::Null) => Scalar::Null,
            _ => Scalar::Text(format!("{left}{right}")),
        }),
        BinaryOperator::Eq => compare("=", left, right),
        BinaryOperator::NotEq => compare("<>", left, right),
        BinaryOperator::Lt => compare("<", left, right),
        BinaryOperator::LtEq => compare("<=", left, right),
        BinaryOperator::Gt => compare(">", left, right),
        BinaryOperator::GtEq => compare(">=", left, right),
        other => Err(format!("operator does not exist: {other}")),
    }
}

fn numeric_arg(name: &str, value: &Scalar) -> Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("function {name}({value:?}) does not exist"))
}

fn arith(op: char, left: &Scalar, right: &Scalar) -> Result<Scalar, String> {
    match (left, right) {
        (Scalar::Null, _) | (_, Scalar::Null) => Ok(Scalar::Null),
        (Scalar::Int(a), Scalar::Int(b)) => {
            if matches!(op, '/' | '%') && *b == 0 {
                return Err("division by zero".into());
            }
            let out = match op {
                '+' => a.checked_add(*b),
                '-' => a.checked_sub(*b),
                '*' => a.checked_mul(*b),
                '/' => a.checked_div(*b),
                _ => a.checked_rem(*b),
            };
            out.map(Scalar::Int)
                .ok_or_else(|| "integer out of range".to_string())
        }
        _ => {
            let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                return Err(format!("operator does not exist: {left:?} {op} {right:?}"));
            };
            if matches!(op, '/' | '%') && b == 0.0 {
                return Err("division by zero".into());
            }
            let out = match op {
                '+' => a + b,
                '-' => a - b,
                '*' => a * b,
                '/' => a / b,
                _ => a % b,
            };
            Ok(Scalar::Float(out))
        }
    }
}

fn compare(op: &str, left: &Scalar, right: &Scalar) -> Result<Scalar, String> {
    use std::cmp::Ordering;

    let ordering = match (left, right) {
        (Scalar::Null, _) | (_, Scalar::Null) => return Ok(Scalar::Null),
        (Scalar::Text(a), Scalar::Text(b)) => a.cmp(b),
        (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => return Err(format!("operator does not exist: {left:?} {op} {right:?}")),
        },
    };
    let holds = match op {
        "=" => ordering == Ordering::Equal,
        "<>" => ordering != Ordering::Equal,
        "<" => ordering == Ordering::Less,
        "<=" => ordering != Ordering::Greater,
        ">" => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    };
    Ok(Scalar::Bool(holds))
}

/// `POINT(x y)`, optionally prefixed with `SRID=n;`.
fn parse_point(wkt: &str) -> Result<(f64, f64), String> {
    let body = wkt.rsplit(';').next().unwrap_or(wkt).trim();
    let invalid = || format!("parse error - invalid geometry \"{wkt}\"");
    let coords = body
        .get(..5)
        .filter(|head| head.eq_ignore_ascii_case("point"))
        .map(|_| body[5..].trim())
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(invalid)?;
    let mut parts = coords.split_whitespace().map(str::parse::<f64>);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(x)), Some(Ok(y)), None) => Ok((x, y)),
        _ => Err(invalid()),
    }
}

/// Clockwise angle from north, in radians. Coincident points give NULL.
fn azimuth(from: &str, to: &str) -> Result<Scalar, String> {
    let (x0, y0) = parse_point(from)?;
    let (x1, y1) = parse_point(to)?;
    let (dx, dy) = (x1 - x0, y1 - y0);
    if dx == 0.0 && dy == 0.0 {
        return Ok(Scalar::Null);
    }
    let angle = dx.atan2(dy);
    Ok(Scalar::Float(if angle < 0.0 { angle + 2.0 * PI } else { angle }))
}
