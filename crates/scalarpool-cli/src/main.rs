//! scalarpool CLI: evaluate scalar SQL expressions through a batching pool.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use scalarpool_core::prelude::{plan_drain, BatchWindow, Catalog, Literal, PoolConfig};
use scalarpool_exec::{Driver, Evaluator, FunctionHandler, MemoryDriver};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scalarpool")]
#[command(about = "Batch scalar SQL expressions over a bounded connection pool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate expressions as one batch and print each value as JSON
    Eval {
        #[command(flatten)]
        pool: PoolArgs,

        /// Scalar SQL expressions, e.g. `1+1`
        #[arg(required = true)]
        expressions: Vec<String>,
    },

    /// Print the statements a batch would be planned into, without running them
    Explain {
        #[command(flatten)]
        pool: PoolArgs,

        #[arg(required = true)]
        expressions: Vec<String>,
    },

    /// Call a catalog function with literal arguments
    Call {
        #[command(flatten)]
        pool: PoolArgs,

        /// Catalog YAML file (defaults to the built-in PostGIS catalog)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Function name within the catalog, e.g. `azimuth`
        function: String,

        /// Argument lexical forms, e.g. `POINT(0 0)`
        args: Vec<String>,
    },
}

#[derive(Args, Debug, Default)]
struct PoolArgs {
    /// Connection string (overrides SCALARPOOL_CONNECTION)
    #[arg(long)]
    connection: Option<String>,

    /// Pool size cap (overrides SCALARPOOL_MAX_CONNECTIONS)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Engine column limit (overrides SCALARPOOL_MAX_COLUMNS)
    #[arg(long)]
    max_columns: Option<usize>,

    /// Timer batch window in milliseconds
    #[arg(long)]
    window_ms: Option<u64>,

    /// Use the in-process driver instead of a database
    #[arg(long)]
    memory: bool,
}

impl PoolArgs {
    fn apply_overrides(&self, config: &mut PoolConfig) {
        if let Some(connection) = &self.connection {
            config.connection = connection.clone();
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(max) = self.max_columns {
            config.max_columns = max;
        }
        if let Some(millis) = self.window_ms {
            config.batch_window = BatchWindow::Timer { millis };
        }
        if self.memory && config.connection.is_empty() {
            config.connection = "memory".into();
        }
    }

    fn config(&self) -> PoolConfig {
        let mut config = PoolConfig::from_env();
        self.apply_overrides(&mut config);
        config
    }

    fn driver(&self) -> Arc<dyn Driver> {
        #[cfg(feature = "postgres")]
        {
            if !self.memory {
                return Arc::new(scalarpool_exec::PgDriver::new());
            }
        }
        Arc::new(MemoryDriver::new())
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Eval { pool, expressions } => eval(&pool, expressions).await,
        Commands::Explain { pool, expressions } => explain(&pool, &expressions),
        Commands::Call {
            pool,
            catalog,
            function,
            args,
        } => call(&pool, catalog, &function, args).await,
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn eval(pool: &PoolArgs, expressions: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let evaluator = Evaluator::with_driver(pool.config(), pool.driver())?;
    let pending: Vec<_> = expressions
        .iter()
        .map(|expr| evaluator.evaluate(expr.as_str()))
        .collect();

    let mut failed = 0;
    for (expression, value) in expressions.iter().zip(pending) {
        let line = match value.await {
            Ok(value) => serde_json::json!({ "expression": expression, "value": value }),
            Err(err) => {
                failed += 1;
                serde_json::json!({ "expression": expression, "error": err.to_string() })
            }
        };
        println!("{line}");
    }
    let stats = evaluator.stats();
    evaluator.close().await;
    tracing::info!(?stats, "done");

    if failed > 0 {
        return Err(format!("{failed} expression(s) failed").into());
    }
    Ok(())
}

fn explain(pool: &PoolArgs, expressions: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = pool.config();
    if config.connection.is_empty() {
        // Planning never connects.
        config.connection = "explain".into();
    }
    config.validate()?;

    let plans = plan_drain(expressions, config.max_connections, config.max_columns);
    println!("Batch Plan");
    println!("==========");
    println!("Requests: {}", expressions.len());
    println!("Max Connections: {}", config.max_connections);
    println!("Max Columns: {}", config.max_columns);
    println!("Statements: {}", plans.len());
    for (i, plan) in plans.iter().enumerate() {
        println!();
        println!(
            "  {}. {} selection(s), {} row(s) x {} column(s)",
            i + 1,
            plan.selection_count(),
            plan.branches.len(),
            plan.width()
        );
        println!("     {}", plan.sql);
    }
    Ok(())
}

async fn call(
    pool: &PoolArgs,
    catalog: Option<PathBuf>,
    function: &str,
    args: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = match catalog {
        Some(path) => Catalog::from_yaml(&fs::read_to_string(path)?)?,
        None => Catalog::postgis(),
    };
    let evaluator = Evaluator::with_driver(pool.config(), pool.driver())?;
    let handler = FunctionHandler::new(evaluator.clone(), catalog);
    let args: Vec<Literal> = args.into_iter().map(Literal::new).collect();

    let result = handler.call(function, &args)?.await;
    evaluator.close().await;
    let literal = result?;
    println!("{}", serde_json::to_string(&literal)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_env_config() {
        let mut config = PoolConfig::from_vars(|key| match key {
            "SCALARPOOL_CONNECTION" => Some("host=env".into()),
            "SCALARPOOL_MAX_CONNECTIONS" => Some("8".into()),
            _ => None,
        });
        let args = PoolArgs {
            max_connections: Some(2),
            window_ms: Some(25),
            ..Default::default()
        };
        args.apply_overrides(&mut config);
        assert_eq!(config.connection, "host=env");
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.batch_window, BatchWindow::Timer { millis: 25 });
    }

    #[test]
    fn memory_flag_fills_in_a_connection() {
        let mut config = PoolConfig::default();
        let args = PoolArgs {
            memory: true,
            ..Default::default()
        };
        args.apply_overrides(&mut config);
        assert_eq!(config.connection, "memory");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cli_parses_call() {
        let cli = Cli::parse_from([
            "scalarpool",
            "call",
            "--memory",
            "azimuth",
            "POINT(0 0)",
            "POINT(1 1)",
        ]);
        match cli.command {
            Commands::Call { pool, function, args, .. } => {
                assert!(pool.memory);
                assert_eq!(function, "azimuth");
                assert_eq!(args.len(), 2);
            }
            _ => panic!("expected call"),
        }
    }
}
