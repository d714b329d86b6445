//! Public entry point: a caller-owned evaluator with its own pool.
//!
//! `Evaluator::new` spawns one evaluator task that exclusively owns the
//! batcher and the connection pool. Handles talk to it over an unbounded
//! channel, so `evaluate` never blocks and consecutive calls made without an
//! intervening `.await` are seen by the task as one batch.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};

use scalarpool_core::{plan_drain, BatchWindow, Error, EvalError, PoolConfig, Result, Scalar};

use crate::batcher::{BatchState, Batcher, Selection};
use crate::dispatch::{Chunk, Dispatcher};
use crate::driver::Driver;
use crate::metrics::{emit_span, Stats, StatsSnapshot};
use crate::pool::ConnectionPool;

enum Command {
    Evaluate(Selection),
    Flush,
    Close(oneshot::Sender<()>),
}

/// Handle to a running evaluator. Cheap to clone; the evaluator task stops
/// (after draining) once every handle is dropped or [`Evaluator::close`] runs.
#[derive(Clone, Debug)]
pub struct Evaluator {
    commands: mpsc::UnboundedSender<Command>,
    stats: Arc<Stats>,
}

impl Evaluator {
    /// Validate `config` and start the evaluator task on the current runtime.
    pub fn new<D: Driver>(config: PoolConfig, driver: D) -> Result<Self> {
        Self::with_driver(config, Arc::new(driver))
    }

    pub fn with_driver(config: PoolConfig, driver: Arc<dyn Driver>) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(format!("evaluator requires a tokio runtime: {e}")))?;
        let _guard = runtime.enter();

        let stats = Arc::new(Stats::default());
        let mut pool = ConnectionPool::new(
            driver,
            &config.connection,
            config.max_connections,
            Arc::clone(&stats),
        );
        pool.prewarm(config.min_connections);

        let (tx, rx) = mpsc::unbounded_channel();
        let task = EvalTask {
            batcher: Batcher::new(config.batch_window, config.max_batch),
            pool,
            dispatcher: Dispatcher::new(Arc::clone(&stats)),
            max_columns: config.max_columns,
            stats: Arc::clone(&stats),
        };
        runtime.spawn(task.run(rx));
        tracing::debug!(
            max_connections = config.max_connections,
            max_columns = config.max_columns,
            window = ?config.batch_window,
            "evaluator started"
        );

        Ok(Self {
            commands: tx,
            stats,
        })
    }

    /// Queue `expression` for evaluation and return a future for its value.
    ///
    /// The request is queued before this returns, not when the future is
    /// first polled.
    pub fn evaluate(&self, expression: impl Into<String>) -> PendingScalar {
        let (tx, rx) = oneshot::channel();
        self.evaluate_with(expression, move |result| {
            let _ = tx.send(result);
        });
        PendingScalar { rx }
    }

    /// Callback form of [`Evaluator::evaluate`]. `on_value` runs exactly once.
    pub fn evaluate_with<F>(&self, expression: impl Into<String>, on_value: F)
    where
        F: FnOnce(std::result::Result<Scalar, EvalError>) + Send + 'static,
    {
        let selection = Selection::new(expression, Box::new(on_value));
        // A failed send drops the selection, which reports Closed.
        if self.commands.send(Command::Evaluate(selection)).is_err() {
            tracing::debug!("evaluator closed; rejecting request");
        }
    }

    /// Drain whatever is pending now, regardless of the batch window.
    pub fn flush(&self) {
        if self.commands.send(Command::Flush).is_err() {
            tracing::debug!("evaluator closed; ignoring flush");
        }
    }

    /// Drain pending requests, close every connection, and wait until all
    /// in-flight statements have delivered their results.
    pub async fn close(self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Close(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Connections opened so far.
    pub fn connection_count(&self) -> usize {
        self.stats.snapshot().connections
    }
}

/// Future returned by [`Evaluator::evaluate`].
pub struct PendingScalar {
    rx: oneshot::Receiver<std::result::Result<Scalar, EvalError>>,
}

impl Future for PendingScalar {
    type Output = std::result::Result<Scalar, EvalError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(EvalError::Closed)))
    }
}

/// Empty sweeps in a row before a cycle window closes. Callers on other
/// worker threads may still be mid-burst after a single yield.
const QUIET_YIELDS: usize = 3;

enum Step {
    Continue,
    Close(oneshot::Sender<()>),
}

struct EvalTask {
    batcher: Batcher,
    pool: ConnectionPool,
    dispatcher: Dispatcher,
    max_columns: usize,
    stats: Arc<Stats>,
}

impl EvalTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let closer = loop {
            let command = match self.batcher.deadline() {
                Some(deadline) => tokio::select! {
                    command = rx.recv() => command,
                    _ = tokio::time::sleep_until(deadline) => {
                        self.drain();
                        continue;
                    }
                },
                None => rx.recv().await,
            };
            let Some(command) = command else {
                break None;
            };
            if let Step::Close(done) = self.apply(command) {
                break Some(done);
            }

            // Cycle window: keep yielding while callers are still queueing,
            // and drain once the channel has stayed empty for a few yields.
            if self.batcher.window() == BatchWindow::Cycle
                && self.batcher.state() == BatchState::Scheduled
            {
                let close = self.sweep_until_quiet(&mut rx).await;
                self.drain();
                if close.is_some() {
                    break close;
                }
            }
        };

        self.drain();
        rx.close();
        while let Ok(command) = rx.try_recv() {
            // Dropping queued selections reports Closed to their callers.
            if let Command::Close(done) = command {
                let _ = done.send(());
            }
        }
        self.pool.close().await;
        tracing::debug!(connections = self.pool.open_connections(), "evaluator stopped");
        if let Some(done) = closer {
            let _ = done.send(());
        }
    }

    /// Absorb commands until `QUIET_YIELDS` consecutive yields bring nothing
    /// new. Stops early on `Close`, handing back its sender.
    async fn sweep_until_quiet(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Option<oneshot::Sender<()>> {
        let mut quiet = 0;
        while quiet < QUIET_YIELDS {
            tokio::task::yield_now().await;
            let mut received = false;
            while let Ok(command) = rx.try_recv() {
                received = true;
                if let Step::Close(done) = self.apply(command) {
                    return Some(done);
                }
            }
            quiet = if received { 0 } else { quiet + 1 };
        }
        None
    }

    fn apply(&mut self, command: Command) -> Step {
        match command {
            Command::Evaluate(selection) => {
                self.stats.record_request();
                self.batcher.accumulate(selection);
                if self.batcher.is_full() {
                    self.drain();
                }
                Step::Continue
            }
            Command::Flush => {
                self.drain();
                Step::Continue
            }
            Command::Close(done) => Step::Close(done),
        }
    }

    /// Turn everything pending into statements and hand them to connections.
    fn drain(&mut self) {
        if self.batcher.is_empty() {
            self.batcher.finish();
            return;
        }
        let pending = self.batcher.take();
        let plans = {
            let expressions: Vec<&str> = pending.iter().map(Selection::expression).collect();
            plan_drain(&expressions, self.pool.max_connections(), self.max_columns)
        };
        let requests = pending.len();
        let mut slots: Vec<Option<Selection>> = pending.into_iter().map(Some).collect();

        self.stats.record_drain(plans.len());
        emit_span(
            "drain",
            &[
                ("requests", requests.to_string()),
                ("statements", plans.len().to_string()),
            ],
        );
        tracing::debug!(requests, statements = plans.len(), "draining batch");

        for plan in plans {
            let chunk = Chunk::new(plan, &mut slots);
            let connection = self.pool.least_busy();
            self.dispatcher.send(chunk, connection);
        }
        self.batcher.finish();
    }
}
