//! One database session and its FIFO statement queue.
//!
//! Every connection runs a worker task that owns the session. The worker
//! connects first, then pops statements in submission order and runs them
//! one at a time. Statements queued before the session is up simply wait.
//!
//! Failures stay local: a connect failure is delivered to every statement
//! queued on this connection, a query failure only to the statement that
//! caused it. The worker keeps serving the queue either way.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use scalarpool_core::{EvalError, Row};

use crate::driver::Driver;

pub type RowsCallback = Box<dyn FnOnce(Result<Vec<Row>, EvalError>) + Send + 'static>;

/// A statement waiting in (or executing from) a connection's queue.
///
/// The callback runs exactly once. Dropping an unfinished query reports
/// [`EvalError::Closed`].
pub struct PendingQuery {
    sql: String,
    on_rows: Option<RowsCallback>,
}

impl PendingQuery {
    pub fn new(sql: String, on_rows: RowsCallback) -> Self {
        Self {
            sql,
            on_rows: Some(on_rows),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn complete(mut self, result: Result<Vec<Row>, EvalError>) {
        if let Some(on_rows) = self.on_rows.take() {
            on_rows(result);
        }
    }
}

impl Drop for PendingQuery {
    fn drop(&mut self) {
        if let Some(on_rows) = self.on_rows.take() {
            on_rows(Err(EvalError::Closed));
        }
    }
}

pub struct Connection {
    index: usize,
    queue: Option<mpsc::UnboundedSender<PendingQuery>>,
    depth: Arc<AtomicUsize>,
    connected: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Connection {
    /// Spawn the worker and start connecting. Must run inside a tokio runtime.
    pub fn open(index: usize, driver: Arc<dyn Driver>, connection: Arc<str>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let connected = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(run_worker(
            index,
            driver,
            connection,
            rx,
            Arc::clone(&depth),
            Arc::clone(&connected),
        ));
        Self {
            index,
            queue: Some(tx),
            depth,
            connected,
            worker: Some(worker),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Statements queued or executing on this connection.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Append a statement to the back of the queue.
    pub fn enqueue(&self, sql: String, on_rows: RowsCallback) {
        let query = PendingQuery::new(sql, on_rows);
        let Some(queue) = self.queue.as_ref() else {
            query.complete(Err(EvalError::Closed));
            return;
        };
        self.depth.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(query)) = queue.send(query) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            query.complete(Err(EvalError::Closed));
        }
    }

    /// Stop accepting statements and wait for the queue to run dry.
    pub async fn close(&mut self) {
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                tracing::error!(connection = self.index, %err, "connection worker aborted");
            }
        }
    }
}

async fn run_worker(
    index: usize,
    driver: Arc<dyn Driver>,
    connection: Arc<str>,
    mut rx: mpsc::UnboundedReceiver<PendingQuery>,
    depth: Arc<AtomicUsize>,
    connected: Arc<AtomicBool>,
) {
    let mut session = match driver.connect(&connection).await {
        Ok(session) => {
            connected.store(true, Ordering::SeqCst);
            tracing::debug!(connection = index, "connected");
            session
        }
        Err(err) => {
            tracing::error!(connection = index, %err, "connect failed");
            let err = EvalError::Connection(err.to_string());
            while let Some(query) = rx.recv().await {
                query.complete(Err(err.clone()));
                depth.fetch_sub(1, Ordering::SeqCst);
            }
            return;
        }
    };

    while let Some(query) = rx.recv().await {
        tracing::trace!(connection = index, sql_len = query.sql().len(), "executing");
        let result = session
            .query(query.sql())
            .await
            .map_err(|err| EvalError::Query(err.to_string()));
        if let Err(err) = &result {
            tracing::warn!(connection = index, %err, "statement failed");
        }
        query.complete(result);
        depth.fetch_sub(1, Ordering::SeqCst);
    }
    tracing::debug!(connection = index, "queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;
    use scalarpool_core::Scalar;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn open(driver: &MemoryDriver) -> Connection {
        Connection::open(0, Arc::new(driver.clone()), Arc::from("memory"))
    }

    #[tokio::test]
    async fn statements_run_in_submission_order() {
        let driver = MemoryDriver::new();
        let mut conn = open(&driver);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            conn.enqueue(
                format!("select {i} as r"),
                Box::new(move |rows| seen.lock().unwrap().push(rows.unwrap()[0][0].clone())),
            );
        }
        conn.close().await;
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, (0..5).map(Scalar::Int).collect::<Vec<_>>());
        assert!(conn.is_connected());
        assert_eq!(conn.depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn depth_counts_queued_and_executing() {
        let driver = MemoryDriver::new().with_delay(Duration::from_millis(50));
        let conn = open(&driver);
        let (tx, rx) = oneshot::channel();
        conn.enqueue("select 1 as r".into(), Box::new(|_| {}));
        conn.enqueue("select 2 as r".into(), Box::new(move |rows| {
            let _ = tx.send(rows);
        }));
        assert_eq!(conn.depth(), 2);
        let rows = rx.await.unwrap().unwrap();
        assert_eq!(rows, vec![vec![Scalar::Int(2)]]);
        tokio::task::yield_now().await;
        assert_eq!(conn.depth(), 0);
    }

    #[tokio::test]
    async fn connect_failure_reaches_every_queued_statement() {
        let driver = MemoryDriver::new().fail_connect();
        let mut conn = open(&driver);
        let errors = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let errors = Arc::clone(&errors);
            conn.enqueue(
                "select 1 as r".into(),
                Box::new(move |rows| errors.lock().unwrap().push(rows.unwrap_err())),
            );
        }
        conn.close().await;
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], EvalError::Connection(_)));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn query_failure_does_not_stop_the_queue() {
        let driver = MemoryDriver::new().fail_when("boom");
        let mut conn = open(&driver);
        let results = Arc::new(Mutex::new(Vec::new()));
        for sql in ["select boom as r", "select 7 as r"] {
            let results = Arc::clone(&results);
            conn.enqueue(
                sql.into(),
                Box::new(move |rows| results.lock().unwrap().push(rows)),
            );
        }
        conn.close().await;
        let results = results.lock().unwrap();
        assert!(matches!(results[0], Err(EvalError::Query(_))));
        assert_eq!(results[1], Ok(vec![vec![Scalar::Int(7)]]));
    }

    #[tokio::test]
    async fn closed_connection_rejects_new_work() {
        let driver = MemoryDriver::new();
        let mut conn = open(&driver);
        conn.close().await;
        let (tx, rx) = oneshot::channel();
        conn.enqueue("select 1 as r".into(), Box::new(move |rows| {
            let _ = tx.send(rows);
        }));
        assert_eq!(rx.await.unwrap(), Err(EvalError::Closed));
    }
}
