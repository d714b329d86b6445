//! Accumulates evaluation requests until the batch window closes.
//!
//! The batcher is a small state machine driven by the evaluator task:
//! `Idle --accumulate--> Scheduled --take--> Draining --finish--> Idle`.
//! Only the first request of a window moves it out of `Idle`, so exactly one
//! drain is owed per window no matter how many requests land in it.

use std::mem;
use std::time::Duration;

use tokio::time::Instant;

use scalarpool_core::{BatchWindow, EvalError, Scalar};

pub type ValueCallback = Box<dyn FnOnce(Result<Scalar, EvalError>) + Send + 'static>;

/// One caller's expression and where its value goes.
///
/// Resolved exactly once; dropping an unresolved selection reports
/// [`EvalError::Closed`].
pub struct Selection {
    expression: String,
    on_value: Option<ValueCallback>,
}

impl Selection {
    pub fn new(expression: impl Into<String>, on_value: ValueCallback) -> Self {
        Self {
            expression: expression.into(),
            on_value: Some(on_value),
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn resolve(mut self, result: Result<Scalar, EvalError>) {
        if let Some(on_value) = self.on_value.take() {
            on_value(result);
        }
    }
}

impl Drop for Selection {
    fn drop(&mut self) {
        if let Some(on_value) = self.on_value.take() {
            on_value(Err(EvalError::Closed));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Scheduled,
    Draining,
}

pub struct Batcher {
    pending: Vec<Selection>,
    state: BatchState,
    window: BatchWindow,
    max_batch: Option<usize>,
    opened_at: Option<Instant>,
}

impl Batcher {
    pub fn new(window: BatchWindow, max_batch: Option<usize>) -> Self {
        Self {
            pending: Vec::new(),
            state: BatchState::Idle,
            window,
            max_batch,
            opened_at: None,
        }
    }

    pub fn window(&self) -> BatchWindow {
        self.window
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue a selection. Returns `true` when this opened a new window, i.e.
    /// the caller now owes exactly one drain.
    pub fn accumulate(&mut self, selection: Selection) -> bool {
        self.pending.push(selection);
        if self.state == BatchState::Idle {
            self.state = BatchState::Scheduled;
            self.opened_at = Some(Instant::now());
            return true;
        }
        false
    }

    /// Size threshold reached; drain without waiting for the window.
    pub fn is_full(&self) -> bool {
        self.max_batch
            .is_some_and(|max| self.pending.len() >= max)
    }

    /// When a timer window should drain, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        match (self.window, self.state, self.opened_at) {
            (BatchWindow::Timer { millis }, BatchState::Scheduled, Some(opened)) => {
                Some(opened + Duration::from_millis(millis))
            }
            _ => None,
        }
    }

    /// Hand over everything accumulated in this window.
    pub fn take(&mut self) -> Vec<Selection> {
        self.state = BatchState::Draining;
        mem::take(&mut self.pending)
    }

    /// The drain for this window has been dispatched.
    pub fn finish(&mut self) {
        self.state = BatchState::Idle;
        self.opened_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn noop(expr: &str) -> Selection {
        Selection::new(expr, Box::new(|_| {}))
    }

    #[test]
    fn one_drain_per_window() {
        let mut batcher = Batcher::new(BatchWindow::Cycle, None);
        assert!(batcher.accumulate(noop("1")));
        assert!(!batcher.accumulate(noop("2")));
        assert!(!batcher.accumulate(noop("3")));
        assert_eq!(batcher.state(), BatchState::Scheduled);

        let batch = batcher.take();
        assert_eq!(batch.len(), 3);
        assert_eq!(batcher.state(), BatchState::Draining);
        assert!(batcher.is_empty());

        batcher.finish();
        assert_eq!(batcher.state(), BatchState::Idle);
        assert!(batcher.accumulate(noop("4")));
    }

    #[test]
    fn size_threshold_marks_full() {
        let mut batcher = Batcher::new(BatchWindow::Manual, Some(2));
        batcher.accumulate(noop("1"));
        assert!(!batcher.is_full());
        batcher.accumulate(noop("2"));
        assert!(batcher.is_full());
        assert_eq!(batcher.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_window_sets_deadline() {
        let mut batcher = Batcher::new(BatchWindow::Timer { millis: 30 }, None);
        assert_eq!(batcher.deadline(), None);
        let start = Instant::now();
        batcher.accumulate(noop("1"));
        assert_eq!(batcher.deadline(), Some(start + Duration::from_millis(30)));
        batcher.take();
        assert_eq!(batcher.deadline(), None);
    }

    #[test]
    fn dropped_selection_reports_closed() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let selection = Selection::new("1", Box::new(move |r| *sink.lock().unwrap() = Some(r)));
        drop(selection);
        assert_eq!(*seen.lock().unwrap(), Some(Err(EvalError::Closed)));
    }

    #[test]
    fn resolve_runs_callback_once() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let selection = Selection::new("1", Box::new(move |r| sink.lock().unwrap().push(r)));
        selection.resolve(Ok(Scalar::Int(1)));
        assert_eq!(*calls.lock().unwrap(), vec![Ok(Scalar::Int(1))]);
    }
}
