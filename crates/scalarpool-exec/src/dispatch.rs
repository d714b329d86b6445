//! Send planned statements to connections and route rows back to callers.

use std::collections::HashMap;
use std::sync::Arc;

use scalarpool_core::{ChunkPlan, EvalError, Fragment, Row};

use crate::batcher::Selection;
use crate::connection::Connection;
use crate::metrics::Stats;

/// A planned statement together with the selections it answers.
pub struct Chunk {
    plan: ChunkPlan,
    selections: HashMap<usize, Selection>,
}

impl Chunk {
    /// Move this plan's selections out of the drain's pending slots.
    pub fn new(plan: ChunkPlan, pending: &mut [Option<Selection>]) -> Self {
        let selections = plan
            .selections()
            .filter_map(|i| pending.get_mut(i)?.take().map(|s| (i, s)))
            .collect();
        Self { plan, selections }
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    pub fn selection_count(&self) -> usize {
        self.selections.len()
    }

    /// Deliver a statement outcome to every selection in this chunk.
    ///
    /// The row set is validated as a whole first; a malformed result fails
    /// every selection of the chunk and nothing else.
    pub fn deliver(mut self, result: Result<Vec<Row>, EvalError>) -> Result<(), EvalError> {
        let rows = match result.and_then(|rows| self.validate(rows)) {
            Ok(rows) => rows,
            Err(err) => {
                self.fail(err.clone());
                return Err(err);
            }
        };

        for (row, branch) in rows.into_iter().zip(&self.plan.branches) {
            for (value, fragment) in row.into_iter().zip(branch) {
                if let Fragment::Selection(index) = fragment {
                    if let Some(selection) = self.selections.remove(index) {
                        selection.resolve(Ok(value));
                    }
                }
            }
        }

        if self.selections.is_empty() {
            Ok(())
        } else {
            let err = EvalError::Shape(format!(
                "{} selection(s) missing from the result",
                self.selections.len()
            ));
            self.fail(err.clone());
            Err(err)
        }
    }

    fn validate(&self, rows: Vec<Row>) -> Result<Vec<Row>, EvalError> {
        let expected = self.plan.branches.len();
        if rows.is_empty() && expected > 0 {
            return Err(EvalError::EmptyResult { expected });
        }
        if rows.len() != expected {
            return Err(EvalError::Shape(format!(
                "expected {expected} row(s), got {}",
                rows.len()
            )));
        }
        let width = self.plan.width();
        if let Some(row) = rows.iter().find(|row| row.len() != width) {
            return Err(EvalError::Shape(format!(
                "expected {width} column(s), got {}",
                row.len()
            )));
        }
        Ok(rows)
    }

    fn fail(&mut self, err: EvalError) {
        for (_, selection) in self.selections.drain() {
            selection.resolve(Err(err.clone()));
        }
    }
}

pub struct Dispatcher {
    stats: Arc<Stats>,
}

impl Dispatcher {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self { stats }
    }

    /// Queue the chunk's statement on `connection`; results are routed when
    /// the statement completes.
    pub fn send(&self, chunk: Chunk, connection: &Connection) {
        let sql = chunk.plan().sql.clone();
        let stats = Arc::clone(&self.stats);
        let index = connection.index();
        tracing::debug!(
            connection = index,
            selections = chunk.selection_count(),
            rows = chunk.plan().branches.len(),
            columns = chunk.plan().width(),
            "dispatching statement"
        );
        connection.enqueue(
            sql,
            Box::new(move |result| {
                if let Err(err) = chunk.deliver(result) {
                    stats.record_failure();
                    tracing::warn!(connection = index, %err, "statement failed for its selections");
                }
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalarpool_core::chunk::{chunk_statement, single_statement};
    use scalarpool_core::Scalar;
    use std::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(usize, Result<Scalar, EvalError>)>>>;

    fn pending(n: usize, seen: &Seen) -> Vec<Option<Selection>> {
        (0..n)
            .map(|i| {
                let seen = Arc::clone(seen);
                Some(Selection::new(
                    format!("{i}"),
                    Box::new(move |r| seen.lock().unwrap().push((i, r))),
                ))
            })
            .collect()
    }

    fn sorted(seen: &Seen) -> Vec<(usize, Result<Scalar, EvalError>)> {
        let mut out = seen.lock().unwrap().clone();
        out.sort_by_key(|(i, _)| *i);
        out
    }

    #[test]
    fn fillers_never_reach_a_callback() {
        let seen: Seen = Arc::default();
        let exprs: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        let mut slots = pending(5, &seen);
        // W = 4 -> two branches of three columns, last one padded once.
        let chunk = Chunk::new(chunk_statement(&exprs, 0, 4), &mut slots);
        assert_eq!(chunk.selection_count(), 5);
        assert!(slots.iter().all(Option::is_none));

        let rows = vec![
            vec![Scalar::Int(10), Scalar::Int(11), Scalar::Int(12)],
            vec![Scalar::Int(13), Scalar::Int(14), Scalar::Int(1)],
        ];
        chunk.deliver(Ok(rows)).unwrap();

        let got = sorted(&seen);
        assert_eq!(got.len(), 5);
        for (i, value) in got {
            assert_eq!(value, Ok(Scalar::Int(10 + i as i64)));
        }
    }

    #[test]
    fn empty_result_fails_only_this_chunk() {
        let seen: Seen = Arc::default();
        let mut slots = pending(3, &seen);
        let exprs = ["a", "b"];
        let chunk = Chunk::new(chunk_statement(&exprs, 0, 10), &mut slots);

        let err = chunk.deliver(Ok(Vec::new())).unwrap_err();
        assert_eq!(err, EvalError::EmptyResult { expected: 1 });

        let got = sorted(&seen);
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|(_, r)| r == &Err(err.clone())));
        assert!(slots[2].is_some());
    }

    #[test]
    fn wrong_width_is_a_shape_error() {
        let seen: Seen = Arc::default();
        let mut slots = pending(2, &seen);
        let chunk = Chunk::new(chunk_statement(&["a", "b"], 0, 10), &mut slots);
        let err = chunk.deliver(Ok(vec![vec![Scalar::Int(1)]])).unwrap_err();
        assert!(matches!(err, EvalError::Shape(_)));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn query_error_is_delivered_to_each_selection() {
        let seen: Seen = Arc::default();
        let mut slots = pending(1, &seen);
        let chunk = Chunk::new(single_statement("x", 0), &mut slots);
        let err = EvalError::Query("relation does not exist".into());
        assert_eq!(chunk.deliver(Err(err.clone())), Err(err.clone()));
        assert_eq!(sorted(&seen), vec![(0, Err(err))]);
    }
}
