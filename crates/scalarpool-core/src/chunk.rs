//! Drain planning: turn a batch of scalar expressions into SQL statements.
//!
//! Inputs:
//! - The pending expressions of one drain, in arrival order.
//! - The pool's connection cap and the engine's column limit `W`.
//!
//! Output:
//! - One [`ChunkPlan`] per statement. A plan carries the SQL text and the
//!   positional layout of the rows it will return: row `r`, column `c` holds
//!   the value of `branches[r][c]`. Demultiplexing never parses column aliases.
//!
//! A chunk wider than `W` is split into equal-width `union all` branches so
//! that no row exceeds the limit. Branch widths are chosen to minimize filler
//! columns, and short branches are padded with [`FILLER`].

use std::ops::Range;

/// PostgreSQL rejects target lists longer than 1664 entries.
pub const DEFAULT_MAX_COLUMNS: usize = 1663;

/// Constant selected in padding columns.
pub const FILLER: &str = "1";

/// What a result column maps back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragment {
    /// Index into the drain's pending list.
    Selection(usize),
    /// Padding; its value is discarded.
    Filler,
}

/// One SQL statement and the row layout it yields.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub sql: String,
    /// One entry per expected row, in row order. All branches share one width.
    pub branches: Vec<Vec<Fragment>>,
}

impl ChunkPlan {
    /// Number of columns in every row of this statement.
    pub fn width(&self) -> usize {
        self.branches.first().map_or(0, Vec::len)
    }

    /// Indices of the real selections carried by this statement.
    pub fn selections(&self) -> impl Iterator<Item = usize> + '_ {
        self.branches.iter().flatten().filter_map(|f| match f {
            Fragment::Selection(i) => Some(*i),
            Fragment::Filler => None,
        })
    }

    pub fn selection_count(&self) -> usize {
        self.selections().count()
    }
}

/// Size of each per-connection chunk: `ceil(total / max_connections)`.
pub fn chunk_size(total: usize, max_connections: usize) -> usize {
    total.div_ceil(max_connections.max(1)).max(1)
}

/// Contiguous ranges of the pending list, one per connection slot.
///
/// The slot count never exceeds `max_connections`:
/// `ceil(n / ceil(n / m)) <= m` for every `n, m >= 1`.
pub fn partition(total: usize, max_connections: usize) -> Vec<Range<usize>> {
    let size = chunk_size(total, max_connections);
    (0..total)
        .step_by(size)
        .map(|start| start..(start + size).min(total))
        .collect()
}

/// Branch width for a chunk of `len` selections that does not fit in one row.
///
/// Uses the fewest branches of at most `W - 1` columns, then spreads the
/// selections evenly across them.
pub fn sub_chunk_size(len: usize, max_columns: usize) -> usize {
    let per_branch = max_columns.saturating_sub(1).max(1);
    let branches = len.div_ceil(per_branch).max(1);
    len.div_ceil(branches)
}

/// The lone-request form: `select <expr> as r`.
pub fn single_statement(expression: &str, index: usize) -> ChunkPlan {
    ChunkPlan {
        sql: format!("select {expression} as r"),
        branches: vec![vec![Fragment::Selection(index)]],
    }
}

/// Build the statement for one chunk. `offset` is the pending-list index of
/// `expressions[0]`.
pub fn chunk_statement<S: AsRef<str>>(
    expressions: &[S],
    offset: usize,
    max_columns: usize,
) -> ChunkPlan {
    if expressions.len() <= max_columns {
        let fragments = (0..expressions.len())
            .map(|i| Fragment::Selection(offset + i))
            .collect::<Vec<_>>();
        let columns = expressions.iter().map(AsRef::<str>::as_ref);
        return ChunkPlan {
            sql: format!("select {}", select_list(columns)),
            branches: vec![fragments],
        };
    }

    let width = sub_chunk_size(expressions.len(), max_columns);
    let mut branches = Vec::new();
    let mut parts = Vec::new();

    for (n, part) in expressions.chunks(width).enumerate() {
        let base = offset + n * width;
        let mut fragments = (0..part.len())
            .map(|i| Fragment::Selection(base + i))
            .collect::<Vec<_>>();
        fragments.resize(width, Fragment::Filler);

        let columns = part
            .iter()
            .map(AsRef::<str>::as_ref)
            .chain(std::iter::repeat(FILLER))
            .take(width);
        parts.push(format!("(select {})", select_list(columns)));
        branches.push(fragments);
    }

    ChunkPlan {
        sql: parts.join(" union all "),
        branches,
    }
}

/// Plan every statement for one drain.
pub fn plan_drain<S: AsRef<str>>(
    expressions: &[S],
    max_connections: usize,
    max_columns: usize,
) -> Vec<ChunkPlan> {
    match expressions {
        [] => Vec::new(),
        [only] => vec![single_statement(only.as_ref(), 0)],
        _ => partition(expressions.len(), max_connections)
            .into_iter()
            .map(|range| {
                let start = range.start;
                chunk_statement(&expressions[range], start, max_columns)
            })
            .collect(),
    }
}

fn select_list<'a>(expressions: impl Iterator<Item = &'a str>) -> String {
    expressions
        .enumerate()
        .map(|(i, expr)| format!("{expr} as r{i}"))
        .collect::<Vec<_>>()
        .join(",")
}
