//! Planner properties checked over a grid of batch shapes, plus execution of
//! the generated SQL against the in-memory driver.

use scalarpool_core::chunk::{chunk_size, plan_drain, Fragment, FILLER};
use scalarpool_core::Scalar;
use scalarpool_exec::MemoryDriver;

fn exprs(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{i}+1000")).collect()
}

#[test]
fn every_selection_is_planned_exactly_once() {
    for n in 1..120 {
        for m in 1..6 {
            for w in [2, 3, 7, 50, 1663] {
                let plans = plan_drain(&exprs(n), m, w);
                assert!(plans.len() <= m, "n={n} m={m} w={w}");

                let mut seen: Vec<usize> = plans.iter().flat_map(|p| p.selections()).collect();
                seen.sort_unstable();
                assert_eq!(seen, (0..n).collect::<Vec<_>>(), "n={n} m={m} w={w}");

                for plan in &plans {
                    assert!(plan.width() <= w, "n={n} m={m} w={w}");
                    assert!(plan.branches.iter().all(|b| b.len() == plan.width()));
                    // Padding never fills a whole branch.
                    assert!(plan
                        .branches
                        .iter()
                        .all(|b| b.iter().any(|f| matches!(f, Fragment::Selection(_)))));
                }
            }
        }
    }
}

#[test]
fn chunks_are_contiguous_in_arrival_order() {
    let n = 10;
    let plans = plan_drain(&exprs(n), 3, 1663);
    let size = chunk_size(n, 3);
    assert_eq!(size, 4);
    let firsts: Vec<usize> = plans
        .iter()
        .map(|p| p.selections().next().unwrap())
        .collect();
    assert_eq!(firsts, vec![0, 4, 8]);
}

#[test]
fn generated_sql_executes_to_the_planned_layout() {
    let driver = MemoryDriver::new();
    for (n, w) in [(1, 1663), (9, 4), (17, 5), (2000, 1663)] {
        for plan in plan_drain(&exprs(n), 2, w) {
            let rows = driver.execute(&plan.sql).unwrap();
            assert_eq!(rows.len(), plan.branches.len());
            for (row, branch) in rows.iter().zip(&plan.branches) {
                for (value, fragment) in row.iter().zip(branch) {
                    match fragment {
                        Fragment::Selection(i) => assert_eq!(value, &Scalar::Int(*i as i64 + 1000)),
                        Fragment::Filler => assert_eq!(value.to_string(), FILLER),
                    }
                }
            }
        }
    }
}
