//! One recomputation pass.
//!
//! 1. Closure: the seeds plus every transitive dependent (cell and range edges).
//! 2. In-degree: for each closure cell, the number of edges from other closure
//!    cells. Edges from outside the closure are already settled.
//! 3. Cells with in-degree 0 are taken in row-major order. Formulas are
//!    evaluated and written to the [`ValueCache`], so later cells in the pass
//!    read the new value. Their dependents lose one in-degree.
//! 4. Whatever is left is on, or downstream of, a cycle and gets `#CYCLE!`.
//!
//! Each closure cell is handled exactly once.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use gridcalc_engine::AccessorError;
use gridcalc_engine::engine::{
    CellAccessor, CellConfig, CellPosition, DataType, ErrorKind, EvaluationResult,
    FormulaEvaluator, FormulaParser, ValueCache,
};

use crate::graph::DependencyGraph;

/// What a pass computed.
#[derive(Debug, Default)]
pub(crate) struct PassReport {
    /// New state of every formula cell the pass evaluated or marked as cyclic.
    pub cells: BTreeMap<CellPosition, CellConfig>,
    pub evaluated: usize,
    pub cycles: Vec<CellPosition>,
}

pub(crate) async fn run<E: FormulaEvaluator>(
    graph: &DependencyGraph,
    parser: &FormulaParser<E>,
    cache: &ValueCache,
    accessor: &dyn CellAccessor,
    seeds: &BTreeSet<CellPosition>,
) -> Result<PassReport, AccessorError> {
    let dependents = closure(graph, seeds);

    let mut in_degree: HashMap<&CellPosition, usize> = dependents.keys().map(|c| (c, 0)).collect();
    for reader in dependents.values().flatten() {
        if let Some(count) = in_degree.get_mut(reader) {
            *count += 1;
        }
    }

    let mut ready: BTreeSet<CellPosition> = in_degree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(cell, _)| (*cell).clone())
        .collect();
    let mut done: BTreeSet<CellPosition> = BTreeSet::new();
    let mut report = PassReport::default();

    while let Some(cell) = ready.pop_first() {
        if let Some(node) = graph.formula(&cell) {
            let result = parser.evaluate(&node.text, &cell, accessor, cache).await?;
            tracing::trace!(cell = %cell, error = ?result.error, "evaluated");
            let config = formula_config(cache, accessor, &cell, &node.text, result)?;
            cache.set(cell.clone(), config.clone());
            report.cells.insert(cell.clone(), config);
            report.evaluated += 1;
        }

        for reader in dependents.get(&cell).into_iter().flatten() {
            if let Some(count) = in_degree.get_mut(reader) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(reader.clone());
                }
            }
        }
        done.insert(cell);
    }

    for cell in dependents.keys().filter(|c| !done.contains(*c)) {
        let Some(node) = graph.formula(cell) else {
            continue;
        };
        let result = EvaluationResult::failed(
            ErrorKind::Cycle.code(),
            format!("Circular reference involving {}", cell),
        );
        let config = formula_config(cache, accessor, cell, &node.text, result)?;
        cache.set(cell.clone(), config.clone());
        report.cells.insert(cell.clone(), config);
        report.cycles.push(cell.clone());
    }

    if !report.cycles.is_empty() {
        let cells: Vec<String> = report.cycles.iter().map(ToString::to_string).collect();
        tracing::warn!(cells = %cells.join(", "), "circular reference");
    }
    tracing::debug!(
        seeds = seeds.len(),
        closure = dependents.len(),
        evaluated = report.evaluated,
        cycles = report.cycles.len(),
        "recalculation pass"
    );
    Ok(report)
}

/// Seeds plus every cell reachable through reverse edges, each with its
/// direct readers. Every reader is itself a key.
fn closure(
    graph: &DependencyGraph,
    seeds: &BTreeSet<CellPosition>,
) -> BTreeMap<CellPosition, BTreeSet<CellPosition>> {
    let mut closure = BTreeMap::new();
    let mut queue: VecDeque<CellPosition> = seeds.iter().cloned().collect();
    while let Some(cell) = queue.pop_front() {
        if closure.contains_key(&cell) {
            continue;
        }
        let readers = graph.dependents_of(&cell);
        queue.extend(readers.iter().filter(|r| !closure.contains_key(*r)).cloned());
        closure.insert(cell, readers);
    }
    closure
}

/// The cell as the pass sees it, with `text` as its formula and `result` as
/// its evaluation.
fn formula_config(
    cache: &ValueCache,
    accessor: &dyn CellAccessor,
    cell: &CellPosition,
    text: &str,
    result: EvaluationResult,
) -> Result<CellConfig, AccessorError> {
    let mut config = cache.config(cell, accessor)?.unwrap_or_default();
    config.text = Some(text.to_string());
    config.datatype = Some(DataType::Formula);
    config.apply(result);
    Ok(config)
}
