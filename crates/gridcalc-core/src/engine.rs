//! The incremental recalculation engine.

use std::collections::BTreeSet;

use gridcalc_engine::engine::{
    CellAccessor, CellConfig, CellCoords, CellPosition, CellsBySheet, DataType, FormulaEvaluator,
    FormulaParser, FunctionRegistry, Layered, Reference, RhaiEvaluator, SheetCells, ValueCache,
    extract_dependencies,
};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::pass;

/// Keeps the dependency graph of a workbook and recomputes the cells affected
/// by each edit.
///
/// The engine never writes to the caller's store: every operation reads
/// through a [`CellAccessor`] and returns the changed cells for the caller to
/// merge. Operations take `&mut self`, so passes on one engine never overlap.
#[derive(Debug)]
pub struct RecalcEngine<E = RhaiEvaluator> {
    graph: DependencyGraph,
    cache: ValueCache,
    parser: FormulaParser<E>,
    config: EngineConfig,
}

impl RecalcEngine {
    /// An engine with the built-in functions and the default configuration.
    pub fn new() -> Self {
        Self::with_evaluator(RhaiEvaluator::default(), EngineConfig::default())
    }

    /// Built-in functions plus the user functions named by `config`.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        Self::with_functions(FunctionRegistry::new(), config)
    }

    /// Built-ins with `custom` merged over them, plus the user functions
    /// named by `config`.
    pub fn with_functions(custom: FunctionRegistry, config: EngineConfig) -> Result<Self> {
        let registry = FunctionRegistry::with_custom(custom);
        let evaluator = match config.functions_script()? {
            Some(script) => RhaiEvaluator::with_script(registry, &script).inspect_err(|e| {
                tracing::warn!(error = %e, "custom functions failed to compile");
            })?,
            None => RhaiEvaluator::new(registry),
        }
        .with_max_operations(config.max_operations);
        Ok(Self::with_evaluator(evaluator, config))
    }
}

impl Default for RecalcEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: FormulaEvaluator> RecalcEngine<E> {
    pub fn with_evaluator(evaluator: E, config: EngineConfig) -> Self {
        let parser = FormulaParser::new(evaluator).with_max_range_cells(config.max_range_cells);
        RecalcEngine {
            graph: DependencyGraph::new(),
            cache: ValueCache::new(),
            parser,
            config,
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &E {
        self.parser.evaluator()
    }

    /// Sorted names of the functions formulas may call.
    pub fn supported_functions(&self) -> Vec<String> {
        self.parser.supported_functions()
    }

    /// The references `text` would read if it were the formula of `position`.
    pub fn dependencies(&self, text: &str, position: &CellPosition) -> Vec<Reference> {
        extract_dependencies(text, position)
    }

    /// Set the content of one cell and recompute everything that depends on it.
    ///
    /// Empty `text` clears the cell. Returns the edited cell plus every cell
    /// whose result changed.
    pub async fn calculate(
        &mut self,
        sheet: &str,
        coords: CellCoords,
        text: &str,
        accessor: &dyn CellAccessor,
    ) -> Result<CellsBySheet> {
        let pos = CellPosition::from_coords(sheet, coords);
        tracing::debug!(cell = %pos, "calculate");
        self.apply_edits(vec![(pos, CellConfig::from_input(text))], accessor)
            .await
    }

    /// Apply several edits on `sheet` as one pass. A cell depending on more
    /// than one edited cell is recomputed once.
    pub async fn calculate_batch(
        &mut self,
        sheet: &str,
        changes: &SheetCells,
        accessor: &dyn CellAccessor,
    ) -> Result<CellsBySheet> {
        let edits: Vec<(CellPosition, CellConfig)> = changes
            .iter()
            .flat_map(|(row, cols)| {
                cols.iter().map(move |(col, config)| {
                    (CellPosition::new(sheet, *row, *col), edit_config(config))
                })
            })
            .collect();
        tracing::debug!(sheet, cells = edits.len(), "calculate batch");
        self.apply_edits(edits, accessor).await
    }

    /// Rebuild the graph from a full snapshot and evaluate every formula.
    ///
    /// The snapshot takes precedence over `accessor` during the pass. Returns
    /// every formula cell with its result.
    pub async fn initialize(
        &mut self,
        all_cells: &CellsBySheet,
        accessor: &dyn CellAccessor,
    ) -> Result<CellsBySheet> {
        self.graph.clear();
        self.cache.clear();
        for (pos, config) in all_cells.iter() {
            if let Some(text) = config.formula() {
                self.graph.set_formula(pos, text);
            }
        }
        tracing::debug!(
            cells = all_cells.len(),
            formulas = self.graph.len(),
            edges = self.graph.edge_count(),
            "initialize"
        );

        let layered = Layered {
            top: all_cells,
            base: accessor,
        };
        let seeds = self.graph.formula_positions();
        let report = pass::run(&self.graph, &self.parser, &self.cache, &layered, &seeds).await?;
        Ok(report.cells.into_iter().collect())
    }

    async fn apply_edits(
        &mut self,
        edits: Vec<(CellPosition, CellConfig)>,
        accessor: &dyn CellAccessor,
    ) -> Result<CellsBySheet> {
        self.cache.clear();
        let mut seeds = BTreeSet::new();
        for (pos, config) in edits {
            match config.formula() {
                Some(text) => {
                    self.graph.set_formula(pos.clone(), text);
                }
                None => {
                    self.graph.remove_formula(&pos);
                }
            }
            self.cache.set(pos.clone(), config);
            seeds.insert(pos);
        }

        let report = pass::run(&self.graph, &self.parser, &self.cache, accessor, &seeds).await?;

        let mut changes = CellsBySheet::new();
        for seed in &seeds {
            let config = match report.cells.get(seed) {
                Some(config) => config.clone(),
                None => self.cache.get(seed).unwrap_or_else(CellConfig::cleared),
            };
            changes.insert(seed, config);
        }
        for (pos, config) in report.cells {
            if seeds.contains(&pos) {
                continue;
            }
            let previous = accessor.get_cell(&pos.sheet, pos.coords())?;
            if previous.map(|p| p.evaluation()) != Some(config.evaluation()) {
                changes.insert(&pos, config);
            }
        }
        Ok(changes)
    }
}

/// The cell state for a batch edit: typed from its text, keeping a literal
/// type the caller chose explicitly.
fn edit_config(config: &CellConfig) -> CellConfig {
    let mut edit = CellConfig::from_input(config.text.as_deref().unwrap_or(""));
    if let Some(datatype) = config.datatype
        && !matches!(datatype, DataType::Formula | DataType::Null | DataType::Error)
        && !edit.is_formula()
        && edit.text.is_some()
    {
        edit.datatype = Some(datatype);
    }
    edit
}
