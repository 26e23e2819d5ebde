//! gridcalc-core - dependency graph and incremental recalculation.
//!
//! [`RecalcEngine`] owns the graph of formula dependencies. Each edit runs one
//! pass that recomputes the edited cells' transitive dependents in dependency
//! order and returns the cells whose results changed.

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
mod pass;

pub use config::EngineConfig;
pub use engine::RecalcEngine;
pub use error::{CalcError, Result};
pub use graph::{DependencyGraph, FormulaNode};

pub use gridcalc_engine::engine::{
    CellAccessor, CellConfig, CellCoords, CellPosition, CellValue, CellsBySheet, DataType,
    EvaluationResult, FunctionRegistry, SheetCells, Value,
};
