//! Formula engine API.
//!
//! - [`CellCoords`], [`CellPosition`], [`CellRange`], [`Reference`] - A1 references
//! - [`CellConfig`], [`CellsBySheet`], [`EvaluationResult`] - Cell data and the result wire shape
//! - [`Value`] - Decoded formula values
//! - [`extract_dependencies`] - The references a formula reads
//! - [`ValueCache`] - Pass-local overrides and memoized values
//! - [`FormulaParser`] - Evaluate a formula and normalize its result
//! - [`FormulaEvaluator`], [`RhaiEvaluator`] - The formula language seam and its Rhai implementation
//! - [`FunctionRegistry`] - Functions callable from formulas

mod accessor;
mod cache;
mod cell;
mod cell_ref;
mod deps;
mod eval;
mod parser;
mod preprocess;
mod registry;
mod value;

pub use accessor::{CellAccessor, Layered};
pub use cache::{ValueCache, config_value};
pub use cell::{
    CellConfig, CellValue, CellsBySheet, DEFAULT_HYPERLINK_COLOR, DataType, EvaluationResult,
    SheetCells,
};
pub use cell_ref::{CellCoords, CellPosition, CellRange, Reference, col_to_letters};
pub use deps::extract_dependencies;
pub use eval::{
    DEFAULT_MAX_OPERATIONS, FormulaEvaluator, MAX_ARGS, ReferenceResolver, RhaiEvaluator,
};
pub use parser::{DEFAULT_MAX_RANGE_CELLS, FormulaParser, normalize};
pub use preprocess::{PreparedFormula, formula_body, prepare_formula, scope_name};
pub use registry::{FormulaFn, FunctionRegistry};
pub use value::{ErrorKind, ErrorValue, RichValue, Scalar, Value};

pub use rhai::Dynamic;
