//! Error types for the Gridcalc formula engine.
//!
//! Formula-level failures are values ([`ErrorValue`](crate::engine::ErrorValue))
//! stored on cells. The errors here are the ones that abort an operation.

use thiserror::Error;

use crate::engine::ErrorValue;

/// Failure of the caller-supplied cell accessor.
#[derive(Error, Debug)]
pub enum AccessorError {
    #[error("cell store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read {sheet}!{cell}: {message}")]
    Read {
        sheet: String,
        cell: String,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// A custom-function script that does not compile.
#[derive(Error, Debug)]
#[error("Error in custom functions: {0}")]
pub struct ScriptError(#[from] pub rhai::ParseError);

/// Why an evaluator produced no value.
#[derive(Error, Debug)]
pub enum EvalFailure {
    /// A value-level error to store on the cell.
    #[error("{0}")]
    Formula(ErrorValue),

    /// The accessor failed; aborts the pass.
    #[error(transparent)]
    Accessor(#[from] AccessorError),
}

impl From<ErrorValue> for EvalFailure {
    fn from(err: ErrorValue) -> Self {
        EvalFailure::Formula(err)
    }
}

pub type Result<T> = std::result::Result<T, AccessorError>;
