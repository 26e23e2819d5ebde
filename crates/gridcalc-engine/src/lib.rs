//! gridcalc-engine - formula references, evaluation and built-in functions.

pub mod builtins;
pub mod engine;
pub mod error;

pub use error::{AccessorError, EvalFailure, ScriptError};
