//! Error types for Gridcalc core.

use std::path::PathBuf;

use gridcalc_engine::{AccessorError, ScriptError};
use thiserror::Error;

/// Errors that abort a recalculation or engine construction.
///
/// Formula failures never show up here: they are stored on the cell.
#[derive(Error, Debug)]
pub enum CalcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Accessor(#[from] AccessorError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("Invalid config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Refusing to read {}: functions file too large ({size} bytes, max {max})", path.display())]
    FunctionsFileTooLarge { path: PathBuf, size: u64, max: u64 },
}

pub type Result<T> = std::result::Result<T, CalcError>;
