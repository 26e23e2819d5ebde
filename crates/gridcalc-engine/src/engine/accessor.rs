//! Read access to the caller's cell store.
//!
//! The engine never writes through an accessor: it pulls existing cells and
//! hands back a change set for the caller to merge.

use super::cell::{CellConfig, CellsBySheet};
use super::cell_ref::CellCoords;
use crate::error::AccessorError;

/// Synchronous, read-only lookup of a cell by sheet and coordinates.
pub trait CellAccessor {
    fn get_cell(&self, sheet: &str, coords: CellCoords) -> Result<Option<CellConfig>, AccessorError>;
}

impl<F> CellAccessor for F
where
    F: Fn(&str, CellCoords) -> Result<Option<CellConfig>, AccessorError>,
{
    fn get_cell(&self, sheet: &str, coords: CellCoords) -> Result<Option<CellConfig>, AccessorError> {
        self(sheet, coords)
    }
}

impl CellAccessor for CellsBySheet {
    fn get_cell(&self, sheet: &str, coords: CellCoords) -> Result<Option<CellConfig>, AccessorError> {
        Ok(self.get_in(sheet, coords).cloned())
    }
}

/// A snapshot layered over another accessor: cells present in `top` win.
pub struct Layered<'a> {
    pub top: &'a CellsBySheet,
    pub base: &'a dyn CellAccessor,
}

impl CellAccessor for Layered<'_> {
    fn get_cell(&self, sheet: &str, coords: CellCoords) -> Result<Option<CellConfig>, AccessorError> {
        match self.top.get_in(sheet, coords) {
            Some(config) => Ok(Some(config.clone())),
            None => self.base.get_cell(sheet, coords),
        }
    }
}
