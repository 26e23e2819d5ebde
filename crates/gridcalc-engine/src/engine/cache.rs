//! Per-pass value cache.
//!
//! Holds two layers, both keyed by sheet-qualified position:
//! - **overrides**: cells edited or recomputed earlier in the current pass.
//!   They take priority over the caller's accessor, so every reader in a pass
//!   sees a cell either as it was before the pass or fully recomputed.
//! - **resolved**: memoized [`Value`]s for cells and ranges already read in
//!   this pass. Setting a cell drops the memo of the cell and of every range
//!   containing it.
//!
//! The cache is cleared at the start of every pass.

use dashmap::DashMap;
use std::sync::Arc;

use super::accessor::CellAccessor;
use super::cell::{CellConfig, DataType, parse_bool};
use super::cell_ref::{CellPosition, CellRange};
use super::value::{ErrorKind, ErrorValue, Scalar, Value};
use crate::error::AccessorError;

/// Thread-safe cache shared by the recalculation pass and the resolver.
/// DashMap is internally sharded; clones share the same storage.
#[derive(Clone, Debug, Default)]
pub struct ValueCache {
    overrides: Arc<DashMap<CellPosition, CellConfig>>,
    resolved: Arc<DashMap<CellPosition, Value>>,
    ranges: Arc<DashMap<CellRange, Value>>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.overrides.clear();
        self.resolved.clear();
        self.ranges.clear();
    }

    /// Record the pass-local state of a cell. Any memoized value for it is dropped.
    pub fn set(&self, pos: CellPosition, config: CellConfig) {
        self.resolved.remove(&pos);
        self.ranges.retain(|range, _| !range.contains(&pos));
        self.overrides.insert(pos, config);
    }

    pub fn get(&self, pos: &CellPosition) -> Option<CellConfig> {
        self.overrides.get(pos).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, pos: &CellPosition) -> bool {
        self.overrides.contains_key(pos)
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// The cell as this pass sees it: override first, accessor second.
    pub fn config(
        &self,
        pos: &CellPosition,
        accessor: &dyn CellAccessor,
    ) -> Result<Option<CellConfig>, AccessorError> {
        if let Some(config) = self.get(pos) {
            return Ok(Some(config));
        }
        accessor.get_cell(&pos.sheet, pos.coords())
    }

    /// Resolve a cell to the value a formula reading it observes.
    pub fn resolve_cell(
        &self,
        pos: &CellPosition,
        accessor: &dyn CellAccessor,
    ) -> Result<Value, AccessorError> {
        if let Some(value) = self.resolved.get(pos) {
            return Ok(value.value().clone());
        }
        let value = match self.config(pos, accessor)? {
            Some(config) => config_value(pos, &config),
            None => Value::empty(),
        };
        self.resolved.insert(pos.clone(), value.clone());
        Ok(value)
    }

    /// Resolve a range to a row-major matrix of scalars. An error in any cell
    /// of the range is the value of the whole range.
    pub fn resolve_range(
        &self,
        range: &CellRange,
        accessor: &dyn CellAccessor,
    ) -> Result<Value, AccessorError> {
        if let Some(value) = self.ranges.get(range) {
            return Ok(value.value().clone());
        }
        let value = self.build_range(range, accessor)?;
        self.ranges.insert(range.clone(), value.clone());
        Ok(value)
    }

    fn build_range(
        &self,
        range: &CellRange,
        accessor: &dyn CellAccessor,
    ) -> Result<Value, AccessorError> {
        let mut rows = Vec::with_capacity(range.rows() as usize);
        for row in range.from.row..=range.to.row {
            let mut cols = Vec::with_capacity(range.cols() as usize);
            for col in range.from.col..=range.to.col {
                let pos = CellPosition::new(range.sheet.clone(), row, col);
                match self.resolve_cell(&pos, accessor)? {
                    Value::Error(err) => return Ok(Value::Error(err)),
                    value => cols.push(value.first_scalar()),
                }
            }
            rows.push(cols);
        }
        Ok(Value::Matrix(rows))
    }
}

/// The value a cell presents to formulas that reference it.
///
/// - formula results (or any cell carrying a `resultType`): errors propagate,
///   `number` results are coerced to floats (0 when unparsable), other results
///   are used as-is
/// - literal numbers: `text` parsed as a float, 0 when unparsable
/// - literal booleans: `TRUE`/`FALSE`
/// - anything else: `text`, empty when absent
///
/// Literals without a `datatype` are typed from their text.
pub fn config_value(pos: &CellPosition, config: &CellConfig) -> Value {
    if config.is_formula() || config.result_type.is_some() {
        if let Some(code) = &config.error {
            let kind = ErrorKind::from_code(code).unwrap_or(ErrorKind::Value);
            let message = config
                .error_message
                .clone()
                .unwrap_or_else(|| format!("{} in {}", code, pos));
            return Value::Error(ErrorValue::new(kind, message));
        }
        return match (&config.result, config.result_type) {
            (None, _) => Value::empty(),
            (Some(result), Some(DataType::Number)) => {
                Value::number(result.to_text().trim().parse::<f64>().unwrap_or(0.0))
            }
            (Some(super::cell::CellValue::Matrix(rows)), _) => Value::Matrix(
                rows.iter()
                    .map(|row| {
                        row.iter()
                            .map(|v| v.as_ref().map(Scalar::from_cell_value).unwrap_or_default())
                            .collect()
                    })
                    .collect(),
            ),
            (Some(result), _) => Value::Scalar(Scalar::from_cell_value(result)),
        };
    }

    let Some(text) = config.text.as_deref() else {
        return Value::empty();
    };
    match config.datatype.unwrap_or_else(|| DataType::detect_literal(text)) {
        DataType::Number => Value::number(text.trim().parse::<f64>().unwrap_or(0.0)),
        DataType::Boolean => match parse_bool(text.trim()) {
            Some(b) => Value::boolean(b),
            None => Value::text(text),
        },
        _ => Value::text(text),
    }
}
