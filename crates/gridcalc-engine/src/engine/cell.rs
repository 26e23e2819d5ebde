//! Cell data structures shared with the caller's cell store.
//!
//! - [`DataType`] - The kind of content (or result) held by a cell
//! - [`CellValue`] - The wire form of a computed `result`
//! - [`CellConfig`] - One cell's persisted state, including evaluation fields
//! - [`EvaluationResult`] - The per-cell result wire shape produced by evaluation
//! - [`CellsBySheet`] - Sparse sheet -> row -> col storage used for snapshots and change sets

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::cell_ref::{CellCoords, CellPosition};

/// Colour applied to hyperlink results.
pub const DEFAULT_HYPERLINK_COLOR: &str = "#1155CC";

/// The type of content stored in a cell, or of a formula's result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Number,
    String,
    Date,
    Boolean,
    Formula,
    Hyperlink,
    Null,
    Error,
}

impl DataType {
    /// Classify a literal the user typed into a cell.
    pub fn detect_literal(text: &str) -> DataType {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return DataType::Null;
        }
        if trimmed.starts_with('=') {
            return DataType::Formula;
        }
        if trimmed.parse::<f64>().is_ok() {
            return DataType::Number;
        }
        if parse_bool(trimmed).is_some() {
            return DataType::Boolean;
        }
        if looks_like_date(trimmed) {
            return DataType::Date;
        }
        DataType::String
    }
}

/// A computed result as it travels to the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Boolean(bool),
    Number(f64),
    Text(String),
    Matrix(Vec<Vec<Option<CellValue>>>),
}

impl CellValue {
    /// Render the value the way a cell displays it as text.
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Boolean(true) => "TRUE".to_string(),
            CellValue::Boolean(false) => "FALSE".to_string(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Matrix(rows) => rows
                .first()
                .and_then(|row| row.first())
                .and_then(|v| v.as_ref())
                .map(CellValue::to_text)
                .unwrap_or_default(),
        }
    }
}

/// One spreadsheet cell's state.
///
/// `result`, `result_type` and `error` are only meaningful when `datatype` is
/// [`DataType::Formula`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CellValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperlink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
}

impl CellConfig {
    /// Create a cell from user input, typing literals and tagging formulas.
    /// Empty input yields a cleared cell.
    pub fn from_input(text: &str) -> CellConfig {
        let datatype = DataType::detect_literal(text);
        if datatype == DataType::Null {
            return CellConfig::cleared();
        }
        CellConfig {
            text: Some(text.to_string()),
            datatype: Some(datatype),
            ..CellConfig::default()
        }
    }

    /// The representation of a cell whose content was removed.
    pub fn cleared() -> CellConfig {
        CellConfig {
            datatype: Some(DataType::Null),
            ..CellConfig::default()
        }
    }

    pub fn is_formula(&self) -> bool {
        self.datatype == Some(DataType::Formula)
            || (self.datatype.is_none()
                && self.text.as_deref().is_some_and(|t| t.trim_start().starts_with('=')))
    }

    /// The formula text, if this cell holds a formula.
    pub fn formula(&self) -> Option<&str> {
        if self.is_formula() {
            self.text.as_deref()
        } else {
            None
        }
    }

    pub fn evaluation(&self) -> EvaluationResult {
        EvaluationResult {
            result: self.result.clone(),
            result_type: self.result_type,
            error: self.error.clone(),
            error_message: self.error_message.clone(),
            hyperlink: self.hyperlink.clone(),
            color: self.color.clone(),
            underline: self.underline,
        }
    }

    /// Overwrite every evaluation field with `eval`.
    pub fn apply(&mut self, eval: EvaluationResult) {
        self.result = eval.result;
        self.result_type = eval.result_type;
        self.error = eval.error;
        self.error_message = eval.error_message;
        self.hyperlink = eval.hyperlink;
        self.color = eval.color;
        self.underline = eval.underline;
    }
}

/// The per-cell result of evaluating a formula. Field names are part of the
/// wire contract with downstream renderers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CellValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperlink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
}

impl EvaluationResult {
    pub fn failed(code: &str, message: impl Into<String>) -> EvaluationResult {
        EvaluationResult {
            result_type: Some(DataType::Error),
            error: Some(code.to_string()),
            error_message: Some(message.into()),
            ..EvaluationResult::default()
        }
    }
}

/// Cells of one sheet: row -> col -> config.
pub type SheetCells = BTreeMap<u32, BTreeMap<u32, CellConfig>>;

/// Sparse mapping sheet -> row -> col -> [`CellConfig`]. Absence means an
/// empty cell.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellsBySheet(BTreeMap<String, SheetCells>);

impl CellsBySheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pos: &CellPosition) -> Option<&CellConfig> {
        self.get_in(&pos.sheet, pos.coords())
    }

    pub fn get_in(&self, sheet: &str, coords: CellCoords) -> Option<&CellConfig> {
        self.0.get(sheet)?.get(&coords.row)?.get(&coords.col)
    }

    pub fn insert(&mut self, pos: &CellPosition, config: CellConfig) -> Option<CellConfig> {
        self.0
            .entry(pos.sheet.clone())
            .or_default()
            .entry(pos.row)
            .or_default()
            .insert(pos.col, config)
    }

    pub fn remove(&mut self, pos: &CellPosition) -> Option<CellConfig> {
        let sheet = self.0.get_mut(&pos.sheet)?;
        let row = sheet.get_mut(&pos.row)?;
        let removed = row.remove(&pos.col);
        if row.is_empty() {
            sheet.remove(&pos.row);
        }
        if sheet.is_empty() {
            self.0.remove(&pos.sheet);
        }
        removed
    }

    pub fn contains(&self, pos: &CellPosition) -> bool {
        self.get(pos).is_some()
    }

    pub fn sheet(&self, sheet: &str) -> Option<&SheetCells> {
        self.0.get(sheet)
    }

    /// Merge `changes` over `self`, cell by cell. Cleared cells are removed.
    pub fn merge(&mut self, changes: &CellsBySheet) {
        for (pos, config) in changes.iter() {
            if config.datatype == Some(DataType::Null) && config.text.is_none() {
                self.remove(&pos);
            } else {
                self.insert(&pos, config.clone());
            }
        }
    }

    /// Iterate every cell in sheet, then row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (CellPosition, &CellConfig)> + '_ {
        self.0.iter().flat_map(|(sheet, rows)| {
            rows.iter().flat_map(move |(row, cols)| {
                cols.iter()
                    .map(move |(col, config)| (CellPosition::new(sheet.clone(), *row, *col), config))
            })
        })
    }

    pub fn positions(&self) -> impl Iterator<Item = CellPosition> + '_ {
        self.iter().map(|(pos, _)| pos)
    }

    pub fn len(&self) -> usize {
        self.0
            .values()
            .flat_map(|rows| rows.values())
            .map(|cols| cols.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<(CellPosition, CellConfig)> for CellsBySheet {
    fn from_iter<I: IntoIterator<Item = (CellPosition, CellConfig)>>(iter: I) -> Self {
        let mut cells = CellsBySheet::new();
        for (pos, config) in iter {
            cells.insert(&pos, config);
        }
        cells
    }
}

pub(crate) fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// ISO dates, ISO date-times and RFC 3339 timestamps are treated as dates.
pub(crate) fn looks_like_date(text: &str) -> bool {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").is_ok()
        || DateTime::parse_from_rfc3339(text).is_ok()
}
