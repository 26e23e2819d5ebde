//! Cell positions, ranges and A1 notation.
//!
//! Provides bidirectional conversion between spreadsheet-style references
//! (e.g., "A1", "$B$2", "Sheet2!AA100", "'My Sheet'!A1:B5") and sheet-qualified,
//! 1-based row/column coordinates.
//!
//! # Examples
//!
//! ```ignore
//! let pos = CellPosition::parse_a1("B3", "Sheet1").unwrap();
//! assert_eq!(pos.col, 2);  // 1-based
//! assert_eq!(pos.row, 3);
//! assert_eq!(pos.to_string(), "Sheet1!B3");
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Row/column coordinates inside one sheet (1-based).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CellCoords {
    pub row: u32,
    pub col: u32,
}

impl CellCoords {
    pub fn new(row: u32, col: u32) -> CellCoords {
        CellCoords { row, col }
    }

    /// Parse an unqualified A1 reference. `$` anchors are accepted and ignored.
    pub fn parse_a1(name: &str) -> Option<CellCoords> {
        let caps = a1_re().captures(name)?;
        let col = letters_to_col(&caps["letters"])?;
        let row = caps["numbers"].parse::<u32>().ok()?;
        if row == 0 {
            return None;
        }
        Some(CellCoords::new(row, col))
    }

    pub fn to_a1(&self) -> String {
        format!("{}{}", col_to_letters(self.col), self.row)
    }
}

/// A sheet-qualified cell position. Ordering is sheet, then row-major.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CellPosition {
    pub sheet: String,
    pub row: u32,
    pub col: u32,
}

impl CellPosition {
    pub fn new(sheet: impl Into<String>, row: u32, col: u32) -> CellPosition {
        CellPosition {
            sheet: sheet.into(),
            row,
            col,
        }
    }

    pub fn from_coords(sheet: impl Into<String>, coords: CellCoords) -> CellPosition {
        CellPosition::new(sheet, coords.row, coords.col)
    }

    pub fn coords(&self) -> CellCoords {
        CellCoords::new(self.row, self.col)
    }

    /// Parse `A1` or `Sheet!A1`; unqualified references land on `default_sheet`.
    pub fn parse_a1(name: &str, default_sheet: &str) -> Option<CellPosition> {
        let (sheet, cell) = split_sheet(name, default_sheet);
        let coords = CellCoords::parse_a1(cell)?;
        Some(CellPosition::from_coords(sheet, coords))
    }
}

impl fmt::Display for CellPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}!{}",
            quote_sheet(&self.sheet),
            self.coords().to_a1()
        )
    }
}

/// A rectangular, inclusive range inside one sheet. `from` is always the
/// top-left corner.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CellRange {
    pub sheet: String,
    pub from: CellCoords,
    pub to: CellCoords,
}

impl CellRange {
    /// Build a range from two corners in any order.
    pub fn new(sheet: impl Into<String>, a: CellCoords, b: CellCoords) -> CellRange {
        CellRange {
            sheet: sheet.into(),
            from: CellCoords::new(a.row.min(b.row), a.col.min(b.col)),
            to: CellCoords::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    pub fn rows(&self) -> u32 {
        self.to.row - self.from.row + 1
    }

    pub fn cols(&self) -> u32 {
        self.to.col - self.from.col + 1
    }

    pub fn cell_count(&self) -> u64 {
        u64::from(self.rows()) * u64::from(self.cols())
    }

    pub fn contains(&self, pos: &CellPosition) -> bool {
        pos.sheet == self.sheet
            && (self.from.row..=self.to.row).contains(&pos.row)
            && (self.from.col..=self.to.col).contains(&pos.col)
    }

    /// Parse `A1:B5` or `Sheet!A1:B5`.
    pub fn parse_a1(range: &str, default_sheet: &str) -> Option<CellRange> {
        let (sheet, cells) = split_sheet(range, default_sheet);
        let (start, end) = cells.split_once(':')?;
        let start = CellCoords::parse_a1(start)?;
        let end = CellCoords::parse_a1(end)?;
        Some(CellRange::new(sheet, start, end))
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}!{}:{}",
            quote_sheet(&self.sheet),
            self.from.to_a1(),
            self.to.to_a1()
        )
    }
}

/// Anything a formula can read: a single cell or a whole range.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reference {
    Cell(CellPosition),
    Range(CellRange),
}

impl Reference {
    pub fn sheet(&self) -> &str {
        match self {
            Reference::Cell(pos) => &pos.sheet,
            Reference::Range(range) => &range.sheet,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Cell(pos) => pos.fmt(f),
            Reference::Range(range) => range.fmt(f),
        }
    }
}

/// Convert a 1-based column index to letters (1 -> A, 26 -> Z, 27 -> AA).
pub fn col_to_letters(col: u32) -> String {
    let mut result = String::new();
    let mut n = col;
    while n > 0 {
        n -= 1;
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        n /= 26;
    }
    result
}

fn letters_to_col(letters: &str) -> Option<u32> {
    let mut col_acc = 0u32;
    for c in letters.to_ascii_uppercase().bytes() {
        let digit = u32::from(c - b'A') + 1;
        col_acc = col_acc.checked_mul(26)?.checked_add(digit)?;
    }
    Some(col_acc)
}

fn a1_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\$?(?<letters>[A-Za-z]+)\$?(?<numbers>[0-9]+)$")
            .expect("A1 reference regex must compile")
    })
}

/// Split an optional `Sheet!` / `'Quoted Sheet'!` prefix off a reference.
pub(crate) fn split_sheet<'a>(name: &'a str, default_sheet: &str) -> (String, &'a str) {
    match name.rsplit_once('!') {
        Some((sheet, rest)) => (unquote_sheet(sheet), rest),
        None => (default_sheet.to_string(), name),
    }
}

pub(crate) fn unquote_sheet(sheet: &str) -> String {
    match sheet.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(inner) => inner.replace("''", "'"),
        None => sheet.to_string(),
    }
}

fn quote_sheet(sheet: &str) -> String {
    if sheet.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        sheet.to_string()
    } else {
        format!("'{}'", sheet.replace('\'', "''"))
    }
}
