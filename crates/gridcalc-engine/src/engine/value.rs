//! Typed values flowing between cells, the evaluator and registry functions.
//!
//! Evaluator output is duck-typed ([`Dynamic`]); [`Value::from_dynamic`] is the
//! single place where it is decoded into an explicit variant.

use rhai::{Array, Dynamic, Map};
use std::fmt;

use super::cell::{CellValue, DataType, looks_like_date};

/// Short codes carried by value-level errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed formula text.
    Syntax,
    /// A reference that cannot be resolved.
    Ref,
    /// Unknown function or name.
    Name,
    /// Wrong argument type or a generic runtime failure.
    Value,
    DivZero,
    Num,
    NotAvailable,
    /// Engine-detected circular reference.
    Cycle,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "#ERROR!",
            ErrorKind::Ref => "#REF!",
            ErrorKind::Name => "#NAME?",
            ErrorKind::Value => "#VALUE!",
            ErrorKind::DivZero => "#DIV/0!",
            ErrorKind::Num => "#NUM!",
            ErrorKind::NotAvailable => "#N/A",
            ErrorKind::Cycle => "#CYCLE!",
        }
    }

    pub fn from_code(code: &str) -> Option<ErrorKind> {
        [
            ErrorKind::Syntax,
            ErrorKind::Ref,
            ErrorKind::Name,
            ErrorKind::Value,
            ErrorKind::DivZero,
            ErrorKind::Num,
            ErrorKind::NotAvailable,
            ErrorKind::Cycle,
        ]
        .into_iter()
        .find(|kind| kind.code() == code)
    }
}

/// A value-level formula error: stored on the cell, never thrown.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorValue {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorValue {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> ErrorValue {
        ErrorValue {
            kind,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message)
    }
}

/// A single cell's value.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Scalar {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Empty => DataType::Null,
            Scalar::Number(_) => DataType::Number,
            Scalar::Boolean(_) => DataType::Boolean,
            Scalar::Text(s) if looks_like_date(s) => DataType::Date,
            Scalar::Text(_) => DataType::String,
        }
    }

    /// Numeric view used by aggregate functions: text and empty cells are skipped.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Coerce to a number the way arithmetic arguments are coerced.
    pub fn coerce_number(&self) -> Result<f64, ErrorValue> {
        match self {
            Scalar::Empty => Ok(0.0),
            Scalar::Number(n) => Ok(*n),
            Scalar::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Scalar::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                ErrorValue::new(ErrorKind::Value, format!("Expected a number, got \"{}\"", s))
            }),
        }
    }

    pub fn coerce_bool(&self) -> Result<bool, ErrorValue> {
        match self {
            Scalar::Empty => Ok(false),
            Scalar::Boolean(b) => Ok(*b),
            Scalar::Number(n) => Ok(*n != 0.0),
            Scalar::Text(s) => super::cell::parse_bool(s.trim()).ok_or_else(|| {
                ErrorValue::new(ErrorKind::Value, format!("Expected a boolean, got \"{}\"", s))
            }),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Scalar::Empty => String::new(),
            Scalar::Number(n) => n.to_string(),
            Scalar::Text(s) => s.clone(),
            Scalar::Boolean(true) => "TRUE".to_string(),
            Scalar::Boolean(false) => "FALSE".to_string(),
        }
    }

    pub fn to_cell_value(&self) -> Option<CellValue> {
        match self {
            Scalar::Empty => None,
            Scalar::Number(n) => Some(CellValue::Number(*n)),
            Scalar::Text(s) => Some(CellValue::Text(s.clone())),
            Scalar::Boolean(b) => Some(CellValue::Boolean(*b)),
        }
    }

    pub fn from_cell_value(value: &CellValue) -> Scalar {
        match value {
            CellValue::Number(n) => Scalar::Number(*n),
            CellValue::Text(s) => Scalar::Text(s.clone()),
            CellValue::Boolean(b) => Scalar::Boolean(*b),
            CellValue::Matrix(rows) => rows
                .first()
                .and_then(|row| row.first())
                .and_then(|v| v.as_ref())
                .map(Scalar::from_cell_value)
                .unwrap_or_default(),
        }
    }

    fn to_dynamic(&self) -> Dynamic {
        match self {
            Scalar::Empty => Dynamic::UNIT,
            Scalar::Number(n) => Dynamic::from_float(*n),
            Scalar::Text(s) => Dynamic::from(s.clone()),
            Scalar::Boolean(b) => Dynamic::from_bool(*b),
        }
    }
}

/// A hyperlink produced by a formula.
#[derive(Clone, Debug, PartialEq)]
pub struct RichValue {
    pub hyperlink: String,
    pub title: Option<String>,
}

/// A decoded formula value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    /// Row-major 2D values (range references and array results).
    Matrix(Vec<Vec<Scalar>>),
    Error(ErrorValue),
    Rich(RichValue),
}

impl Value {
    pub fn number(n: f64) -> Value {
        Value::Scalar(Scalar::Number(n))
    }

    pub fn text(s: impl Into<String>) -> Value {
        Value::Scalar(Scalar::Text(s.into()))
    }

    pub fn boolean(b: bool) -> Value {
        Value::Scalar(Scalar::Boolean(b))
    }

    pub fn empty() -> Value {
        Value::Scalar(Scalar::Empty)
    }

    /// Every scalar inside the value, row-major. Rich values contribute their title.
    pub fn scalars(&self) -> Vec<Scalar> {
        match self {
            Value::Scalar(s) => vec![s.clone()],
            Value::Matrix(rows) => rows.iter().flatten().cloned().collect(),
            Value::Error(_) => Vec::new(),
            Value::Rich(rich) => vec![Scalar::Text(
                rich.title.clone().unwrap_or_else(|| rich.hyperlink.clone()),
            )],
        }
    }

    /// The single scalar this value stands for (top-left of a matrix).
    pub fn first_scalar(&self) -> Scalar {
        self.scalars().into_iter().next().unwrap_or_default()
    }

    /// Decode an evaluator result.
    ///
    /// - `()` -> empty, booleans/numbers/strings -> scalars
    /// - arrays -> a matrix (a flat array becomes a single row)
    /// - object maps tagged `datatype: "hyperlink"` -> [`Value::Rich`]
    /// - strings holding such an object as JSON -> [`Value::Rich`]
    /// - an [`ErrorValue`] payload -> [`Value::Error`]
    pub fn from_dynamic(value: Dynamic) -> Value {
        if value.is_unit() {
            return Value::empty();
        }
        if let Ok(b) = value.as_bool() {
            return Value::boolean(b);
        }
        if let Ok(n) = value.as_float() {
            return Value::number(n);
        }
        if let Ok(n) = value.as_int() {
            return Value::number(n as f64);
        }
        if value.is_string() {
            let s = value.into_string().unwrap_or_default();
            return rich_from_json(&s).map(Value::Rich).unwrap_or(Value::text(s));
        }
        if value.is_char() {
            return Value::text(value.to_string());
        }
        if value.is::<ErrorValue>() {
            return Value::Error(value.cast::<ErrorValue>());
        }
        if value.is_map() {
            let map = value.cast::<Map>();
            return rich_from_map(&map)
                .map(Value::Rich)
                .unwrap_or_else(|| Value::text(format!("{:?}", map)));
        }
        if value.is_array() {
            let array = value.cast::<Array>();
            let nested = array.iter().any(|item| item.is_array());
            let rows: Vec<Vec<Scalar>> = if nested {
                array
                    .into_iter()
                    .map(|row| match row.try_cast::<Array>() {
                        Some(cols) => cols.into_iter().map(dynamic_to_scalar).collect(),
                        None => Vec::new(),
                    })
                    .collect()
            } else {
                vec![array.into_iter().map(dynamic_to_scalar).collect()]
            };
            return Value::Matrix(rows);
        }
        Value::text(value.to_string())
    }

    /// Encode for the evaluator. Matrices become arrays of arrays, hyperlinks
    /// become tagged object maps and errors are carried as [`ErrorValue`].
    pub fn to_dynamic(&self) -> Dynamic {
        match self {
            Value::Scalar(s) => s.to_dynamic(),
            Value::Matrix(rows) => {
                let array: Array = rows
                    .iter()
                    .map(|row| Dynamic::from_array(row.iter().map(Scalar::to_dynamic).collect()))
                    .collect();
                Dynamic::from_array(array)
            }
            Value::Error(err) => Dynamic::from(err.clone()),
            Value::Rich(rich) => {
                let mut map = Map::new();
                map.insert("datatype".into(), Dynamic::from("hyperlink".to_string()));
                map.insert("hyperlink".into(), Dynamic::from(rich.hyperlink.clone()));
                if let Some(title) = &rich.title {
                    map.insert("title".into(), Dynamic::from(title.clone()));
                }
                Dynamic::from_map(map)
            }
        }
    }
}

fn dynamic_to_scalar(value: Dynamic) -> Scalar {
    match Value::from_dynamic(value) {
        Value::Scalar(s) => s,
        other => other.first_scalar(),
    }
}

fn rich_from_map(map: &Map) -> Option<RichValue> {
    let datatype = map.get("datatype")?.clone().into_string().ok()?;
    if datatype != "hyperlink" {
        return None;
    }
    let hyperlink = map.get("hyperlink")?.clone().into_string().ok()?;
    let title = map
        .get("title")
        .and_then(|t| t.clone().into_string().ok())
        .filter(|t| !t.is_empty());
    Some(RichValue { hyperlink, title })
}

fn rich_from_json(text: &str) -> Option<RichValue> {
    if !text.trim_start().starts_with('{') {
        return None;
    }
    let json: serde_json::Value = serde_json::from_str(text).ok()?;
    if json.get("datatype")?.as_str()? != "hyperlink" {
        return None;
    }
    let hyperlink = json.get("hyperlink")?.as_str()?.to_string();
    let title = json
        .get("title")
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    Some(RichValue { hyperlink, title })
}
