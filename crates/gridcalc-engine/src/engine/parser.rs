//! Formula evaluation against a cell store.
//!
//! [`FormulaParser`] resolves references through the pass-local
//! [`ValueCache`] (then the caller's accessor), runs the evaluator and
//! normalizes its output into the [`EvaluationResult`] wire shape.

use super::accessor::CellAccessor;
use super::cache::ValueCache;
use super::cell::{CellValue, DEFAULT_HYPERLINK_COLOR, DataType, EvaluationResult};
use super::cell_ref::{CellPosition, CellRange};
use super::eval::{FormulaEvaluator, ReferenceResolver, RhaiEvaluator};
use super::value::{ErrorKind, ErrorValue, Scalar, Value};
use crate::error::{AccessorError, EvalFailure};

/// Largest range a formula may read unless configured otherwise.
pub const DEFAULT_MAX_RANGE_CELLS: u64 = 1_000_000;

#[derive(Debug)]
pub struct FormulaParser<E = RhaiEvaluator> {
    evaluator: E,
    max_range_cells: u64,
}

impl Default for FormulaParser {
    fn default() -> Self {
        FormulaParser::new(RhaiEvaluator::default())
    }
}

impl<E: FormulaEvaluator> FormulaParser<E> {
    pub fn new(evaluator: E) -> Self {
        FormulaParser {
            evaluator,
            max_range_cells: DEFAULT_MAX_RANGE_CELLS,
        }
    }

    /// Ranges with more cells than `limit` evaluate to `#REF!`.
    pub fn with_max_range_cells(mut self, limit: u64) -> Self {
        self.max_range_cells = limit;
        self
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn supported_functions(&self) -> Vec<String> {
        self.evaluator.supported_functions()
    }

    /// Evaluate `text` (including the leading `=`) as the formula of `position`.
    ///
    /// Formula failures are returned as error results; only accessor faults
    /// are returned as `Err`.
    pub async fn evaluate(
        &self,
        text: &str,
        position: &CellPosition,
        accessor: &dyn CellAccessor,
        cache: &ValueCache,
    ) -> Result<EvaluationResult, AccessorError> {
        let resolver = PassResolver {
            cache,
            accessor,
            max_range_cells: self.max_range_cells,
        };
        match self.evaluator.evaluate(text, position, &resolver).await {
            Ok(value) => Ok(normalize(value)),
            Err(EvalFailure::Formula(err)) => Ok(failure(err)),
            Err(EvalFailure::Accessor(err)) => Err(err),
        }
    }
}

struct PassResolver<'a> {
    cache: &'a ValueCache,
    accessor: &'a dyn CellAccessor,
    max_range_cells: u64,
}

impl ReferenceResolver for PassResolver<'_> {
    fn cell(&self, pos: &CellPosition) -> Result<Value, AccessorError> {
        self.cache.resolve_cell(pos, self.accessor)
    }

    fn range(&self, range: &CellRange) -> Result<Value, AccessorError> {
        if range.cell_count() > self.max_range_cells {
            return Ok(Value::Error(ErrorValue::new(
                ErrorKind::Ref,
                format!(
                    "Range {} has {} cells; the limit is {}",
                    range,
                    range.cell_count(),
                    self.max_range_cells
                ),
            )));
        }
        self.cache.resolve_range(range, self.accessor)
    }
}

fn failure(err: ErrorValue) -> EvaluationResult {
    EvaluationResult::failed(err.code(), err.message)
}

/// Convert a decoded evaluator value to the per-cell result fields.
pub fn normalize(value: Value) -> EvaluationResult {
    match value {
        Value::Error(err) => failure(err),
        Value::Rich(rich) => EvaluationResult {
            result: Some(CellValue::Text(
                rich.title.unwrap_or_else(|| rich.hyperlink.clone()),
            )),
            result_type: Some(DataType::Hyperlink),
            hyperlink: Some(rich.hyperlink),
            color: Some(DEFAULT_HYPERLINK_COLOR.to_string()),
            underline: Some(true),
            ..EvaluationResult::default()
        },
        Value::Scalar(Scalar::Number(n)) if n.is_infinite() => {
            failure(ErrorValue::new(ErrorKind::DivZero, "Division by zero"))
        }
        Value::Scalar(Scalar::Number(n)) if n.is_nan() => {
            failure(ErrorValue::new(ErrorKind::Num, "Result is not a number"))
        }
        Value::Scalar(scalar) => EvaluationResult {
            result_type: Some(scalar.data_type()),
            result: scalar.to_cell_value(),
            ..EvaluationResult::default()
        },
        Value::Matrix(rows) => {
            let result_type = rows
                .first()
                .and_then(|row| row.first())
                .map(Scalar::data_type)
                .unwrap_or(DataType::Null);
            let matrix = rows
                .iter()
                .map(|row| row.iter().map(Scalar::to_cell_value).collect())
                .collect();
            EvaluationResult {
                result: Some(CellValue::Matrix(matrix)),
                result_type: Some(result_type),
                ..EvaluationResult::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CellConfig, CellsBySheet};
    use pretty_assertions::assert_eq;

    fn pos(a1: &str) -> CellPosition {
        CellPosition::parse_a1(a1, "Sheet1").unwrap()
    }

    fn store(cells: &[(&str, &str)]) -> CellsBySheet {
        cells
            .iter()
            .map(|(a1, text)| (pos(a1), CellConfig::from_input(text)))
            .collect()
    }

    fn parser() -> FormulaParser {
        FormulaParser::default()
    }

    async fn evaluate(text: &str, cells: &CellsBySheet) -> EvaluationResult {
        parser()
            .evaluate(text, &pos("Z99"), cells, &ValueCache::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_number_result() {
        let cells = store(&[("A1", "2"), ("A2", "3")]);
        let result = evaluate("=A1+A2", &cells).await;
        assert_eq!(result.result, Some(CellValue::Number(5.0)));
        assert_eq!(result.result_type, Some(DataType::Number));
        assert_eq!(result.error, None);
    }

    #[tokio::test]
    async fn test_text_and_date_results() {
        let cells = CellsBySheet::new();
        assert_eq!(
            evaluate(r#"="abc""#, &cells).await.result_type,
            Some(DataType::String)
        );
        assert_eq!(
            evaluate(r#"="2024-02-29""#, &cells).await.result_type,
            Some(DataType::Date)
        );
        assert_eq!(evaluate("=TRUE", &cells).await.result_type, Some(DataType::Boolean));
    }

    #[tokio::test]
    async fn test_division_by_zero() {
        let result = evaluate("=1/0", &CellsBySheet::new()).await;
        assert_eq!(result.error.as_deref(), Some("#DIV/0!"));
        assert_eq!(result.result_type, Some(DataType::Error));
        assert!(result.error_message.is_some());
    }

    #[tokio::test]
    async fn test_hyperlink_wire_fields() {
        let result = evaluate(
            r#"=HYPERLINK("https://example.com", "Example")"#,
            &CellsBySheet::new(),
        )
        .await;
        assert_eq!(
            result,
            EvaluationResult {
                result: Some(CellValue::Text("Example".to_string())),
                result_type: Some(DataType::Hyperlink),
                hyperlink: Some("https://example.com".to_string()),
                color: Some("#1155CC".to_string()),
                underline: Some(true),
                ..EvaluationResult::default()
            }
        );
    }

    #[tokio::test]
    async fn test_oversized_range_is_ref_error() {
        let parser = parser().with_max_range_cells(4);
        let result = parser
            .evaluate("=SUM(A1:C3)", &pos("Z99"), &CellsBySheet::new(), &ValueCache::new())
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("#REF!"));
    }

    #[tokio::test]
    async fn test_cache_overrides_accessor() {
        let cells = store(&[("A1", "1")]);
        let cache = ValueCache::new();
        cache.set(pos("A1"), CellConfig::from_input("10"));
        let result = parser()
            .evaluate("=A1*2", &pos("B1"), &cells, &cache)
            .await
            .unwrap();
        assert_eq!(result.result, Some(CellValue::Number(20.0)));
    }

    #[tokio::test]
    async fn test_accessor_failure_escapes() {
        let failing = |_: &str, _: crate::engine::CellCoords| -> Result<Option<CellConfig>, AccessorError> {
            Err(AccessorError::Unavailable("offline".to_string()))
        };
        let err = parser()
            .evaluate("=A1", &pos("B1"), &failing, &ValueCache::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessorError::Unavailable(_)));
    }

    #[test]
    fn test_matrix_result_type_follows_top_left() {
        let result = normalize(Value::Matrix(vec![
            vec![Scalar::Text("a".to_string()), Scalar::Number(1.0)],
            vec![Scalar::Empty, Scalar::Boolean(true)],
        ]));
        assert_eq!(result.result_type, Some(DataType::String));
        assert_eq!(
            result.result,
            Some(CellValue::Matrix(vec![
                vec![Some(CellValue::Text("a".to_string())), Some(CellValue::Number(1.0))],
                vec![None, Some(CellValue::Boolean(true))],
            ]))
        );
    }

    #[test]
    fn test_nan_is_num_error() {
        assert_eq!(normalize(Value::number(f64::NAN)).error.as_deref(), Some("#NUM!"));
    }
}
