//! Integration tests for incremental recalculation.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use gridcalc_core::{
    CellConfig, CellCoords, CellPosition, CellValue, CellsBySheet, DataType, EngineConfig,
    FunctionRegistry, RecalcEngine, SheetCells, Value,
};
use gridcalc_engine::engine::{FormulaEvaluator, ReferenceResolver, RhaiEvaluator};
use gridcalc_engine::{AccessorError, EvalFailure};
use pretty_assertions::assert_eq;

const SHEET: &str = "Sheet1";

fn coords(a1: &str) -> CellCoords {
    CellCoords::parse_a1(a1).unwrap()
}

fn pos(a1: &str) -> CellPosition {
    CellPosition::parse_a1(a1, SHEET).unwrap()
}

/// A caller-side store: the engine reads it and we merge each change set back.
#[derive(Default)]
struct Workbook {
    engine: RecalcEngine,
    cells: CellsBySheet,
}

impl Workbook {
    async fn set(&mut self, a1: &str, text: &str) -> CellsBySheet {
        let changes = self
            .engine
            .calculate(SHEET, coords(a1), text, &self.cells)
            .await
            .unwrap();
        self.cells.merge(&changes);
        changes
    }

    fn result(&self, a1: &str) -> Option<CellValue> {
        self.cells.get(&pos(a1)).and_then(|c| c.result.clone())
    }

    fn error(&self, a1: &str) -> Option<String> {
        self.cells.get(&pos(a1)).and_then(|c| c.error.clone())
    }
}

fn snapshot(cells: &[(&str, &str)]) -> CellsBySheet {
    cells
        .iter()
        .map(|(a1, text)| (pos(a1), CellConfig::from_input(text)))
        .collect()
}

fn row_edits(cells: &[(&str, &str)]) -> SheetCells {
    let mut sheet: SheetCells = BTreeMap::new();
    for (a1, text) in cells {
        let c = coords(a1);
        sheet
            .entry(c.row)
            .or_default()
            .insert(c.col, CellConfig::from_input(text));
    }
    sheet
}

/// Counts evaluations per cell.
#[derive(Default)]
struct CountingEvaluator {
    inner: RhaiEvaluator,
    calls: RefCell<HashMap<CellPosition, usize>>,
}

impl FormulaEvaluator for CountingEvaluator {
    async fn evaluate(
        &self,
        text: &str,
        position: &CellPosition,
        resolver: &dyn ReferenceResolver,
    ) -> Result<Value, EvalFailure> {
        *self.calls.borrow_mut().entry(position.clone()).or_default() += 1;
        self.inner.evaluate(text, position, resolver).await
    }

    fn supported_functions(&self) -> Vec<String> {
        self.inner.supported_functions()
    }
}

#[tokio::test]
async fn test_literal_edit_creates_no_edges() {
    let mut book = Workbook::default();
    let changes = book.set("A1", "42").await;
    assert_eq!(book.engine.graph().edge_count(), 0);
    assert!(book.engine.graph().is_empty());
    assert_eq!(changes.get(&pos("A1")), Some(&CellConfig::from_input("42")));
    assert_eq!(changes.len(), 1);
}

#[tokio::test]
async fn test_dependent_is_recomputed() {
    let mut book = Workbook::default();
    book.set("A1", "=B1+1").await;
    assert_eq!(book.result("A1"), Some(CellValue::Number(1.0)));

    let changes = book.set("B1", "=5").await;
    assert_eq!(book.result("A1"), Some(CellValue::Number(6.0)));
    assert_eq!(book.result("B1"), Some(CellValue::Number(5.0)));
    assert_eq!(changes.len(), 2);
}

#[tokio::test]
async fn test_unchanged_dependents_are_not_reported() {
    let mut book = Workbook::default();
    book.set("A1", "1").await;
    book.set("B1", "=A1>0").await;
    let changes = book.set("A1", "2").await;
    assert!(changes.contains(&pos("A1")));
    assert!(!changes.contains(&pos("B1")));
}

#[tokio::test]
async fn test_batch_evaluates_shared_dependent_once() {
    let store = snapshot(&[("A1", "1"), ("A2", "2"), ("B1", "=A1+A2")]);
    let mut engine = RecalcEngine::with_evaluator(CountingEvaluator::default(), EngineConfig::default());
    engine.initialize(&store, &CellsBySheet::new()).await.unwrap();
    engine.evaluator().calls.borrow_mut().clear();

    let changes = engine
        .calculate_batch(SHEET, &row_edits(&[("A1", "10"), ("A2", "20")]), &store)
        .await
        .unwrap();

    assert_eq!(engine.evaluator().calls.borrow().get(&pos("B1")), Some(&1));
    assert_eq!(
        changes.get(&pos("B1")).and_then(|c| c.result.clone()),
        Some(CellValue::Number(30.0))
    );
    assert_eq!(changes.len(), 3);
}

#[tokio::test]
async fn test_cycle_marks_both_cells() {
    let mut book = Workbook::default();
    book.set("A1", "=B1").await;
    let changes = book.set("B1", "=A1").await;

    assert_eq!(book.error("A1").as_deref(), Some("#CYCLE!"));
    assert_eq!(book.error("B1").as_deref(), Some("#CYCLE!"));
    assert!(changes.contains(&pos("A1")));
    assert_eq!(
        book.cells.get(&pos("A1")).and_then(|c| c.result_type),
        Some(DataType::Error)
    );

    // Breaking the cycle recovers both cells.
    book.set("B1", "7").await;
    assert_eq!(book.error("A1"), None);
    assert_eq!(book.result("A1"), Some(CellValue::Number(7.0)));
}

#[tokio::test]
async fn test_initialize_is_order_independent() {
    let forward = snapshot(&[("A1", "1"), ("B1", "2"), ("C1", "=A1+B1")]);
    let backward: CellsBySheet = forward
        .iter()
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(|(pos, config)| (pos, config.clone()))
        .collect();

    for cells in [forward, backward] {
        let mut engine = RecalcEngine::new();
        let changes = engine.initialize(&cells, &CellsBySheet::new()).await.unwrap();
        assert_eq!(
            changes.get(&pos("C1")).and_then(|c| c.result.clone()),
            Some(CellValue::Number(3.0))
        );
        assert_eq!(changes.len(), 1);
    }
}

#[tokio::test]
async fn test_initialize_orders_formula_chains() {
    // A1 sorts first but depends on the formulas after it.
    let cells = snapshot(&[("A1", "=B1*2"), ("B1", "=C1+1"), ("C1", "=4")]);
    let mut engine = RecalcEngine::new();
    let changes = engine.initialize(&cells, &CellsBySheet::new()).await.unwrap();
    assert_eq!(
        changes.get(&pos("A1")).and_then(|c| c.result.clone()),
        Some(CellValue::Number(10.0))
    );
}

#[tokio::test]
async fn test_range_dependent_recomputes_on_inner_edit() {
    let mut book = Workbook::default();
    book.set("A1", "1").await;
    book.set("A2", "2").await;
    book.set("A3", "3").await;
    book.set("B1", "=SUM(A1:A3)").await;
    assert_eq!(book.result("B1"), Some(CellValue::Number(6.0)));

    let changes = book.set("A2", "20").await;
    assert!(changes.contains(&pos("B1")));
    assert_eq!(book.result("B1"), Some(CellValue::Number(24.0)));
}

#[tokio::test]
async fn test_hyperlink_result() {
    let mut book = Workbook::default();
    book.set("A1", r#"=HYPERLINK("https://example.com", "Example")"#).await;
    let cell = book.cells.get(&pos("A1")).unwrap();
    assert_eq!(cell.result_type, Some(DataType::Hyperlink));
    assert_eq!(cell.hyperlink.as_deref(), Some("https://example.com"));
    assert_eq!(cell.result, Some(CellValue::Text("Example".to_string())));
    assert_eq!(cell.underline, Some(true));
    assert_eq!(cell.color.as_deref(), Some("#1155CC"));
}

#[tokio::test]
async fn test_cross_sheet_dependents() {
    let mut engine = RecalcEngine::new();
    let mut cells = CellsBySheet::new();
    let changes = engine
        .calculate("Summary", coords("A1"), "=Data!A1 * 2", &cells)
        .await
        .unwrap();
    cells.merge(&changes);

    let changes = engine
        .calculate("Data", coords("A1"), "21", &cells)
        .await
        .unwrap();
    cells.merge(&changes);

    let summary = cells.get(&CellPosition::new("Summary", 1, 1)).unwrap();
    assert_eq!(summary.result, Some(CellValue::Number(42.0)));
}

#[tokio::test]
async fn test_clearing_a_formula_retracts_edges() {
    let mut book = Workbook::default();
    book.set("B1", "=A1+1").await;
    assert_eq!(book.engine.graph().edge_count(), 1);

    let changes = book.set("B1", "").await;
    assert_eq!(book.engine.graph().edge_count(), 0);
    assert_eq!(changes.get(&pos("B1")), Some(&CellConfig::cleared()));
    assert!(!book.cells.contains(&pos("B1")));
}

#[tokio::test]
async fn test_errors_propagate_to_dependents() {
    let mut book = Workbook::default();
    book.set("A1", "=1/0").await;
    book.set("B1", "=A1+1").await;
    assert_eq!(book.error("A1").as_deref(), Some("#DIV/0!"));
    assert_eq!(book.error("B1").as_deref(), Some("#DIV/0!"));

    book.set("A1", "=2").await;
    assert_eq!(book.error("B1"), None);
    assert_eq!(book.result("B1"), Some(CellValue::Number(3.0)));
}

#[tokio::test]
async fn test_blank_cell_equals_empty_text() {
    let mut book = Workbook::default();
    book.set("B1", r#"=IF(A1="", "empty", "full")"#).await;
    assert_eq!(book.result("B1"), Some(CellValue::Text("empty".to_string())));

    book.set("A1", "x").await;
    assert_eq!(book.result("B1"), Some(CellValue::Text("full".to_string())));
}

#[tokio::test]
async fn test_runaway_formula_becomes_an_error_cell() {
    let mut engine = RecalcEngine::with_config(EngineConfig {
        max_operations: 50_000,
        ..EngineConfig::default()
    })
    .unwrap();
    let mut cells = CellsBySheet::new();
    let changes = engine
        .calculate(SHEET, coords("A1"), "=loop { }", &cells)
        .await
        .unwrap();
    cells.merge(&changes);
    let changes = engine
        .calculate(SHEET, coords("B1"), "=A1 & \"!\"", &cells)
        .await
        .unwrap();
    cells.merge(&changes);

    for a1 in ["A1", "B1"] {
        let cell = cells.get(&pos(a1)).unwrap();
        assert_eq!(cell.error.as_deref(), Some("#NUM!"));
        assert_eq!(cell.result_type, Some(DataType::Error));
    }
}

#[tokio::test]
async fn test_ampersand_and_percent_in_formulas() {
    let mut book = Workbook::default();
    book.set("A1", "200").await;
    book.set("B1", r#"="Total: " & A1 * 10%"#).await;
    assert_eq!(book.result("B1"), Some(CellValue::Text("Total: 20".to_string())));
}

#[tokio::test]
async fn test_custom_functions_from_registry() {
    let mut custom = FunctionRegistry::new();
    custom.register("TWICE", |args| {
        let n = args.first().map(Value::first_scalar).unwrap_or_default();
        Ok(Value::number(n.coerce_number()? * 2.0))
    });
    let mut engine = RecalcEngine::with_functions(custom, EngineConfig::default()).unwrap();
    let cells = snapshot(&[("A1", "4"), ("B1", "=twice(A1)")]);
    let changes = engine.initialize(&cells, &CellsBySheet::new()).await.unwrap();
    assert_eq!(
        changes.get(&pos("B1")).and_then(|c| c.result.clone()),
        Some(CellValue::Number(8.0))
    );
}

#[tokio::test]
async fn test_accessor_failure_aborts_the_pass() {
    let failing = |_: &str, _: CellCoords| -> Result<Option<CellConfig>, AccessorError> {
        Err(AccessorError::Unavailable("offline".to_string()))
    };
    let mut engine = RecalcEngine::new();
    let err = engine
        .calculate(SHEET, coords("B1"), "=A1", &failing)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("offline"));
}

#[tokio::test]
async fn test_change_set_wire_shape() {
    let mut book = Workbook::default();
    let changes = book.set("A1", "=1+1").await;
    let json = serde_json::to_value(&changes).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "Sheet1": { "1": { "1": {
                "text": "=1+1",
                "datatype": "formula",
                "result": 2.0,
                "resultType": "number"
            } } }
        })
    );
}
