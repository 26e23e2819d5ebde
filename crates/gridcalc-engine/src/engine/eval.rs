//! Formula evaluation.
//!
//! [`FormulaEvaluator`] is the seam between the recalculation engine and the
//! formula language. [`RhaiEvaluator`] is the bundled implementation: it
//! rewrites the formula with [`prepare_formula`], binds every reference as a
//! scope constant and runs the result on a Rhai engine that has the
//! [`FunctionRegistry`] registered. User functions written in Rhai are compiled
//! once and merged with each formula.
//!
//! Every evaluation runs under operation, call-depth and expression-depth
//! limits; a formula that exceeds them evaluates to `#NUM!`.

use rhai::{AST, Dynamic, Engine, EvalAltResult, ImmutableString, Position, Scope};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::cell_ref::{CellPosition, CellRange, Reference};
use super::preprocess::{CONCAT_OP, prepare_formula, scope_name};
use super::registry::{FormulaFn, FunctionRegistry};
use super::value::{ErrorKind, ErrorValue, Value};
use crate::error::{AccessorError, EvalFailure, ScriptError};

/// Resolves references to values while a formula is evaluated.
pub trait ReferenceResolver {
    fn cell(&self, pos: &CellPosition) -> Result<Value, AccessorError>;

    /// A row-major [`Value::Matrix`], or the error carried by the range.
    fn range(&self, range: &CellRange) -> Result<Value, AccessorError>;
}

/// Turns formula text into a [`Value`].
///
/// The future may suspend; the engine awaits each evaluation before moving on
/// to the next cell.
pub trait FormulaEvaluator {
    fn evaluate(
        &self,
        text: &str,
        position: &CellPosition,
        resolver: &dyn ReferenceResolver,
    ) -> impl Future<Output = Result<Value, EvalFailure>>;

    /// Sorted names of the functions formulas may call.
    fn supported_functions(&self) -> Vec<String>;
}

/// Registry functions are callable with up to this many arguments.
pub const MAX_ARGS: usize = 10;

/// Rhai operations one formula may run by default.
pub const DEFAULT_MAX_OPERATIONS: u64 = 1_000_000;

const MAX_CALL_LEVELS: usize = 64;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_FUNCTION_EXPR_DEPTH: usize = 32;

/// Between comparisons (130) and ranges (140), below `+`/`-` (150).
const CONCAT_PRECEDENCE: u8 = 135;

macro_rules! register_arities {
    ($engine:expr, $name:expr, $func:expr; $( [$($arg:ident),*] )+) => {
        $({
            let func = Arc::clone($func);
            $engine.register_fn(
                $name,
                move |$($arg: Dynamic),*| -> Result<Dynamic, Box<EvalAltResult>> {
                    call_registered(func.as_ref(), vec![$($arg),*])
                },
            );
        })+
    };
}

/// Rhai-backed formula evaluator.
pub struct RhaiEvaluator {
    engine: Engine,
    registry: FunctionRegistry,
    custom: Option<AST>,
}

impl RhaiEvaluator {
    /// An evaluator calling the functions of `registry`.
    pub fn new(registry: FunctionRegistry) -> Self {
        let mut engine = Engine::new();
        // Registered overloads for `()` must win over Rhai's built-in operators.
        engine.set_fast_operators(false);
        engine.set_max_operations(DEFAULT_MAX_OPERATIONS);
        engine.set_max_call_levels(MAX_CALL_LEVELS);
        engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FUNCTION_EXPR_DEPTH);
        register_registry(&mut engine, &registry);
        register_blank_operators(&mut engine);
        register_concat_operator(&mut engine);
        RhaiEvaluator {
            engine,
            registry,
            custom: None,
        }
    }

    /// An evaluator that also exposes the functions defined in `script`.
    pub fn with_script(registry: FunctionRegistry, script: &str) -> Result<Self, ScriptError> {
        let mut evaluator = Self::new(registry);
        let ast = evaluator.engine.compile(script)?;
        tracing::debug!(
            functions = ast.iter_functions().count(),
            "compiled custom functions"
        );
        evaluator.custom = Some(ast);
        Ok(evaluator)
    }

    /// Limit the Rhai operations one formula may run. 0 removes the limit.
    pub fn with_max_operations(mut self, operations: u64) -> Self {
        self.engine.set_max_operations(operations);
        self
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    fn bind_references(
        &self,
        references: &[Reference],
        resolver: &dyn ReferenceResolver,
    ) -> Result<Scope<'static>, EvalFailure> {
        let mut scope = Scope::new();
        for (i, reference) in references.iter().enumerate() {
            let value = match reference {
                Reference::Cell(pos) => resolver.cell(pos)?,
                Reference::Range(range) => resolver.range(range)?,
            };
            if let Value::Error(err) = value {
                return Err(EvalFailure::Formula(err));
            }
            scope.push_constant_dynamic(scope_name(i), value.to_dynamic());
        }
        Ok(scope)
    }
}

impl Default for RhaiEvaluator {
    fn default() -> Self {
        Self::new(FunctionRegistry::with_builtins())
    }
}

impl fmt::Debug for RhaiEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RhaiEvaluator")
            .field("registry", &self.registry)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl FormulaEvaluator for RhaiEvaluator {
    async fn evaluate(
        &self,
        text: &str,
        position: &CellPosition,
        resolver: &dyn ReferenceResolver,
    ) -> Result<Value, EvalFailure> {
        let is_function = |name: &str| self.registry.contains(name);
        let prepared = prepare_formula(text, position, &is_function);
        tracing::trace!(cell = %position, script = %prepared.script, "evaluating");

        let mut scope = self.bind_references(&prepared.references, resolver)?;
        let formula = self
            .engine
            .compile_with_scope(&scope, &prepared.script)
            .map_err(|e| ErrorValue::new(ErrorKind::Syntax, e.to_string()))?;
        let ast = match &self.custom {
            Some(custom) => custom.merge(&formula),
            None => formula,
        };

        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| rhai_error(&e))?;
        Ok(Value::from_dynamic(result))
    }

    fn supported_functions(&self) -> Vec<String> {
        let mut names = self.registry.names();
        if let Some(custom) = &self.custom {
            names.extend(custom.iter_functions().map(|f| f.name.to_string()));
        }
        names.sort();
        names.dedup();
        names
    }
}

fn register_registry(engine: &mut Engine, registry: &FunctionRegistry) {
    for (name, func) in registry.iter() {
        let name = name.as_str();
        register_arities!(engine, name, func;
            []
            [a]
            [a, b]
            [a, b, c]
            [a, b, c, d]
            [a, b, c, d, e]
            [a, b, c, d, e, f]
            [a, b, c, d, e, f, g]
            [a, b, c, d, e, f, g, h]
            [a, b, c, d, e, f, g, h, i]
            [a, b, c, d, e, f, g, h, i, j]
        );
    }
}

fn call_registered(func: &FormulaFn, args: Vec<Dynamic>) -> Result<Dynamic, Box<EvalAltResult>> {
    let args: Vec<Value> = args.into_iter().map(Value::from_dynamic).collect();
    func(&args)
        .map(|value| value.to_dynamic())
        .map_err(|err| EvalAltResult::ErrorRuntime(Dynamic::from(err), Position::NONE).into())
}

const ARITHMETIC_OPS: &[&str] = &["+", "-", "*", "/", "%", "**"];
const COMPARISON_OPS: &[&str] = &["==", "!=", "<", "<=", ">", ">="];

/// Empty cells are bound as `()`. They act as 0 in arithmetic and against
/// numbers, and as `""` against strings.
fn register_blank_operators(engine: &mut Engine) {
    for &op in ARITHMETIC_OPS {
        engine.register_fn(op, move |_: (), b: f64| arithmetic(op, 0.0, b));
        engine.register_fn(op, move |a: f64, _: ()| arithmetic(op, a, 0.0));
        engine.register_fn(op, move |_: (), _: ()| arithmetic(op, 0.0, 0.0));
    }
    for &op in COMPARISON_OPS {
        engine.register_fn(op, move |_: (), b: f64| compare(op, &0.0, &b));
        engine.register_fn(op, move |a: f64, _: ()| compare(op, &a, &0.0));
        engine.register_fn(op, move |_: (), b: ImmutableString| compare(op, "", b.as_str()));
        engine.register_fn(op, move |a: ImmutableString, _: ()| compare(op, a.as_str(), ""));
    }
    engine.register_fn("-", |_: ()| 0.0_f64);
}

/// Spreadsheet `&`: joins the text of both operands.
fn register_concat_operator(engine: &mut Engine) {
    if let Err(e) = engine.register_custom_operator(CONCAT_OP, CONCAT_PRECEDENCE) {
        tracing::error!(error = %e, "cannot register the & operator");
        return;
    }
    engine.register_fn(CONCAT_OP, concat);
}

fn concat(a: Dynamic, b: Dynamic) -> Result<Dynamic, Box<EvalAltResult>> {
    let mut text = String::new();
    for operand in [a, b] {
        match Value::from_dynamic(operand) {
            Value::Error(err) => {
                return Err(EvalAltResult::ErrorRuntime(Dynamic::from(err), Position::NONE).into());
            }
            value => text.push_str(&value.first_scalar().to_text()),
        }
    }
    Ok(Dynamic::from(text))
}

fn arithmetic(op: &str, a: f64, b: f64) -> f64 {
    match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" => a / b,
        "%" => a % b,
        _ => a.powf(b),
    }
}

fn compare<T: PartialOrd + ?Sized>(op: &str, a: &T, b: &T) -> bool {
    match op {
        "==" => a == b,
        "!=" => a != b,
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        _ => a >= b,
    }
}

/// Map a Rhai failure to the value-level error stored on the cell.
fn rhai_error(err: &EvalAltResult) -> ErrorValue {
    match err {
        EvalAltResult::ErrorParsing(kind, _) => ErrorValue::new(ErrorKind::Syntax, kind.to_string()),
        EvalAltResult::ErrorFunctionNotFound(signature, _) => {
            ErrorValue::new(ErrorKind::Name, format!("Unknown function: {}", signature))
        }
        EvalAltResult::ErrorVariableNotFound(name, _) => {
            ErrorValue::new(ErrorKind::Name, format!("Unknown name: {}", name))
        }
        EvalAltResult::ErrorArithmetic(message, _) => {
            ErrorValue::new(ErrorKind::DivZero, message.clone())
        }
        EvalAltResult::ErrorRuntime(payload, _) if payload.is::<ErrorValue>() => {
            payload.clone().cast::<ErrorValue>()
        }
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => rhai_error(inner),
        EvalAltResult::ErrorTooManyOperations(_) => {
            ErrorValue::new(ErrorKind::Num, "Formula exceeded the operation limit")
        }
        EvalAltResult::ErrorStackOverflow(_) => {
            ErrorValue::new(ErrorKind::Num, "Formula exceeded the call depth limit")
        }
        EvalAltResult::ErrorDataTooLarge(what, _) => {
            ErrorValue::new(ErrorKind::Num, format!("{} is too large", what))
        }
        other => ErrorValue::new(ErrorKind::Value, other.to_string()),
    }
}
