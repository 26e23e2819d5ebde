//! Pluggable formula function registry.
//!
//! Maps upper-case function names to Rust implementations. The default set
//! comes from [`builtins`](crate::builtins); callers merge their own functions
//! over it to add or override names.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::value::{ErrorKind, ErrorValue, Value};

/// Signature of a formula function.
pub type FormulaFn = dyn Fn(&[Value]) -> Result<Value, ErrorValue> + Send + Sync;

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<FormulaFn>>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in function set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtins::register_builtins(&mut registry);
        registry
    }

    /// Built-ins with `custom` merged over them.
    pub fn with_custom(custom: FunctionRegistry) -> Self {
        let mut registry = Self::with_builtins();
        registry.merge(custom);
        registry
    }

    /// Register (or replace) a function. Names are case-insensitive.
    pub fn register<F>(&mut self, name: &str, func: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, ErrorValue> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_ascii_uppercase(), Arc::new(func));
        self
    }

    /// Merge `other` into `self`; entries of `other` win.
    pub fn merge(&mut self, other: FunctionRegistry) {
        self.functions.extend(other.functions);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_ascii_uppercase())
    }

    pub fn get(&self, name: &str) -> Option<Arc<FormulaFn>> {
        self.functions.get(&name.to_ascii_uppercase()).cloned()
    }

    /// Sorted function names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, ErrorValue> {
        match self.get(name) {
            Some(func) => func(args),
            None => Err(ErrorValue::new(
                ErrorKind::Name,
                format!("Unknown function {}", name),
            )),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &Arc<FormulaFn>)> {
        self.functions.iter()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
