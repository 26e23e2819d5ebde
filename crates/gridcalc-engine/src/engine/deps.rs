//! Dependency extraction from formula strings.
//!
//! Scans formula text for every cell or range reference it reads (e.g. `A1`,
//! `B2:C5`, `Sheet2!D4`) without evaluating anything. The result feeds the
//! dependency graph used for recalculation and cycle detection.
//!
//! Handles:
//! - Simple and anchored cell references: `A1`, `$B$2`
//! - Ranges, kept whole: `SUM(A1:B5)` yields one range, not ten cells
//! - Sheet-qualified references: `Data!A1`, `'Q1 Sales'!A1:A9`
//! - Ignores references inside string literals and function names like `LOG10(`

use super::cell_ref::{CellPosition, Reference};
use super::preprocess::{Token, formula_body, tokenize};

/// Extract the references a formula reads, in order of first appearance.
/// Repeated references collapse to one entry. Unqualified references belong to
/// `position.sheet`.
pub fn extract_dependencies(text: &str, position: &CellPosition) -> Vec<Reference> {
    let mut deps: Vec<Reference> = Vec::new();
    for token in tokenize(formula_body(text), &position.sheet) {
        if let Token::Ref(reference) = token
            && !deps.contains(&reference)
        {
            deps.push(reference);
        }
    }
    deps
}
