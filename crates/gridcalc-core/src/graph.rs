//! Dependency graph between formula cells.
//!
//! Forward edges (formula -> references) live on each [`FormulaNode`]; the
//! reverse edges used for invalidation are kept in two maps:
//! - cell references: referenced cell -> formulas reading it
//! - range references: the whole range -> formulas reading it, grouped by
//!   sheet and ordered by top-left corner. A range is one coarse edge, so any
//!   cell inside it invalidates its readers.
//!
//! All keys are sheet-qualified.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use gridcalc_engine::engine::{
    CellCoords, CellPosition, CellRange, Reference, extract_dependencies,
};

#[derive(Clone, Debug, PartialEq)]
pub struct FormulaNode {
    pub text: String,
    pub references: Vec<Reference>,
}

#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    formulas: HashMap<CellPosition, FormulaNode>,
    cell_dependents: HashMap<CellPosition, BTreeSet<CellPosition>>,
    range_dependents: HashMap<String, BTreeMap<CellRange, BTreeSet<CellPosition>>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `text` as the formula of `pos`, adding and removing reverse edges
    /// so they match its current references.
    pub fn set_formula(&mut self, pos: CellPosition, text: &str) -> &FormulaNode {
        let references = extract_dependencies(text, &pos);
        let previous = self
            .formulas
            .remove(&pos)
            .map(|node| node.references)
            .unwrap_or_default();

        for stale in previous.iter().filter(|r| !references.contains(r)) {
            self.unlink(stale, &pos);
        }
        for added in references.iter().filter(|r| !previous.contains(r)) {
            self.link(added, &pos);
        }

        self.formulas.entry(pos).or_insert(FormulaNode {
            text: text.to_string(),
            references,
        })
    }

    /// Forget the formula of `pos` and retract its outgoing edges.
    pub fn remove_formula(&mut self, pos: &CellPosition) -> Option<FormulaNode> {
        let node = self.formulas.remove(pos)?;
        for reference in &node.references {
            self.unlink(reference, pos);
        }
        Some(node)
    }

    pub fn clear(&mut self) {
        self.formulas.clear();
        self.cell_dependents.clear();
        self.range_dependents.clear();
    }

    pub fn formula(&self, pos: &CellPosition) -> Option<&FormulaNode> {
        self.formulas.get(pos)
    }

    pub fn is_formula(&self, pos: &CellPosition) -> bool {
        self.formulas.contains_key(pos)
    }

    /// References read by the formula at `pos` (empty for non-formula cells).
    pub fn references_of(&self, pos: &CellPosition) -> &[Reference] {
        self.formulas
            .get(pos)
            .map(|node| node.references.as_slice())
            .unwrap_or_default()
    }

    /// Formula cells that directly read `pos`, through a cell or a range edge.
    pub fn dependents_of(&self, pos: &CellPosition) -> BTreeSet<CellPosition> {
        let mut out = self.cell_dependents.get(pos).cloned().unwrap_or_default();
        let Some(ranges) = self.range_dependents.get(&pos.sheet) else {
            return out;
        };
        // Ranges starting below `pos` cannot contain it.
        let last = CellRange {
            sheet: pos.sheet.clone(),
            from: CellCoords::new(pos.row, u32::MAX),
            to: CellCoords::new(u32::MAX, u32::MAX),
        };
        for (range, readers) in ranges.range(..=last) {
            if range.contains(pos) {
                out.extend(readers.iter().cloned());
            }
        }
        out
    }

    /// Every formula cell, row-major within each sheet.
    pub fn formula_positions(&self) -> BTreeSet<CellPosition> {
        self.formulas.keys().cloned().collect()
    }

    /// Number of formula cells.
    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }

    /// Number of reverse edges (cell and range).
    pub fn edge_count(&self) -> usize {
        self.cell_dependents.values().map(BTreeSet::len).sum::<usize>()
            + self
                .range_dependents
                .values()
                .flat_map(BTreeMap::values)
                .map(BTreeSet::len)
                .sum::<usize>()
    }

    fn link(&mut self, reference: &Reference, reader: &CellPosition) {
        match reference {
            Reference::Cell(cell) => {
                self.cell_dependents
                    .entry(cell.clone())
                    .or_default()
                    .insert(reader.clone());
            }
            Reference::Range(range) => {
                self.range_dependents
                    .entry(range.sheet.clone())
                    .or_default()
                    .entry(range.clone())
                    .or_default()
                    .insert(reader.clone());
            }
        }
    }

    fn unlink(&mut self, reference: &Reference, reader: &CellPosition) {
        match reference {
            Reference::Cell(cell) => {
                if let Some(readers) = self.cell_dependents.get_mut(cell) {
                    readers.remove(reader);
                    if readers.is_empty() {
                        self.cell_dependents.remove(cell);
                    }
                }
            }
            Reference::Range(range) => {
                let Some(ranges) = self.range_dependents.get_mut(&range.sheet) else {
                    return;
                };
                if let Some(readers) = ranges.get_mut(range) {
                    readers.remove(reader);
                    if readers.is_empty() {
                        ranges.remove(range);
                    }
                }
                if ranges.is_empty() {
                    self.range_dependents.remove(&range.sheet);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pos(a1: &str) -> CellPosition {
        CellPosition::parse_a1(a1, "Sheet1").unwrap()
    }

    fn set(graph: &mut DependencyGraph, a1: &str, text: &str) {
        graph.set_formula(pos(a1), text);
    }

    #[test]
    fn test_cell_edges() {
        let mut graph = DependencyGraph::new();
        set(&mut graph, "C1", "=A1+B1");
        assert_eq!(graph.dependents_of(&pos("A1")), BTreeSet::from([pos("C1")]));
        assert_eq!(graph.dependents_of(&pos("B1")), BTreeSet::from([pos("C1")]));
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_range_edge_covers_inner_cells() {
        let mut graph = DependencyGraph::new();
        set(&mut graph, "B1", "=SUM(A1:A3)");
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.dependents_of(&pos("A2")).contains(&pos("B1")));
        assert!(graph.dependents_of(&pos("A4")).is_empty());
        assert!(graph.dependents_of(&CellPosition::new("Other", 2, 1)).is_empty());
    }

    #[test]
    fn test_replacing_formula_diffs_edges() {
        let mut graph = DependencyGraph::new();
        set(&mut graph, "C1", "=A1+B1");
        set(&mut graph, "C1", "=B1+D1");
        assert!(graph.dependents_of(&pos("A1")).is_empty());
        assert_eq!(graph.dependents_of(&pos("B1")), BTreeSet::from([pos("C1")]));
        assert_eq!(graph.dependents_of(&pos("D1")), BTreeSet::from([pos("C1")]));
        assert_eq!(graph.formula(&pos("C1")).unwrap().text, "=B1+D1");
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_remove_formula_retracts_edges() {
        let mut graph = DependencyGraph::new();
        set(&mut graph, "C1", "=SUM(A1:A3)+B1");
        assert!(graph.remove_formula(&pos("C1")).is_some());
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.is_empty());
        assert!(graph.remove_formula(&pos("C1")).is_none());
    }

    #[test]
    fn test_duplicate_references_make_one_edge() {
        let mut graph = DependencyGraph::new();
        set(&mut graph, "B1", "=A1*A1+$A$1");
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.references_of(&pos("B1")).len(), 1);
    }

    #[test]
    fn test_range_lookup_respects_sheet_and_corners() {
        let mut graph = DependencyGraph::new();
        set(&mut graph, "D1", "=SUM(A$1:A5)");
        set(&mut graph, "D2", "=SUM(A3:B9)");
        set(&mut graph, "D3", "=SUM(Data!A1:A9)");
        set(&mut graph, "D4", "=SUM(B1:C2)");

        assert_eq!(graph.dependents_of(&pos("A4")), BTreeSet::from([pos("D1"), pos("D2")]));
        assert_eq!(graph.dependents_of(&pos("A1")), BTreeSet::from([pos("D1")]));
        assert_eq!(graph.dependents_of(&pos("B9")), BTreeSet::from([pos("D2")]));
        assert_eq!(graph.dependents_of(&pos("C2")), BTreeSet::from([pos("D4")]));
        assert_eq!(
            graph.dependents_of(&CellPosition::new("Data", 4, 1)),
            BTreeSet::from([pos("D3")])
        );

        graph.remove_formula(&pos("D3"));
        assert!(graph.dependents_of(&CellPosition::new("Data", 4, 1)).is_empty());
        assert!(!graph.range_dependents.contains_key("Data"));
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_cross_sheet_edges() {
        let mut graph = DependencyGraph::new();
        set(&mut graph, "A1", "=Data!B2 * 2");
        assert_eq!(
            graph.dependents_of(&CellPosition::new("Data", 2, 2)),
            BTreeSet::from([pos("A1")])
        );
        assert!(graph.dependents_of(&pos("B2")).is_empty());
    }
}
