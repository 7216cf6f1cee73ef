//! # Layout Resolution
//!
//! Maps the naively assigned columns of each row onto true grid columns by accounting
//! for cells of earlier rows whose vertical span still reaches the row.
//!
//! For a cell `td` in row `r`, any earlier cell `prev` with `prev.col <= td.col` whose
//! `row_bound >= r` blocks it: `td.col` moves right by `prev`'s column span (at least 1),
//! `prev` is consumed for this cell, and the search restarts from the new column. Blockers
//! stack, so every qualifying one is applied. The cost is
//! O(rows × cells per row × live spanning cells).
//!
//! [`LayoutResolver::resolve_row`] is the incremental form used by streaming builds: it
//! only remembers cells whose span still reaches the current row, since a span that
//! ended can never block again.
use crate::table::Td;
use crate::table::Tr;
use std::fmt;
use thiserror::Error;

/// What to do when resolved cells still overlap (malformed explicit spans).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LayoutPolicy {
    /// Keep the overlapping placement and log a warning
    #[default]
    BestEffort,
    /// Fail with [`LayoutError::Conflict`]
    Strict,
}

/// Two resolved cells whose rectangles intersect, as `(row, col)` anchors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    pub first: (usize, usize),
    pub second: (usize, usize),
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cell at row {}, column {} overlaps cell at row {}, column {}",
            self.second.0, self.second.1, self.first.0, self.first.1
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Layout conflict: {0}")]
    Conflict(Conflict),
}

/// Rectangle of a cell whose vertical span reaches later rows.
#[derive(Copy, Clone, Debug)]
struct Span {
    row: usize,
    col: usize,
    col_span: usize,
    row_bound: usize,
    col_bound: usize,
}

impl Span {
    fn of(td: &Td) -> Self {
        Span {
            row: td.row,
            col: td.col,
            col_span: td.col_span,
            row_bound: td.row_bound,
            col_bound: td.col_bound,
        }
    }

    fn overlaps(&self, td: &Td) -> bool {
        self.row <= td.row_bound && td.row <= self.row_bound && self.col <= td.col_bound && td.col <= self.col_bound
    }
}

/// Incremental layout resolver. One instance per sheet.
#[derive(Debug, Default)]
pub struct LayoutResolver {
    policy: LayoutPolicy,
    active: Vec<Span>,
}

impl LayoutResolver {
    pub fn new(policy: LayoutPolicy) -> Self {
        LayoutResolver { policy, active: Vec::new() }
    }

    /// Resolves rows in order. Rows must be sorted by index.
    pub fn resolve(&mut self, trs: &mut [Tr]) -> Result<(), LayoutError> {
        trs.iter_mut().try_for_each(|tr| self.resolve_row(tr))
    }

    /// Resolves one row against the spans of the rows seen before it.
    ///
    /// Rows already marked resolved keep their columns but still register their
    /// spans as blockers for later rows.
    pub fn resolve_row(&mut self, tr: &mut Tr) -> Result<(), LayoutError> {
        let row = tr.index;
        self.active.retain(|span| span.row_bound >= row);

        if !tr.resolved {
            for td in &mut tr.tds {
                td.row = row;
                shift(td, &self.active);
            }
            tr.resolved = true;
            tr.measure();
        }

        if let Some(conflict) = self.check(tr) {
            match self.policy {
                LayoutPolicy::BestEffort => log::warn!("Layout conflict left in place: {conflict}"),
                LayoutPolicy::Strict => return Err(LayoutError::Conflict(conflict)),
            }
        }

        self.active
            .extend(tr.tds.iter().filter(|td| td.row_bound > row).map(Span::of));
        Ok(())
    }

    /// Forgets all spans, used when output moves to a new sheet.
    pub fn reset(&mut self) {
        self.active.clear();
    }

    fn check(&self, tr: &Tr) -> Option<Conflict> {
        for (index, td) in tr.tds.iter().enumerate() {
            if let Some(span) = self.active.iter().find(|span| span.overlaps(td)) {
                return Some(Conflict { first: (span.row, span.col), second: (td.row, td.col) });
            }
            if let Some(other) = tr.tds[..index].iter().find(|other| other.overlaps(td)) {
                return Some(Conflict { first: (other.row, other.col), second: (td.row, td.col) });
            }
        }
        None
    }
}

/// Applies every blocker reaching the cell's row, consuming each one once.
fn shift(td: &mut Td, active: &[Span]) {
    let mut candidates = active.iter().filter(|span| span.row_bound >= td.row).collect::<Vec<_>>();
    while let Some(position) = candidates.iter().position(|span| span.col <= td.col) {
        let blocker = candidates.swap_remove(position);
        td.col += blocker.col_span.max(1);
    }
    td.refresh_bounds();
}

/// Every pair of cells whose resolved rectangles intersect. Rows must be sorted by index.
pub fn find_conflicts(trs: &[Tr]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    let mut active = Vec::<Span>::new();
    for tr in trs {
        active.retain(|span| span.row_bound >= tr.index);
        for (index, td) in tr.tds.iter().enumerate() {
            conflicts.extend(
                active
                    .iter()
                    .filter(|span| span.overlaps(td))
                    .map(|span| Conflict { first: (span.row, span.col), second: (td.row, td.col) }),
            );
            conflicts.extend(
                tr.tds[..index]
                    .iter()
                    .filter(|other| other.overlaps(td))
                    .map(|other| Conflict { first: (other.row, other.col), second: (td.row, td.col) }),
            );
        }
        active.extend(tr.tds.iter().filter(|td| td.row_bound > tr.index).map(Span::of));
    }
    conflicts
}
