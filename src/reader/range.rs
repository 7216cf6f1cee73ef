use crate::reader::reference::col_to_index;
use crate::reader::reference::row_to_index;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

/// Errors related to Excel-style range parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("Invalid range format '{0}'")]
    FormatError(String),
}

lazy_static! {
    static ref RANGE: Regex = Regex::new(r"^\$?([A-Z]*)\$?(\d*)(:\$?([A-Z]*)\$?(\d*))?$").unwrap();
}

/// Excel-style cell range with optional bounds, all 0-based and inclusive.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Range {
    pub row_lower_bound: Option<usize>,
    pub row_upper_bound: Option<usize>,
    pub col_lower_bound: Option<usize>,
    pub col_upper_bound: Option<usize>,
}

impl TryFrom<&str> for Range {
    type Error = RangeError;

    /// Parses `A1`, `B2:C5`, `A:C` or `2:10`. A single cell reference bounds both ends.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.trim().to_ascii_uppercase();
        let captures = RANGE
            .captures(&value)
            .filter(|captures| !captures[1].is_empty() || !captures[2].is_empty())
            .ok_or_else(|| RangeError::FormatError(value.clone()))?;
        let part = |index: usize| captures.get(index).map(|matcher| matcher.as_str()).unwrap_or_default();
        let mut range = Range {
            col_lower_bound: col_to_index(part(1)),
            row_lower_bound: row_to_index(part(2)),
            col_upper_bound: col_to_index(part(4)),
            row_upper_bound: row_to_index(part(5)),
        };
        if captures.get(3).is_none() {
            range.col_upper_bound = range.col_lower_bound;
            range.row_upper_bound = range.row_lower_bound;
        }
        Ok(range)
    }
}

impl Range {
    pub fn contains_row(&self, row: usize) -> bool {
        self.row_lower_bound.map(|lower| row >= lower).unwrap_or(true)
            && self.row_upper_bound.map(|upper| row <= upper).unwrap_or(true)
    }

    pub fn contains_col(&self, col: usize) -> bool {
        self.col_lower_bound.map(|lower| col >= lower).unwrap_or(true)
            && self.col_upper_bound.map(|upper| col <= upper).unwrap_or(true)
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.contains_row(row) && self.contains_col(col)
    }
}

/// A fully bounded rectangle, such as a merged cell range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CellRange {
    pub first_row: usize,
    pub last_row: usize,
    pub first_col: usize,
    pub last_col: usize,
}

impl TryFrom<&str> for CellRange {
    type Error = RangeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let range = Range::try_from(value)?;
        match range {
            Range {
                row_lower_bound: Some(first_row),
                row_upper_bound: Some(last_row),
                col_lower_bound: Some(first_col),
                col_upper_bound: Some(last_col),
            } if first_row <= last_row && first_col <= last_col => Ok(CellRange { first_row, last_row, first_col, last_col }),
            _ => Err(RangeError::FormatError(value.to_owned())),
        }
    }
}

impl CellRange {
    pub fn contains(&self, row: usize, col: usize) -> bool {
        (self.first_row..=self.last_row).contains(&row) && (self.first_col..=self.last_col).contains(&col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_ranges() {
        let range = Range::try_from("b2:c").unwrap();
        assert_eq!(
            range,
            Range { row_lower_bound: Some(1), row_upper_bound: None, col_lower_bound: Some(1), col_upper_bound: Some(2) }
        );
        assert!(range.contains(1_000, 2));
        assert!(!range.contains(0, 2));
        assert!(!range.contains(5, 3));

        let rows = Range::try_from("2:10").unwrap();
        assert!(rows.contains_row(9) && !rows.contains_row(10));
        assert!(rows.contains_col(500));

        assert!(Range::try_from("").is_err());
        assert!(Range::try_from("A1:B2:C3").is_err());
    }

    #[test]
    fn merged_ranges_need_both_corners() {
        assert_eq!(
            CellRange::try_from("$A$1:C2"),
            Ok(CellRange { first_row: 0, last_row: 1, first_col: 0, last_col: 2 })
        );
        assert_eq!(CellRange::try_from("D4"), Ok(CellRange { first_row: 3, last_row: 3, first_col: 3, last_col: 3 }));
        assert!(CellRange::try_from("A:C").is_err());
        assert!(CellRange::try_from("C3:A1").is_err());
    }
}
