//! # Read Path
//!
//! Reads rows of an existing `.xlsx` workbook back into records. Merged ranges are
//! expanded so that every covered position reports the anchor cell, row filters run on
//! the expanded rows, and record filters run on the mapped records.
//!
//! ```no_run
//! use rusty_html2sheet::reader::{SheetReader, SheetSelector};
//!
//! let reader = SheetReader::<Vec<String>>::new()
//!     .sheet(SheetSelector::Name("Orders".into()))
//!     .row_filter(|row| row.index > 0)
//!     .skip_empty_rows(true);
//! let records = reader.read("orders.xlsx")?;
//! # Ok::<(), rusty_html2sheet::error::Html2SheetError>(())
//! ```
use crate::error::Html2SheetError;
use crate::reader::range::Range;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use glob::Pattern;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub mod cell;
pub mod range;
pub mod reference;
pub mod xlsx;

pub use cell::Cell;
pub use cell::CellType;
pub use xlsx::XlsxWorkbook;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpreadsheetError {
    #[error("Workbook part '{0}' is missing")]
    MissingPart(String),

    #[error("Workbook contains no sheets")]
    EmptyWorkbook,

    #[error("Sheet {0} not found")]
    SheetNotFound(String),

    #[error("Cannot read cell {reference} of sheet '{sheet}' as {expected}: '{value}'")]
    CellValueError { sheet: String, reference: String, expected: &'static str, value: String },
}

/// Which sheet to read.
#[derive(Clone, Debug, PartialEq)]
pub enum SheetSelector {
    /// 0-based position in workbook order
    Index(usize),
    Name(String),
    /// First sheet whose name matches a glob pattern
    Pattern(Pattern),
}

impl Default for SheetSelector {
    fn default() -> Self {
        SheetSelector::Index(0)
    }
}

impl SheetSelector {
    pub fn pattern(pattern: &str) -> Result<Self, glob::PatternError> {
        Ok(SheetSelector::Pattern(Pattern::new(pattern)?))
    }
}

impl fmt::Display for SheetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetSelector::Index(index) => write!(f, "#{index}"),
            SheetSelector::Name(name) => write!(f, "'{name}'"),
            SheetSelector::Pattern(pattern) => write!(f, "matching '{}'", pattern.as_str()),
        }
    }
}

/// One row of a sheet, merged ranges already expanded.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    sheet: Arc<str>,
    /// 0-based row index
    pub index: usize,
    cells: BTreeMap<usize, Cell>,
}

impl Row {
    pub(crate) fn new(sheet: Arc<str>, index: usize) -> Self {
        Row { sheet, index, cells: BTreeMap::new() }
    }

    pub(crate) fn extend<I: IntoIterator<Item = Cell>>(&mut self, cells: I) {
        for cell in cells {
            self.set(cell);
        }
    }

    pub(crate) fn set(&mut self, cell: Cell) {
        self.cells.insert(cell.col, cell);
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    pub fn cell(&self, col: usize) -> Option<&Cell> {
        self.cells.get(&col)
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> + '_ {
        self.cells.values()
    }

    /// Columns up to the last present cell.
    pub fn len(&self) -> usize {
        self.cells.keys().next_back().map(|col| col + 1).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.values().all(|cell| cell.raw().trim().is_empty())
    }

    /// Displayed text of a cell.
    pub fn text(&self, col: usize) -> Option<String> {
        self.cell(col).map(|cell| cell.to_string())
    }

    /// Displayed text of every column, blank where no cell is stored.
    pub fn texts(&self) -> Vec<String> {
        (0..self.len()).map(|col| self.text(col).unwrap_or_default()).collect()
    }

    fn convert<T>(&self, col: usize, expected: &'static str, convert: impl Fn(&Cell) -> Option<T>) -> Result<Option<T>, SpreadsheetError> {
        let Some(cell) = self.cell(col) else {
            return Ok(None);
        };
        convert(cell).map(Some).ok_or_else(|| SpreadsheetError::CellValueError {
            sheet: self.sheet.to_string(),
            reference: cell.reference(),
            expected,
            value: cell.raw().to_owned(),
        })
    }

    pub fn number(&self, col: usize) -> Result<Option<f64>, SpreadsheetError> {
        self.convert(col, "number", Cell::to_double)
    }

    pub fn integer(&self, col: usize) -> Result<Option<i64>, SpreadsheetError> {
        self.convert(col, "integer", Cell::to_bigint)
    }

    pub fn boolean(&self, col: usize) -> Result<Option<bool>, SpreadsheetError> {
        self.convert(col, "boolean", Cell::to_boolean)
    }

    pub fn date(&self, col: usize) -> Result<Option<NaiveDate>, SpreadsheetError> {
        self.convert(col, "date", Cell::to_date)
    }

    pub fn datetime(&self, col: usize) -> Result<Option<NaiveDateTime>, SpreadsheetError> {
        self.convert(col, "datetime", Cell::to_datetime)
    }
}

/// Maps a row onto a record.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self, Html2SheetError>;
}

impl FromRow for Vec<String> {
    fn from_row(row: &Row) -> Result<Self, Html2SheetError> {
        Ok(row.texts())
    }
}

impl FromRow for Vec<Option<String>> {
    fn from_row(row: &Row) -> Result<Self, Html2SheetError> {
        Ok((0..row.len()).map(|col| row.text(col)).collect())
    }
}

type RowFilter = Box<dyn Fn(&Row) -> bool + Send + Sync>;
type RecordFilter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Reads one sheet into records of type `T`.
pub struct SheetReader<T> {
    selector: SheetSelector,
    range: Option<Range>,
    skip_empty_rows: bool,
    row_filter: Option<RowFilter>,
    record_filter: Option<RecordFilter<T>>,
}

impl<T> Default for SheetReader<T> {
    fn default() -> Self {
        SheetReader { selector: SheetSelector::default(), range: None, skip_empty_rows: false, row_filter: None, record_filter: None }
    }
}

impl<T: FromRow> SheetReader<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet(mut self, selector: SheetSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Restricts reading to an Excel-style range such as `A2:D` or `3:100`.
    pub fn range(mut self, range: &str) -> Result<Self, Html2SheetError> {
        self.range = Some(Range::try_from(range)?);
        Ok(self)
    }

    pub fn skip_empty_rows(mut self, skip: bool) -> Self {
        self.skip_empty_rows = skip;
        self
    }

    /// Skips rows failing `filter`, before they are mapped.
    pub fn row_filter<F: Fn(&Row) -> bool + Send + Sync + 'static>(mut self, filter: F) -> Self {
        self.row_filter = Some(Box::new(filter));
        self
    }

    /// Rejects mapped records failing `filter`.
    pub fn record_filter<F: Fn(&T) -> bool + Send + Sync + 'static>(mut self, filter: F) -> Self {
        self.record_filter = Some(Box::new(filter));
        self
    }

    pub fn read<P: AsRef<Path>>(&self, path: P) -> Result<Vec<T>, Html2SheetError> {
        let mut workbook = XlsxWorkbook::open(path)?;
        self.read_workbook(&mut workbook)
    }

    pub fn read_from<R: Read + Seek>(&self, reader: R) -> Result<Vec<T>, Html2SheetError> {
        let mut workbook = XlsxWorkbook::new(reader)?;
        self.read_workbook(&mut workbook)
    }

    pub fn read_workbook<R: Read + Seek>(&self, workbook: &mut XlsxWorkbook<R>) -> Result<Vec<T>, Html2SheetError> {
        let mut records = Vec::new();
        self.read_workbook_with(workbook, |record| {
            records.push(record);
            true
        })?;
        Ok(records)
    }

    /// Hands each accepted record to `consume`; returning `false` stops reading.
    pub fn read_with<P, F>(&self, path: P, consume: F) -> Result<(), Html2SheetError>
    where
        P: AsRef<Path>,
        F: FnMut(T) -> bool,
    {
        let mut workbook = XlsxWorkbook::open(path)?;
        self.read_workbook_with(&mut workbook, consume)
    }

    pub fn read_workbook_with<R, F>(&self, workbook: &mut XlsxWorkbook<R>, mut consume: F) -> Result<(), Html2SheetError>
    where
        R: Read + Seek,
        F: FnMut(T) -> bool,
    {
        let upper = self.range.and_then(|range| range.row_upper_bound);
        workbook.read_rows(&self.selector, |mut row| {
            if upper.map(|upper| row.index > upper).unwrap_or(false) {
                return Ok(false);
            }
            if let Some(range) = &self.range {
                if !range.contains_row(row.index) {
                    return Ok(true);
                }
                row.cells.retain(|col, _| range.contains_col(*col));
                // Columns keep their sheet positions relative to the range start.
                if let Some(first) = range.col_lower_bound.filter(|first| *first > 0) {
                    row.cells = std::mem::take(&mut row.cells)
                        .into_values()
                        .map(|cell| {
                            let col = cell.col - first;
                            (col, cell.moved(cell.row, col))
                        })
                        .collect();
                }
            }
            if self.skip_empty_rows && row.is_empty() {
                return Ok(true);
            }
            if let Some(filter) = &self.row_filter {
                if !filter(&row) {
                    return Ok(true);
                }
            }
            let record = T::from_row(&row)?;
            if let Some(filter) = &self.record_filter {
                if !filter(&record) {
                    return Ok(true);
                }
            }
            Ok(consume(record))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[(usize, CellType, &str)]) -> Row {
        let mut row = Row::new(Arc::from("Data"), 4);
        row.extend(cells.iter().map(|(col, kind, value)| Cell::new(4, *col, *kind, *value)));
        row
    }

    #[test]
    fn typed_accessors_name_the_failing_cell() {
        let row = row(&[(0, CellType::Number, "12"), (1, CellType::Text, "twelve"), (3, CellType::Boolean, "0")]);
        assert_eq!(row.integer(0), Ok(Some(12)));
        assert_eq!(row.number(2), Ok(None));
        assert_eq!(row.boolean(3), Ok(Some(false)));
        assert_eq!(
            row.number(1),
            Err(SpreadsheetError::CellValueError {
                sheet: "Data".to_owned(),
                reference: "B5".to_owned(),
                expected: "number",
                value: "twelve".to_owned(),
            })
        );
        assert_eq!(row.texts(), vec!["12", "twelve", "", "false"]);
        assert_eq!(Vec::<Option<String>>::from_row(&row).unwrap()[2], None);
    }

    #[test]
    fn blank_rows_are_empty() {
        assert!(row(&[]).is_empty());
        assert!(row(&[(2, CellType::Text, "  ")]).is_empty());
        assert!(!row(&[(2, CellType::Number, "0")]).is_empty());
    }

    #[test]
    fn selectors_describe_themselves() {
        assert_eq!(SheetSelector::default().to_string(), "#0");
        assert_eq!(SheetSelector::Name("Q1".into()).to_string(), "'Q1'");
        assert_eq!(SheetSelector::pattern("Q*").unwrap().to_string(), "matching 'Q*'");
        assert!(SheetSelector::pattern("[").is_err());
    }
}
