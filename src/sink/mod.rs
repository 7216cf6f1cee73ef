//! # Workbook Sinks
//!
//! Output side of the converter. A [`WorkbookSink`] receives sheets, rows, typed cells,
//! merge regions, validations, column widths and freeze panes, in that order per sheet.
//! Rows arrive in ascending order and cells within a row in ascending column order, which
//! lets write-only sinks stream straight to disk.
use crate::error::Html2SheetError;
use crate::table::style::CellStyle;
use chrono::NaiveDateTime;
use std::sync::Arc;
use thiserror::Error;

pub mod memory;
pub mod styles;
pub mod xlsx;

pub use memory::MemorySink;
pub use xlsx::StreamingXlsxSink;

/// Output format, fixing the per-sheet row and column ceilings.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum SheetFormat {
    /// Legacy binary workbook
    Xls,
    /// XML-zip workbook held in memory
    #[default]
    Xlsx,
    /// Disk-backed write-only XML-zip workbook
    StreamingXlsx,
}

impl SheetFormat {
    /// Row ceiling of one sheet.
    pub const fn max_rows(&self) -> usize {
        match self {
            SheetFormat::Xls => 65_536,
            SheetFormat::Xlsx | SheetFormat::StreamingXlsx => 1_048_576,
        }
    }

    /// Column ceiling of one sheet.
    pub const fn max_columns(&self) -> usize {
        match self {
            SheetFormat::Xls => 256,
            SheetFormat::Xlsx | SheetFormat::StreamingXlsx => 16_384,
        }
    }

    /// Whether the sink can measure written content for native auto-sizing.
    pub const fn supports_native_auto_size(&self) -> bool {
        !matches!(self, SheetFormat::StreamingXlsx)
    }

    pub const fn extension(&self) -> &'static str {
        match self {
            SheetFormat::Xls => "xls",
            SheetFormat::Xlsx | SheetFormat::StreamingXlsx => "xlsx",
        }
    }
}

/// Errors raised by sinks.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Operation '{operation}' is not supported by the {format:?} sink")]
    UnsupportedOperation { operation: &'static str, format: SheetFormat },

    #[error("Writing {0:?} files is not supported")]
    UnsupportedFormat(SheetFormat),

    #[error("No sheet has been created")]
    NoSheet,

    #[error("Row {row} arrived after row {current}")]
    RowOutOfOrder { row: usize, current: usize },

    #[error("Cell at row {row}, column {col} arrived after column {current}")]
    CellOutOfOrder { row: usize, col: usize, current: usize },

    #[error("Sink is closed")]
    Closed,
}

/// Typed cell value.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum CellValue {
    /// Placeholder inside a merge region or an empty cell
    #[default]
    Blank,
    Text(String),
    Number(f64),
    Boolean(bool),
    Date(NaiveDateTime),
    /// Formula without the leading `=`, with an optional cached text result
    Formula { formula: String, cached: Option<String> },
}

impl CellValue {
    /// Text shown for the value, used for measuring and for replay into other sinks.
    pub fn display(&self) -> String {
        match self {
            CellValue::Blank => String::new(),
            CellValue::Text(text) => text.to_owned(),
            CellValue::Number(number) => number.to_string(),
            CellValue::Boolean(value) => if *value { "TRUE" } else { "FALSE" }.to_owned(),
            CellValue::Date(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            CellValue::Formula { formula, cached } => cached.clone().unwrap_or_else(|| format!("={formula}")),
        }
    }
}

/// Inclusive rectangle of merged cells, 0-based.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MergeRegion {
    pub first_row: usize,
    pub last_row: usize,
    pub first_col: usize,
    pub last_col: usize,
}

impl MergeRegion {
    pub fn contains(&self, row: usize, col: usize) -> bool {
        (self.first_row..=self.last_row).contains(&row) && (self.first_col..=self.last_col).contains(&col)
    }
}

/// Frozen leading columns and rows.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FreezePane {
    pub col_split: usize,
    pub row_split: usize,
}

/// Abstract workbook output.
///
/// The cell style is passed along with each cell; `None` means the default style.
pub trait WorkbookSink: Send {
    fn format(&self) -> SheetFormat;

    /// Starts a new sheet; following calls address it.
    fn create_sheet(&mut self, name: &str) -> Result<(), Html2SheetError>;

    /// Starts a row. Hidden rows keep their index but render with zero height.
    fn create_row(&mut self, row: usize, height: Option<f64>, hidden: bool) -> Result<(), Html2SheetError>;

    fn create_cell(
        &mut self,
        row: usize,
        col: usize,
        value: CellValue,
        style: Option<Arc<CellStyle>>,
    ) -> Result<(), Html2SheetError>;

    fn add_merge_region(&mut self, region: MergeRegion) -> Result<(), Html2SheetError>;

    /// Restricts a cell to a list of choices.
    fn add_dropdown(&mut self, row: usize, col: usize, options: &[String]) -> Result<(), Html2SheetError>;

    /// Sets a column width in character units.
    fn set_column_width(&mut self, col: usize, width: f64) -> Result<(), Html2SheetError>;

    /// Sizes a column from its written content.
    fn auto_size_column(&mut self, col: usize) -> Result<(), Html2SheetError> {
        let _ = col;
        Err(SinkError::UnsupportedOperation { operation: "auto_size_column", format: self.format() })?
    }

    fn create_freeze_pane(&mut self, pane: FreezePane) -> Result<(), Html2SheetError>;

    /// Finishes the workbook. No other call is valid afterwards.
    fn close(&mut self) -> Result<(), Html2SheetError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn format_ceilings() {
        assert_eq!(SheetFormat::Xls.max_rows(), 65_536);
        assert_eq!(SheetFormat::Xlsx.max_rows(), 1_048_576);
        assert_eq!(SheetFormat::StreamingXlsx.max_columns(), 16_384);
        assert!(SheetFormat::Xlsx.supports_native_auto_size());
        assert!(!SheetFormat::StreamingXlsx.supports_native_auto_size());
    }

    #[test]
    fn displayed_values() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(8, 30, 0).unwrap();
        assert_eq!(CellValue::Number(1.5).display(), "1.5");
        assert_eq!(CellValue::Number(3.0).display(), "3");
        assert_eq!(CellValue::Boolean(true).display(), "TRUE");
        assert_eq!(CellValue::Date(date).display(), "2024-05-01 08:30:00");
        let formula = CellValue::Formula { formula: "SUM(A1:A2)".into(), cached: None };
        assert_eq!(formula.display(), "=SUM(A1:A2)");
    }

    #[test]
    fn merge_regions_are_inclusive() {
        let region = MergeRegion { first_row: 1, last_row: 2, first_col: 0, last_col: 2 };
        assert!(region.contains(1, 0));
        assert!(region.contains(2, 2));
        assert!(!region.contains(3, 0));
        assert!(!region.contains(0, 1));
    }
}
