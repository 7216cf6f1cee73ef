//! In-memory workbook sink.
use crate::error::Html2SheetError;
use crate::sink::xlsx::StreamingXlsxSink;
use crate::sink::CellValue;
use crate::sink::FreezePane;
use crate::sink::MergeRegion;
use crate::sink::SheetFormat;
use crate::sink::SinkError;
use crate::sink::WorkbookSink;
use crate::table::style::CellStyle;
use crate::table::width::display_width;
use crate::table::width::MAX_COLUMN_WIDTH;
use std::collections::BTreeMap;
use std::io::Seek;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// A stored cell.
#[derive(Clone, Debug, PartialEq)]
pub struct CellData {
    pub value: CellValue,
    pub style: Option<Arc<CellStyle>>,
}

/// A stored row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowData {
    pub height: Option<f64>,
    pub hidden: bool,
    pub cells: BTreeMap<usize, CellData>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Worksheet {
    pub name: String,
    pub rows: BTreeMap<usize, RowData>,
    pub merges: Vec<MergeRegion>,
    pub dropdowns: Vec<(usize, usize, Vec<String>)>,
    pub widths: BTreeMap<usize, f64>,
    pub pane: Option<FreezePane>,
}

impl Worksheet {
    pub fn cell(&self, row: usize, col: usize) -> Option<&CellData> {
        self.rows.get(&row)?.cells.get(&col)
    }

    pub fn value(&self, row: usize, col: usize) -> Option<&CellValue> {
        self.cell(row, col).map(|cell| &cell.value)
    }

    /// Number of rows up to the last created one.
    pub fn row_count(&self) -> usize {
        self.rows.keys().next_back().map(|row| row + 1).unwrap_or(0)
    }

    /// Displayed text of a row, blank for missing cells.
    pub fn row_text(&self, row: usize) -> Vec<String> {
        let Some(data) = self.rows.get(&row) else {
            return Vec::new();
        };
        let width = data.cells.keys().next_back().map(|col| col + 1).unwrap_or(0);
        (0..width)
            .map(|col| data.cells.get(&col).map(|cell| cell.value.display()).unwrap_or_default())
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Workbook {
    pub sheets: Vec<Worksheet>,
}

impl Workbook {
    pub fn sheet(&self, name: &str) -> Option<&Worksheet> {
        self.sheets.iter().find(|sheet| sheet.name == name)
    }

    /// Writes every sheet into another sink, in creation order. The target is not closed.
    pub fn replay<S: WorkbookSink + ?Sized>(&self, sink: &mut S) -> Result<(), Html2SheetError> {
        for sheet in &self.sheets {
            sink.create_sheet(&sheet.name)?;
            for (index, row) in &sheet.rows {
                sink.create_row(*index, row.height, row.hidden)?;
                for (col, cell) in &row.cells {
                    sink.create_cell(*index, *col, cell.value.clone(), cell.style.clone())?;
                }
            }
            for region in &sheet.merges {
                sink.add_merge_region(*region)?;
            }
            for (row, col, options) in &sheet.dropdowns {
                sink.add_dropdown(*row, *col, options)?;
            }
            for (col, width) in &sheet.widths {
                sink.set_column_width(*col, *width)?;
            }
            if let Some(pane) = sheet.pane {
                sink.create_freeze_pane(pane)?;
            }
        }
        Ok(())
    }
}

/// Sink keeping the whole workbook in memory. Supports native auto-sizing.
#[derive(Debug, Default)]
pub struct MemorySink {
    format: SheetFormat,
    workbook: Workbook,
    closed: bool,
}

impl MemorySink {
    /// A sink enforcing the ceilings of `format`.
    pub fn new(format: SheetFormat) -> Self {
        MemorySink { format, ..MemorySink::default() }
    }

    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    pub fn into_workbook(self) -> Workbook {
        self.workbook
    }

    /// Saves the workbook as `.xlsx`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Html2SheetError> {
        let mut sink = StreamingXlsxSink::create(path)?;
        self.workbook.replay(&mut sink)?;
        sink.close()
    }

    /// Writes the workbook as `.xlsx` into `writer` and hands it back.
    pub fn write_to<W: Write + Seek + Send>(&self, writer: W) -> Result<W, Html2SheetError> {
        let mut sink = StreamingXlsxSink::new(writer);
        self.workbook.replay(&mut sink)?;
        sink.close()?;
        Ok(sink.into_inner().ok_or(SinkError::Closed)?)
    }

    fn sheet(&mut self) -> Result<&mut Worksheet, Html2SheetError> {
        if self.closed {
            Err(SinkError::Closed)?;
        }
        Ok(self.workbook.sheets.last_mut().ok_or(SinkError::NoSheet)?)
    }
}

impl WorkbookSink for MemorySink {
    fn format(&self) -> SheetFormat {
        self.format
    }

    fn create_sheet(&mut self, name: &str) -> Result<(), Html2SheetError> {
        if self.closed {
            Err(SinkError::Closed)?;
        }
        self.workbook.sheets.push(Worksheet { name: name.to_owned(), ..Worksheet::default() });
        Ok(())
    }

    fn create_row(&mut self, row: usize, height: Option<f64>, hidden: bool) -> Result<(), Html2SheetError> {
        let data = self.sheet()?.rows.entry(row).or_default();
        data.height = height;
        data.hidden = hidden;
        Ok(())
    }

    fn create_cell(
        &mut self,
        row: usize,
        col: usize,
        value: CellValue,
        style: Option<Arc<CellStyle>>,
    ) -> Result<(), Html2SheetError> {
        self.sheet()?
            .rows
            .entry(row)
            .or_default()
            .cells
            .insert(col, CellData { value, style });
        Ok(())
    }

    fn add_merge_region(&mut self, region: MergeRegion) -> Result<(), Html2SheetError> {
        self.sheet()?.merges.push(region);
        Ok(())
    }

    fn add_dropdown(&mut self, row: usize, col: usize, options: &[String]) -> Result<(), Html2SheetError> {
        self.sheet()?.dropdowns.push((row, col, options.to_vec()));
        Ok(())
    }

    fn set_column_width(&mut self, col: usize, width: f64) -> Result<(), Html2SheetError> {
        self.sheet()?.widths.insert(col, width);
        Ok(())
    }

    fn auto_size_column(&mut self, col: usize) -> Result<(), Html2SheetError> {
        if !self.format.supports_native_auto_size() {
            Err(SinkError::UnsupportedOperation { operation: "auto_size_column", format: self.format })?;
        }
        let sheet = self.sheet()?;
        let widest = sheet
            .rows
            .values()
            .filter_map(|row| row.cells.get(&col))
            .map(|cell| display_width(&cell.value.display()))
            .max()
            .unwrap_or(0);
        if widest > 0 {
            sheet.widths.insert(col, (widest + 1).min(MAX_COLUMN_WIDTH) as f64);
        }
        Ok(())
    }

    fn create_freeze_pane(&mut self, pane: FreezePane) -> Result<(), Html2SheetError> {
        self.sheet()?.pane = Some(pane);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Html2SheetError> {
        if self.closed {
            Err(SinkError::Closed)?;
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn stores_cells_by_position() {
        let mut sink = MemorySink::default();
        assert!(sink.create_row(0, None, false).is_err());
        sink.create_sheet("S").unwrap();
        sink.create_row(0, Some(18.0), false).unwrap();
        sink.create_cell(0, 2, CellValue::Text("c".into()), None).unwrap();
        sink.create_cell(0, 0, CellValue::Number(2.0), None).unwrap();
        let sheet = &sink.workbook().sheets[0];
        assert_eq!(sheet.row_text(0), vec!["2", "", "c"]);
        assert_eq!(sheet.rows[&0].height, Some(18.0));
        assert_eq!(sheet.row_count(), 1);
    }

    #[test]
    fn native_auto_size_measures_stored_text() {
        let mut sink = MemorySink::default();
        sink.create_sheet("S").unwrap();
        sink.create_cell(0, 0, CellValue::Text("ABCDEF".into()), None).unwrap();
        sink.create_cell(1, 0, CellValue::Text("ab".into()), None).unwrap();
        sink.auto_size_column(0).unwrap();
        assert_eq!(sink.workbook().sheets[0].widths.get(&0), Some(&7.0));

        let mut streaming = MemorySink::new(SheetFormat::StreamingXlsx);
        streaming.create_sheet("S").unwrap();
        assert!(streaming.auto_size_column(0).is_err());
    }

    #[test]
    fn replays_into_an_xlsx_package() {
        let mut sink = MemorySink::default();
        sink.create_sheet("S").unwrap();
        sink.create_row(3, None, true).unwrap();
        sink.create_cell(3, 1, CellValue::Boolean(false), None).unwrap();
        sink.close().unwrap();
        assert!(sink.create_sheet("late").is_err());
        let bytes = sink.write_to(Cursor::new(Vec::new())).unwrap().into_inner();
        assert!(!bytes.is_empty());
    }
}
