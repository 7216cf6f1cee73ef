use rusty_html2sheet::error::Html2SheetError;
use rusty_html2sheet::sink::CellValue;
use rusty_html2sheet::sink::FreezePane;
use rusty_html2sheet::sink::MergeRegion;
use rusty_html2sheet::table::style::CellStyle;
use rusty_html2sheet::table::Tr;
use rusty_html2sheet::BuildConfig;
use rusty_html2sheet::SheetFormat;
use rusty_html2sheet::WorkbookBuilder;
use rusty_html2sheet::WorkbookSink;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Keeps per-sheet counts instead of cells.
#[derive(Default)]
struct CountingSink {
    sheets: Vec<SheetCount>,
}

#[derive(Default)]
struct SheetCount {
    name: String,
    rows: usize,
    last_row: Option<usize>,
    first_value: Option<String>,
    widths: BTreeMap<usize, f64>,
}

impl CountingSink {
    fn sheet(&mut self) -> &mut SheetCount {
        self.sheets.last_mut().expect("a sheet is open")
    }
}

impl WorkbookSink for CountingSink {
    fn format(&self) -> SheetFormat {
        SheetFormat::StreamingXlsx
    }

    fn create_sheet(&mut self, name: &str) -> Result<(), Html2SheetError> {
        self.sheets.push(SheetCount { name: name.to_owned(), ..SheetCount::default() });
        Ok(())
    }

    fn create_row(&mut self, row: usize, _: Option<f64>, _: bool) -> Result<(), Html2SheetError> {
        let sheet = self.sheet();
        assert!(sheet.last_row.map(|last| row > last).unwrap_or(true), "rows arrive in order");
        sheet.rows += 1;
        sheet.last_row = Some(row);
        Ok(())
    }

    fn create_cell(&mut self, _: usize, _: usize, value: CellValue, _: Option<Arc<CellStyle>>) -> Result<(), Html2SheetError> {
        let sheet = self.sheet();
        if sheet.first_value.is_none() {
            sheet.first_value = Some(value.display());
        }
        Ok(())
    }

    fn add_merge_region(&mut self, _: MergeRegion) -> Result<(), Html2SheetError> {
        Ok(())
    }

    fn add_dropdown(&mut self, _: usize, _: usize, _: &[String]) -> Result<(), Html2SheetError> {
        Ok(())
    }

    fn set_column_width(&mut self, col: usize, width: f64) -> Result<(), Html2SheetError> {
        self.sheet().widths.insert(col, width);
        Ok(())
    }

    fn create_freeze_pane(&mut self, _: FreezePane) -> Result<(), Html2SheetError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), Html2SheetError> {
        Ok(())
    }
}

const ROWS: usize = 1_200_000;
const BATCH: usize = 10_000;
const CEILING: usize = 1_048_576;

#[test]
fn streamed_rows_spill_at_the_format_ceiling() {
    let config = BuildConfig::builder()
        .format(SheetFormat::StreamingXlsx)
        .sheet_name("Export")
        .build()
        .unwrap();
    let pipeline = WorkbookBuilder::new(config).stream(CountingSink::default()).unwrap();
    for start in (0..ROWS).step_by(BATCH) {
        let batch = (start..(start + BATCH).min(ROWS))
            .map(|index| {
                let value = if index == 0 { "a considerably wider first value" } else { "v" };
                Tr::from_values(index, [value])
            })
            .collect();
        pipeline.append(batch).unwrap();
    }
    let sink = pipeline.build().unwrap();

    assert_eq!(sink.sheets.len(), 2);
    let (first, second) = (&sink.sheets[0], &sink.sheets[1]);
    assert_eq!((first.name.as_str(), second.name.as_str()), ("Export", "Export (2)"));
    assert_eq!(first.rows, CEILING);
    assert_eq!(first.last_row, Some(CEILING - 1));
    assert_eq!(second.rows, ROWS - CEILING);
    assert_eq!(second.last_row, Some(ROWS - CEILING - 1));
    assert_eq!(second.first_value.as_deref(), Some("v"));

    // Width tracking restarts with each sheet.
    assert_eq!(first.widths.get(&0), Some(&18.0));
    assert_eq!(second.widths.get(&0), Some(&3.0));
}

#[test]
fn direct_builds_spill_at_a_configured_capacity() {
    let rows = (0..25).map(|index| format!("<tr><td>{index}</td></tr>")).collect::<String>();
    let html = format!("<table><caption>Numbers</caption>{rows}</table>");
    let config = BuildConfig::builder().sheet_capacity(10).build().unwrap();
    let sink = WorkbookBuilder::new(config).build_html(&html, CountingSink::default()).unwrap();
    let counts = sink.sheets.iter().map(|sheet| (sheet.name.as_str(), sheet.rows)).collect::<Vec<_>>();
    assert_eq!(counts, [("Numbers", 10), ("Numbers (2)", 10), ("Numbers (3)", 5)]);
    assert_eq!(sink.sheets[1].first_value.as_deref(), Some("10"));
}
