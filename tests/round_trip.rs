use pretty_assertions::assert_eq;
use rusty_html2sheet::reader::SheetReader;
use rusty_html2sheet::reader::SheetSelector;
use rusty_html2sheet::reader::XlsxWorkbook;
use rusty_html2sheet::sink::memory::MemorySink;
use rusty_html2sheet::sink::StreamingXlsxSink;
use rusty_html2sheet::BuildConfig;
use rusty_html2sheet::SheetFormat;
use rusty_html2sheet::WorkbookBuilder;
use std::io::Cursor;

const MERGED: &str = r#"
<table>
  <caption>Merged</caption>
  <tr><td rowspan="2" colspan="3">Total</td><td>x</td></tr>
  <tr><td>y</td></tr>
</table>"#;

fn expected() -> Vec<Vec<String>> {
    [["Total", "Total", "Total", "x"], ["Total", "Total", "Total", "y"]]
        .iter()
        .map(|row| row.iter().map(|text| text.to_string()).collect())
        .collect()
}

#[test]
fn merged_ranges_read_back_as_their_anchor_from_a_streamed_file() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("merged.xlsx");
    let config = BuildConfig::builder().format(SheetFormat::StreamingXlsx).build().unwrap();
    WorkbookBuilder::new(config)
        .build_html(MERGED, StreamingXlsxSink::create(&path).unwrap())
        .unwrap();

    let records = SheetReader::<Vec<String>>::new()
        .sheet(SheetSelector::Name("Merged".into()))
        .read(&path)
        .unwrap();
    assert_eq!(records, expected());

    let mut workbook = XlsxWorkbook::open(&path).unwrap();
    let ranges = workbook.merged_ranges(&SheetSelector::default()).unwrap();
    assert_eq!(ranges.len(), 1);
    assert_eq!((ranges[0].last_row, ranges[0].last_col), (1, 2));
}

#[test]
fn merged_ranges_read_back_from_an_in_memory_workbook() {
    let sink = WorkbookBuilder::default().build_html(MERGED, MemorySink::default()).unwrap();
    let bytes = sink.write_to(Cursor::new(Vec::new())).unwrap().into_inner();
    let records = SheetReader::<Vec<String>>::new().read_from(Cursor::new(bytes)).unwrap();
    assert_eq!(records, expected());
}

#[test]
fn filters_and_typed_values_survive_the_round_trip() {
    let html = r#"
    <table>
      <tr><th>Name</th><th>Score</th><th>Passed</th><th>Date</th></tr>
      <tr><td>Ann</td><td>91.5</td><td>true</td><td date-format="yyyy-mm-dd">2024-03-01</td></tr>
      <tr><td>Bob</td><td>47</td><td>false</td><td date-format="">2024-03-02</td></tr>
      <tr><td></td></tr>
      <tr><td>Cy</td><td string>007</td><td>true</td><td date-format="yyyy-mm-dd">2024-03-03</td></tr>
    </table>"#;
    let bytes = WorkbookBuilder::default()
        .build_html(html, MemorySink::default())
        .unwrap()
        .write_to(Cursor::new(Vec::new()))
        .unwrap()
        .into_inner();

    let mut workbook = XlsxWorkbook::new(Cursor::new(bytes.clone())).unwrap();
    let rows = workbook.rows(&SheetSelector::default()).unwrap();
    assert_eq!(rows[1].number(1).unwrap(), Some(91.5));
    assert_eq!(rows[1].boolean(2).unwrap(), Some(true));
    assert_eq!(rows[1].date(3).unwrap(), chrono::NaiveDate::from_ymd_opt(2024, 3, 1));
    assert_eq!(rows[2].integer(1).unwrap(), Some(47));
    assert_eq!(rows[4].text(1).as_deref(), Some("007"));
    assert!(rows[1].integer(0).is_err());

    let names = SheetReader::<Vec<String>>::new()
        .row_filter(|row| row.index > 0)
        .skip_empty_rows(true)
        .record_filter(|record| record.get(2).map(|passed| passed == "true").unwrap_or(false))
        .read_from(Cursor::new(bytes.clone()))
        .unwrap()
        .into_iter()
        .map(|record| record[0].clone())
        .collect::<Vec<_>>();
    assert_eq!(names, ["Ann", "Cy"]);

    let mut first = Vec::new();
    let reader = SheetReader::<Vec<String>>::new().range("A2:B").unwrap();
    let mut workbook = XlsxWorkbook::new(Cursor::new(bytes)).unwrap();
    reader
        .read_workbook_with(&mut workbook, |record| {
            first.push(record);
            false
        })
        .unwrap();
    assert_eq!(first, vec![vec!["Ann".to_string(), "91.5".to_string()]]);
}
