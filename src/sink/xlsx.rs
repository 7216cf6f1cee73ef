//! Disk-backed, write-only XLSX sink.
//!
//! Rows are spooled as `<row>` XML into an anonymous temporary file per sheet. When the
//! next sheet starts, or the sink closes, the sheet part is assembled into the zip in
//! schema order: dimension, sheet views (frozen pane), column widths, the spooled rows,
//! merge cells and data validations. Memory use is bounded by the per-sheet metadata,
//! never by the number of rows.
use crate::error::Html2SheetError;
use crate::helpers::xml::XmlPartWriter;
use crate::helpers::zip::ZipWriterHelper;
use crate::reader::reference::index_to_reference;
use crate::sink::styles::StyleRegistry;
use crate::sink::CellValue;
use crate::sink::FreezePane;
use crate::sink::MergeRegion;
use crate::sink::SheetFormat;
use crate::sink::SinkError;
use crate::sink::WorkbookSink;
use crate::table::style::CellStyle;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::Timelike;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use zip::ZipWriter;

const MAIN_NAMESPACE: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const RELATIONSHIP_NAMESPACE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PACKAGE_RELATIONSHIP_NAMESPACE: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const CONTENT_TYPES_NAMESPACE: &str = "http://schemas.openxmlformats.org/package/2006/content-types";
const OFFICE_DOCUMENT_TYPE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const WORKSHEET_TYPE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
const STYLES_TYPE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";

/// Converts a timestamp to a 1900-system serial number, keeping the Lotus 1-2-3
/// leap-day numbering for dates before March 1900.
pub(crate) fn to_serial(datetime: &NaiveDateTime) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30).expect("NaiveDate Literal");
    let days = (datetime.date() - epoch).num_days();
    let days = if days < 61 { days - 1 } else { days };
    let time = datetime.time();
    let seconds = time.num_seconds_from_midnight() as f64 + time.nanosecond() as f64 / 1e9;
    days as f64 + seconds / 86_400.0
}

/// Rows and metadata of the sheet being written.
struct SheetSpool {
    rows: XmlPartWriter<BufWriter<File>>,
    open_row: Option<usize>,
    last_row: Option<usize>,
    last_col: Option<usize>,
    max_row: usize,
    max_col: usize,
    widths: BTreeMap<usize, f64>,
    merges: Vec<MergeRegion>,
    dropdowns: Vec<(usize, usize, Vec<String>)>,
    pane: Option<FreezePane>,
}

impl SheetSpool {
    fn new() -> Result<Self, Html2SheetError> {
        let file = tempfile::tempfile()?;
        Ok(SheetSpool {
            rows: XmlPartWriter::new(BufWriter::new(file)),
            open_row: None,
            last_row: None,
            last_col: None,
            max_row: 0,
            max_col: 0,
            widths: BTreeMap::new(),
            merges: Vec::new(),
            dropdowns: Vec::new(),
            pane: None,
        })
    }

    fn start_row(&mut self, row: usize, height: Option<f64>, hidden: bool) -> Result<(), Html2SheetError> {
        if let Some(current) = self.last_row.filter(|current| row <= *current) {
            Err(SinkError::RowOutOfOrder { row, current })?;
        }
        self.close_row()?;
        let number = (row + 1).to_string();
        let height = height.map(|height| height.to_string());
        let mut attributes = vec![("r", number.as_str())];
        if let Some(height) = &height {
            attributes.push(("ht", height.as_str()));
            attributes.push(("customHeight", "1"));
        }
        if hidden {
            attributes.push(("hidden", "1"));
        }
        self.rows.start("row", &attributes)?;
        self.open_row = Some(row);
        self.last_row = Some(row);
        self.last_col = None;
        self.max_row = self.max_row.max(row);
        Ok(())
    }

    fn close_row(&mut self) -> Result<(), Html2SheetError> {
        if self.open_row.take().is_some() {
            self.rows.end("row")?;
        }
        Ok(())
    }

    fn write_cell(&mut self, row: usize, col: usize, value: CellValue, style: Option<usize>) -> Result<(), Html2SheetError> {
        if self.open_row != Some(row) {
            self.start_row(row, None, false)?;
        }
        if let Some(current) = self.last_col.filter(|current| col <= *current) {
            Err(SinkError::CellOutOfOrder { row, col, current })?;
        }
        self.last_col = Some(col);
        self.max_col = self.max_col.max(col);

        let reference = index_to_reference(row, col);
        let style = style.map(|style| style.to_string());
        let mut attributes = vec![("r", reference.as_str())];
        if let Some(style) = &style {
            attributes.push(("s", style.as_str()));
        }
        let rows = &mut self.rows;
        match value {
            CellValue::Blank => rows.empty("c", &attributes),
            CellValue::Text(text) => {
                attributes.push(("t", "inlineStr"));
                rows.start("c", &attributes)?;
                rows.start("is", &[])?;
                rows.text_element("t", &[("xml:space", "preserve")], &text)?;
                rows.end("is")?;
                rows.end("c")
            }
            CellValue::Number(number) => {
                rows.start("c", &attributes)?;
                rows.text_element("v", &[], &number.to_string())?;
                rows.end("c")
            }
            CellValue::Boolean(value) => {
                attributes.push(("t", "b"));
                rows.start("c", &attributes)?;
                rows.text_element("v", &[], if value { "1" } else { "0" })?;
                rows.end("c")
            }
            CellValue::Date(datetime) => {
                rows.start("c", &attributes)?;
                rows.text_element("v", &[], &to_serial(&datetime).to_string())?;
                rows.end("c")
            }
            CellValue::Formula { formula, cached } => {
                if cached.is_some() {
                    attributes.push(("t", "str"));
                }
                rows.start("c", &attributes)?;
                rows.text_element("f", &[], &formula)?;
                if let Some(cached) = cached {
                    rows.text_element("v", &[], &cached)?;
                }
                rows.end("c")
            }
        }
    }

    /// Writes the complete sheet part, splicing in the spooled rows.
    fn assemble<W: Write>(mut self, part: &mut XmlPartWriter<W>) -> Result<(), Html2SheetError> {
        self.close_row()?;
        let mut spool = self.rows.into_inner().into_inner().map_err(|error| error.into_error())?;
        spool.seek(SeekFrom::Start(0))?;

        part.start("worksheet", &[("xmlns", MAIN_NAMESPACE), ("xmlns:r", RELATIONSHIP_NAMESPACE)])?;
        let dimension = match self.last_row {
            Some(_) => format!("A1:{}", index_to_reference(self.max_row, self.max_col)),
            None => "A1".to_owned(),
        };
        part.empty("dimension", &[("ref", dimension.as_str())])?;

        part.start("sheetViews", &[])?;
        match self.pane.filter(|pane| pane.col_split > 0 || pane.row_split > 0) {
            Some(pane) => {
                part.start("sheetView", &[("workbookViewId", "0")])?;
                let x_split = pane.col_split.to_string();
                let y_split = pane.row_split.to_string();
                let top_left = index_to_reference(pane.row_split, pane.col_split);
                let active = match (pane.col_split > 0, pane.row_split > 0) {
                    (true, true) => "bottomRight",
                    (false, true) => "bottomLeft",
                    _ => "topRight",
                };
                let mut attributes = Vec::new();
                if pane.col_split > 0 {
                    attributes.push(("xSplit", x_split.as_str()));
                }
                if pane.row_split > 0 {
                    attributes.push(("ySplit", y_split.as_str()));
                }
                attributes.extend([("topLeftCell", top_left.as_str()), ("activePane", active), ("state", "frozen")]);
                part.empty("pane", &attributes)?;
                part.end("sheetView")?;
            }
            None => part.empty("sheetView", &[("workbookViewId", "0")])?,
        }
        part.end("sheetViews")?;
        part.empty("sheetFormatPr", &[("defaultRowHeight", "15")])?;

        if !self.widths.is_empty() {
            part.start("cols", &[])?;
            for (col, width) in &self.widths {
                let index = (col + 1).to_string();
                let width = width.to_string();
                part.empty(
                    "col",
                    &[("min", index.as_str()), ("max", index.as_str()), ("width", width.as_str()), ("customWidth", "1")],
                )?;
            }
            part.end("cols")?;
        }

        part.start("sheetData", &[])?;
        std::io::copy(&mut spool, part.inner())?;
        part.end("sheetData")?;

        if !self.merges.is_empty() {
            let count = self.merges.len().to_string();
            part.start("mergeCells", &[("count", count.as_str())])?;
            for region in &self.merges {
                let range = format!(
                    "{}:{}",
                    index_to_reference(region.first_row, region.first_col),
                    index_to_reference(region.last_row, region.last_col)
                );
                part.empty("mergeCell", &[("ref", range.as_str())])?;
            }
            part.end("mergeCells")?;
        }

        let validations = self
            .dropdowns
            .iter()
            .filter_map(|(row, col, options)| Some((index_to_reference(*row, *col), list_formula(options)?)))
            .collect::<Vec<_>>();
        if !validations.is_empty() {
            let count = validations.len().to_string();
            part.start("dataValidations", &[("count", count.as_str())])?;
            for (reference, formula) in &validations {
                part.start(
                    "dataValidation",
                    &[("type", "list"), ("allowBlank", "1"), ("showErrorMessage", "1"), ("sqref", reference.as_str())],
                )?;
                part.text_element("formula1", &[], formula)?;
                part.end("dataValidation")?;
            }
            part.end("dataValidations")?;
        }

        part.end("worksheet")
    }
}

/// Quoted list literal of a list validation. Commas separate the choices, so options
/// containing one cannot be listed and are skipped.
fn list_formula(options: &[String]) -> Option<String> {
    let mut choices = Vec::with_capacity(options.len());
    for option in options {
        if option.contains(',') {
            log::warn!("Skipping dropdown option '{option}': list choices cannot contain commas");
            continue;
        }
        choices.push(option.replace('"', "\"\""));
    }
    if choices.is_empty() {
        return None;
    }
    Some(format!("\"{}\"", choices.join(",")))
}

/// Streaming XLSX writer over any seekable output.
pub struct StreamingXlsxSink<W: Write + Seek + Send> {
    zip: Option<ZipWriter<W>>,
    output: Option<W>,
    styles: StyleRegistry,
    sheets: Vec<String>,
    current: Option<SheetSpool>,
}

impl StreamingXlsxSink<File> {
    /// Creates the output file. Only `.xlsx` output can be written.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, Html2SheetError> {
        let path = path.as_ref();
        if path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case(SheetFormat::Xls.extension()))
        {
            Err(SinkError::UnsupportedFormat(SheetFormat::Xls))?;
        }
        Ok(StreamingXlsxSink::new(File::create(path)?))
    }
}

impl<W: Write + Seek + Send> StreamingXlsxSink<W> {
    pub fn new(writer: W) -> Self {
        StreamingXlsxSink {
            zip: Some(ZipWriter::new(writer)),
            output: None,
            styles: StyleRegistry::new(),
            sheets: Vec::new(),
            current: None,
        }
    }

    /// Names of the sheets created so far.
    pub fn sheet_names(&self) -> &[String] {
        &self.sheets
    }

    /// The finished output, available once the sink is closed.
    pub fn into_inner(self) -> Option<W> {
        self.output
    }

    fn spool(&mut self) -> Result<&mut SheetSpool, Html2SheetError> {
        if self.zip.is_none() {
            Err(SinkError::Closed)?;
        }
        Ok(self.current.as_mut().ok_or(SinkError::NoSheet)?)
    }

    fn finish_sheet(&mut self) -> Result<(), Html2SheetError> {
        let Some(spool) = self.current.take() else {
            return Ok(());
        };
        let zip = self.zip.as_mut().ok_or(SinkError::Closed)?;
        let name = format!("xl/worksheets/sheet{}.xml", self.sheets.len());
        let mut part = zip.xml_part(&name)?;
        spool.assemble(&mut part)?;
        log::debug!("Assembled {name}");
        Ok(())
    }

    fn write_package(&mut self) -> Result<(), Html2SheetError> {
        let zip = self.zip.as_mut().ok_or(SinkError::Closed)?;
        {
            let mut part = zip.xml_part("[Content_Types].xml")?;
            part.start("Types", &[("xmlns", CONTENT_TYPES_NAMESPACE)])?;
            part.empty(
                "Default",
                &[("Extension", "rels"), ("ContentType", "application/vnd.openxmlformats-package.relationships+xml")],
            )?;
            part.empty("Default", &[("Extension", "xml"), ("ContentType", "application/xml")])?;
            part.empty(
                "Override",
                &[
                    ("PartName", "/xl/workbook.xml"),
                    ("ContentType", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"),
                ],
            )?;
            part.empty(
                "Override",
                &[
                    ("PartName", "/xl/styles.xml"),
                    ("ContentType", "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"),
                ],
            )?;
            for index in 1..=self.sheets.len() {
                let name = format!("/xl/worksheets/sheet{index}.xml");
                part.empty(
                    "Override",
                    &[
                        ("PartName", name.as_str()),
                        ("ContentType", "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"),
                    ],
                )?;
            }
            part.end("Types")?;
        }
        {
            let mut part = zip.xml_part("_rels/.rels")?;
            part.start("Relationships", &[("xmlns", PACKAGE_RELATIONSHIP_NAMESPACE)])?;
            part.empty("Relationship", &[("Id", "rId1"), ("Type", OFFICE_DOCUMENT_TYPE), ("Target", "xl/workbook.xml")])?;
            part.end("Relationships")?;
        }
        {
            let mut part = zip.xml_part("xl/workbook.xml")?;
            part.start("workbook", &[("xmlns", MAIN_NAMESPACE), ("xmlns:r", RELATIONSHIP_NAMESPACE)])?;
            part.start("sheets", &[])?;
            for (index, name) in self.sheets.iter().enumerate() {
                let id = (index + 1).to_string();
                let relationship = format!("rId{id}");
                part.empty("sheet", &[("name", name.as_str()), ("sheetId", id.as_str()), ("r:id", relationship.as_str())])?;
            }
            part.end("sheets")?;
            part.end("workbook")?;
        }
        {
            let mut part = zip.xml_part("xl/_rels/workbook.xml.rels")?;
            part.start("Relationships", &[("xmlns", PACKAGE_RELATIONSHIP_NAMESPACE)])?;
            for index in 1..=self.sheets.len() {
                let id = format!("rId{index}");
                let target = format!("worksheets/sheet{index}.xml");
                part.empty("Relationship", &[("Id", id.as_str()), ("Type", WORKSHEET_TYPE), ("Target", target.as_str())])?;
            }
            let id = format!("rId{}", self.sheets.len() + 1);
            part.empty("Relationship", &[("Id", id.as_str()), ("Type", STYLES_TYPE), ("Target", "styles.xml")])?;
            part.end("Relationships")?;
        }
        {
            let mut part = zip.xml_part("xl/styles.xml")?;
            self.styles.write(&mut part)?;
        }
        Ok(())
    }
}

impl<W: Write + Seek + Send> WorkbookSink for StreamingXlsxSink<W> {
    fn format(&self) -> SheetFormat {
        SheetFormat::StreamingXlsx
    }

    fn create_sheet(&mut self, name: &str) -> Result<(), Html2SheetError> {
        if self.zip.is_none() {
            Err(SinkError::Closed)?;
        }
        self.finish_sheet()?;
        self.current = Some(SheetSpool::new()?);
        self.sheets.push(name.to_owned());
        log::debug!("Spooling sheet '{name}'");
        Ok(())
    }

    fn create_row(&mut self, row: usize, height: Option<f64>, hidden: bool) -> Result<(), Html2SheetError> {
        self.spool()?.start_row(row, height, hidden)
    }

    fn create_cell(
        &mut self,
        row: usize,
        col: usize,
        value: CellValue,
        style: Option<Arc<CellStyle>>,
    ) -> Result<(), Html2SheetError> {
        let style = style.map(|style| self.styles.register(&style));
        self.spool()?.write_cell(row, col, value, style)
    }

    fn add_merge_region(&mut self, region: MergeRegion) -> Result<(), Html2SheetError> {
        self.spool()?.merges.push(region);
        Ok(())
    }

    fn add_dropdown(&mut self, row: usize, col: usize, options: &[String]) -> Result<(), Html2SheetError> {
        self.spool()?.dropdowns.push((row, col, options.to_vec()));
        Ok(())
    }

    fn set_column_width(&mut self, col: usize, width: f64) -> Result<(), Html2SheetError> {
        self.spool()?.widths.insert(col, width);
        Ok(())
    }

    fn create_freeze_pane(&mut self, pane: FreezePane) -> Result<(), Html2SheetError> {
        self.spool()?.pane = Some(pane);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Html2SheetError> {
        if self.zip.is_none() {
            Err(SinkError::Closed)?;
        }
        if self.sheets.is_empty() {
            self.create_sheet("Sheet1")?;
        }
        self.finish_sheet()?;
        self.write_package()?;
        if let Some(zip) = self.zip.take() {
            self.output = Some(zip.finish()?);
        }
        log::debug!("Closed workbook with {} sheets and {} cell formats", self.sheets.len(), self.styles.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::zip::ZipHelper;
    use std::io::Cursor;
    use std::io::Read;
    use zip::ZipArchive;

    fn part(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.file(name).unwrap().expect("part exists");
        let mut xml = String::new();
        file.read_to_string(&mut xml).unwrap();
        xml
    }

    #[test]
    fn serial_dates() {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(to_serial(&date(1900, 1, 1)), 1.0);
        assert_eq!(to_serial(&date(1900, 3, 1)), 61.0);
        assert_eq!(to_serial(&date(2024, 1, 1)), 45_292.0);
        let noon = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(to_serial(&noon), 45_292.5);
    }

    #[test]
    fn writes_a_complete_package() {
        let mut sink = StreamingXlsxSink::new(Cursor::new(Vec::new()));
        sink.create_sheet("Data").unwrap();
        sink.create_row(0, Some(20.0), false).unwrap();
        let bold = Arc::new(CellStyle { bold: true, ..CellStyle::default() });
        sink.create_cell(0, 0, CellValue::Text("a < b".into()), Some(bold)).unwrap();
        sink.create_cell(0, 1, CellValue::Number(1.5), None).unwrap();
        sink.create_cell(2, 0, CellValue::Boolean(true), None).unwrap();
        sink.add_merge_region(MergeRegion { first_row: 0, last_row: 1, first_col: 1, last_col: 2 }).unwrap();
        sink.add_dropdown(2, 0, &["x".to_owned(), "y".to_owned()]).unwrap();
        sink.set_column_width(0, 12.0).unwrap();
        sink.create_freeze_pane(FreezePane { col_split: 0, row_split: 1 }).unwrap();
        sink.create_sheet("More").unwrap();
        sink.close().unwrap();
        assert_eq!(sink.sheet_names(), ["Data", "More"]);
        let bytes = sink.into_inner().unwrap().into_inner();

        let sheet = part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains(r#"<dimension ref="A1:B3"/>"#));
        assert!(sheet.contains(r#"<pane ySplit="1" topLeftCell="A2" activePane="bottomLeft" state="frozen"/>"#));
        assert!(sheet.contains(r#"<col min="1" max="1" width="12" customWidth="1"/>"#));
        assert!(sheet.contains(r#"<row r="1" ht="20" customHeight="1"><c r="A1" s="1" t="inlineStr"><is><t xml:space="preserve">a &lt; b</t></is></c><c r="B1"><v>1.5</v></c></row>"#));
        assert!(sheet.contains(r#"<row r="3"><c r="A3" t="b"><v>1</v></c></row>"#));
        assert!(sheet.contains(r#"<mergeCell ref="B1:C2"/>"#));
        assert!(sheet.contains(r#"sqref="A3""#));
        assert!(part(&bytes, "xl/workbook.xml").contains(r#"<sheet name="More" sheetId="2" r:id="rId2"/>"#));
        assert!(part(&bytes, "xl/_rels/workbook.xml.rels").contains(r#"Target="styles.xml""#));
        assert!(part(&bytes, "xl/worksheets/sheet2.xml").contains(r#"<sheetData></sheetData>"#));
    }

    #[test]
    fn dropdown_choices_are_quoted() {
        let options = |values: &[&str]| values.iter().map(|value| value.to_string()).collect::<Vec<_>>();
        assert_eq!(list_formula(&options(&["x", "y"])).as_deref(), Some(r#""x,y""#));
        assert_eq!(list_formula(&options(&[r#"6" pipe"#, "a,b", "z"])).as_deref(), Some(r#""6"" pipe,z""#));
        assert_eq!(list_formula(&options(&["a,b"])), None);

        let mut sink = StreamingXlsxSink::new(Cursor::new(Vec::new()));
        sink.create_sheet("S").unwrap();
        sink.add_dropdown(0, 0, &options(&[r#"say "hi""#, "bye"])).unwrap();
        sink.add_dropdown(1, 0, &options(&["only,commas"])).unwrap();
        sink.close().unwrap();
        let sheet = part(&sink.into_inner().unwrap().into_inner(), "xl/worksheets/sheet1.xml");
        assert!(sheet.contains(r#"<dataValidations count="1">"#));
        let start = sheet.find("<formula1>").unwrap() + "<formula1>".len();
        let end = sheet.find("</formula1>").unwrap();
        let formula = quick_xml::escape::unescape(&sheet[start..end]).unwrap();
        assert_eq!(formula, r#""say ""hi"",bye""#);
    }

    #[test]
    fn out_of_order_writes_are_rejected() {
        let mut sink = StreamingXlsxSink::new(Cursor::new(Vec::new()));
        assert!(sink.create_row(0, None, false).is_err());
        sink.create_sheet("S").unwrap();
        sink.create_cell(1, 3, CellValue::Blank, None).unwrap();
        assert!(sink.create_cell(1, 2, CellValue::Blank, None).is_err());
        assert!(sink.create_row(0, None, false).is_err());
        assert!(sink.auto_size_column(0).is_err());
        sink.close().unwrap();
        assert!(sink.close().is_err());
    }

    #[test]
    fn empty_workbooks_get_one_sheet() {
        let mut sink = StreamingXlsxSink::new(Cursor::new(Vec::new()));
        sink.close().unwrap();
        assert_eq!(sink.sheet_names(), ["Sheet1"]);
    }

    #[test]
    fn legacy_files_are_unsupported() {
        let directory = tempfile::tempdir().unwrap();
        let result = StreamingXlsxSink::create(directory.path().join("out.xls"));
        assert!(matches!(
            result,
            Err(Html2SheetError::SinkError(SinkError::UnsupportedFormat(SheetFormat::Xls)))
        ));
    }
}
