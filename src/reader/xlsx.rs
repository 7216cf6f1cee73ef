//! XLSX workbook reader.
//!
//! Sheet parts are read twice: a first pass collects the `<mergeCells>` ranges, which are
//! stored after the rows, so that the second, streaming pass can report the anchor of a
//! merged range at every position it covers.
use crate::error::Html2SheetError;
use crate::error::ResultMessage;
use crate::helpers::xml::XmlAttributeHelper;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlReader;
use crate::helpers::xml::XmlTextContextHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::reader::cell::Cell;
use crate::reader::cell::CellType;
use crate::reader::cell::Epoch;
use crate::reader::range::CellRange;
use crate::reader::reference::reference_to_index;
use crate::reader::Row;
use crate::reader::SheetSelector;
use crate::reader::SpreadsheetError;
use quick_xml::events::Event;
use quick_xml::name::QName;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;
use zip::ZipArchive;

const TAG_RELATIONSHIP: QName = QName(b"Relationship");
const TAG_CUSTOM_FORMATS: QName = QName(b"numFmts");
const TAG_CUSTOM_FORMAT: QName = QName(b"numFmt");
const TAG_FORMAT_INDEXES: QName = QName(b"cellXfs");
const TAG_FORMAT_INDEX: QName = QName(b"xf");
const TAG_SHARED_STRING_ITEM: QName = QName(b"si");
const TAG_PHONETIC_TEXT: QName = QName(b"rPh");
const TAG_TEXT: QName = QName(b"t");
const TAG_WORKBOOK_PROPERTIES: QName = QName(b"workbookPr");
const TAG_SHEET: QName = QName(b"sheet");
const TAG_ROW: QName = QName(b"row");
const TAG_CELL: QName = QName(b"c");
const TAG_INLINE_STRING: QName = QName(b"is");
const TAG_VALUE: QName = QName(b"v");
const TAG_MERGE_CELL: QName = QName(b"mergeCell");

/// An open `.xlsx` workbook.
pub struct XlsxWorkbook<R: Read + Seek> {
    zip: ZipArchive<R>,
    /// `(name, part path)` in workbook order
    sheets: Vec<(String, String)>,
    /// Cell type per style index
    number_formats: Vec<CellType>,
    shared_strings: Option<Vec<String>>,
    epoch: Epoch,
}

impl XlsxWorkbook<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Html2SheetError> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> XlsxWorkbook<R> {
    pub fn new(reader: R) -> Result<Self, Html2SheetError> {
        let mut zip = ZipArchive::new(reader)?;
        let (sheets, epoch) = load_workbook(&mut zip)?;
        if sheets.is_empty() {
            Err(SpreadsheetError::EmptyWorkbook)?;
        }
        let number_formats = load_number_formats(&mut zip, epoch).with_prefix("Failed to read xl/styles.xml")?;
        Ok(XlsxWorkbook { zip, sheets, number_formats, shared_strings: None, epoch })
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Position of the selected sheet in workbook order.
    pub fn select(&self, selector: &SheetSelector) -> Result<usize, SpreadsheetError> {
        let found = match selector {
            SheetSelector::Index(index) => Some(*index).filter(|index| *index < self.sheets.len()),
            SheetSelector::Name(name) => self.sheets.iter().position(|(sheet, _)| sheet == name),
            SheetSelector::Pattern(pattern) => self.sheets.iter().position(|(sheet, _)| pattern.matches(sheet)),
        };
        found.ok_or_else(|| SpreadsheetError::SheetNotFound(selector.to_string()))
    }

    /// Merged ranges of the selected sheet.
    pub fn merged_ranges(&mut self, selector: &SheetSelector) -> Result<Vec<CellRange>, Html2SheetError> {
        let index = self.select(selector)?;
        let path = self.sheets[index].1.clone();
        load_merged_ranges(&mut self.zip, &path)
    }

    /// Reads the selected sheet row by row, in row order, until `visit` returns `false`.
    ///
    /// Rows missing from the part are reported empty, so indexes are contiguous from 0.
    /// Every position inside a merged range reports the anchor cell.
    pub fn read_rows<F>(&mut self, selector: &SheetSelector, mut visit: F) -> Result<(), Html2SheetError>
    where
        F: FnMut(Row) -> Result<bool, Html2SheetError>,
    {
        let index = self.select(selector)?;
        let (name, path) = self.sheets[index].clone();
        if self.shared_strings.is_none() {
            self.shared_strings = Some(load_shared_strings(&mut self.zip).with_prefix("Failed to read xl/sharedStrings.xml")?);
        }
        let mut expander = MergeExpander::new(load_merged_ranges(&mut self.zip, &path)?);
        log::debug!("Reading sheet '{name}' with {} merged ranges", expander.ranges.len());

        let last_merged_row = expander.last_row();
        let sheet: Arc<str> = Arc::from(name.as_str());
        let shared_strings = self.shared_strings.as_deref().unwrap_or_default();
        let number_formats = &self.number_formats;
        let mut reader = self
            .zip
            .xml_reader(&path)?
            .ok_or_else(|| SpreadsheetError::MissingPart(path.clone()))?;

        let mut next_row = 0usize;
        let mut row_index = 0usize;
        let mut cells = Vec::<Cell>::new();
        let mut col_count = 0usize;
        let mut position = (0usize, 0usize);
        let mut kind = CellType::Empty;
        let mut value = String::new();
        let mut stopped = false;
        let mut emit = |index: usize, cells: Vec<Cell>, next_row: &mut usize| -> Result<bool, Html2SheetError> {
            while *next_row <= index {
                let mut row = Row::new(Arc::clone(&sheet), *next_row);
                if *next_row == index {
                    row.extend(cells.iter().cloned());
                }
                expander.expand(&mut row);
                *next_row += 1;
                if !visit(row)? {
                    return Ok(false);
                }
            }
            Ok(true)
        };

        match_xml_events!(reader => {
            Event::Start(event) if event.name() == TAG_ROW => {
                row_index = event
                    .parse_attribute_value::<usize>("r")?
                    .filter(|row| *row > 0)
                    .map(|row| row - 1)
                    .unwrap_or(next_row);
                col_count = 0;
                cells.clear();
            }
            Event::End(event) if event.name() == TAG_ROW => {
                if !emit(row_index, std::mem::take(&mut cells), &mut next_row)? {
                    stopped = true;
                    break;
                }
            }
            Event::Start(event) if event.name() == TAG_CELL => {
                position = event
                    .get_attribute_value("r")?
                    .and_then(|reference| reference_to_index(&reference))
                    .unwrap_or((row_index, col_count));
                col_count = position.1 + 1;
                kind = CellType::from_type_attribute(event.get_attribute_value("t")?.as_deref());
                if kind == CellType::Number {
                    if let Some(style) = event.parse_attribute_value::<usize>("s")? {
                        kind = number_formats.get(style).copied().unwrap_or(CellType::Number);
                    }
                }
                value.clear();
            }
            Event::Start(event) if event.name() == TAG_INLINE_STRING => {
                value = read_string_value(&mut reader, TAG_INLINE_STRING, false)?;
            }
            Event::Start(event) if event.name() == TAG_VALUE => {
                value = read_string_value(&mut reader, TAG_VALUE, true)?;
            }
            Event::End(event) if event.name() == TAG_CELL => {
                if !value.is_empty() {
                    if kind == CellType::SharedString {
                        let text = value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|index| shared_strings.get(index))
                            .cloned()
                            .unwrap_or_default();
                        value = text;
                        kind = CellType::Text;
                    }
                    cells.push(Cell::new(position.0, position.1, kind, std::mem::take(&mut value)));
                }
                kind = CellType::Empty;
            }
        });

        // Rows that only a merged range reaches.
        if !stopped {
            if let Some(last) = last_merged_row.filter(|last| *last >= next_row) {
                emit(last, Vec::new(), &mut next_row)?;
            }
        }
        Ok(())
    }

    /// Collects every row of the selected sheet.
    pub fn rows(&mut self, selector: &SheetSelector) -> Result<Vec<Row>, Html2SheetError> {
        let mut rows = Vec::new();
        self.read_rows(selector, |row| {
            rows.push(row);
            Ok(true)
        })?;
        Ok(rows)
    }
}

/// Copies anchor cells over the positions of their merged ranges.
struct MergeExpander {
    ranges: Vec<CellRange>,
    anchors: HashMap<(usize, usize), Cell>,
}

impl MergeExpander {
    fn new(mut ranges: Vec<CellRange>) -> Self {
        ranges.sort_by_key(|range| (range.first_row, range.first_col));
        MergeExpander { ranges, anchors: HashMap::new() }
    }

    fn last_row(&self) -> Option<usize> {
        self.ranges.iter().map(|range| range.last_row).max()
    }

    fn expand(&mut self, row: &mut Row) {
        let index = row.index;
        for range in self.ranges.iter().filter(|range| range.first_row <= index && index <= range.last_row) {
            let anchor = (range.first_row, range.first_col);
            if index == range.first_row {
                match row.cell(range.first_col) {
                    Some(cell) => self.anchors.insert(anchor, cell.clone()),
                    None => self.anchors.remove(&anchor),
                };
            }
            let Some(cell) = self.anchors.get(&anchor) else {
                continue;
            };
            for col in range.first_col..=range.last_col {
                if (index, col) != anchor {
                    row.set(cell.moved(index, col));
                }
            }
        }
        self.anchors.retain(|(first_row, first_col), _| {
            self.ranges
                .iter()
                .any(|range| range.first_row == *first_row && range.first_col == *first_col && range.last_row > index)
        });
    }
}

fn load_relationships<R: Read + Seek>(zip: &mut ZipArchive<R>, path: &str) -> Result<HashMap<String, String>, Html2SheetError> {
    let mut reader = zip
        .xml_reader(path)?
        .ok_or_else(|| SpreadsheetError::MissingPart(path.to_owned()))?;
    let mut relationships = HashMap::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_RELATIONSHIP => {
            let id = event.get_attribute_value("Id")?;
            let kind = event.get_attribute_value("Type")?;
            let target = event.get_attribute_value("Target")?;
            if kind.map(|kind| kind.ends_with("/worksheet")).unwrap_or(true) {
                if let Some((id, target)) = id.zip(target) {
                    relationships.insert(id.to_string(), to_zip_path(&target));
                }
            }
        }
    });
    Ok(relationships)
}

/// Normalizes a relationship target to its path inside the archive.
fn to_zip_path(path: &str) -> String {
    if let Some(path) = path.strip_prefix('/') {
        path.to_owned()
    } else if path.starts_with("xl/") {
        path.to_owned()
    } else {
        format!("xl/{path}")
    }
}

fn load_workbook<R: Read + Seek>(zip: &mut ZipArchive<R>) -> Result<(Vec<(String, String)>, Epoch), Html2SheetError> {
    let relationships = load_relationships(zip, "xl/_rels/workbook.xml.rels")?;
    let mut reader = zip
        .xml_reader("xl/workbook.xml")?
        .ok_or_else(|| SpreadsheetError::MissingPart("xl/workbook.xml".to_owned()))?;
    let mut sheets = Vec::new();
    let mut epoch = Epoch::Y1900;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHEET => {
            let mut name = None::<Cow<str>>;
            let mut id = None::<Cow<str>>;
            for result in event.attributes() {
                let attribute = result?;
                match attribute.key.local_name().as_ref() {
                    b"name" => name = Some(attribute.get_value()?),
                    b"id" => id = Some(attribute.get_value()?),
                    _ => (),
                }
            }
            if let Some((name, id)) = name.zip(id) {
                if let Some(path) = relationships.get(id.as_ref()) {
                    sheets.push((name.into_owned(), path.to_owned()));
                }
            }
        }
        Event::Start(event) if event.name() == TAG_WORKBOOK_PROPERTIES => {
            let date1904 = event.get_attribute_value("date1904")?;
            if matches!(date1904.as_deref(), Some("1" | "true")) {
                epoch = Epoch::Y1904;
            }
        }
    });
    Ok((sheets, epoch))
}

/// Cell type per style index, from the custom and built-in number formats.
fn load_number_formats<R: Read + Seek>(zip: &mut ZipArchive<R>, epoch: Epoch) -> Result<Vec<CellType>, Html2SheetError> {
    let Some(mut reader) = zip.xml_reader("xl/styles.xml")? else {
        return Ok(Vec::new());
    };
    let mut in_custom_formats = false;
    let mut in_format_indexes = false;
    let mut custom_formats = HashMap::<String, CellType>::new();
    let mut format_ids = Vec::<String>::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_CUSTOM_FORMATS => in_custom_formats = true,
        Event::End(event) if event.name() == TAG_CUSTOM_FORMATS => in_custom_formats = false,
        Event::Start(event) if in_custom_formats && event.name() == TAG_CUSTOM_FORMAT => {
            let id = event.get_attribute_value("numFmtId")?;
            let code = event.get_attribute_value("formatCode")?;
            if let Some((id, code)) = id.zip(code) {
                custom_formats.insert(id.into_owned(), CellType::parse_custom_number_format(&code, epoch));
            }
        }
        Event::Start(event) if event.name() == TAG_FORMAT_INDEXES => in_format_indexes = true,
        Event::End(event) if event.name() == TAG_FORMAT_INDEXES => break,
        Event::Start(event) if in_format_indexes && event.name() == TAG_FORMAT_INDEX => {
            let id = event.get_attribute_value("numFmtId")?.map(Cow::into_owned).unwrap_or_default();
            format_ids.push(id);
        }
    });
    Ok(format_ids
        .iter()
        .map(|id| {
            custom_formats
                .get(id)
                .copied()
                .or_else(|| CellType::parse_builtin_number_format_id(id, epoch))
                .unwrap_or(CellType::Number)
        })
        .collect())
}

fn load_shared_strings<R: Read + Seek>(zip: &mut ZipArchive<R>) -> Result<Vec<String>, Html2SheetError> {
    let mut strings = Vec::new();
    let Some(mut reader) = zip.xml_reader("xl/sharedStrings.xml")? else {
        return Ok(strings);
    };
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHARED_STRING_ITEM => {
            strings.push(read_string_value(&mut reader, TAG_SHARED_STRING_ITEM, false)?);
        }
    });
    Ok(strings)
}

fn load_merged_ranges<R: Read + Seek>(zip: &mut ZipArchive<R>, path: &str) -> Result<Vec<CellRange>, Html2SheetError> {
    let mut reader = zip
        .xml_reader(path)?
        .ok_or_else(|| SpreadsheetError::MissingPart(path.to_owned()))?;
    let mut ranges = Vec::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_MERGE_CELL => {
            if let Some(reference) = event.get_attribute_value("ref")? {
                match CellRange::try_from(reference.as_ref()) {
                    Ok(range) => ranges.push(range),
                    Err(error) => log::warn!("Ignoring merged range: {error}"),
                }
            }
        }
    });
    Ok(ranges)
}

/// Reads text up to `end_tag`, skipping phonetic runs.
fn read_string_value<B: BufRead>(reader: &mut XmlReader<B>, end_tag: QName, is_text_content: bool) -> Result<String, Html2SheetError> {
    let mut is_phonetic_text = false;
    let mut is_text = is_text_content;
    let mut text = String::new();
    match_xml_events!(reader => {
        Event::End(event) if event.name() == end_tag => break,
        Event::Start(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = true,
        Event::End(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = false,
        Event::Start(event) if !is_phonetic_text && event.name() == TAG_TEXT => is_text = true,
        Event::End(event) if is_text && event.name() == TAG_TEXT => is_text = false,
        Event::Text(event) if is_text => text.push_str(&event.xml_content()?),
        Event::CData(event) if is_text => text.push_str(&event.xml_content()?),
        Event::GeneralRef(event) if is_text => text.push_bytes_ref(&event)?,
    });
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::zip::ZipWriterHelper;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// A hand-assembled workbook with shared strings, a date style and a merged range.
    fn workbook(sheet: &str) -> XlsxWorkbook<Cursor<Vec<u8>>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let parts = [
            (
                "xl/_rels/workbook.xml.rels",
                r#"<Relationships><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="/xl/worksheets/sheet2.xml"/></Relationships>"#,
            ),
            (
                "xl/workbook.xml",
                r#"<workbook xmlns:r="r"><sheets><sheet name="Data" sheetId="1" r:id="rId1"/><sheet name="Notes" sheetId="2" r:id="rId2"/></sheets></workbook>"#,
            ),
            (
                "xl/styles.xml",
                r#"<styleSheet><numFmts><numFmt numFmtId="164" formatCode="yyyy-mm-dd"/></numFmts><cellXfs><xf numFmtId="0"/><xf numFmtId="164"/><xf numFmtId="22"/></cellXfs></styleSheet>"#,
            ),
            ("xl/sharedStrings.xml", r#"<sst><si><t>Name</t></si><si><r><t>Ann</t></r><rPh><t>an</t></rPh></si></sst>"#),
            ("xl/worksheets/sheet1.xml", sheet),
            ("xl/worksheets/sheet2.xml", r#"<worksheet><sheetData/></worksheet>"#),
        ];
        for (name, content) in parts {
            zip.start_file(name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        let bytes = zip.finish().unwrap().into_inner();
        XlsxWorkbook::new(Cursor::new(bytes)).unwrap()
    }

    const SHEET: &str = r#"<worksheet><sheetData>
        <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" s="1"><v>45292</v></c><c r="C1" t="b"><v>1</v></c></row>
        <row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2" t="inlineStr"><is><t>x &amp; y</t></is></c></row>
        <row r="4"><c r="A4" t="str"><f>1+1</f><v>2</v></c><c r="B4" s="2"><v>45292.75</v></c></row>
    </sheetData><mergeCells count="1"><mergeCell ref="B2:C3"/></mergeCells></worksheet>"#;

    #[test]
    fn sheets_and_selection() {
        let workbook = workbook(SHEET);
        assert_eq!(workbook.sheet_names(), vec!["Data", "Notes"]);
        assert_eq!(workbook.select(&SheetSelector::Index(1)).unwrap(), 1);
        assert_eq!(workbook.select(&SheetSelector::Name("Notes".into())).unwrap(), 1);
        assert_eq!(workbook.select(&SheetSelector::pattern("N*").unwrap()).unwrap(), 1);
        assert!(matches!(workbook.select(&SheetSelector::Index(5)), Err(SpreadsheetError::SheetNotFound(_))));
        assert_eq!(workbook.epoch(), Epoch::Y1900);
    }

    #[test]
    fn typed_cells_and_merge_expansion() {
        let mut workbook = workbook(SHEET);
        let rows = workbook.rows(&SheetSelector::default()).unwrap();
        let texts = rows.iter().map(Row::texts).collect::<Vec<_>>();
        assert_eq!(
            texts,
            vec![
                vec!["Name", "2024-01-01", "true"],
                vec!["Ann", "x & y", "x & y"],
                vec!["", "x & y", "x & y"],
                vec!["2", "2024-01-01 18:00:00"],
            ]
        );
        assert_eq!(rows[2].cell(1).unwrap().reference(), "B3");
        assert_eq!(rows[0].cell(1).unwrap().kind(), CellType::Date(Epoch::Y1900));
    }

    #[test]
    fn merges_reaching_past_the_last_row() {
        let sheet = r#"<worksheet><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>top</t></is></c></row></sheetData>
            <mergeCells><mergeCell ref="A1:B3"/></mergeCells></worksheet>"#;
        let mut workbook = workbook(sheet);
        assert_eq!(
            workbook.merged_ranges(&SheetSelector::default()).unwrap(),
            vec![CellRange { first_row: 0, last_row: 2, first_col: 0, last_col: 1 }]
        );
        let rows = workbook.rows(&SheetSelector::default()).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.texts() == vec!["top", "top"]));
    }

    #[test]
    fn reading_stops_early() {
        let mut workbook = workbook(SHEET);
        let mut seen = 0;
        workbook
            .read_rows(&SheetSelector::default(), |_| {
                seen += 1;
                Ok(seen < 2)
            })
            .unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn reads_packages_written_by_the_helpers() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        {
            let mut part = zip.xml_part("xl/_rels/workbook.xml.rels").unwrap();
            part.start("Relationships", &[]).unwrap();
            part.empty("Relationship", &[("Id", "rId1"), ("Target", "worksheets/sheet1.xml")]).unwrap();
            part.end("Relationships").unwrap();
        }
        {
            let mut part = zip.xml_part("xl/workbook.xml").unwrap();
            part.start("workbook", &[]).unwrap();
            part.empty("workbookPr", &[("date1904", "1")]).unwrap();
            part.empty("sheet", &[("name", "Only"), ("r:id", "rId1")]).unwrap();
            part.end("workbook").unwrap();
        }
        {
            let mut part = zip.xml_part("xl/worksheets/sheet1.xml").unwrap();
            part.start("worksheet", &[]).unwrap();
            part.end("worksheet").unwrap();
        }
        let bytes = zip.finish().unwrap().into_inner();
        let mut workbook = XlsxWorkbook::new(Cursor::new(bytes)).unwrap();
        assert_eq!(workbook.epoch(), Epoch::Y1904);
        assert!(workbook.rows(&SheetSelector::Name("Only".into())).unwrap().is_empty());
    }
}
