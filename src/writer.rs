//! # Sheet Writer
//!
//! Places rows into sheets of a [`WorkbookSink`]: names sheets, enforces the per-sheet
//! row ceiling by spilling into a new sheet, re-emits fixed title rows at the top of
//! every spillover sheet, and finishes each sheet (staged rows, widths, freeze pane).
//! Both the direct build path and the streaming consumer write through it.
use crate::builder::BuildConfig;
use crate::emitter::GridEmitter;
use crate::error::Html2SheetError;
use crate::sink::WorkbookSink;
use crate::table::style::StyleCache;
use crate::table::LayoutResolver;
use crate::table::Table;
use crate::table::Tr;
use std::collections::HashSet;
use std::sync::Arc;

/// Longest sheet name the output formats accept.
const MAX_SHEET_NAME: usize = 31;

const INVALID_SHEET_NAME_CHARACTERS: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

/// Replaces characters sheet names cannot hold and truncates to 31 characters.
pub fn sanitize_sheet_name(name: &str) -> String {
    let name = name
        .trim()
        .chars()
        .map(|character| if INVALID_SHEET_NAME_CHARACTERS.contains(&character) { '_' } else { character })
        .take(MAX_SHEET_NAME)
        .collect::<String>();
    let name = name.trim().to_owned();
    if name.is_empty() {
        "Sheet".to_owned()
    } else {
        name
    }
}

/// Hands out unique sheet names, comparing case-insensitively.
#[derive(Debug, Default)]
pub struct SheetNames {
    used: HashSet<String>,
}

impl SheetNames {
    pub fn unique(&mut self, name: &str) -> String {
        let base = sanitize_sheet_name(name);
        let mut candidate = base.clone();
        let mut number = 2;
        while self.used.contains(&candidate.to_lowercase()) {
            let suffix = format!(" ({number})");
            let kept = base.chars().take(MAX_SHEET_NAME - suffix.chars().count()).collect::<String>();
            candidate = format!("{}{suffix}", kept.trim_end());
            number += 1;
        }
        self.used.insert(candidate.to_lowercase());
        candidate
    }
}

/// Writes rows into consecutive sheets of one sink.
pub struct SheetWriter<S: WorkbookSink> {
    sink: S,
    config: BuildConfig,
    capacity: usize,
    emitter: GridEmitter,
    resolver: LayoutResolver,
    names: SheetNames,
    /// Name the current group of sheets spills under
    base_name: Option<String>,
    sheet_open: bool,
    /// Next row index on the current sheet
    cursor: usize,
    /// Rows written since the current group began, titles included
    group_rows: usize,
    titles: Vec<Tr>,
    sheets: Vec<String>,
}

impl<S: WorkbookSink> SheetWriter<S> {
    pub fn new(sink: S, config: &BuildConfig, styles: Arc<StyleCache>) -> Self {
        let format = sink.format();
        let capacity = config
            .sheet_capacity
            .unwrap_or(format.max_rows())
            .clamp(1, format.max_rows());
        SheetWriter {
            emitter: GridEmitter::new(styles, config.styled, capacity, format.max_columns()),
            resolver: LayoutResolver::new(config.layout_policy),
            sink,
            config: config.clone(),
            capacity,
            names: SheetNames::default(),
            base_name: None,
            sheet_open: false,
            cursor: 0,
            group_rows: 0,
            titles: Vec::new(),
            sheets: Vec::new(),
        }
    }

    /// Rows a sheet holds before spilling.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Names of the sheets created so far.
    pub fn sheet_names(&self) -> &[String] {
        &self.sheets
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Finishes the current sheet and starts a new group of sheets named `name`.
    pub fn begin_sheet(&mut self, name: &str) -> Result<(), Html2SheetError> {
        self.finish_sheet()?;
        self.base_name = Some(name.to_owned());
        self.group_rows = 0;
        self.titles.clear();
        self.open_sheet()
    }

    fn open_sheet(&mut self) -> Result<(), Html2SheetError> {
        let base = self.base_name.clone().unwrap_or_else(|| "Sheet1".to_owned());
        let name = self.names.unique(&base);
        self.sink.create_sheet(&name)?;
        log::debug!("Opened sheet '{name}'");
        self.sheets.push(name);
        self.sheet_open = true;
        self.cursor = 0;
        self.emitter.reset();
        self.resolver.reset();
        Ok(())
    }

    fn finish_sheet(&mut self) -> Result<(), Html2SheetError> {
        if !self.sheet_open {
            return Ok(());
        }
        self.emitter.finish_sheet(&mut self.sink, self.config.width_strategy)?;
        if let Some(pane) = self.config.freeze_pane {
            self.sink.create_freeze_pane(pane)?;
        }
        self.sheet_open = false;
        Ok(())
    }

    /// Finishes the current sheet and opens the next one of the group, titles first.
    fn spill(&mut self) -> Result<(), Html2SheetError> {
        self.finish_sheet()?;
        self.open_sheet()?;
        log::debug!("Row ceiling of {} reached, continuing on a new sheet", self.capacity);
        let titles = std::mem::take(&mut self.titles);
        for title in &titles {
            self.place(title.clone())?;
        }
        self.titles = titles;
        Ok(())
    }

    /// Writes the next row of the current sheet, spilling when the sheet is full.
    /// The row's index is reassigned to its sheet position.
    pub fn write_row(&mut self, tr: Tr) -> Result<(), Html2SheetError> {
        if !self.sheet_open {
            let name = self.config.sheet_name.clone().unwrap_or_else(|| "Sheet1".to_owned());
            self.begin_sheet(&name)?;
        }
        if self.cursor >= self.capacity {
            self.spill()?;
        }
        let title = self.group_rows < self.config.fixed_titles;
        let placed = self.place(tr)?;
        if title {
            self.titles.push(placed);
        }
        self.group_rows += 1;
        Ok(())
    }

    /// Resolves and emits a row at the cursor. Resolved rows keep their columns.
    fn place(&mut self, mut tr: Tr) -> Result<Tr, Html2SheetError> {
        tr.set_index(self.cursor);
        self.resolver.resolve_row(&mut tr)?;
        self.emitter.emit_row(&mut self.sink, &tr)?;
        self.cursor += 1;
        Ok(tr)
    }

    /// Writes all rows of a table, then moves past rows its spans still reach.
    pub fn write_table(&mut self, table: Table) -> Result<(), Html2SheetError> {
        for tr in table.trs {
            self.write_row(tr)?;
        }
        self.cursor = self.cursor.max(self.emitter.staged_extent()).min(self.capacity);
        Ok(())
    }

    /// Closes the sink after a failure without finishing the current sheet.
    pub(crate) fn abandon(mut self) {
        if let Err(error) = self.sink.close() {
            log::warn!("Closing the sink after a failure also failed: {error}");
        }
    }

    /// Finishes the last sheet, closes the sink and returns it.
    /// A workbook without any sheet still gets one empty sheet.
    pub fn finish(mut self) -> Result<S, Html2SheetError> {
        if self.sheets.is_empty() {
            let name = self.config.sheet_name.clone().unwrap_or_else(|| "Sheet1".to_owned());
            self.begin_sheet(&name)?;
        }
        self.finish_sheet()?;
        self.sink.close()?;
        log::debug!("Finished workbook with {} sheets", self.sheets.len());
        Ok(self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::memory::MemorySink;
    use crate::sink::FreezePane;
    use crate::table::parse_tables;
    use pretty_assertions::assert_eq;

    fn writer(config: BuildConfig) -> SheetWriter<MemorySink> {
        SheetWriter::new(MemorySink::default(), &config, Arc::new(StyleCache::new()))
    }

    #[test]
    fn sheet_names_are_sanitized_and_unique() {
        assert_eq!(sanitize_sheet_name(" a/b:c[1]* "), "a_b_c_1__");
        assert_eq!(sanitize_sheet_name("???"), "___");
        assert_eq!(sanitize_sheet_name("   "), "Sheet");
        assert_eq!(sanitize_sheet_name(&"x".repeat(40)).len(), 31);

        let mut names = SheetNames::default();
        assert_eq!(names.unique("Data"), "Data");
        assert_eq!(names.unique("data"), "data (2)");
        assert_eq!(names.unique("Data"), "Data (3)");
        let long = "y".repeat(31);
        assert_eq!(names.unique(&long), long);
        assert_eq!(names.unique(&long), format!("{} (2)", "y".repeat(27)));
    }

    #[test]
    fn rows_spill_at_the_capacity() {
        let config = BuildConfig::builder().sheet_capacity(2).sheet_name("Log").build().unwrap();
        let mut writer = writer(config);
        for index in 0..5 {
            writer.write_row(Tr::from_values(index, [format!("r{index}")])).unwrap();
        }
        assert_eq!(writer.sheet_names(), ["Log", "Log (2)", "Log (3)"]);
        let workbook = writer.finish().unwrap().into_workbook();
        assert_eq!(workbook.sheets[1].row_text(0), vec!["r2"]);
        assert_eq!(workbook.sheets[1].row_text(1), vec!["r3"]);
        assert_eq!(workbook.sheets[2].row_count(), 1);
    }

    #[test]
    fn title_rows_repeat_on_spillover_sheets() {
        let config = BuildConfig::builder().sheet_capacity(3).fixed_titles(1).build().unwrap();
        let mut writer = writer(config);
        writer.write_row(Tr::from_values(0, ["title"])).unwrap();
        for index in 1..6 {
            writer.write_row(Tr::from_values(index, [format!("r{index}")])).unwrap();
        }
        let workbook = writer.finish().unwrap().into_workbook();
        assert_eq!(workbook.sheets.len(), 3);
        for sheet in &workbook.sheets {
            assert_eq!(sheet.row_text(0), vec!["title"]);
        }
        assert_eq!(workbook.sheets[1].row_text(1), vec!["r3"]);
        assert_eq!(workbook.sheets[2].row_text(1), vec!["r5"]);
    }

    #[test]
    fn tables_stack_below_their_spans() {
        let config = BuildConfig::builder().freeze_pane(FreezePane { col_split: 0, row_split: 1 }).build().unwrap();
        let mut writer = writer(config);
        writer.begin_sheet("All").unwrap();
        for table in parse_tables(r#"<table><tr><td rowspan="3">A</td></tr></table><table><tr><td>B</td></tr></table>"#) {
            writer.write_table(table).unwrap();
        }
        let workbook = writer.finish().unwrap().into_workbook();
        let sheet = &workbook.sheets[0];
        assert_eq!(sheet.row_text(3), vec!["B"]);
        assert_eq!(sheet.pane, Some(FreezePane { col_split: 0, row_split: 1 }));
    }

    #[test]
    fn empty_workbooks_get_a_sheet() {
        let workbook = writer(BuildConfig::default()).finish().unwrap().into_workbook();
        assert_eq!(workbook.sheets.len(), 1);
        assert_eq!(workbook.sheets[0].name, "Sheet1");
    }
}
