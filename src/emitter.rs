//! # Grid Emitter
//!
//! Materializes resolved rows into a [`WorkbookSink`]. Spanning cells produce an anchor
//! cell, blank placeholders for every other position of their rectangle and a merge
//! region. Placeholders for rows below the anchor are staged until their row is emitted,
//! or until the sheet finishes.
use crate::error::Html2SheetError;
use crate::sink::CellValue;
use crate::sink::MergeRegion;
use crate::sink::WorkbookSink;
use crate::table::style::parse_characters;
use crate::table::style::CellStyle;
use crate::table::style::StyleCache;
use crate::table::width::MAX_COLUMN_WIDTH;
use crate::table::ContentType;
use crate::table::StyleMap;
use crate::table::Td;
use crate::table::Tr;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Points added to the tallest font of a row.
const ROW_PADDING: f64 = 5.0;

/// Character units added to computed column widths.
const COLUMN_PADDING: usize = 2;

const DATETIME_PATTERNS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
];

const DATE_PATTERNS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y%m%d"];

/// Column sizing applied when a sheet finishes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WidthStrategy {
    /// Only explicit `width` declarations apply
    None,
    /// The sink measures its own content
    Native,
    /// Widths come from the content width hints
    #[default]
    Computed,
}

/// Parses DATE content with the common ISO-like patterns.
pub fn parse_date(content: &str) -> Option<NaiveDateTime> {
    let content = content.trim();
    DATETIME_PATTERNS
        .iter()
        .find_map(|pattern| NaiveDateTime::parse_from_str(content, pattern).ok())
        .or_else(|| {
            DATE_PATTERNS
                .iter()
                .find_map(|pattern| NaiveDate::parse_from_str(content, pattern).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Typed value of a cell. Contents that do not parse as their declared type are kept as text.
pub fn to_cell_value(td: &Td) -> CellValue {
    let Some(content) = td.content.as_deref() else {
        return CellValue::Blank;
    };
    let fallback = |kind: &str| {
        log::warn!("Cell at row {}, column {} is not a valid {kind}: '{content}'", td.row, td.col);
        CellValue::Text(content.to_owned())
    };
    match td.content_type {
        ContentType::String | ContentType::Dropdown | ContentType::Image => CellValue::Text(content.to_owned()),
        ContentType::Double => match content.trim().parse::<f64>() {
            Ok(number) if number.is_finite() => CellValue::Number(number),
            _ => fallback("number"),
        },
        ContentType::Boolean => match content.trim().to_ascii_lowercase().as_str() {
            "true" => CellValue::Boolean(true),
            "false" => CellValue::Boolean(false),
            _ => fallback("boolean"),
        },
        ContentType::Date => parse_date(content).map(CellValue::Date).unwrap_or_else(|| fallback("date")),
        ContentType::Formula => CellValue::Formula { formula: content.to_owned(), cached: None },
        ContentType::Link => {
            let target = td.link.as_deref().unwrap_or(content);
            CellValue::Formula {
                formula: format!("HYPERLINK(\"{}\",\"{}\")", target.replace('"', "\"\""), content.replace('"', "\"\"")),
                cached: Some(content.to_owned()),
            }
        }
    }
}

enum Slot<'a> {
    Anchor(&'a Td, Option<Arc<CellStyle>>),
    Blank(Option<Arc<CellStyle>>),
}

/// Per-sheet emission state. Owned by exactly one thread.
#[derive(Debug)]
pub struct GridEmitter {
    styles: Arc<StyleCache>,
    styled: bool,
    row_limit: usize,
    col_limit: usize,
    /// Placeholders of rows not emitted yet: row → column → anchor style
    staging: BTreeMap<usize, BTreeMap<usize, Option<Arc<CellStyle>>>>,
    /// Widest content hint per column
    widths: BTreeMap<usize, usize>,
    /// Explicit `width` declarations per column
    explicit_widths: BTreeMap<usize, f64>,
    max_col: Option<usize>,
}

impl GridEmitter {
    /// `row_limit` and `col_limit` are the sheet ceilings; spans are clipped to them.
    pub fn new(styles: Arc<StyleCache>, styled: bool, row_limit: usize, col_limit: usize) -> Self {
        GridEmitter {
            styles,
            styled,
            row_limit: row_limit.max(1),
            col_limit: col_limit.max(1),
            staging: BTreeMap::new(),
            widths: BTreeMap::new(),
            explicit_widths: BTreeMap::new(),
            max_col: None,
        }
    }

    /// Forgets all per-sheet state.
    pub fn reset(&mut self) {
        self.staging.clear();
        self.widths.clear();
        self.explicit_widths.clear();
        self.max_col = None;
    }

    /// Widest content hint per column of the current sheet.
    pub fn column_widths(&self) -> &BTreeMap<usize, usize> {
        &self.widths
    }

    /// One past the last row that still has staged placeholders, 0 when none.
    pub fn staged_extent(&self) -> usize {
        self.staging.keys().next_back().map(|row| row + 1).unwrap_or(0)
    }

    fn style_of(&self, td: &Td) -> Option<Arc<CellStyle>> {
        if self.styled {
            self.styles.resolve(td)
        } else {
            self.styles.resolve_parts(&StyleMap::new(), false, td.number_format.as_deref())
        }
    }

    /// Emits a resolved row. Rows must arrive in ascending index order.
    pub fn emit_row<S: WorkbookSink + ?Sized>(&mut self, sink: &mut S, tr: &Tr) -> Result<(), Html2SheetError> {
        let row = tr.index;
        let pending = self.staging.range(..row).map(|(staged, _)| *staged).collect::<Vec<_>>();
        for staged in pending {
            self.flush_row(sink, staged)?;
        }

        let mut cells = BTreeMap::<usize, Slot<'_>>::new();
        for (col, style) in self.staging.remove(&row).unwrap_or_default() {
            cells.insert(col, Slot::Blank(style));
        }
        let mut merges = Vec::new();
        let mut dropdowns = Vec::new();
        let mut tallest: Option<u16> = None;
        for td in &tr.tds {
            if td.col >= self.col_limit {
                log::warn!("Dropping cell at row {row}, column {} beyond the last sheet column", td.col);
                continue;
            }
            if cells.contains_key(&td.col) {
                log::warn!("Dropping cell at row {row}, column {} overlapping an earlier cell", td.col);
                continue;
            }
            let style = self.style_of(td);
            if let Some(size) = style.as_ref().and_then(|style| style.font_size) {
                tallest = Some(tallest.map_or(size, |tallest| tallest.max(size)));
            }
            let (row_bound, col_bound) = self.free_bounds(&cells, td);
            for col in td.col + 1..=col_bound {
                cells.entry(col).or_insert_with(|| Slot::Blank(style.clone()));
            }
            for below in row + 1..=row_bound {
                let staged = self.staging.entry(below).or_default();
                for col in td.col..=col_bound {
                    staged.entry(col).or_insert_with(|| style.clone());
                }
            }
            if row_bound > row || col_bound > td.col {
                merges.push(MergeRegion { first_row: row, last_row: row_bound, first_col: td.col, last_col: col_bound });
            }
            if td.content_type == ContentType::Dropdown && !td.options.is_empty() {
                dropdowns.push(td);
            }
            if td.col_span == 0 {
                if let Some(width) = td.style.get("width").and_then(|width| parse_characters(width)) {
                    let entry = self.explicit_widths.entry(td.col).or_insert(0.0);
                    *entry = entry.max(width);
                }
            }
            cells.insert(td.col, Slot::Anchor(td, style));
        }

        let height = match (tr.height, tallest.map(|size| f64::from(size) + ROW_PADDING)) {
            (Some(explicit), Some(font)) => Some(explicit.max(font)),
            (explicit, font) => explicit.or(font),
        };
        sink.create_row(row, height, !tr.visible)?;
        for (col, slot) in cells {
            self.max_col = Some(self.max_col.map_or(col, |max| max.max(col)));
            match slot {
                Slot::Anchor(td, style) => sink.create_cell(row, col, to_cell_value(td), style)?,
                Slot::Blank(style) => sink.create_cell(row, col, CellValue::Blank, style)?,
            }
        }
        for region in merges {
            sink.add_merge_region(region)?;
        }
        for td in dropdowns {
            sink.add_dropdown(row, td.col, &td.options)?;
        }
        for (col, width) in tr.col_widths.iter().filter(|(col, _)| **col < self.col_limit) {
            let entry = self.widths.entry(*col).or_insert(0);
            *entry = (*entry).max(*width);
        }
        Ok(())
    }

    /// Bounds of the part of a cell's rectangle that no earlier cell claims, clipped to the
    /// sheet ceilings. Columns shrink first, then rows.
    fn free_bounds(&self, cells: &BTreeMap<usize, Slot<'_>>, td: &Td) -> (usize, usize) {
        let row = td.row;
        let row_bound = td.row_bound.min(self.row_limit - 1);
        let mut col_bound = td.col_bound.min(self.col_limit - 1);
        if let Some(taken) = (td.col + 1..=col_bound).find(|col| cells.contains_key(col)) {
            col_bound = taken - 1;
        }
        let free_rows = (row + 1..=row_bound)
            .take_while(|below| {
                self.staging
                    .get(below)
                    .map(|staged| staged.range(td.col..=col_bound).next().is_none())
                    .unwrap_or(true)
            })
            .count();
        let clipped = (row + free_rows, col_bound);
        if clipped != (row_bound, td.col_bound.min(self.col_limit - 1)) {
            log::warn!(
                "Clipping the span of the cell at row {row}, column {} to rows {row}..={}, columns {}..={} around earlier cells",
                td.col,
                clipped.0,
                td.col,
                clipped.1
            );
        }
        clipped
    }

    /// Emits a row made only of staged placeholders.
    fn flush_row<S: WorkbookSink + ?Sized>(&mut self, sink: &mut S, row: usize) -> Result<(), Html2SheetError> {
        let Some(staged) = self.staging.remove(&row) else {
            return Ok(());
        };
        sink.create_row(row, None, false)?;
        for (col, style) in staged {
            self.max_col = Some(self.max_col.map_or(col, |max| max.max(col)));
            sink.create_cell(row, col, CellValue::Blank, style)?;
        }
        Ok(())
    }

    /// Flushes staged rows and applies column widths. The emitter is ready for a new sheet afterwards.
    pub fn finish_sheet<S: WorkbookSink + ?Sized>(&mut self, sink: &mut S, strategy: WidthStrategy) -> Result<(), Html2SheetError> {
        let pending = self.staging.keys().copied().collect::<Vec<_>>();
        for row in pending {
            self.flush_row(sink, row)?;
        }

        let mut widths = BTreeMap::<usize, f64>::new();
        if strategy == WidthStrategy::Computed {
            for (col, hint) in self.widths.iter().filter(|(_, hint)| **hint > 0) {
                widths.insert(*col, (hint + COLUMN_PADDING) as f64);
            }
        }
        for (col, explicit) in &self.explicit_widths {
            let width = widths.entry(*col).or_insert(0.0);
            *width = width.max(*explicit);
        }
        if strategy == WidthStrategy::Native {
            for col in (0..=self.max_col.unwrap_or(0)).filter(|col| !widths.contains_key(col)) {
                sink.auto_size_column(col)?;
            }
        }
        for (col, width) in widths {
            sink.set_column_width(col, width.min(MAX_COLUMN_WIDTH as f64))?;
        }
        self.reset();
        Ok(())
    }
}
