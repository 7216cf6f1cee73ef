//! # Table Model
//!
//! In-memory representation of parsed HTML tables: a [`Table`] owns ordered [`Tr`] rows,
//! each owning ordered [`Td`] cells. Cells carry their grid position, spans and the
//! derived `row_bound`/`col_bound` extents used both for merge regions and for
//! collision detection during layout resolution.
use std::collections::BTreeMap;
use std::collections::HashMap;

pub mod layout;
pub mod parser;
pub mod style;
pub mod width;

pub use layout::find_conflicts;
pub use layout::Conflict;
pub use layout::LayoutError;
pub use layout::LayoutPolicy;
pub use layout::LayoutResolver;
pub use parser::parse_rows;
pub use parser::parse_tables;

/// Style declarations keyed by lower-cased property name.
/// Ordered so that the canonical declaration string of a map is stable.
pub type StyleMap = BTreeMap<String, String>;

/// Content classification of a cell.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ContentType {
    #[default]
    String,
    Double,
    Boolean,
    Date,
    Formula,
    Link,
    Dropdown,
    Image,
}

impl ContentType {
    const NAMES: [(&'static str, ContentType); 8] = [
        ("string", ContentType::String),
        ("double", ContentType::Double),
        ("boolean", ContentType::Boolean),
        ("date", ContentType::Date),
        ("formula", ContentType::Formula),
        ("link", ContentType::Link),
        ("dropdown", ContentType::Dropdown),
        ("image", ContentType::Image),
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ContentType::String => "string",
            ContentType::Double => "double",
            ContentType::Boolean => "boolean",
            ContentType::Date => "date",
            ContentType::Formula => "formula",
            ContentType::Link => "link",
            ContentType::Dropdown => "dropdown",
            ContentType::Image => "image",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name.trim()))
            .map(|(_, kind)| *kind)
    }
}

/// Spans below 2 carry no merge semantics and are stored as 0.
pub(crate) fn normalize_span(span: usize) -> usize {
    if span >= 2 { span } else { 0 }
}

/// A single table cell.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Td {
    /// Owning row index
    pub row: usize,
    /// Assigned column index, rewritten by layout resolution
    pub col: usize,
    /// Vertical span, 0 when the cell spans a single row
    pub row_span: usize,
    /// Horizontal span, 0 when the cell spans a single column
    pub col_span: usize,
    /// Last row covered by this cell
    pub row_bound: usize,
    /// Last column covered by this cell
    pub col_bound: usize,
    pub content: Option<String>,
    pub content_type: ContentType,
    pub style: StyleMap,
    /// Hyperlink target for LINK cells, image source for IMAGE cells
    pub link: Option<String>,
    /// Choices of a DROPDOWN cell
    pub options: Vec<String>,
    /// Explicit number format (DATE cells)
    pub number_format: Option<String>,
    /// Whether the cell came from a `<th>`
    pub header: bool,
    /// Display width hint in character units
    pub width: usize,
}

impl Td {
    pub fn new(row: usize, col: usize) -> Self {
        Td {
            row,
            col,
            row_bound: row,
            col_bound: col,
            ..Td::default()
        }
    }

    /// Creates a cell whose type is classified from its text.
    pub fn with_content(row: usize, col: usize, content: impl Into<String>) -> Self {
        let content = content.into();
        let mut td = Td::new(row, col);
        td.content_type = parser::classify(&content);
        td.width = width::display_width(&content);
        td.content = Some(content);
        td
    }

    pub fn set_row_span(&mut self, span: usize) {
        self.row_span = normalize_span(span);
        self.refresh_bounds();
    }

    pub fn set_col_span(&mut self, span: usize) {
        self.col_span = normalize_span(span);
        self.refresh_bounds();
    }

    /// Recomputes `row_bound`/`col_bound` from the current position and spans.
    pub fn refresh_bounds(&mut self) {
        self.row_bound = self.row + self.row_span.max(1) - 1;
        self.col_bound = self.col + self.col_span.max(1) - 1;
    }

    /// Whether the cell produces a merge region.
    pub fn is_merged(&self) -> bool {
        self.row_span > 1 || self.col_span > 1
    }

    /// Whether the rectangles of the two cells intersect.
    pub fn overlaps(&self, other: &Td) -> bool {
        self.row <= other.row_bound
            && other.row <= self.row_bound
            && self.col <= other.col_bound
            && other.col <= self.col_bound
    }
}

/// A table row.
#[derive(Clone, Debug, PartialEq)]
pub struct Tr {
    pub index: usize,
    pub tds: Vec<Td>,
    /// Hidden rows still occupy a row index
    pub visible: bool,
    /// Explicit height in points
    pub height: Option<f64>,
    /// Width hint per column of the cells in this row
    pub col_widths: HashMap<usize, usize>,
    pub style: StyleMap,
    /// Set once columns are final; resolution skips resolved rows
    pub(crate) resolved: bool,
}

impl Tr {
    pub fn new(index: usize) -> Self {
        Tr {
            index,
            tds: Vec::new(),
            visible: true,
            height: None,
            col_widths: HashMap::new(),
            style: StyleMap::new(),
            resolved: false,
        }
    }

    /// Builds an unresolved row of single cells from plain values.
    pub fn from_values<I, S>(index: usize, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tr = Tr::new(index);
        for (col, value) in values.into_iter().enumerate() {
            tr.tds.push(Td::with_content(index, col, value));
        }
        tr.measure();
        tr
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Moves the row and every cell in it to `index`.
    pub fn set_index(&mut self, index: usize) {
        self.index = index;
        for td in &mut self.tds {
            td.row = index;
            td.refresh_bounds();
        }
    }

    /// Rebuilds the per-column width hints from the cells' current columns.
    /// Cells spanning several columns do not constrain a single column.
    pub fn measure(&mut self) {
        self.col_widths.clear();
        for td in self.tds.iter().filter(|td| td.col_span <= 1) {
            let width = self.col_widths.entry(td.col).or_insert(0);
            *width = (*width).max(td.width);
        }
    }

    /// Whether the row holds no cells at all.
    pub fn is_empty(&self) -> bool {
        self.tds.is_empty()
    }
}

/// A parsed table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    /// Caption, used as sheet name
    pub caption: String,
    pub trs: Vec<Tr>,
    pub style: StyleMap,
}

impl Table {
    pub fn new(caption: impl Into<String>) -> Self {
        Table {
            caption: caption.into(),
            trs: Vec::new(),
            style: StyleMap::new(),
        }
    }

    /// True when no row carries any cell.
    pub fn is_empty(&self) -> bool {
        self.trs.iter().all(Tr::is_empty)
    }

    /// Number of grid rows covered, including rows reached only by a rowspan.
    pub fn row_count(&self) -> usize {
        self.trs
            .iter()
            .flat_map(|tr| tr.tds.iter().map(|td| td.row_bound + 1).chain(std::iter::once(tr.index + 1)))
            .max()
            .unwrap_or(0)
    }

    /// Maximum width hint per column across all rows.
    pub fn column_widths(&self) -> BTreeMap<usize, usize> {
        let mut widths = BTreeMap::<usize, usize>::new();
        for (col, width) in self.trs.iter().flat_map(|tr| tr.col_widths.iter()) {
            let entry = widths.entry(*col).or_insert(0);
            *entry = (*entry).max(*width);
        }
        widths
    }

    /// Shifts every row down by `offset`, used when stacking tables into one sheet.
    pub fn shift_rows(&mut self, offset: usize) {
        for tr in &mut self.trs {
            let index = tr.index + offset;
            tr.set_index(index);
        }
    }

    /// Iterates all cells in row order.
    pub fn cells(&self) -> impl Iterator<Item = &Td> + '_ {
        self.trs.iter().flat_map(|tr| tr.tds.iter())
    }
}
