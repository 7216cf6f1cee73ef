//! Style declarations and resolved cell styles.
//!
//! Markup styles are CSS-like declaration strings (`font-weight: bold; color: #f00`).
//! They are parsed into a [`StyleMap`], inherited from table to row to cell, and
//! finally resolved into a sink-independent [`CellStyle`]. Keyword tables for
//! alignment, borders and colours are static lookup data over closed enums.
use crate::table::StyleMap;
use crate::table::Td;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

lazy_static! {
    static ref LENGTH: Regex = Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*(px|pt|em)?\s*$").expect("Hardcode regex pattern");
    static ref RGB: Regex = Regex::new(r"^rgba?\(\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})").expect("Hardcode regex pattern");
}

/// Properties that describe the element itself and never flow into children.
const NON_INHERITED: [&str; 4] = ["width", "height", "display", "visibility"];

/// Approximate pixel width of one character unit at the default font.
const PIXELS_PER_CHARACTER: f64 = 7.0;

/// Parses `key: value; key: value` declarations. Keys are lower-cased,
/// fragments without a colon or with an empty side are skipped.
pub fn parse_declarations(declarations: &str) -> StyleMap {
    declarations
        .split(';')
        .filter_map(|declaration| declaration.split_once(':'))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_owned()))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .collect()
}

/// Child declarations override inherited parent declarations.
pub fn inherit(parent: &StyleMap, child: &StyleMap) -> StyleMap {
    let mut style: StyleMap = parent
        .iter()
        .filter(|(key, _)| !NON_INHERITED.contains(&key.as_str()))
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect();
    style.extend(child.iter().map(|(key, value)| (key.to_owned(), value.to_owned())));
    style
}

/// Stable declaration string of a style map.
pub fn canonical(style: &StyleMap) -> String {
    style
        .iter()
        .map(|(key, value)| format!("{key}:{value}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Parses a CSS length into points (`px` scaled by 0.75, `em` by 12, bare numbers are points).
pub fn parse_points(value: &str) -> Option<f64> {
    let captures = LENGTH.captures(value)?;
    let number = captures.get(1)?.as_str().parse::<f64>().ok()?;
    Some(match captures.get(2).map(|unit| unit.as_str()) {
        Some("px") => number * 0.75,
        Some("em") => number * 12.0,
        _ => number,
    })
}

/// Parses a CSS width into character units (`px` divided by the default character width).
pub fn parse_characters(value: &str) -> Option<f64> {
    let captures = LENGTH.captures(value)?;
    let number = captures.get(1)?.as_str().parse::<f64>().ok()?;
    Some(match captures.get(2).map(|unit| unit.as_str()) {
        Some("px") => number / PIXELS_PER_CHARACTER,
        Some("pt") => number / 0.75 / PIXELS_PER_CHARACTER,
        _ => number,
    })
}

/// Horizontal alignment of cell content.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum HorizontalAlign {
    #[default]
    General,
    Left,
    Center,
    Right,
    Justify,
}

impl HorizontalAlign {
    const KEYWORDS: [(&'static str, HorizontalAlign); 6] = [
        ("left", HorizontalAlign::Left),
        ("start", HorizontalAlign::Left),
        ("center", HorizontalAlign::Center),
        ("right", HorizontalAlign::Right),
        ("end", HorizontalAlign::Right),
        ("justify", HorizontalAlign::Justify),
    ];

    pub fn parse(keyword: &str) -> Option<Self> {
        lookup(&Self::KEYWORDS, keyword)
    }

    /// Attribute value of `<alignment horizontal>`, `None` for general.
    pub const fn as_xlsx(&self) -> Option<&'static str> {
        match self {
            HorizontalAlign::General => None,
            HorizontalAlign::Left => Some("left"),
            HorizontalAlign::Center => Some("center"),
            HorizontalAlign::Right => Some("right"),
            HorizontalAlign::Justify => Some("justify"),
        }
    }
}

/// Vertical alignment of cell content.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum VerticalAlign {
    #[default]
    General,
    Top,
    Center,
    Bottom,
}

impl VerticalAlign {
    const KEYWORDS: [(&'static str, VerticalAlign); 5] = [
        ("top", VerticalAlign::Top),
        ("middle", VerticalAlign::Center),
        ("center", VerticalAlign::Center),
        ("bottom", VerticalAlign::Bottom),
        ("baseline", VerticalAlign::Bottom),
    ];

    pub fn parse(keyword: &str) -> Option<Self> {
        lookup(&Self::KEYWORDS, keyword)
    }

    pub const fn as_xlsx(&self) -> Option<&'static str> {
        match self {
            VerticalAlign::General => None,
            VerticalAlign::Top => Some("top"),
            VerticalAlign::Center => Some("center"),
            VerticalAlign::Bottom => Some("bottom"),
        }
    }
}

/// Line style of one border side.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum BorderStyle {
    #[default]
    None,
    Thin,
    Medium,
    Thick,
    Dashed,
    Dotted,
    Double,
    Hair,
}

impl BorderStyle {
    const KEYWORDS: [(&'static str, BorderStyle); 10] = [
        ("none", BorderStyle::None),
        ("hidden", BorderStyle::None),
        ("thin", BorderStyle::Thin),
        ("solid", BorderStyle::Thin),
        ("medium", BorderStyle::Medium),
        ("thick", BorderStyle::Thick),
        ("dashed", BorderStyle::Dashed),
        ("dotted", BorderStyle::Dotted),
        ("double", BorderStyle::Double),
        ("hair", BorderStyle::Hair),
    ];

    pub fn parse(keyword: &str) -> Option<Self> {
        lookup(&Self::KEYWORDS, keyword)
    }

    /// Parses a `border` shorthand such as `1px solid #000`.
    /// Solid lines get heavier with the declared width.
    pub fn parse_shorthand(value: &str) -> Option<Self> {
        let style = value.split_whitespace().find_map(Self::parse)?;
        let points = value.split_whitespace().find_map(parse_points).unwrap_or(0.75);
        Some(match style {
            BorderStyle::Thin if points >= 2.25 => BorderStyle::Thick,
            BorderStyle::Thin if points >= 1.5 => BorderStyle::Medium,
            style => style,
        })
    }

    pub const fn as_xlsx(&self) -> Option<&'static str> {
        match self {
            BorderStyle::None => None,
            BorderStyle::Thin => Some("thin"),
            BorderStyle::Medium => Some("medium"),
            BorderStyle::Thick => Some("thick"),
            BorderStyle::Dashed => Some("dashed"),
            BorderStyle::Dotted => Some("dotted"),
            BorderStyle::Double => Some("double"),
            BorderStyle::Hair => Some("hair"),
        }
    }
}

/// Border sides of a cell.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Borders {
    pub top: BorderStyle,
    pub right: BorderStyle,
    pub bottom: BorderStyle,
    pub left: BorderStyle,
}

impl Borders {
    fn all(style: BorderStyle) -> Self {
        Borders { top: style, right: style, bottom: style, left: style }
    }

    pub fn is_none(&self) -> bool {
        *self == Borders::default()
    }
}

const NAMED_COLORS: [(&str, &str); 20] = [
    ("black", "000000"),
    ("white", "FFFFFF"),
    ("red", "FF0000"),
    ("green", "008000"),
    ("lime", "00FF00"),
    ("blue", "0000FF"),
    ("yellow", "FFFF00"),
    ("orange", "FFA500"),
    ("purple", "800080"),
    ("gray", "808080"),
    ("grey", "808080"),
    ("silver", "C0C0C0"),
    ("navy", "000080"),
    ("maroon", "800000"),
    ("teal", "008080"),
    ("olive", "808000"),
    ("aqua", "00FFFF"),
    ("cyan", "00FFFF"),
    ("fuchsia", "FF00FF"),
    ("magenta", "FF00FF"),
];

/// Parses `#rgb`, `#rrggbb`, `rgb(r, g, b)` or a named colour into upper-case `RRGGBB`.
pub fn parse_color(value: &str) -> Option<String> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix('#') {
        if !hex.chars().all(|character| character.is_ascii_hexdigit()) {
            return None;
        }
        return match hex.len() {
            3 => Some(hex.chars().flat_map(|character| [character, character]).collect::<String>().to_ascii_uppercase()),
            6 => Some(hex.to_ascii_uppercase()),
            _ => None,
        };
    }
    if let Some(captures) = RGB.captures(value) {
        let channels = (1..=3)
            .map(|index| captures.get(index)?.as_str().parse::<u8>().ok())
            .collect::<Option<Vec<u8>>>()?;
        return Some(channels.iter().map(|channel| format!("{channel:02X}")).collect());
    }
    lookup(&NAMED_COLORS, value).map(str::to_owned)
}

fn lookup<T: Copy>(table: &[(&str, T)], keyword: &str) -> Option<T> {
    let keyword = keyword.trim();
    table
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(keyword))
        .map(|(_, value)| *value)
}

/// Sink-independent resolved cell style.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CellStyle {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    /// Font size in points
    pub font_size: Option<u16>,
    pub font_family: Option<String>,
    /// Font colour as `RRGGBB`
    pub font_color: Option<String>,
    /// Fill colour as `RRGGBB`
    pub background: Option<String>,
    pub horizontal: HorizontalAlign,
    pub vertical: VerticalAlign,
    pub wrap: bool,
    pub border: Borders,
    /// Spreadsheet number format code
    pub number_format: Option<String>,
}

impl CellStyle {
    /// Resolves a declaration map. Header cells default to bold and centered.
    pub fn resolve(style: &StyleMap, header: bool, number_format: Option<&str>) -> Self {
        let mut cell_style = CellStyle {
            bold: header,
            horizontal: if header { HorizontalAlign::Center } else { HorizontalAlign::General },
            number_format: number_format.map(str::to_owned),
            ..CellStyle::default()
        };
        for (key, value) in style {
            cell_style.apply(key, value);
        }
        cell_style
    }

    fn apply(&mut self, key: &str, value: &str) {
        let lower = value.to_ascii_lowercase();
        match key {
            "font-weight" => {
                self.bold = lower == "bold" || lower == "bolder" || lower.parse::<u16>().map(|weight| weight >= 600).unwrap_or(false)
            }
            "font-style" => self.italic = lower == "italic" || lower == "oblique",
            "text-decoration" | "text-decoration-line" => self.underline = lower.contains("underline"),
            "font-size" => self.font_size = parse_points(&lower).map(|points| points.round() as u16),
            "font-family" => {
                self.font_family = value
                    .split(',')
                    .next()
                    .map(|family| family.trim().trim_matches(|c| c == '"' || c == '\'').to_owned())
                    .filter(|family| !family.is_empty())
            }
            "color" => self.font_color = parse_color(&lower),
            "background-color" | "background" => self.background = parse_color(&lower),
            "text-align" => match HorizontalAlign::parse(&lower) {
                Some(align) => self.horizontal = align,
                None => log::warn!("Unknown text-align '{value}'"),
            },
            "vertical-align" => match VerticalAlign::parse(&lower) {
                Some(align) => self.vertical = align,
                None => log::warn!("Unknown vertical-align '{value}'"),
            },
            "white-space" => self.wrap = !lower.starts_with("nowrap"),
            "word-wrap" | "overflow-wrap" => self.wrap = lower == "break-word" || lower == "anywhere",
            "border" => {
                if let Some(style) = BorderStyle::parse_shorthand(&lower) {
                    self.border = Borders::all(style);
                }
            }
            "border-style" => {
                if let Some(style) = BorderStyle::parse(&lower) {
                    self.border = Borders::all(style);
                }
            }
            "border-top" | "border-top-style" => self.border.top = BorderStyle::parse_shorthand(&lower).unwrap_or(self.border.top),
            "border-right" | "border-right-style" => self.border.right = BorderStyle::parse_shorthand(&lower).unwrap_or(self.border.right),
            "border-bottom" | "border-bottom-style" => self.border.bottom = BorderStyle::parse_shorthand(&lower).unwrap_or(self.border.bottom),
            "border-left" | "border-left-style" => self.border.left = BorderStyle::parse_shorthand(&lower).unwrap_or(self.border.left),
            _ => (),
        }
    }

    pub fn is_default(&self) -> bool {
        *self == CellStyle::default()
    }
}

/// Declaration-string to resolved-style cache.
///
/// Scoped to one builder and shared between its direct builds and its streaming
/// consumer; never process-wide.
#[derive(Debug, Default)]
pub struct StyleCache {
    styles: Mutex<HashMap<String, Arc<CellStyle>>>,
}

impl StyleCache {
    pub fn new() -> Self {
        StyleCache::default()
    }

    /// Resolved style of a cell, `None` when the cell has no formatting at all.
    pub fn resolve(&self, td: &Td) -> Option<Arc<CellStyle>> {
        self.resolve_parts(&td.style, td.header, td.number_format.as_deref())
    }

    /// Resolves declarations, header defaults and a number format.
    pub fn resolve_parts(&self, style: &StyleMap, header: bool, number_format: Option<&str>) -> Option<Arc<CellStyle>> {
        if style.is_empty() && !header && number_format.is_none() {
            return None;
        }
        let key = format!("{}|{}|{}", canonical(style), header, number_format.unwrap_or_default());
        let mut styles = self.styles.lock();
        let resolved = styles
            .entry(key)
            .or_insert_with(|| Arc::new(CellStyle::resolve(style, header, number_format)));
        if resolved.is_default() {
            None
        } else {
            Some(Arc::clone(resolved))
        }
    }

    pub fn len(&self) -> usize {
        self.styles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.lock().is_empty()
    }
}
