//! Style registry of the XLSX writer.
//!
//! Resolved [`CellStyle`]s are decomposed into the deduplicated font, fill, border and
//! number format tables of `xl/styles.xml`; each distinct style becomes one cell format
//! (`xf`) whose index is written as the `s` attribute of a cell.
use crate::error::Html2SheetError;
use crate::helpers::xml::XmlPartWriter;
use crate::table::style::BorderStyle;
use crate::table::style::Borders;
use crate::table::style::CellStyle;
use crate::table::style::HorizontalAlign;
use crate::table::style::VerticalAlign;
use std::collections::HashMap;
use std::io::Write;

const MAIN_NAMESPACE: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const DEFAULT_FONT_SIZE: u16 = 11;
const DEFAULT_FONT_FAMILY: &str = "Calibri";
const FIRST_CUSTOM_FORMAT_ID: u32 = 164;

/// Built-in number formats that need no `numFmt` entry.
const BUILTIN_FORMATS: [(&str, u32); 8] = [
    ("General", 0),
    ("0", 1),
    ("0.00", 2),
    ("#,##0", 3),
    ("#,##0.00", 4),
    ("0%", 9),
    ("0.00%", 10),
    ("@", 49),
];

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Font {
    bold: bool,
    italic: bool,
    underline: bool,
    size: u16,
    family: String,
    color: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Format {
    font: usize,
    fill: usize,
    border: usize,
    number_format: u32,
    horizontal: HorizontalAlign,
    vertical: VerticalAlign,
    wrap: bool,
}

/// Deduplicating registry of cell formats.
#[derive(Debug)]
pub(crate) struct StyleRegistry {
    fonts: Vec<Font>,
    /// Solid fill colours; indexes 0 and 1 are the mandatory `none`/`gray125` fills
    fills: Vec<Option<String>>,
    borders: Vec<Borders>,
    number_formats: Vec<String>,
    formats: Vec<Format>,
    index: HashMap<CellStyle, usize>,
}

impl Default for StyleRegistry {
    fn default() -> Self {
        let font = Font {
            bold: false,
            italic: false,
            underline: false,
            size: DEFAULT_FONT_SIZE,
            family: DEFAULT_FONT_FAMILY.to_owned(),
            color: None,
        };
        let format = Format {
            font: 0,
            fill: 0,
            border: 0,
            number_format: 0,
            horizontal: HorizontalAlign::General,
            vertical: VerticalAlign::General,
            wrap: false,
        };
        StyleRegistry {
            fonts: vec![font],
            fills: vec![None, None],
            borders: vec![Borders::default()],
            number_formats: Vec::new(),
            formats: vec![format],
            index: HashMap::new(),
        }
    }
}

fn intern<T: PartialEq>(items: &mut Vec<T>, item: T) -> usize {
    match items.iter().position(|existing| *existing == item) {
        Some(position) => position,
        None => {
            items.push(item);
            items.len() - 1
        }
    }
}

impl StyleRegistry {
    pub(crate) fn new() -> Self {
        StyleRegistry::default()
    }

    /// Index of the cell format for `style`, registering it on first use.
    pub(crate) fn register(&mut self, style: &CellStyle) -> usize {
        if let Some(index) = self.index.get(style) {
            return *index;
        }
        let font = intern(
            &mut self.fonts,
            Font {
                bold: style.bold,
                italic: style.italic,
                underline: style.underline,
                size: style.font_size.unwrap_or(DEFAULT_FONT_SIZE),
                family: style.font_family.clone().unwrap_or_else(|| DEFAULT_FONT_FAMILY.to_owned()),
                color: style.font_color.clone(),
            },
        );
        let fill = match &style.background {
            Some(color) => match self.fills.iter().skip(2).position(|fill| fill.as_ref() == Some(color)) {
                Some(position) => position + 2,
                None => {
                    self.fills.push(Some(color.to_owned()));
                    self.fills.len() - 1
                }
            },
            None => 0,
        };
        let border = intern(&mut self.borders, style.border);
        let number_format = match style.number_format.as_deref() {
            None => 0,
            Some(code) => match BUILTIN_FORMATS.iter().find(|(builtin, _)| *builtin == code) {
                Some((_, id)) => *id,
                None => FIRST_CUSTOM_FORMAT_ID + intern(&mut self.number_formats, code.to_owned()) as u32,
            },
        };
        let index = intern(
            &mut self.formats,
            Format {
                font,
                fill,
                border,
                number_format,
                horizontal: style.horizontal,
                vertical: style.vertical,
                wrap: style.wrap,
            },
        );
        self.index.insert(style.clone(), index);
        index
    }

    pub(crate) fn len(&self) -> usize {
        self.formats.len()
    }

    /// Writes the complete `xl/styles.xml` body.
    pub(crate) fn write<W: Write>(&self, writer: &mut XmlPartWriter<W>) -> Result<(), Html2SheetError> {
        writer.start("styleSheet", &[("xmlns", MAIN_NAMESPACE)])?;

        if !self.number_formats.is_empty() {
            let count = self.number_formats.len().to_string();
            writer.start("numFmts", &[("count", count.as_str())])?;
            for (offset, code) in self.number_formats.iter().enumerate() {
                let id = (FIRST_CUSTOM_FORMAT_ID + offset as u32).to_string();
                writer.empty("numFmt", &[("numFmtId", id.as_str()), ("formatCode", code.as_str())])?;
            }
            writer.end("numFmts")?;
        }

        let count = self.fonts.len().to_string();
        writer.start("fonts", &[("count", count.as_str())])?;
        for font in &self.fonts {
            writer.start("font", &[])?;
            if font.bold {
                writer.empty("b", &[])?;
            }
            if font.italic {
                writer.empty("i", &[])?;
            }
            if font.underline {
                writer.empty("u", &[])?;
            }
            let size = font.size.to_string();
            writer.empty("sz", &[("val", size.as_str())])?;
            if let Some(color) = &font.color {
                let rgb = format!("FF{color}");
                writer.empty("color", &[("rgb", rgb.as_str())])?;
            }
            writer.empty("name", &[("val", font.family.as_str())])?;
            writer.end("font")?;
        }
        writer.end("fonts")?;

        let count = self.fills.len().to_string();
        writer.start("fills", &[("count", count.as_str())])?;
        for (index, fill) in self.fills.iter().enumerate() {
            writer.start("fill", &[])?;
            match fill {
                Some(color) => {
                    writer.start("patternFill", &[("patternType", "solid")])?;
                    let rgb = format!("FF{color}");
                    writer.empty("fgColor", &[("rgb", rgb.as_str())])?;
                    writer.empty("bgColor", &[("indexed", "64")])?;
                    writer.end("patternFill")?;
                }
                None => {
                    let pattern = if index == 1 { "gray125" } else { "none" };
                    writer.empty("patternFill", &[("patternType", pattern)])?;
                }
            }
            writer.end("fill")?;
        }
        writer.end("fills")?;

        let count = self.borders.len().to_string();
        writer.start("borders", &[("count", count.as_str())])?;
        for border in &self.borders {
            writer.start("border", &[])?;
            for (side, style) in [("left", border.left), ("right", border.right), ("top", border.top), ("bottom", border.bottom)] {
                write_border_side(writer, side, style)?;
            }
            writer.empty("diagonal", &[])?;
            writer.end("border")?;
        }
        writer.end("borders")?;

        writer.start("cellStyleXfs", &[("count", "1")])?;
        writer.empty("xf", &[("numFmtId", "0"), ("fontId", "0"), ("fillId", "0"), ("borderId", "0")])?;
        writer.end("cellStyleXfs")?;

        let count = self.formats.len().to_string();
        writer.start("cellXfs", &[("count", count.as_str())])?;
        for format in &self.formats {
            let number_format = format.number_format.to_string();
            let font = format.font.to_string();
            let fill = format.fill.to_string();
            let border = format.border.to_string();
            let mut attributes = vec![
                ("numFmtId", number_format.as_str()),
                ("fontId", font.as_str()),
                ("fillId", fill.as_str()),
                ("borderId", border.as_str()),
                ("xfId", "0"),
            ];
            if format.number_format != 0 {
                attributes.push(("applyNumberFormat", "1"));
            }
            if format.font != 0 {
                attributes.push(("applyFont", "1"));
            }
            if format.fill != 0 {
                attributes.push(("applyFill", "1"));
            }
            if format.border != 0 {
                attributes.push(("applyBorder", "1"));
            }
            let horizontal = format.horizontal.as_xlsx();
            let vertical = format.vertical.as_xlsx();
            if horizontal.is_none() && vertical.is_none() && !format.wrap {
                writer.empty("xf", &attributes)?;
                continue;
            }
            attributes.push(("applyAlignment", "1"));
            writer.start("xf", &attributes)?;
            let mut alignment = Vec::new();
            if let Some(horizontal) = horizontal {
                alignment.push(("horizontal", horizontal));
            }
            if let Some(vertical) = vertical {
                alignment.push(("vertical", vertical));
            }
            if format.wrap {
                alignment.push(("wrapText", "1"));
            }
            writer.empty("alignment", &alignment)?;
            writer.end("xf")?;
        }
        writer.end("cellXfs")?;

        writer.start("cellStyles", &[("count", "1")])?;
        writer.empty("cellStyle", &[("name", "Normal"), ("xfId", "0"), ("builtinId", "0")])?;
        writer.end("cellStyles")?;

        writer.end("styleSheet")
    }
}

fn write_border_side<W: Write>(writer: &mut XmlPartWriter<W>, side: &str, style: BorderStyle) -> Result<(), Html2SheetError> {
    match style.as_xlsx() {
        Some(style) => {
            writer.start(side, &[("style", style)])?;
            writer.empty("color", &[("auto", "1")])?;
            writer.end(side)
        }
        None => writer.empty(side, &[]),
    }
}
