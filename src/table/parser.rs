//! HTML table parsing.
//!
//! Walks `<table>` markup into [`Table`]/[`Tr`]/[`Td`] structures. The parser places
//! cells with a seize map: columns claimed by a `rowspan` of an earlier row are skipped
//! when assigning columns in later rows, so rows coming out of [`parse_tables`] are
//! already final and marked resolved.
use crate::table::normalize_span;
use crate::table::style::inherit;
use crate::table::style::parse_declarations;
use crate::table::style::parse_points;
use crate::table::width::display_width;
use crate::table::ContentType;
use crate::table::StyleMap;
use crate::table::Table;
use crate::table::Td;
use crate::table::Tr;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::ElementRef;
use scraper::Html;
use scraper::Selector;
use std::collections::BTreeSet;
use std::collections::HashMap;

lazy_static! {
    static ref NUMERIC: Regex = Regex::new(r"^-?(0|[1-9]\d*)(\.\d+)?$").expect("Hardcode regex pattern");
    static ref TABLE: Selector = Selector::parse("table").expect("Hardcode selector");
    static ref LINK: Selector = Selector::parse("a[href]").expect("Hardcode selector");
    static ref IMAGE: Selector = Selector::parse("img[src]").expect("Hardcode selector");
}

/// Number format of DATE cells declared with an empty `date-format`.
pub const DEFAULT_DATE_FORMAT: &str = "yyyy-mm-dd";

/// Row index to the columns claimed there by vertical spans of earlier rows.
type SeizeMap = HashMap<usize, BTreeSet<usize>>;

/// Classifies plain cell text: boolean literals, then numeric literals, else text.
/// Numbers with leading zeros stay text so identifiers such as `007` survive.
pub fn classify(content: &str) -> ContentType {
    let content = content.trim();
    if content.eq_ignore_ascii_case("true") || content.eq_ignore_ascii_case("false") {
        ContentType::Boolean
    } else if NUMERIC.is_match(content) {
        ContentType::Double
    } else {
        ContentType::String
    }
}

/// Parses every `<table>` of a document, nested tables included, in document order.
pub fn parse_tables(html: &str) -> Vec<Table> {
    let document = Html::parse_document(html);
    document
        .select(&TABLE)
        .enumerate()
        .map(|(index, element)| parse_table(element, index))
        .collect()
}

/// Parses a fragment of `<tr>` rows, as appended to a streaming build.
///
/// Columns only account for spans within the same row; vertical spans reaching into
/// these rows, possibly from an earlier fragment, are left to
/// [`LayoutResolver`](crate::table::LayoutResolver).
pub fn parse_rows(fragment: &str) -> Vec<Tr> {
    let html = if fragment.to_ascii_lowercase().contains("<table") {
        fragment.to_owned()
    } else {
        format!("<table>{fragment}</table>")
    };
    let document = Html::parse_document(&html);
    let Some(table) = document.select(&TABLE).next() else {
        return Vec::new();
    };
    let style = table_style(table);
    rows(table)
        .into_iter()
        .enumerate()
        .map(|(index, (row, section))| parse_row(row, index, &inherit(&style, &section), None))
        .collect()
}

fn parse_table(element: ElementRef<'_>, index: usize) -> Table {
    let caption = element
        .children()
        .filter_map(ElementRef::wrap)
        .find(|child| child.value().name() == "caption")
        .map(|caption| extract_text(caption).replace('\n', " "))
        .filter(|caption| !caption.is_empty())
        .unwrap_or_else(|| format!("Sheet{}", index + 1));

    let mut table = Table::new(caption);
    table.style = table_style(element);
    let mut seized = SeizeMap::new();
    for (index, (row, section)) in rows(element).into_iter().enumerate() {
        let parent = inherit(&table.style, &section);
        table.trs.push(parse_row(row, index, &parent, Some(&mut seized)));
    }
    log::debug!("Parsed table '{}' with {} rows", table.caption, table.trs.len());
    table
}

/// Direct rows of a table, looking through `thead`/`tbody`/`tfoot`, with the section style.
fn rows<'a>(table: ElementRef<'a>) -> Vec<(ElementRef<'a>, StyleMap)> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push((child, StyleMap::new())),
            "thead" | "tbody" | "tfoot" => {
                let style = own_style(child);
                rows.extend(
                    child
                        .children()
                        .filter_map(ElementRef::wrap)
                        .filter(|row| row.value().name() == "tr")
                        .map(|row| (row, style.clone())),
                );
            }
            _ => (),
        }
    }
    rows
}

fn parse_row(row: ElementRef<'_>, index: usize, parent: &StyleMap, mut seized: Option<&mut SeizeMap>) -> Tr {
    let own = own_style(row);
    let mut tr = Tr::new(index);
    tr.style = inherit(parent, &own);
    let keyword = |key: &str, value: &str| own.get(key).is_some_and(|found| found.eq_ignore_ascii_case(value));
    tr.visible = row.value().attr("hidden").is_none() && !keyword("display", "none") && !keyword("visibility", "hidden");
    tr.height = own
        .get("height")
        .map(String::as_str)
        .or(row.value().attr("height"))
        .and_then(parse_points);

    let claimed = seized.as_mut().and_then(|seized| seized.remove(&index)).unwrap_or_default();
    let mut cursor = 0;
    let cells = row
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "td" | "th"));
    for cell in cells {
        while claimed.contains(&cursor) {
            cursor += 1;
        }
        let td = parse_cell(cell, index, cursor, &tr.style);
        cursor = td.col_bound + 1;
        if let Some(seized) = seized.as_mut() {
            for below in index + 1..=td.row_bound {
                seized.entry(below).or_default().extend(td.col..=td.col_bound);
            }
        }
        tr.tds.push(td);
    }
    tr.resolved = seized.is_some();
    tr.measure();
    tr
}

fn parse_cell(cell: ElementRef<'_>, row: usize, col: usize, parent: &StyleMap) -> Td {
    let element = cell.value();
    let mut td = Td::new(row, col);
    td.row_span = normalize_span(parse_span(element.attr("rowspan")));
    td.col_span = normalize_span(parse_span(element.attr("colspan")));
    td.refresh_bounds();
    td.header = element.name() == "th";
    td.style = inherit(parent, &own_style(cell));

    let text = extract_text(cell);
    let text = (!text.is_empty()).then_some(text);
    if let Some(formula) = element.attr("formula") {
        td.content_type = ContentType::Formula;
        td.content = Some(formula.trim().trim_start_matches('=').to_owned());
        return td;
    }
    if let Some(options) = element.attr("dropdownlist") {
        td.content_type = ContentType::Dropdown;
        td.options = options
            .split(',')
            .map(|option| option.trim().to_owned())
            .filter(|option| !option.is_empty())
            .collect();
        td.content = text.or_else(|| td.options.first().cloned());
    } else if let Some(link) = cell.select(&LINK).next() {
        let href = link.value().attr("href").unwrap_or_default().to_owned();
        td.content_type = ContentType::Link;
        td.content = text.or_else(|| Some(href.clone()));
        td.link = Some(href);
    } else if let Some(image) = cell.select(&IMAGE).next() {
        let source = image.value().attr("src").unwrap_or_default().to_owned();
        td.content_type = ContentType::Image;
        td.content = Some(source.clone());
        td.link = Some(source);
        return td;
    } else if let Some(format) = element.attr("date-format") {
        td.content_type = ContentType::Date;
        let format = format.trim();
        td.number_format = Some(if format.is_empty() { DEFAULT_DATE_FORMAT } else { format }.to_owned());
        td.content = text;
    } else {
        td.content_type = match &text {
            Some(_) if element.attr("string").is_some() => ContentType::String,
            Some(text) => classify(text),
            None => ContentType::String,
        };
        td.content = text;
    }
    td.width = td.content.as_deref().map(display_width).unwrap_or(0);
    td
}

/// Missing or non-numeric spans mean "no span".
fn parse_span(value: Option<&str>) -> usize {
    value.and_then(|value| value.trim().parse().ok()).unwrap_or(0)
}

fn own_style(element: ElementRef<'_>) -> StyleMap {
    element.value().attr("style").map(parse_declarations).unwrap_or_default()
}

/// Table style mixed with the styles of its ancestors, outermost first.
fn table_style(table: ElementRef<'_>) -> StyleMap {
    let mut ancestors = table.ancestors().filter_map(ElementRef::wrap).map(own_style).collect::<Vec<_>>();
    ancestors.reverse();
    let inherited = ancestors.iter().fold(StyleMap::new(), |parent, child| inherit(&parent, child));
    inherit(&inherited, &own_style(table))
}

/// Visible text of a cell: whitespace runs collapse to one space, `<br>` and block
/// elements break lines, nested tables are skipped.
fn extract_text(element: ElementRef<'_>) -> String {
    let mut raw = String::new();
    collect_text(element, &mut raw);
    raw.split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_owned()
}

fn collect_text(element: ElementRef<'_>, raw: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            for character in text.chars() {
                if !character.is_whitespace() {
                    raw.push(character);
                } else if !raw.is_empty() && !raw.ends_with([' ', '\n']) {
                    raw.push(' ');
                }
            }
        } else if let Some(child) = ElementRef::wrap(child) {
            match child.value().name() {
                "br" => raw.push('\n'),
                "table" => (),
                "p" | "div" | "li" => {
                    if !raw.is_empty() && !raw.ends_with('\n') {
                        raw.push('\n');
                    }
                    collect_text(child, raw);
                }
                _ => collect_text(child, raw),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::LayoutResolver;
    use pretty_assertions::assert_eq;

    fn positions(tr: &Tr) -> Vec<(usize, Option<&str>)> {
        tr.tds.iter().map(|td| (td.col, td.content.as_deref())).collect()
    }

    #[test]
    fn rowspan_pushes_later_rows_right() {
        let tables = parse_tables(r#"<table><tr><td rowspan="2">A</td><td>B</td></tr><tr><td>C</td></tr></table>"#);
        assert_eq!(tables.len(), 1);
        let table = &tables[0];
        assert_eq!(positions(&table.trs[0]), vec![(0, Some("A")), (1, Some("B"))]);
        assert_eq!(table.trs[0].tds[0].row_span, 2);
        assert_eq!(table.trs[0].tds[0].row_bound, 1);
        assert_eq!(positions(&table.trs[1]), vec![(1, Some("C"))]);
        assert!(table.trs.iter().all(Tr::is_resolved));
    }

    #[test]
    fn colspan_shifts_following_cells() {
        let tables = parse_tables(r#"<table><tr><td colspan="3">wide</td><td>next</td></tr></table>"#);
        let tds = &tables[0].trs[0].tds;
        assert_eq!((tds[0].col, tds[0].col_bound), (0, 2));
        assert_eq!(tds[1].col, 3);
    }

    #[test]
    fn malformed_spans_degrade_to_no_span() {
        let tables = parse_tables(r#"<table><tr><td colspan="x" rowspan="1">a</td><td colspan="-2">b</td></tr></table>"#);
        let tds = &tables[0].trs[0].tds;
        assert_eq!((tds[0].row_span, tds[0].col_span), (0, 0));
        assert_eq!(tds[1].col, 1);
        assert!(!tds[1].is_merged());
    }

    #[test]
    fn content_classification() {
        assert_eq!(classify("12.5"), ContentType::Double);
        assert_eq!(classify("-3"), ContentType::Double);
        assert_eq!(classify("0"), ContentType::Double);
        assert_eq!(classify("007"), ContentType::String);
        assert_eq!(classify("1e5"), ContentType::String);
        assert_eq!(classify("TRUE"), ContentType::Boolean);
        assert_eq!(classify("yes"), ContentType::String);
    }

    #[test]
    fn cell_attributes_select_content_types() {
        let tables = parse_tables(
            r#"<table><tr>
                <td formula="=SUM(A1:A3)">6</td>
                <td string>42</td>
                <td date-format="yyyy-mm-dd">2024-05-01</td>
                <td dropdownlist="low, mid,high"></td>
                <td><a href="https://example.com">site</a></td>
                <td><img src="logo.png"></td>
                <td>first<br>second   line</td>
            </tr></table>"#,
        );
        let tds = &tables[0].trs[0].tds;
        assert_eq!(tds[0].content_type, ContentType::Formula);
        assert_eq!(tds[0].content.as_deref(), Some("SUM(A1:A3)"));
        assert_eq!(tds[1].content_type, ContentType::String);
        assert_eq!(tds[2].content_type, ContentType::Date);
        assert_eq!(tds[2].number_format.as_deref(), Some("yyyy-mm-dd"));
        assert_eq!(tds[3].content_type, ContentType::Dropdown);
        assert_eq!(tds[3].options, vec!["low", "mid", "high"]);
        assert_eq!(tds[3].content.as_deref(), Some("low"));
        assert_eq!(tds[4].content_type, ContentType::Link);
        assert_eq!(tds[4].link.as_deref(), Some("https://example.com"));
        assert_eq!(tds[4].content.as_deref(), Some("site"));
        assert_eq!(tds[5].content_type, ContentType::Image);
        assert_eq!(tds[5].content.as_deref(), Some("logo.png"));
        assert_eq!(tds[6].content.as_deref(), Some("first\nsecond line"));
        assert_eq!(tds[6].width, 6);
    }

    #[test]
    fn captions_nested_tables_and_sections() {
        let tables = parse_tables(
            r#"<table><caption> Sales </caption>
                 <thead style="color: red"><tr><th>Q</th></tr></thead>
                 <tbody><tr><td>inner:<table><tr><td>x</td></tr></table></td></tr></tbody>
               </table>"#,
        );
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].caption, "Sales");
        assert_eq!(tables[0].trs.len(), 2);
        assert!(tables[0].trs[0].tds[0].header);
        assert_eq!(tables[0].trs[0].tds[0].style.get("color").map(String::as_str), Some("red"));
        assert_eq!(tables[0].trs[1].tds[0].content.as_deref(), Some("inner:"));
        assert_eq!(tables[1].caption, "Sheet2");
        assert_eq!(tables[1].trs[0].tds[0].content.as_deref(), Some("x"));
    }

    #[test]
    fn row_visibility_height_and_inherited_styles() {
        let tables = parse_tables(
            r#"<div style="font-size: 10pt"><table style="color: blue; width: 100%">
                 <tr style="height: 30px"><td style="color: green">a</td></tr>
                 <tr style="display: none"><td>b</td></tr>
                 <tr hidden><td>c</td></tr>
               </table></div>"#,
        );
        let table = &tables[0];
        assert_eq!(table.trs[0].height, Some(22.5));
        assert!(table.trs[0].visible);
        assert!(!table.trs[1].visible);
        assert!(!table.trs[2].visible);
        let style = &table.trs[0].tds[0].style;
        assert_eq!(style.get("color").map(String::as_str), Some("green"));
        assert_eq!(style.get("font-size").map(String::as_str), Some("10pt"));
        assert!(!style.contains_key("width"));
        assert!(!style.contains_key("height"));
    }

    #[test]
    fn empty_tables_are_not_errors() {
        let tables = parse_tables("<table></table><table><tr></tr></table>");
        assert_eq!(tables.len(), 2);
        assert!(tables.iter().all(Table::is_empty));
        assert!(parse_tables("<p>no tables</p>").is_empty());
    }

    #[test]
    fn fragments_resolve_to_the_same_grid() {
        let html = r#"<tr><td rowspan="3">A</td><td colspan="2">B</td></tr>
                      <tr><td>C</td><td rowspan="2">D</td></tr>
                      <tr><td>E</td></tr>"#;
        let mut rows = parse_rows(html);
        assert!(rows.iter().all(|tr| !tr.is_resolved()));
        assert_eq!(rows[1].tds[0].col, 0);
        LayoutResolver::default().resolve(&mut rows).expect("best effort");

        let table = parse_tables(&format!("<table>{html}</table>")).remove(0);
        let columns = |trs: &[Tr]| trs.iter().map(|tr| tr.tds.iter().map(|td| td.col).collect::<Vec<_>>()).collect::<Vec<_>>();
        assert_eq!(columns(&rows), vec![vec![0, 1], vec![1, 2], vec![1]]);
        assert_eq!(columns(&rows), columns(&table.trs));
    }
}
