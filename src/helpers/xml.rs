//! XML utilities shared by the XLSX reader and the XLSX sinks.
//! Provides a tuned event reader, attribute/text helper traits and a small element writer.

use crate::error::Html2SheetError;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::BytesDecl;
use quick_xml::events::BytesEnd;
use quick_xml::events::BytesRef;
use quick_xml::events::BytesStart;
use quick_xml::events::BytesText;
use quick_xml::events::Event;
use quick_xml::Reader;
use quick_xml::Writer;
use std::borrow::Cow;
use std::io::BufRead;
use std::io::Write;
use std::str::FromStr;
use thiserror::Error;

/// Errors specific to XML parsing operations
#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Parse entity '{0}' failed")]
    ParseEntityError(String),

    #[error("Parse attribute value '{0}' failed")]
    ParseAttributeValueError(String),
}

/// XML reader wrapper configured for spreadsheet parts
pub(crate) struct XmlReader<R: BufRead> {
    reader: Reader<R>,
    buffer: Vec<u8>,
}

impl<R: BufRead> XmlReader<R> {
    pub(crate) fn new(buf_reader: R) -> XmlReader<R> {
        let mut reader = Reader::from_reader(buf_reader);
        let config = reader.config_mut();
        config.check_comments = false;
        config.check_end_names = false;
        config.expand_empty_elements = true;
        config.trim_text(false);

        let buffer = Vec::with_capacity(1024);
        XmlReader { reader, buffer }
    }

    /// Reads the next XML event, `None` at end of document
    pub(crate) fn next(&'_ mut self) -> Result<Option<Event<'_>>, Html2SheetError> {
        self.buffer.clear();
        match self.reader.read_event_into(&mut self.buffer) {
            Ok(Event::Eof) => Ok(None),
            Ok(event) => Ok(Some(event)),
            Err(error) => Err(Html2SheetError::XmlError(error)),
        }
    }
}

/// Helper trait for XML attributes providing convenient value extraction and parsing
pub(crate) trait XmlAttributeHelper<'a> {
    /// Gets the unescaped attribute value as a string
    fn get_value(&self) -> Result<Cow<'a, str>, Html2SheetError>;

    /// Parses the attribute value to the specified type
    fn parse_value<T: FromStr>(&self) -> Result<T, Html2SheetError>;
}

impl<'a> XmlAttributeHelper<'a> for Attribute<'a> {
    /// Gets the unescaped attribute value
    fn get_value(&self) -> Result<Cow<'a, str>, Html2SheetError> {
        Ok(self.unescape_value()?)
    }

    /// Parses the attribute value to the specified type
    fn parse_value<T: FromStr>(&self) -> Result<T, Html2SheetError> {
        self.get_value()?
            .parse()
            .map_err(|_| match std::str::from_utf8(&self.value) {
                Ok(value) => Html2SheetError::XmlHelperError(XmlError::ParseAttributeValueError(value.to_string())),
                Err(error) => Html2SheetError::StringEncodingError(error),
            })
    }
}

/// Helper trait for XML nodes providing attribute access methods
pub(crate) trait XmlNodeHelper<'a> {
    /// Gets an attribute value by name
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, Html2SheetError>;

    /// Parses an attribute value to the specified type
    fn parse_attribute_value<T: FromStr>(&self, name: &str) -> Result<Option<T>, Html2SheetError>;
}

impl<'a> XmlNodeHelper<'a> for BytesStart<'a> {
    /// Gets an attribute value by name
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, Html2SheetError> {
        self.try_get_attribute(name)?
            .map(|attribute| attribute.get_value())
            .transpose()
    }

    /// Parses an attribute value to the specified type
    fn parse_attribute_value<T: FromStr>(&self, name: &str) -> Result<Option<T>, Html2SheetError> {
        self.try_get_attribute(name)?
            .map(|attribute| attribute.parse_value())
            .transpose()
    }
}

/// Helper trait for building text content from XML events
pub(crate) trait XmlTextContextHelper {
    /// Appends text content from BytesRef event (handles entities and character references)
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), Html2SheetError>;
}

impl XmlTextContextHelper for String {
    /// Appends text content from BytesRef event, handling XML entities and character references
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), Html2SheetError> {
        let raw = bytes.xml_content()?;
        if let Some(number) = raw.strip_prefix('#') {
            let code = if let Some(hex) = number.strip_prefix('x') {
                u32::from_str_radix(hex, 16)?
            } else {
                number.parse::<u32>()?
            };
            if let Some(character) = std::char::from_u32(code) {
                self.push(character);
            }
        } else if let Some(entity) = resolve_xml_entity(&raw) {
            self.push_str(entity);
        } else {
            Err(XmlError::ParseEntityError(raw.to_string()))?;
        }

        Ok(())
    }
}

#[macro_export]
macro_rules! match_xml_events {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(result) = $reader.next()? {
            match result {
                Event::Eof => break,
                $($arms)*
                _ => (),
            }
        }
    };
}

/// Thin element writer over `quick_xml::Writer` used for the XLSX parts.
pub(crate) struct XmlPartWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> XmlPartWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        XmlPartWriter { writer: Writer::new(inner) }
    }

    /// Writes the standalone XML declaration every OOXML part starts with
    pub(crate) fn declaration(&mut self) -> Result<(), Html2SheetError> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        Ok(())
    }

    pub(crate) fn start(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), Html2SheetError> {
        let mut element = BytesStart::new(name);
        for attribute in attributes {
            element.push_attribute(*attribute);
        }
        self.writer.write_event(Event::Start(element))?;
        Ok(())
    }

    pub(crate) fn empty(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), Html2SheetError> {
        let mut element = BytesStart::new(name);
        for attribute in attributes {
            element.push_attribute(*attribute);
        }
        self.writer.write_event(Event::Empty(element))?;
        Ok(())
    }

    pub(crate) fn end(&mut self, name: &str) -> Result<(), Html2SheetError> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    /// Writes escaped character data
    pub(crate) fn text(&mut self, text: &str) -> Result<(), Html2SheetError> {
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        Ok(())
    }

    /// Writes `<name attributes>text</name>`
    pub(crate) fn text_element(&mut self, name: &str, attributes: &[(&str, &str)], text: &str) -> Result<(), Html2SheetError> {
        self.start(name, attributes)?;
        self.text(text)?;
        self.end(name)
    }

    /// Mutable access to the underlying sink, for splicing pre-rendered content
    pub(crate) fn inner(&mut self) -> &mut W {
        self.writer.get_mut()
    }

    pub(crate) fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_xml_events;

    #[test]
    fn writer_escapes_text_and_attributes() {
        let mut writer = XmlPartWriter::new(Vec::new());
        writer.start("c", &[("r", "A1"), ("t", "inlineStr")]).unwrap();
        writer.text_element("t", &[], "a < b & c").unwrap();
        writer.end("c").unwrap();
        let xml = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(xml, r#"<c r="A1" t="inlineStr"><t>a &lt; b &amp; c</t></c>"#);
    }

    #[test]
    fn reader_resolves_entities_and_character_references() -> Result<(), Html2SheetError> {
        let mut reader = XmlReader::new("<t>a&amp;b&#65;&#x42;</t>".as_bytes());
        let mut text = String::new();
        match_xml_events!(reader => {
            Event::Text(event) => text.push_str(&event.xml_content()?),
            Event::GeneralRef(event) => text.push_bytes_ref(&event)?,
        });
        assert_eq!(text, "a&bAB");
        Ok(())
    }

    #[test]
    fn reader_parses_attribute_values() -> Result<(), Html2SheetError> {
        let mut reader = XmlReader::new(r#"<row r="12" spans="x"/>"#.as_bytes());
        let mut row = None::<usize>;
        let mut failed = false;
        match_xml_events!(reader => {
            Event::Start(event) => {
                row = event.parse_attribute_value::<usize>("r")?;
                failed = event.parse_attribute_value::<usize>("spans").is_err();
            }
        });
        assert_eq!(row, Some(12));
        assert!(failed);
        Ok(())
    }
}
