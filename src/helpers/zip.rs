//! ZIP archive helper utilities for the XLSX container
//! Provides convenient methods for reading and writing XML parts inside ZIP archives

use crate::error::Html2SheetError;
use crate::helpers::xml::XmlPartWriter;
use crate::helpers::xml::XmlReader;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use std::io::Write;
use zip::read::ZipFile;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;
use zip::ZipArchive;
use zip::ZipWriter;

/// Helper trait for ZIP archive reading with XML reader creation
pub(crate) trait ZipHelper<RS: Read + Seek> {
    /// Gets a file from the ZIP archive by name (case-insensitive, path separator agnostic)
    fn file(&'_ mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, Html2SheetError>;

    /// Creates an XML reader for a file within the ZIP archive
    fn xml_reader(
        &'_ mut self,
        name: &str,
    ) -> Result<Option<XmlReader<BufReader<ZipFile<'_, RS>>>>, Html2SheetError>;
}

impl<RS: Read + Seek> ZipHelper<RS> for ZipArchive<RS> {
    /// Gets a file from the ZIP archive by name with case-insensitive matching
    /// and path separator normalization (backslash to forward slash)
    fn file(&'_ mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, Html2SheetError> {
        let pattern = name.replace('\\', "/");
        let path = self.file_names()
            .find(|file_name| pattern.eq_ignore_ascii_case(*file_name))
            .map(|file_name| file_name.to_owned());
        match path.map(|file_name| self.by_name(&file_name)).transpose() {
            Ok(Some(file)) => Ok(Some(file)),
            Ok(None) | Err(ZipError::FileNotFound) => Ok(None),
            Err(error) => Err(error)?,
        }
    }

    /// Creates an XML reader for a file within the ZIP archive
    fn xml_reader(
        &'_ mut self,
        name: &str,
    ) -> Result<Option<XmlReader<BufReader<ZipFile<'_, RS>>>>, Html2SheetError> {
        let reader = self
            .file(name)?
            .map(|file| XmlReader::new(BufReader::new(file)));
        Ok(reader)
    }
}

/// Helper trait for ZIP archive writing with XML part creation
pub(crate) trait ZipWriterHelper<W: Write + Seek> {
    /// Starts a deflated entry and returns an XML writer positioned after its declaration
    fn xml_part(&'_ mut self, name: &str) -> Result<XmlPartWriter<&'_ mut ZipWriter<W>>, Html2SheetError>;
}

impl<W: Write + Seek> ZipWriterHelper<W> for ZipWriter<W> {
    fn xml_part(&'_ mut self, name: &str) -> Result<XmlPartWriter<&'_ mut ZipWriter<W>>, Html2SheetError> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        self.start_file(name, options)?;
        let mut writer = XmlPartWriter::new(self);
        writer.declaration()?;
        Ok(writer)
    }
}
