use thiserror::Error;

/// Main error type for the html2sheet crate.
/// Aggregates errors from various sources including standard library, dependencies, and internal modules.
#[derive(Error, Debug)]
pub enum Html2SheetError {
    #[error("{0}")]
    WithContextError(String),

    #[error("{0}")]
    AnyhowError(#[from] anyhow::Error),

    // Standard library errors
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error("{0}")]
    StringEncodingError(#[from] std::str::Utf8Error),

    #[error("{0}")]
    PatternError(#[from] glob::PatternError),

    // Third-party library errors
    #[error("{0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("{0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("{0}")]
    XmlEncodingError(#[from] quick_xml::encoding::EncodingError),

    #[error("{0}")]
    XmlAttributeError(#[from] quick_xml::events::attributes::AttrError),

    // Helper module errors
    #[error("{0}")]
    XmlHelperError(#[from] crate::helpers::xml::XmlError),

    // Table module errors
    #[error("{0}")]
    LayoutError(#[from] crate::table::LayoutError),

    // Output errors
    #[error("{0}")]
    SinkError(#[from] crate::sink::SinkError),

    #[error("{0}")]
    PipelineError(#[from] crate::pipeline::PipelineError),

    #[error("{0}")]
    ConfigError(#[from] crate::builder::ConfigError),

    #[error("{0}")]
    TemplateError(#[from] crate::template::TemplateError),

    // Reader module errors
    #[error("{0}")]
    SpreadsheetError(#[from] crate::reader::SpreadsheetError),

    #[error("{0}")]
    RangeError(#[from] crate::reader::range::RangeError),
}

/// Prefixes the failing operation onto an error message.
pub trait ResultMessage {
    fn with_prefix(self, message: &str) -> Self;
}

impl<T> ResultMessage for Result<T, Html2SheetError> {
    fn with_prefix(self, message: &str) -> Self {
        self.map_err(|e| Html2SheetError::WithContextError(format!("{}: {}", message, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_names_the_operation() {
        let result: Result<(), Html2SheetError> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
        let message = result.with_prefix("write sheet1").unwrap_err().to_string();
        assert_eq!(message, "write sheet1: disk full");
    }
}
