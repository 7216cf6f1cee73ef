//! # HTML Tables to Spreadsheets
//!
//! Converts HTML tables into spreadsheet workbooks and reads workbooks back into records.
//!
//! ## Features
//!
//! - **Faithful layout**: `rowspan`/`colspan` are resolved into collision-free grid columns
//!   and written as merge regions
//! - **Typed cells**: numbers, booleans, dates, formulas, hyperlinks and dropdown lists
//!   driven by cell attributes
//! - **Inline styles**: fonts, colours, alignment, borders, row heights and column widths
//! - **Streaming builds**: a bounded producer/consumer pipeline writes very large exports
//!   with constant memory, spilling into new sheets at the format's row ceiling
//! - **Read path**: `.xlsx` rows back into records, merged ranges expanded to their anchors
//!
//! ## Example
//!
//! ```no_run
//! use rusty_html2sheet::builder::WorkbookBuilder;
//!
//! let html = r#"<table><caption>Totals</caption>
//!     <tr><th rowspan="2">Region</th><th>Q1</th></tr>
//!     <tr><td>42</td></tr>
//! </table>"#;
//! WorkbookBuilder::default().save_html(html, "totals.xlsx")?;
//! # Ok::<(), rusty_html2sheet::error::Html2SheetError>(())
//! ```
pub mod builder;
pub mod emitter;
pub mod error;
mod helpers;
pub mod pipeline;
pub mod reader;
pub mod sink;
pub mod table;
pub mod template;
pub mod writer;

pub use builder::BuildConfig;
pub use builder::SheetStrategy;
pub use builder::WorkbookBuilder;
pub use emitter::WidthStrategy;
pub use error::Html2SheetError;
pub use pipeline::StreamingPipeline;
pub use sink::SheetFormat;
pub use sink::WorkbookSink;
pub use table::parse_rows;
pub use table::parse_tables;
pub use table::LayoutPolicy;
