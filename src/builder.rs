//! # Workbook Builder
//!
//! [`BuildConfig`] is assembled once through [`BuildConfig::builder`] and validated as a
//! whole; a [`WorkbookBuilder`] then runs any number of builds with it. All builds of one
//! builder share its style cache.
use crate::emitter::WidthStrategy;
use crate::error::Html2SheetError;
use crate::pipeline::ConsumerHost;
use crate::pipeline::StreamingPipeline;
use crate::sink::memory::MemorySink;
use crate::sink::FreezePane;
use crate::sink::SheetFormat;
use crate::sink::SinkError;
use crate::sink::StreamingXlsxSink;
use crate::sink::WorkbookSink;
use crate::table::parse_tables;
use crate::table::style::StyleCache;
use crate::table::LayoutPolicy;
use crate::table::Table;
use crate::template::TemplateRenderer;
use crate::writer::SheetWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// How parsed tables map onto sheets.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SheetStrategy {
    /// One sheet per table, named by its caption
    #[default]
    PerTable,
    /// Every table stacked into a single sheet
    Sequential,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Native column auto-sizing is not supported by the {0:?} format")]
    NativeAutoSizeUnsupported(SheetFormat),

    #[error("{0} must be at least 1")]
    ZeroCapacity(&'static str),

    #[error("Sheet capacity of {capacity} rows exceeds the {format:?} ceiling of {ceiling}")]
    CapacityAboveCeiling { capacity: usize, format: SheetFormat, ceiling: usize },

    #[error("{titles} fixed title rows leave no room in sheets of {capacity} rows")]
    TitlesFillSheet { titles: usize, capacity: usize },

    #[error("Freeze pane at column {col_split}, row {row_split} is outside {format:?} sheets")]
    FreezePaneOutOfBounds { col_split: usize, row_split: usize, format: SheetFormat },
}

/// Immutable build configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildConfig {
    pub(crate) format: SheetFormat,
    pub(crate) sheet_capacity: Option<usize>,
    pub(crate) width_strategy: WidthStrategy,
    pub(crate) sheet_strategy: SheetStrategy,
    pub(crate) sheet_name: Option<String>,
    pub(crate) freeze_pane: Option<FreezePane>,
    pub(crate) layout_policy: LayoutPolicy,
    pub(crate) queue_capacity: usize,
    pub(crate) fixed_titles: usize,
    pub(crate) styled: bool,
    pub(crate) drain_timeout: Option<Duration>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            format: SheetFormat::default(),
            sheet_capacity: None,
            width_strategy: WidthStrategy::default(),
            sheet_strategy: SheetStrategy::default(),
            sheet_name: None,
            freeze_pane: None,
            layout_policy: LayoutPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            fixed_titles: 0,
            styled: true,
            drain_timeout: None,
        }
    }
}

impl BuildConfig {
    pub fn builder() -> BuildConfigBuilder {
        BuildConfigBuilder::default()
    }

    pub fn format(&self) -> SheetFormat {
        self.format
    }

    /// Rows per sheet: the configured capacity or the format ceiling.
    pub fn sheet_capacity(&self) -> usize {
        self.sheet_capacity.unwrap_or(self.format.max_rows())
    }

    pub fn width_strategy(&self) -> WidthStrategy {
        self.width_strategy
    }

    pub fn sheet_strategy(&self) -> SheetStrategy {
        self.sheet_strategy
    }

    pub fn layout_policy(&self) -> LayoutPolicy {
        self.layout_policy
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let format = self.format;
        if self.width_strategy == WidthStrategy::Native && !format.supports_native_auto_size() {
            return Err(ConfigError::NativeAutoSizeUnsupported(format));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("Queue capacity"));
        }
        match self.sheet_capacity {
            Some(0) => return Err(ConfigError::ZeroCapacity("Sheet capacity")),
            Some(capacity) if capacity > format.max_rows() => {
                return Err(ConfigError::CapacityAboveCeiling { capacity, format, ceiling: format.max_rows() })
            }
            _ => {}
        }
        let capacity = self.sheet_capacity();
        if self.fixed_titles > 0 && self.fixed_titles >= capacity {
            return Err(ConfigError::TitlesFillSheet { titles: self.fixed_titles, capacity });
        }
        if let Some(FreezePane { col_split, row_split }) = self.freeze_pane {
            if col_split >= format.max_columns() || row_split >= format.max_rows() {
                return Err(ConfigError::FreezePaneOutOfBounds { col_split, row_split, format });
            }
        }
        Ok(())
    }
}

/// Collects settings for a [`BuildConfig`].
#[derive(Clone, Debug, Default)]
pub struct BuildConfigBuilder {
    config: BuildConfig,
}

impl BuildConfigBuilder {
    /// Output format; its ceilings bound the other settings.
    pub fn format(mut self, format: SheetFormat) -> Self {
        self.config.format = format;
        self
    }

    /// Rows per sheet before spilling, at most the format ceiling.
    pub fn sheet_capacity(mut self, rows: usize) -> Self {
        self.config.sheet_capacity = Some(rows);
        self
    }

    /// Column sizing applied when each sheet finishes.
    pub fn width_strategy(mut self, strategy: WidthStrategy) -> Self {
        self.config.width_strategy = strategy;
        self
    }

    pub fn sheet_strategy(mut self, strategy: SheetStrategy) -> Self {
        self.config.sheet_strategy = strategy;
        self
    }

    /// Base sheet name for streamed and sequential output.
    pub fn sheet_name(mut self, name: impl Into<String>) -> Self {
        self.config.sheet_name = Some(name.into());
        self
    }

    /// Frozen pane applied to every finished sheet.
    pub fn freeze_pane(mut self, pane: FreezePane) -> Self {
        self.config.freeze_pane = Some(pane);
        self
    }

    /// Whether conflicting spans are tolerated or rejected.
    pub fn layout_policy(mut self, policy: LayoutPolicy) -> Self {
        self.config.layout_policy = policy;
        self
    }

    /// Batches the streaming queue holds before producers block.
    pub fn queue_capacity(mut self, batches: usize) -> Self {
        self.config.queue_capacity = batches;
        self
    }

    /// Leading rows repeated at the top of every spillover sheet.
    pub fn fixed_titles(mut self, rows: usize) -> Self {
        self.config.fixed_titles = rows;
        self
    }

    /// `false` ignores inline styles, keeping number formats only.
    pub fn styled(mut self, styled: bool) -> Self {
        self.config.styled = styled;
        self
    }

    /// Upper bound on how long `build` waits for the consumer.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = Some(timeout);
        self
    }

    /// Validates the settings as a whole.
    pub fn build(self) -> Result<BuildConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Runs builds with one configuration and a shared style cache.
#[derive(Debug)]
pub struct WorkbookBuilder {
    config: BuildConfig,
    styles: Arc<StyleCache>,
}

impl Default for WorkbookBuilder {
    fn default() -> Self {
        WorkbookBuilder::new(BuildConfig::default())
    }
}

impl WorkbookBuilder {
    pub fn new(config: BuildConfig) -> Self {
        WorkbookBuilder { config, styles: Arc::new(StyleCache::new()) }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn style_cache(&self) -> &Arc<StyleCache> {
        &self.styles
    }

    /// Rejects sinks that cannot honour the configured width strategy.
    fn check_sink<S: WorkbookSink>(&self, sink: &S) -> Result<(), Html2SheetError> {
        let format = sink.format();
        if self.config.width_strategy == WidthStrategy::Native && !format.supports_native_auto_size() {
            Err(SinkError::UnsupportedOperation { operation: "auto_size_column", format })?;
        }
        Ok(())
    }

    fn writer<S: WorkbookSink>(&self, sink: S) -> Result<SheetWriter<S>, Html2SheetError> {
        self.check_sink(&sink)?;
        Ok(SheetWriter::new(sink, &self.config, Arc::clone(&self.styles)))
    }

    /// Writes parsed tables into `sink`, closes it and returns it.
    pub fn build_tables<S: WorkbookSink>(&self, tables: Vec<Table>, sink: S) -> Result<S, Html2SheetError> {
        let mut writer = self.writer(sink)?;
        match self.config.sheet_strategy {
            SheetStrategy::PerTable => {
                for table in tables {
                    writer.begin_sheet(&table.caption)?;
                    writer.write_table(table)?;
                }
            }
            SheetStrategy::Sequential => {
                if let Some(first) = tables.first() {
                    let name = self.config.sheet_name.clone().unwrap_or_else(|| first.caption.clone());
                    writer.begin_sheet(&name)?;
                }
                for table in tables {
                    writer.write_table(table)?;
                }
            }
        }
        writer.finish()
    }

    /// Parses `html` and writes its tables into `sink`.
    pub fn build_html<S: WorkbookSink>(&self, html: &str, sink: S) -> Result<S, Html2SheetError> {
        self.build_tables(parse_tables(html), sink)
    }

    /// Renders `template` with `context`, then builds the resulting HTML.
    pub fn build_template<R, S>(
        &self,
        renderer: &R,
        template: &str,
        context: &R::Context,
        sink: S,
    ) -> Result<S, Html2SheetError>
    where
        R: TemplateRenderer + ?Sized,
        S: WorkbookSink,
    {
        let html = renderer.render(template, context)?;
        self.build_html(&html, sink)
    }

    /// Builds `html` into a file at `path` using the configured format.
    pub fn save_html<P: AsRef<Path>>(&self, html: &str, path: P) -> Result<(), Html2SheetError> {
        match self.config.format {
            SheetFormat::StreamingXlsx => {
                self.build_html(html, StreamingXlsxSink::create(path)?)?;
            }
            SheetFormat::Xlsx => {
                self.build_html(html, MemorySink::new(SheetFormat::Xlsx))?.save(path)?;
            }
            SheetFormat::Xls => Err(SinkError::UnsupportedFormat(SheetFormat::Xls))?,
        }
        Ok(())
    }

    /// Starts a streaming build whose consumer runs on a dedicated thread.
    pub fn stream<S: WorkbookSink + 'static>(&self, sink: S) -> Result<StreamingPipeline<S>, Html2SheetError> {
        self.stream_on(sink, ConsumerHost::Thread)
    }

    /// Starts a streaming build whose consumer runs on `host`.
    pub fn stream_on<S: WorkbookSink + 'static>(
        &self,
        sink: S,
        host: ConsumerHost,
    ) -> Result<StreamingPipeline<S>, Html2SheetError> {
        let writer = self.writer(sink)?;
        let pipeline = StreamingPipeline::new(writer, self.config.queue_capacity, self.config.drain_timeout);
        pipeline.start(host)?;
        Ok(pipeline)
    }
}
