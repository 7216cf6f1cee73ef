//! html2sheet CLI - converts the tables of an HTML file into an `.xlsx` workbook

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::ValueEnum;
use rusty_html2sheet::sink::memory::MemorySink;
use rusty_html2sheet::sink::FreezePane;
use rusty_html2sheet::sink::StreamingXlsxSink;
use rusty_html2sheet::BuildConfig;
use rusty_html2sheet::LayoutPolicy;
use rusty_html2sheet::SheetFormat;
use rusty_html2sheet::SheetStrategy;
use rusty_html2sheet::WidthStrategy;
use rusty_html2sheet::WorkbookBuilder;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "html2sheet")]
#[command(version)]
#[command(about = "Convert the tables of an HTML document into an xlsx workbook", long_about = None)]
struct Cli {
    /// HTML input file
    input: PathBuf,

    /// Output workbook path
    #[arg(short, long)]
    output: PathBuf,

    /// Write through the disk-backed streaming sink
    #[arg(long)]
    streaming: bool,

    /// Stack every table into one sheet instead of one sheet per table
    #[arg(long)]
    sequential: bool,

    /// Column sizing
    #[arg(long, value_enum, default_value_t = Width::Computed)]
    width: Width,

    /// Rows frozen at the top of every sheet
    #[arg(long, default_value_t = 0)]
    freeze_rows: usize,

    /// Columns frozen at the left of every sheet
    #[arg(long, default_value_t = 0)]
    freeze_cols: usize,

    /// Rows per sheet before spilling into a new one
    #[arg(long)]
    sheet_capacity: Option<usize>,

    /// Sheet name for sequential output
    #[arg(long)]
    sheet_name: Option<String>,

    /// Fail on overlapping spans instead of warning
    #[arg(long)]
    strict: bool,

    /// Ignore inline styles
    #[arg(long)]
    plain: bool,
}

#[derive(Copy, Clone, ValueEnum)]
enum Width {
    None,
    Native,
    Computed,
}

impl From<Width> for WidthStrategy {
    fn from(width: Width) -> Self {
        match width {
            Width::None => WidthStrategy::None,
            Width::Native => WidthStrategy::Native,
            Width::Computed => WidthStrategy::Computed,
        }
    }
}

fn config(cli: &Cli) -> Result<BuildConfig> {
    let mut builder = BuildConfig::builder()
        .format(if cli.streaming { SheetFormat::StreamingXlsx } else { SheetFormat::Xlsx })
        .width_strategy(cli.width.into())
        .sheet_strategy(if cli.sequential { SheetStrategy::Sequential } else { SheetStrategy::PerTable })
        .layout_policy(if cli.strict { LayoutPolicy::Strict } else { LayoutPolicy::BestEffort })
        .styled(!cli.plain);
    if cli.freeze_rows > 0 || cli.freeze_cols > 0 {
        builder = builder.freeze_pane(FreezePane { col_split: cli.freeze_cols, row_split: cli.freeze_rows });
    }
    if let Some(rows) = cli.sheet_capacity {
        builder = builder.sheet_capacity(rows);
    }
    if let Some(name) = &cli.sheet_name {
        builder = builder.sheet_name(name);
    }
    builder.build().context("Invalid options")
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = config(&cli)?;
    let html = fs::read_to_string(&cli.input).with_context(|| format!("Failed to read {}", cli.input.display()))?;

    let builder = WorkbookBuilder::new(config);
    let sheets = if cli.streaming {
        let sink = StreamingXlsxSink::create(&cli.output)?;
        builder.build_html(&html, sink)?.sheet_names().len()
    } else {
        let sink = builder.build_html(&html, MemorySink::new(SheetFormat::Xlsx))?;
        sink.save(&cli.output)?;
        sink.workbook().sheets.len()
    };
    log::info!("Wrote {sheets} sheets to {}", cli.output.display());
    Ok(())
}
