use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pagewise::{LayoutContext, PaginateOptions, Tier};

/// Paginate chapter text against a monospace measurement grid.
#[derive(Debug, Parser)]
#[command(name = "pagewise", about, version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compute page start offsets and print them as JSON
    Paginate {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        layout: LayoutArgs,

        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        cache: CacheArgs,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Print the content of one page
    Page {
        #[command(flatten)]
        input: InputArgs,

        /// Zero-based page index
        #[arg(long)]
        index: usize,

        #[command(flatten)]
        layout: LayoutArgs,

        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        cache: CacheArgs,

        /// Print the page with its offsets as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the cache fingerprint of a layout
    Fingerprint {
        #[command(flatten)]
        layout: LayoutArgs,
    },
}

/// Chapter source.
#[derive(Debug, Args)]
pub struct InputArgs {
    /// Chapter file (plain text, or XHTML with --markup)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Treat the file as XHTML markup
    #[arg(long)]
    pub markup: bool,
}

/// Layout parameters.
#[derive(Debug, Args)]
pub struct LayoutArgs {
    /// Font size in CSS pixels
    #[arg(long, default_value_t = 16.0)]
    pub font_size: f32,

    /// Line height as a multiple of the font size
    #[arg(long, default_value_t = 1.5)]
    pub line_height: f32,

    /// Font family
    #[arg(long, default_value = "serif")]
    pub font_family: String,

    /// Content box width in CSS pixels
    #[arg(long, default_value_t = 600.0)]
    pub width: f32,

    /// Content box height in CSS pixels
    #[arg(long, default_value_t = 800.0)]
    pub height: f32,
}

impl LayoutArgs {
    pub fn layout(&self) -> LayoutContext {
        LayoutContext::for_box(self.width, self.height)
            .with_font_size(self.font_size)
            .with_line_height(self.line_height)
            .with_font_family(self.font_family.clone())
    }
}

/// Run limits.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Offset (in chars) to start paginating from
    #[arg(long, default_value_t = 0)]
    pub start: usize,

    /// Page cap for the run
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Search window in chars
    #[arg(long)]
    pub window: Option<usize>,
}

impl RunArgs {
    pub fn options(&self) -> PaginateOptions {
        let mut options = Tier::Fast.options();
        if let Some(max_iterations) = self.max_iterations {
            options = options.with_max_iterations(max_iterations);
        }
        if let Some(window) = self.window {
            options = options.with_window_chars(window);
        }
        options
    }
}

/// Boundary cache location.
#[derive(Debug, Args)]
pub struct CacheArgs {
    /// Directory for cached boundaries
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Book id for the cache entry (default: file name)
    #[arg(long, requires = "cache_dir")]
    pub book: Option<String>,

    /// Chapter id for the cache entry (default: "0")
    #[arg(long, requires = "cache_dir")]
    pub chapter: Option<String>,
}
