//! Shared CLI definitions for framecache.
//!
//! Used by the main binary and by the build script (manpage).

use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

/// File format for data files (used to bypass extension-based detection).
/// When `--format` is not specified, format is auto-detected from the file extension.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum FileFormat {
    /// Parquet columnar format (physical row groups)
    Parquet,
    /// Comma-separated values
    Csv,
    /// Tab-separated values
    Tsv,
    /// Arrow IPC / Feather
    Arrow,
}

impl FileFormat {
    /// Detect file format from path extension. Returns None when extension is missing or unknown.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Parse format from extension string (e.g. "parquet", "csv").
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "parquet" => Some(Self::Parquet),
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            "arrow" | "ipc" | "feather" => Some(Self::Arrow),
            _ => None,
        }
    }

    /// Whether the format stores physical row groups that can be fetched independently.
    pub fn has_row_groups(&self) -> bool {
        matches!(self, Self::Parquet)
    }
}

/// Command-line arguments for framecache
#[derive(Clone, Parser, Debug)]
#[command(
    name = "framecache",
    version,
    about = "Print a window of rows from a large columnar file, optionally sorted by a column"
)]
pub struct Args {
    /// Path to the data file to open (not required with --init-config)
    #[arg(required_unless_present = "init_config", value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// First row of the window (0-based, inclusive)
    #[arg(long = "start", default_value_t = 0)]
    pub start: usize,

    /// End of the window (exclusive). Default: start + [display] window from config
    #[arg(long = "end")]
    pub end: Option<usize>,

    /// Sort the whole file by this column (ascending, nulls last) before taking the window
    #[arg(long = "order-by", value_name = "COLUMN")]
    pub order_by: Option<String>,

    /// Load the whole file into memory and sort there instead of fetching row groups lazily
    #[arg(long = "in-memory", action)]
    pub in_memory: bool,

    /// Force file format (parquet, csv, tsv, arrow).
    /// By default format is auto-detected from the file extension.
    #[arg(long = "format", value_enum)]
    pub format: Option<FileFormat>,

    /// Rows per synthetic group for formats without physical row groups (overrides config)
    #[arg(long = "group-rows", value_name = "N")]
    pub group_rows: Option<usize>,

    /// Resolve cells column by column as the background worker decodes them
    #[arg(long = "progressive", action)]
    pub progressive: bool,

    /// Print rows as JSON objects, one per line
    #[arg(long = "json", action)]
    pub json: bool,

    /// Print header, row count and row-group layout before the rows
    #[arg(long = "info", action)]
    pub info: bool,

    /// Enable debug logging (overridden by RUST_LOG when set)
    #[arg(long = "debug", action)]
    pub debug: bool,

    /// Write a commented default configuration file to ~/.config/framecache/config.toml
    #[arg(long = "init-config", action)]
    pub init_config: bool,

    /// Force overwrite existing config file when using --init-config
    #[arg(long = "force", requires = "init_config", action)]
    pub force: bool,
}
