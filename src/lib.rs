//! Windowed, asynchronously materialized access to large columnar files.
//!
//! A [`Frame`] answers "rows `start..end`, optionally ordered by a column"
//! immediately, with rows whose cells are [`Deferred`] values. Decoding and
//! rank computation happen on a background worker owned by the frame; the
//! caller delivers results by pumping the frame from its own event loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

pub mod client;
pub mod config;
pub mod deferred;
pub mod error;
pub mod frame;
pub mod polars_source;
pub mod rank;
pub mod row_group;
pub mod sortable;
pub mod source;
pub mod value;
pub mod worker;

pub use client::{Reply, RequestHandle, WorkerClient};
pub use config::{AppConfig, ConfigManager, FrameOptions};
pub use deferred::{Deferred, Resolver};
pub use error::FrameError;
pub use frame::{collect_rows, AsyncRow, Frame, Header, Row, RowSlots, RowsQuery};
pub use framecache_cli::{Args, FileFormat};
pub use polars_source::PolarsSource;
pub use rank::{compute_ranks, SortIndex};
pub use row_group::RowGroupFrame;
pub use sortable::{MemoryFrame, Sortable};
pub use source::{ColumnChunk, ColumnSource, FileMetadata, GroupLayout, MemorySource, RowGroup};
pub use value::Value;

/// Application name used for the config directory and other app-specific paths
pub const APP_NAME: &str = "framecache";

/// How [`open`] should read a file.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOptions {
    pub format: Option<FileFormat>,
    pub in_memory: bool,
    pub group_rows: usize,
    pub frame: FrameOptions,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::from(&AppConfig::default())
    }

    pub fn with_format(mut self, format: FileFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_in_memory(mut self, in_memory: bool) -> Self {
        self.in_memory = in_memory;
        self
    }

    pub fn with_group_rows(mut self, group_rows: usize) -> Self {
        self.group_rows = group_rows;
        self
    }

    pub fn with_progressive(mut self, progressive: bool) -> Self {
        self.frame.progressive = progressive;
        self
    }

    pub fn with_frame_options(mut self, frame: FrameOptions) -> Self {
        self.frame = frame;
        self
    }

    /// Config defaults, overridden by whatever the command line sets.
    pub fn from_args(args: &Args, config: &AppConfig) -> Self {
        let mut opts = Self::from(config).with_in_memory(args.in_memory);
        if let Some(format) = args.format {
            opts = opts.with_format(format);
        }
        if let Some(group_rows) = args.group_rows {
            opts = opts.with_group_rows(group_rows);
        }
        if args.progressive {
            opts = opts.with_progressive(true);
        }
        opts
    }

    fn resolve_format(&self, path: &Path) -> Result<FileFormat, FrameError> {
        self.format
            .or_else(|| FileFormat::from_path(path))
            .ok_or_else(|| {
                FrameError::decode(format!(
                    "Cannot tell the format of {}; pass --format",
                    path.display()
                ))
            })
    }
}

impl From<&AppConfig> for OpenOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            format: None,
            in_memory: false,
            group_rows: config.source.group_rows,
            frame: FrameOptions::from(config),
        }
    }
}

/// Open `path` as a frame.
///
/// By default the file is read lazily, one row group at a time, on a background
/// worker. With `in_memory` the whole file is collected up front and sorted in
/// memory instead.
pub fn open(path: impl Into<PathBuf>, opts: &OpenOptions) -> Result<Box<dyn Frame>, FrameError> {
    let path = path.into();
    let format = opts.resolve_format(&path)?;
    let source = PolarsSource::open(&path, format, opts.group_rows)?;
    debug!(
        path = %path.display(),
        ?format,
        rows = source.metadata().num_rows(),
        in_memory = opts.in_memory,
        "opening frame"
    );
    if opts.in_memory {
        let df = source.collect()?;
        return Ok(Box::new(Sortable::new(MemoryFrame::from_dataframe(&df)?)));
    }
    Ok(Box::new(RowGroupFrame::new(Arc::new(source), &opts.frame)?))
}
