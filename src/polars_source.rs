//! File-backed [`ColumnSource`] built on polars scans.
//!
//! Parquet files expose their physical row groups (read from the footer only).
//! CSV/TSV and Arrow IPC files have no row groups of their own, so fixed-size
//! synthetic groups are laid over the scan instead.

use std::fs::File;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use polars_parquet::parquet::read::read_metadata;

use crate::error::FrameError;
use crate::source::{ColumnChunk, ColumnSource, FileMetadata};
use crate::value::Value;
use crate::FileFormat;

#[derive(Debug, Clone)]
pub struct PolarsSource {
    path: PathBuf,
    format: FileFormat,
    metadata: FileMetadata,
}

impl PolarsSource {
    /// Open `path` and read its metadata. `group_rows` sizes the synthetic
    /// groups of formats without physical row groups.
    pub fn open(path: &Path, format: FileFormat, group_rows: usize) -> Result<Self, FrameError> {
        let mut lf = scan(path, format)?;
        let columns: Vec<String> = lf
            .collect_schema()?
            .iter_names()
            .map(|name| name.to_string())
            .collect();

        let metadata = if format.has_row_groups() {
            let mut file = File::open(path)?;
            let meta = read_metadata(&mut file).map_err(FrameError::decode)?;
            let groups = meta.row_groups.iter().map(|rg| rg.num_rows()).collect();
            FileMetadata::new(columns, groups)
        } else {
            let num_rows = count_rows(lf)?;
            FileMetadata::uniform(columns, num_rows, group_rows)
        };

        Ok(Self {
            path: path.to_path_buf(),
            format,
            metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Read the whole file into memory.
    pub fn collect(&self) -> Result<DataFrame, FrameError> {
        Ok(scan(&self.path, self.format)?.collect()?)
    }
}

impl ColumnSource for PolarsSource {
    fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    fn decode(
        &self,
        row_start: usize,
        row_end: usize,
        columns: Option<&[String]>,
    ) -> Result<Vec<ColumnChunk>, FrameError> {
        let wanted = columns.unwrap_or(&self.metadata.columns);
        if let Some(missing) = wanted.iter().find(|c| !self.metadata.has_column(c)) {
            return Err(FrameError::InvalidColumn(missing.clone()));
        }
        let exprs: Vec<Expr> = wanted.iter().map(|c| col(c.as_str())).collect();
        let df = scan(&self.path, self.format)?
            .slice(row_start as i64, (row_end - row_start) as IdxSize)
            .select(exprs)
            .collect()?;
        if df.height() != row_end - row_start {
            return Err(FrameError::decode(format!(
                "expected {} rows at {}..{}, decoded {}",
                row_end - row_start,
                row_start,
                row_end,
                df.height()
            )));
        }
        wanted
            .iter()
            .map(|name| {
                Ok(ColumnChunk {
                    column: name.clone(),
                    row_start,
                    values: column_values(df.column(name)?)?,
                })
            })
            .collect()
    }
}

fn scan(path: &Path, format: FileFormat) -> Result<LazyFrame, FrameError> {
    let pl_path = PlPath::Local(std::sync::Arc::from(path));
    let lf = match format {
        FileFormat::Parquet => LazyFrame::scan_parquet(pl_path, ScanArgsParquet::default())?,
        FileFormat::Csv => LazyCsvReader::new(pl_path).finish()?,
        FileFormat::Tsv => LazyCsvReader::new(pl_path).with_separator(b'\t').finish()?,
        FileFormat::Arrow => {
            LazyFrame::scan_ipc(pl_path, Default::default(), Default::default())?
        }
    };
    Ok(lf)
}

fn count_rows(lf: LazyFrame) -> Result<usize, FrameError> {
    let df = lf.select([len()]).collect()?;
    match df.get(0).as_ref().and_then(|row| row.first()) {
        Some(AnyValue::UInt32(n)) => Ok(*n as usize),
        Some(AnyValue::UInt64(n)) => Ok(*n as usize),
        other => Err(FrameError::decode(format!(
            "unexpected row count value {:?}",
            other
        ))),
    }
}

/// Every value of a decoded column, in row order.
pub(crate) fn column_values(column: &Column) -> Result<Vec<Value>, FrameError> {
    (0..column.len())
        .map(|i| Ok(Value::from(column.get(i)?)))
        .collect()
}
