#![allow(dead_code)]

use framecache::{
    AsyncRow, ColumnChunk, ColumnSource, FileMetadata, Frame, FrameError, MemorySource, Value,
};
use polars::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One `decode` call seen by a [`SpySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeCall {
    pub row_start: usize,
    pub row_end: usize,
    pub columns: Option<Vec<String>>,
}

/// In-memory source that records every decode and can be told to fail some.
pub struct SpySource {
    inner: MemorySource,
    calls: Mutex<Vec<DecodeCall>>,
    failing_rows: Option<Range<usize>>,
    failing_columns: Mutex<HashMap<String, usize>>,
}

impl SpySource {
    pub fn new(columns: Vec<(&str, Vec<Value>)>, group_rows: usize) -> Self {
        let columns = columns
            .into_iter()
            .map(|(name, values)| (name.to_string(), values))
            .collect();
        Self {
            inner: MemorySource::new(columns, group_rows).expect("valid test table"),
            calls: Mutex::new(Vec::new()),
            failing_rows: None,
            failing_columns: Mutex::new(HashMap::new()),
        }
    }

    /// Whole-row decodes touching `rows` fail with a decode error.
    pub fn fail_rows(mut self, rows: Range<usize>) -> Self {
        self.failing_rows = Some(rows);
        self
    }

    /// The next `times` single-column decodes of `column` fail.
    pub fn fail_column(self, column: &str, times: usize) -> Self {
        self.failing_columns
            .lock()
            .unwrap()
            .insert(column.to_string(), times);
        self
    }

    pub fn calls(&self) -> Vec<DecodeCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Start rows of every whole-row (group) decode, in call order.
    pub fn group_fetches(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter(|call| call.columns.is_none())
            .map(|call| call.row_start)
            .collect()
    }

    /// How many single-column decodes of `column` over all rows were made.
    pub fn rank_decodes(&self, column: &str) -> usize {
        let num_rows = self.inner.metadata().num_rows();
        self.calls()
            .into_iter()
            .filter(|call| {
                call.row_start == 0
                    && call.row_end == num_rows
                    && call.columns.as_deref() == Some(&[column.to_string()][..])
            })
            .count()
    }
}

impl ColumnSource for SpySource {
    fn metadata(&self) -> &FileMetadata {
        self.inner.metadata()
    }

    fn decode(
        &self,
        row_start: usize,
        row_end: usize,
        columns: Option<&[String]>,
    ) -> Result<Vec<ColumnChunk>, FrameError> {
        self.calls.lock().unwrap().push(DecodeCall {
            row_start,
            row_end,
            columns: columns.map(|c| c.to_vec()),
        });
        match columns {
            None => {
                if let Some(bad) = &self.failing_rows {
                    if bad.start < row_end && row_start < bad.end {
                        return Err(FrameError::decode(format!(
                            "corrupt page in rows {}..{}",
                            row_start, row_end
                        )));
                    }
                }
            }
            Some(columns) => {
                let mut failing = self.failing_columns.lock().unwrap();
                for column in columns {
                    if let Some(remaining) = failing.get_mut(column).filter(|n| **n > 0) {
                        *remaining -= 1;
                        return Err(FrameError::decode(format!("cannot decode {}", column)));
                    }
                }
            }
        }
        self.inner.decode(row_start, row_end, columns)
    }
}

/// 100 rows in four groups of 25. `k` is a permutation of 0..100 scattered
/// across the groups; `id` is the physical row number.
pub fn scattered_source() -> SpySource {
    SpySource::new(
        vec![
            ("id", (0..100).map(Value::from).collect()),
            ("k", (0..100).map(|i| Value::from((i * 37) % 100)).collect()),
        ],
        25,
    )
}

/// Pump `frame` until every row settles (or a generous deadline passes).
pub fn settle(frame: &dyn Frame, rows: &[AsyncRow]) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !rows.iter().all(AsyncRow::is_settled) && Instant::now() < deadline {
        frame.pump(Some(Duration::from_millis(20)));
    }
    assert!(
        rows.iter().all(AsyncRow::is_settled),
        "rows did not settle in time"
    );
}

pub fn cell(row: &AsyncRow, column: &str) -> Option<Value> {
    row.cell(column).expect("column in header").resolved()
}

/// Write a parquet file with `rows` rows split into groups of `group_rows`.
pub fn write_parquet(dir: &Path, rows: i64, group_rows: usize) -> PathBuf {
    let path = dir.join("fixture.parquet");
    let mut df = df!(
        "id" => (0..rows).collect::<Vec<i64>>(),
        "k" => (0..rows).map(|i| (i * 37) % rows).collect::<Vec<i64>>(),
        "name" => (0..rows).map(|i| format!("row_{}", i)).collect::<Vec<String>>()
    )
    .unwrap();
    let mut file = File::create(&path).unwrap();
    ParquetWriter::new(&mut file)
        .with_row_group_size(Some(group_rows))
        .finish(&mut df)
        .unwrap();
    path
}
