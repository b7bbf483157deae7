//! The decoder boundary: file metadata, row-group layout and column decoding.
//!
//! A [`ColumnSource`] is handed to the background worker and is the only thing
//! that ever touches file bytes. Frames see its [`FileMetadata`] once, at
//! construction, and otherwise only talk to it through worker requests.

use std::ops::Range;

use crate::error::FrameError;
use crate::value::Value;

/// Column names and per-group row counts, read once when a file is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub columns: Vec<String>,
    pub group_rows: Vec<usize>,
}

impl FileMetadata {
    pub fn new(columns: Vec<String>, group_rows: Vec<usize>) -> Self {
        Self {
            columns,
            group_rows,
        }
    }

    /// Lay fixed-size groups over `num_rows` rows; the last group may be short.
    pub fn uniform(columns: Vec<String>, num_rows: usize, group_rows: usize) -> Self {
        let size = group_rows.max(1);
        let mut groups = Vec::with_capacity(num_rows.div_ceil(size));
        let mut remaining = num_rows;
        while remaining > 0 {
            let n = remaining.min(size);
            groups.push(n);
            remaining -= n;
        }
        Self::new(columns, groups)
    }

    pub fn num_rows(&self) -> usize {
        self.group_rows.iter().sum()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// One contiguous slice of the file's rows, the unit of fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowGroup {
    pub index: usize,
    pub row_start: usize,
    pub row_end: usize,
}

impl RowGroup {
    pub fn len(&self) -> usize {
        self.row_end - self.row_start
    }

    pub fn is_empty(&self) -> bool {
        self.row_start == self.row_end
    }

    pub fn rows(&self) -> Range<usize> {
        self.row_start..self.row_end
    }
}

/// Prefix sums of group sizes. Empty groups are dropped so `ends` is strictly
/// increasing and every row belongs to exactly one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLayout {
    ends: Vec<usize>,
}

impl GroupLayout {
    pub fn new(group_rows: &[usize]) -> Self {
        let mut ends = Vec::with_capacity(group_rows.len());
        let mut total = 0;
        for &rows in group_rows.iter().filter(|&&rows| rows > 0) {
            total += rows;
            ends.push(total);
        }
        Self { ends }
    }

    pub fn num_rows(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    pub fn group(&self, index: usize) -> RowGroup {
        let row_start = if index == 0 { 0 } else { self.ends[index - 1] };
        RowGroup {
            index,
            row_start,
            row_end: self.ends[index],
        }
    }

    pub fn groups(&self) -> impl Iterator<Item = RowGroup> + '_ {
        (0..self.ends.len()).map(|i| self.group(i))
    }

    /// Index of the group holding `row`. `row` must be below `num_rows()`.
    pub fn group_of(&self, row: usize) -> usize {
        self.ends.partition_point(|&end| end <= row)
    }

    /// Groups whose rows intersect `[start, end)`.
    pub fn overlapping(&self, start: usize, end: usize) -> Range<usize> {
        let end = end.min(self.num_rows());
        if start >= end {
            return 0..0;
        }
        self.group_of(start)..self.group_of(end - 1) + 1
    }
}

/// Decoded values of one column for a contiguous run of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnChunk {
    pub column: String,
    pub row_start: usize,
    pub values: Vec<Value>,
}

/// A decodable columnar file. Implementations run on the background worker thread.
pub trait ColumnSource: Send + Sync {
    fn metadata(&self) -> &FileMetadata;

    /// Decode rows `[row_start, row_end)` of `columns` (all columns when `None`).
    fn decode(
        &self,
        row_start: usize,
        row_end: usize,
        columns: Option<&[String]>,
    ) -> Result<Vec<ColumnChunk>, FrameError>;
}

/// An already-decoded table exposed through the same row-group interface as a file.
#[derive(Debug, Clone)]
pub struct MemorySource {
    metadata: FileMetadata,
    data: Vec<Vec<Value>>,
}

impl MemorySource {
    /// Build from column-major data. Every column must have the same length.
    pub fn new(
        columns: Vec<(String, Vec<Value>)>,
        group_rows: usize,
    ) -> Result<Self, FrameError> {
        let num_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        if let Some((name, values)) = columns.iter().find(|(_, v)| v.len() != num_rows) {
            return Err(FrameError::decode(format!(
                "column {} has {} rows, expected {}",
                name,
                values.len(),
                num_rows
            )));
        }
        let (names, data): (Vec<String>, Vec<Vec<Value>>) = columns.into_iter().unzip();
        Ok(Self {
            metadata: FileMetadata::uniform(names, num_rows, group_rows),
            data,
        })
    }

    fn column_index(&self, column: &str) -> Result<usize, FrameError> {
        self.metadata
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| FrameError::InvalidColumn(column.to_string()))
    }
}

impl ColumnSource for MemorySource {
    fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    fn decode(
        &self,
        row_start: usize,
        row_end: usize,
        columns: Option<&[String]>,
    ) -> Result<Vec<ColumnChunk>, FrameError> {
        let num_rows = self.metadata.num_rows();
        if row_start > row_end || row_end > num_rows {
            return Err(FrameError::decode(format!(
                "rows {}..{} outside table of {} rows",
                row_start, row_end, num_rows
            )));
        }
        let wanted = columns.unwrap_or(&self.metadata.columns);
        wanted
            .iter()
            .map(|column| {
                let idx = self.column_index(column)?;
                Ok(ColumnChunk {
                    column: column.clone(),
                    row_start,
                    values: self.data[idx][row_start..row_end].to_vec(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_groups() {
        let meta = FileMetadata::uniform(vec!["a".into()], 10, 4);
        assert_eq!(meta.group_rows, vec![4, 4, 2]);
        assert_eq!(meta.num_rows(), 10);
        let empty = FileMetadata::uniform(vec!["a".into()], 0, 4);
        assert!(empty.group_rows.is_empty());
    }

    #[test]
    fn test_layout_partitions_rows() {
        let layout = GroupLayout::new(&[25, 25, 25, 25]);
        assert_eq!(layout.num_rows(), 100);
        assert_eq!(layout.len(), 4);
        assert_eq!(
            layout.group(1),
            RowGroup {
                index: 1,
                row_start: 25,
                row_end: 50
            }
        );
        let mut expected_start = 0;
        for group in layout.groups() {
            assert_eq!(group.row_start, expected_start);
            expected_start = group.row_end;
        }
        assert_eq!(expected_start, 100);
    }

    #[test]
    fn test_layout_drops_empty_groups() {
        let layout = GroupLayout::new(&[3, 0, 2]);
        assert_eq!(layout.len(), 2);
        assert_eq!(layout.group(1).rows(), 3..5);
    }

    #[test]
    fn test_group_of_boundaries() {
        let layout = GroupLayout::new(&[10, 5, 10]);
        assert_eq!(layout.group_of(0), 0);
        assert_eq!(layout.group_of(9), 0);
        assert_eq!(layout.group_of(10), 1);
        assert_eq!(layout.group_of(14), 1);
        assert_eq!(layout.group_of(15), 2);
        assert_eq!(layout.group_of(24), 2);
    }

    #[test]
    fn test_overlapping() {
        let layout = GroupLayout::new(&[10, 5, 10]);
        assert_eq!(layout.overlapping(0, 10), 0..1);
        assert_eq!(layout.overlapping(9, 11), 0..2);
        assert_eq!(layout.overlapping(12, 25), 1..3);
        assert_eq!(layout.overlapping(7, 7), 0..0);
        assert_eq!(layout.overlapping(0, 100), 0..3);
    }

    #[test]
    fn test_memory_source_decode() {
        let source = MemorySource::new(
            vec![
                ("id".into(), (0..6).map(Value::from).collect()),
                ("name".into(), ["a", "b", "c", "d", "e", "f"].map(Value::from).to_vec()),
            ],
            4,
        )
        .unwrap();
        assert_eq!(source.metadata().group_rows, vec![4, 2]);
        let chunks = source.decode(4, 6, None).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].row_start, 4);
        assert_eq!(chunks[0].values, vec![Value::Int(4), Value::Int(5)]);
        assert_eq!(chunks[1].values, vec![Value::from("e"), Value::from("f")]);

        let only_name = source.decode(0, 1, Some(&["name".to_string()])).unwrap();
        assert_eq!(only_name.len(), 1);
        assert_eq!(only_name[0].column, "name");
    }

    #[test]
    fn test_memory_source_errors() {
        let source =
            MemorySource::new(vec![("id".into(), vec![Value::Int(1)])], 1).unwrap();
        assert!(matches!(
            source.decode(0, 1, Some(&["nope".to_string()])),
            Err(FrameError::InvalidColumn(_))
        ));
        assert!(matches!(source.decode(0, 2, None), Err(FrameError::Decode(_))));
        assert!(MemorySource::new(
            vec![
                ("a".into(), vec![Value::Int(1)]),
                ("b".into(), vec![])
            ],
            1
        )
        .is_err());
    }
}
