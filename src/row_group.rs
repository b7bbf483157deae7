//! A frame over a file that is fetched one row group at a time.
//!
//! Each row group is requested from the background worker at most once per
//! frame; its rows are cached (still pending) the moment the request is made.
//! Sorted windows are served from a per-column rank array computed on the
//! worker, so only the groups that actually hold the window's rows are fetched.
//!
//! In progressive mode the worker streams one chunk per column. Chunks are
//! staged as they arrive and the group's cells settle together from the final
//! result, so a group whose later column fails rejects every cell.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::client::{ChunkHandler, Reply, RequestHandle, WorkerClient};
use crate::config::FrameOptions;
use crate::deferred::Deferred;
use crate::error::FrameError;
use crate::frame::{check_range, AsyncRow, Frame, Header, RowSlots, RowsQuery};
use crate::rank::SortIndex;
use crate::source::{ColumnChunk, ColumnSource, GroupLayout, RowGroup};
use crate::worker::Request;

pub struct RowGroupFrame {
    state: Rc<LoaderState>,
}

struct RankEntry {
    index: Deferred<Rc<SortIndex>>,
    handle: RequestHandle,
}

struct LoaderState {
    header: Header,
    layout: GroupLayout,
    client: WorkerClient,
    options: FrameOptions,
    fetched: RefCell<Vec<bool>>,
    staged: Rc<RefCell<Vec<usize>>>,
    cache: RefCell<Vec<Option<AsyncRow>>>,
    ranks: RefCell<HashMap<String, RankEntry>>,
}

impl RowGroupFrame {
    /// Wrap `source`. No data is read until rows are requested.
    pub fn new(source: Arc<dyn ColumnSource>, options: &FrameOptions) -> Result<Self, FrameError> {
        let metadata = source.metadata();
        let header = Header::new(metadata.columns.clone())?;
        let layout = GroupLayout::new(&metadata.group_rows);
        let num_rows = layout.num_rows();
        let groups = layout.len();
        debug!(
            columns = header.len(),
            rows = num_rows,
            groups,
            "opened row-group frame"
        );
        Ok(Self {
            state: Rc::new(LoaderState {
                header,
                layout,
                client: WorkerClient::new(source, options.worker_name.clone()),
                options: options.clone(),
                fetched: RefCell::new(vec![false; groups]),
                staged: Rc::new(RefCell::new(vec![0; groups])),
                cache: RefCell::new(vec![None; num_rows]),
                ranks: RefCell::new(HashMap::new()),
            }),
        })
    }

    pub fn is_fetched(&self, group: usize) -> bool {
        self.state.fetched.borrow().get(group).copied().unwrap_or(false)
    }

    /// Indices of every group requested so far.
    pub fn fetched_groups(&self) -> Vec<usize> {
        self.state
            .fetched
            .borrow()
            .iter()
            .enumerate()
            .filter_map(|(i, &fetched)| fetched.then_some(i))
            .collect()
    }

    /// Columns of `group` decoded so far in progressive mode.
    pub fn staged_columns(&self, group: usize) -> usize {
        self.state.staged.borrow().get(group).copied().unwrap_or(0)
    }

    pub fn pending_requests(&self) -> usize {
        self.state.client.pending_requests()
    }

    /// Stop computing ranks for `column` and forget any memoized result.
    /// Sorted windows still waiting on it are rejected with `Cancelled`.
    pub fn abandon_sort(&self, column: &str) -> bool {
        let entry = self.state.ranks.borrow_mut().remove(column);
        match entry {
            Some(entry) => {
                if entry.index.is_pending() {
                    self.state.client.cancel(&entry.handle);
                }
                true
            }
            None => false,
        }
    }
}

impl Frame for RowGroupFrame {
    fn header(&self) -> &Header {
        &self.state.header
    }

    fn num_rows(&self) -> usize {
        self.state.layout.num_rows()
    }

    fn rows(&self, query: RowsQuery<'_>) -> Result<Vec<AsyncRow>, FrameError> {
        check_range(&query, self.num_rows())?;
        match query.order_by {
            None => Ok(self.state.physical_window(query.start, query.end)),
            Some(column) => {
                self.state.header.require(column)?;
                if query.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(LoaderState::sorted_window(
                    &self.state,
                    column,
                    query.start,
                    query.end,
                ))
            }
        }
    }

    fn sorts_natively(&self) -> bool {
        true
    }

    fn row_groups(&self) -> Vec<RowGroup> {
        self.state.layout.groups().collect()
    }

    fn pump(&self, timeout: Option<Duration>) -> usize {
        self.state.client.pump(timeout)
    }
}

impl LoaderState {
    fn physical_window(&self, start: usize, end: usize) -> Vec<AsyncRow> {
        for group in self.layout.overlapping(start, end) {
            self.ensure_group(group);
        }
        self.cached(start..end)
    }

    fn cached(&self, rows: impl IntoIterator<Item = usize>) -> Vec<AsyncRow> {
        let cache = self.cache.borrow();
        rows.into_iter()
            .filter_map(|row| cache.get(row).cloned().flatten())
            .collect()
    }

    /// Request `group` unless it already has been, caching its rows as pending.
    fn ensure_group(&self, index: usize) {
        let already = std::mem::replace(&mut self.fetched.borrow_mut()[index], true);
        if already {
            return;
        }
        let group = self.layout.group(index);
        let slots: Vec<RowSlots> = {
            let mut cache = self.cache.borrow_mut();
            group
                .rows()
                .map(|row| {
                    let (slots, pending) = AsyncRow::pending(&self.header);
                    cache[row] = Some(pending);
                    slots
                })
                .collect()
        };
        let slots = Rc::new(slots);
        debug!(group = index, rows = ?group.rows(), "fetching row group");

        let progressive = self.options.progressive;
        let on_chunk = progressive.then(|| {
            let staged = Rc::clone(&self.staged);
            Box::new(move |chunk: &ColumnChunk| {
                debug!(group = group.index, column = %chunk.column, "staged column");
                if let Some(count) = staged.borrow_mut().get_mut(group.index) {
                    *count += 1;
                }
            }) as ChunkHandler
        });
        let (_, reply) = self.client.submit(
            Request::Query {
                row_start: group.row_start,
                row_end: group.row_end,
                columns: None,
                want_chunks: progressive,
            },
            on_chunk,
        );

        let header = self.header.clone();
        reply.then(move |outcome| {
            let chunks = match outcome {
                Ok(Reply::Rows(chunks)) => chunks,
                Ok(other) => {
                    let err = FrameError::protocol(format!(
                        "row group {} answered with {:?}",
                        group.index, other
                    ));
                    slots.iter().for_each(|slot| slot.fail(&err));
                    return;
                }
                Err(err) => {
                    debug!(group = group.index, "row group failed: {}", err);
                    slots.iter().for_each(|slot| slot.fail(err));
                    return;
                }
            };
            for chunk in chunks {
                fill_chunk(&header, &slots, group, chunk);
            }
            let missing = FrameError::decode(format!(
                "row group {} decoded without every column",
                group.index
            ));
            slots.iter().for_each(|slot| slot.fail(&missing));
        });
    }

    /// The memoized rank index for `column`, requesting it on first use.
    fn sort_index(state: &Rc<Self>, column: &str) -> Deferred<Rc<SortIndex>> {
        if let Some(entry) = state.ranks.borrow().get(column) {
            return entry.index.clone();
        }

        debug!(column, "requesting column ranks");
        let (handle, reply) = state.client.submit(
            Request::ColumnRanks {
                column: column.to_string(),
            },
            None,
        );
        let query_id = handle.query_id();
        let (resolver, index) = Deferred::pending();
        state.ranks.borrow_mut().insert(
            column.to_string(),
            RankEntry {
                index: index.clone(),
                handle,
            },
        );

        let num_rows = state.layout.num_rows();
        let weak = Rc::downgrade(state);
        let column = column.to_string();
        reply.then(move |outcome| {
            let result = match outcome {
                Ok(Reply::Indices(ranks)) if ranks.len() == num_rows => {
                    Ok(Rc::new(SortIndex::from_ranks(ranks.clone())))
                }
                Ok(Reply::Indices(ranks)) => Err(FrameError::decode(format!(
                    "ranks for {} cover {} rows, frame has {}",
                    column,
                    ranks.len(),
                    num_rows
                ))),
                Ok(other) => Err(FrameError::protocol(format!(
                    "rank request for {} answered with {:?}",
                    column, other
                ))),
                Err(err) => Err(err.clone()),
            };
            match result {
                Ok(index) => {
                    resolver.resolve(index);
                }
                Err(err) => {
                    if let Some(state) = weak.upgrade() {
                        state.forget_failed_ranks(&column, query_id);
                    }
                    resolver.reject(err);
                }
            }
        });
        index
    }

    fn forget_failed_ranks(&self, column: &str, query_id: u64) {
        if !self.options.retry_failed_ranks {
            return;
        }
        let mut ranks = self.ranks.borrow_mut();
        if ranks
            .get(column)
            .is_some_and(|entry| entry.handle.query_id() == query_id)
        {
            debug!(column, "dropping failed rank computation");
            ranks.remove(column);
        }
    }

    /// Pending rows for sorted positions `[start, end)`. Once the rank index is
    /// known, only the groups holding those rows are fetched.
    fn sorted_window(state: &Rc<Self>, column: &str, start: usize, end: usize) -> Vec<AsyncRow> {
        let index = Self::sort_index(state, column);
        let (slots, rows): (Vec<RowSlots>, Vec<AsyncRow>) =
            (start..end).map(|_| AsyncRow::pending(&state.header)).unzip();

        let weak: Weak<Self> = Rc::downgrade(state);
        index.then(move |outcome| {
            let sort = match outcome {
                Ok(sort) => Rc::clone(sort),
                Err(err) => {
                    slots.iter().for_each(|slot| slot.fail(err));
                    return;
                }
            };
            let Some(state) = weak.upgrade() else {
                slots.iter().for_each(|slot| slot.fail(&FrameError::Cancelled));
                return;
            };
            let physical = sort.window(start, end);
            for &row in physical {
                state.ensure_group(state.layout.group_of(row));
            }
            let sources = state.cached(physical.iter().copied());
            for (slot, row) in slots.into_iter().zip(&sources) {
                slot.forward(row);
            }
        });
        rows
    }
}

/// Settle the cells of `group` covered by `chunk`.
fn fill_chunk(header: &Header, slots: &[RowSlots], group: RowGroup, chunk: &ColumnChunk) {
    let Some(column) = header.position(&chunk.column) else {
        return;
    };
    for (offset, value) in chunk.values.iter().enumerate() {
        let row = chunk.row_start + offset;
        if let Some(slot) = row
            .checked_sub(group.row_start)
            .and_then(|i| slots.get(i))
        {
            slot.fill_index(row);
            slot.fill_cell(column, value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::value::Value;
    use std::time::Instant;

    fn frame(keys: &[i64], group_rows: usize) -> RowGroupFrame {
        let source = MemorySource::new(
            vec![
                ("k".into(), keys.iter().copied().map(Value::from).collect()),
                (
                    "label".into(),
                    (0..keys.len()).map(|i| Value::from(format!("r{i}"))).collect(),
                ),
            ],
            group_rows,
        )
        .unwrap();
        RowGroupFrame::new(Arc::new(source), &FrameOptions::default()).unwrap()
    }

    fn settle(frame: &RowGroupFrame, rows: &[AsyncRow]) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !rows.iter().all(AsyncRow::is_settled) && Instant::now() < deadline {
            frame.pump(Some(Duration::from_millis(20)));
        }
    }

    #[test]
    fn test_physical_window_fetches_overlapping_groups() {
        let frame = frame(&[5, 4, 3, 2, 1, 0], 2);
        let rows = frame.rows(RowsQuery::range(1, 3)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(frame.fetched_groups(), vec![0, 1]);
        settle(&frame, &rows);
        assert_eq!(rows[0].index().resolved(), Some(1));
        assert_eq!(rows[1].cell("k").unwrap().resolved(), Some(Value::Int(3)));
    }

    #[test]
    fn test_repeat_requests_share_cached_rows() {
        let frame = frame(&[1, 2, 3, 4], 2);
        let first = frame.rows(RowsQuery::range(0, 2)).unwrap();
        let again = frame.rows(RowsQuery::range(1, 2)).unwrap();
        assert_eq!(frame.pending_requests(), 1);
        settle(&frame, &first);
        assert_eq!(again[0].cell("label").unwrap().resolved(), Some(Value::from("r1")));
    }

    #[test]
    fn test_sorted_window_uses_ranks() {
        let frame = frame(&[3, 1, 2, 1], 2);
        let rows = frame.rows(RowsQuery::range(0, 4).order_by("k")).unwrap();
        assert!(frame.fetched_groups().is_empty());
        settle(&frame, &rows);
        let indices: Vec<_> = rows.iter().map(|r| r.index().resolved().unwrap()).collect();
        assert_eq!(indices, vec![1, 3, 2, 0]);
    }

    #[test]
    fn test_bad_window_and_unknown_sort_column() {
        let frame = frame(&[1, 2, 3], 2);
        assert!(matches!(
            frame.rows(RowsQuery::range(2, 4)),
            Err(FrameError::OutOfBounds { .. })
        ));
        assert_eq!(
            frame.rows(RowsQuery::range(0, 1).order_by("nope")).unwrap_err(),
            FrameError::InvalidColumn("nope".into())
        );
        assert_eq!(frame.pending_requests(), 0);
        assert!(frame.rows(RowsQuery::range(3, 3)).unwrap().is_empty());
    }

    #[test]
    fn test_abandon_sort_rejects_waiting_window() {
        let frame = frame(&[3, 1, 2, 1], 2);
        let rows = frame.rows(RowsQuery::range(0, 2).order_by("k")).unwrap();
        assert!(frame.abandon_sort("k"));
        assert!(!frame.abandon_sort("k"));
        assert_eq!(rows[0].index().rejected(), Some(FrameError::Cancelled));
        assert_eq!(rows[1].cells()[0].rejected(), Some(FrameError::Cancelled));
    }
}
