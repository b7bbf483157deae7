//! The frame contract: a windowed, asynchronously materialized table.
//!
//! Callers ask a [`Frame`] for a window of rows and get back exactly
//! `end - start` [`AsyncRow`]s immediately. Each cell is a [`Deferred`] that
//! settles on its own schedule; a cell's failure never touches its neighbours.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::deferred::{Deferred, Resolver};
use crate::error::FrameError;
use crate::source::RowGroup;
use crate::value::Value;

/// Ordered, duplicate-free column names shared by a frame and all of its rows.
#[derive(Clone, PartialEq, Eq)]
pub struct Header(Rc<[String]>);

impl Header {
    pub fn new(columns: Vec<String>) -> Result<Self, FrameError> {
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].contains(column) {
                return Err(FrameError::decode(format!(
                    "duplicate column name: {}",
                    column
                )));
            }
        }
        Ok(Self(columns.into()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.0.iter().position(|c| c == column)
    }

    /// Like [`Header::position`] but failing with `InvalidColumn`.
    pub fn require(&self, column: &str) -> Result<usize, FrameError> {
        self.position(column)
            .ok_or_else(|| FrameError::InvalidColumn(column.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

/// A window request: `[start, end)` in physical or sorted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowsQuery<'a> {
    pub start: usize,
    pub end: usize,
    pub order_by: Option<&'a str>,
}

impl<'a> RowsQuery<'a> {
    pub fn range(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            order_by: None,
        }
    }

    pub fn order_by(mut self, column: &'a str) -> Self {
        self.order_by = Some(column);
        self
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait Frame {
    fn header(&self) -> &Header;

    fn num_rows(&self) -> usize;

    /// Exactly `end - start` rows for an accepted window. Only failures that are
    /// known synchronously (bad bounds, unknown sort column) are returned here;
    /// everything else surfaces through the cells.
    fn rows(&self, query: RowsQuery<'_>) -> Result<Vec<AsyncRow>, FrameError>;

    /// Whether `rows` honours `order_by` itself.
    fn sorts_natively(&self) -> bool {
        false
    }

    /// The row groups this frame fetches by. Empty for frames that hold all
    /// rows at once.
    fn row_groups(&self) -> Vec<RowGroup> {
        Vec::new()
    }

    /// Deliver replies from background work on this thread. `None` takes what
    /// has already arrived; `Some(timeout)` waits up to `timeout` for the first
    /// reply. Returns the number of replies handled.
    fn pump(&self, _timeout: Option<Duration>) -> usize {
        0
    }
}

impl<F: Frame + ?Sized> Frame for Box<F> {
    fn header(&self) -> &Header {
        (**self).header()
    }

    fn num_rows(&self) -> usize {
        (**self).num_rows()
    }

    fn rows(&self, query: RowsQuery<'_>) -> Result<Vec<AsyncRow>, FrameError> {
        (**self).rows(query)
    }

    fn sorts_natively(&self) -> bool {
        (**self).sorts_natively()
    }

    fn row_groups(&self) -> Vec<RowGroup> {
        (**self).row_groups()
    }

    fn pump(&self, timeout: Option<Duration>) -> usize {
        (**self).pump(timeout)
    }
}

pub(crate) fn check_range(query: &RowsQuery<'_>, num_rows: usize) -> Result<(), FrameError> {
    if query.start > query.end || query.end > num_rows {
        return Err(FrameError::OutOfBounds {
            start: query.start,
            end: query.end,
            num_rows,
        });
    }
    Ok(())
}

/// One row whose cells and physical index may still be loading.
#[derive(Clone)]
pub struct AsyncRow {
    header: Header,
    cells: Vec<Deferred<Value>>,
    index: Deferred<usize>,
}

impl AsyncRow {
    /// A row with every cell unsettled, plus the slots that settle it.
    pub fn pending(header: &Header) -> (RowSlots, AsyncRow) {
        let (index_slot, index) = Deferred::pending();
        let (slots, cells): (Vec<Resolver<Value>>, Vec<Deferred<Value>>) =
            (0..header.len()).map(|_| Deferred::pending()).unzip();
        (
            RowSlots {
                cells: slots,
                index: index_slot,
            },
            AsyncRow {
                header: header.clone(),
                cells,
                index,
            },
        )
    }

    /// A fully materialized row.
    pub fn ready(header: &Header, index: usize, values: Vec<Value>) -> Self {
        let (slots, row) = Self::pending(header);
        slots.fill(index, values);
        row
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn cell(&self, column: &str) -> Result<&Deferred<Value>, FrameError> {
        let i = self.header.require(column)?;
        Ok(&self.cells[i])
    }

    pub fn cells(&self) -> &[Deferred<Value>] {
        &self.cells
    }

    /// Physical row number in the underlying file.
    pub fn index(&self) -> &Deferred<usize> {
        &self.index
    }

    pub fn is_settled(&self) -> bool {
        self.index.is_settled() && self.cells.iter().all(Deferred::is_settled)
    }

    /// The materialized row once every cell resolved successfully.
    pub fn values(&self) -> Option<Row> {
        let index = self.index.resolved()?;
        let values = self
            .cells
            .iter()
            .map(Deferred::resolved)
            .collect::<Option<Vec<_>>>()?;
        Some(Row {
            header: self.header.clone(),
            index,
            values,
        })
    }
}

impl fmt::Debug for AsyncRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRow")
            .field("index", &self.index)
            .field("cells", &self.cells)
            .finish()
    }
}

/// Producer side of an [`AsyncRow`].
pub struct RowSlots {
    cells: Vec<Resolver<Value>>,
    index: Resolver<usize>,
}

impl RowSlots {
    pub fn fill(&self, index: usize, values: Vec<Value>) {
        self.index.resolve(index);
        for (slot, value) in self.cells.iter().zip(values) {
            slot.resolve(value);
        }
    }

    pub fn fill_index(&self, index: usize) {
        self.index.resolve(index);
    }

    pub fn fill_cell(&self, column: usize, value: Value) {
        if let Some(slot) = self.cells.get(column) {
            slot.resolve(value);
        }
    }

    /// Reject every cell (and the index) that has not settled yet.
    pub fn fail(&self, err: &FrameError) {
        self.index.reject(err.clone());
        for slot in &self.cells {
            slot.reject(err.clone());
        }
    }

    /// Settle each slot with whatever the matching part of `row` settles with.
    pub fn forward(self, row: &AsyncRow) {
        let RowSlots { cells, index } = self;
        forward_one(row.index(), index);
        for (cell, slot) in row.cells().iter().zip(cells) {
            forward_one(cell, slot);
        }
    }
}

fn forward_one<T: Clone + 'static>(from: &Deferred<T>, to: Resolver<T>) {
    from.then(move |outcome| match outcome {
        Ok(value) => {
            to.resolve(value.clone());
        }
        Err(err) => {
            to.reject(err.clone());
        }
    });
}

/// A row with every value present.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    header: Header,
    index: usize,
    values: Vec<Value>,
}

impl Row {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.header.position(column).map(|i| &self.values[i])
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.header.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

struct Join {
    headers: Vec<Header>,
    indices: Vec<Option<usize>>,
    values: Vec<Vec<Option<Value>>>,
    remaining: usize,
}

impl Join {
    fn finish(&mut self) -> Vec<Row> {
        let headers = std::mem::take(&mut self.headers);
        let indices = std::mem::take(&mut self.indices);
        let values = std::mem::take(&mut self.values);
        headers
            .into_iter()
            .zip(indices)
            .zip(values)
            .map(|((header, index), values)| Row {
                header,
                index: index.unwrap_or_default(),
                values: values.into_iter().map(Option::unwrap_or_default).collect(),
            })
            .collect()
    }
}

/// Wait for a whole window. Resolves with every row once all cells have
/// resolved; rejects with the first cell failure.
pub fn collect_rows(rows: &[AsyncRow]) -> Deferred<Vec<Row>> {
    let (resolver, joined) = Deferred::pending();
    let remaining: usize = rows.iter().map(|row| row.cells.len() + 1).sum();
    if remaining == 0 {
        resolver.resolve(Vec::new());
        return joined;
    }
    let join = Rc::new(RefCell::new(Join {
        headers: rows.iter().map(|row| row.header.clone()).collect(),
        indices: vec![None; rows.len()],
        values: rows.iter().map(|row| vec![None; row.cells.len()]).collect(),
        remaining,
    }));

    for (r, row) in rows.iter().enumerate() {
        let (join_in, resolver_in) = (Rc::clone(&join), resolver.clone());
        row.index.then(move |outcome| {
            settle_part(&join_in, &resolver_in, outcome, |join, index| {
                join.indices[r] = Some(*index)
            })
        });
        for (c, cell) in row.cells.iter().enumerate() {
            let (join_in, resolver_in) = (Rc::clone(&join), resolver.clone());
            cell.then(move |outcome| {
                settle_part(&join_in, &resolver_in, outcome, |join, value: &Value| {
                    join.values[r][c] = Some(value.clone())
                })
            });
        }
    }
    joined
}

fn settle_part<T>(
    join: &RefCell<Join>,
    resolver: &Resolver<Vec<Row>>,
    outcome: Result<&T, &FrameError>,
    store: impl FnOnce(&mut Join, &T),
) {
    let value = match outcome {
        Ok(value) => value,
        Err(err) => {
            resolver.reject(err.clone());
            return;
        }
    };
    let done = {
        let mut join = join.borrow_mut();
        store(&mut join, value);
        join.remaining -= 1;
        (join.remaining == 0).then(|| join.finish())
    };
    if let Some(rows) = done {
        resolver.resolve(rows);
    }
}
