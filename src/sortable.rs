//! In-memory sorting for frames that cannot order rows themselves.
//!
//! [`Sortable`] materializes its inner frame once, on the first sorted request,
//! and serves every sorted window from that copy. [`MemoryFrame`] is the
//! simplest such inner frame: a table that is (or will be) fully in memory.

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use polars::prelude::DataFrame;
use tracing::debug;

use crate::deferred::{Deferred, Resolver};
use crate::error::FrameError;
use crate::frame::{check_range, collect_rows, AsyncRow, Frame, Header, Row, RowSlots, RowsQuery};
use crate::polars_source::column_values;
use crate::source::RowGroup;
use crate::value::Value;

/// Adds `order_by` support to any frame by sorting a full in-memory copy.
pub struct Sortable<F: Frame> {
    inner: F,
    all: RefCell<Option<Deferred<Vec<Row>>>>,
    orders: RefCell<HashMap<usize, Deferred<Vec<usize>>>>,
}

impl<F: Frame> Sortable<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            all: RefCell::new(None),
            orders: RefCell::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn into_inner(self) -> F {
        self.inner
    }

    /// Every row of the inner frame, requested once. A rejected copy is
    /// replaced on the next call.
    fn all_rows(&self) -> Result<Deferred<Vec<Row>>, FrameError> {
        if let Some(all) = self.all.borrow().as_ref().filter(|all| all.rejected().is_none()) {
            return Ok(all.clone());
        }
        debug!(rows = self.inner.num_rows(), "materializing frame for in-memory sort");
        let rows = self
            .inner
            .rows(RowsQuery::range(0, self.inner.num_rows()))?;
        let all = collect_rows(&rows);
        *self.all.borrow_mut() = Some(all.clone());
        self.orders.borrow_mut().clear();
        Ok(all)
    }

    /// Positions into the materialized rows, sorted by `column` with ties
    /// broken by original position.
    fn sorted_order(&self, column: usize) -> Result<Deferred<Vec<usize>>, FrameError> {
        let all = self.all_rows()?;
        if let Some(order) = self.orders.borrow().get(&column) {
            return Ok(order.clone());
        }
        let order = all.map(move |rows| {
            let mut order: Vec<usize> = (0..rows.len()).collect();
            order.sort_by(|&a, &b| {
                rows[a].values()[column]
                    .total_cmp(&rows[b].values()[column])
                    .then(a.cmp(&b))
            });
            order
        });
        self.orders.borrow_mut().insert(column, order.clone());
        Ok(order)
    }
}

impl<F: Frame> Frame for Sortable<F> {
    fn header(&self) -> &Header {
        self.inner.header()
    }

    fn num_rows(&self) -> usize {
        self.inner.num_rows()
    }

    fn rows(&self, query: RowsQuery<'_>) -> Result<Vec<AsyncRow>, FrameError> {
        let Some(column) = query.order_by else {
            return self.inner.rows(query);
        };
        if self.inner.sorts_natively() {
            return self.inner.rows(query);
        }
        check_range(&query, self.num_rows())?;
        let column = self.header().require(column)?;
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let all = self.all_rows()?;
        let order = self.sorted_order(column)?;
        let (slots, rows): (Vec<RowSlots>, Vec<AsyncRow>) = (query.start..query.end)
            .map(|_| AsyncRow::pending(self.header()))
            .unzip();
        let (start, end) = (query.start, query.end);
        order.then(move |outcome| {
            let order = match outcome {
                Ok(order) => order,
                Err(err) => {
                    slots.iter().for_each(|slot| slot.fail(err));
                    return;
                }
            };
            let Some(all) = all.get() else {
                let err = FrameError::protocol("sorted order settled before its rows");
                slots.iter().for_each(|slot| slot.fail(&err));
                return;
            };
            for (slot, &position) in slots.iter().zip(order.iter().skip(start)) {
                if let Some(row) = all.get(position) {
                    slot.fill(row.index(), row.values().to_vec());
                }
            }
            let short = FrameError::decode(format!(
                "sorted window {}..{} exceeds the materialized rows",
                start, end
            ));
            slots.iter().for_each(|slot| slot.fail(&short));
        });
        Ok(rows)
    }

    fn sorts_natively(&self) -> bool {
        true
    }

    fn row_groups(&self) -> Vec<RowGroup> {
        self.inner.row_groups()
    }

    fn pump(&self, timeout: Option<Duration>) -> usize {
        self.inner.pump(timeout)
    }
}

/// A frame over rows that are already in memory, or arrive all at once later.
pub struct MemoryFrame {
    header: Header,
    num_rows: usize,
    data: Deferred<Vec<Vec<Value>>>,
}

impl MemoryFrame {
    /// Row-major data, each row in header order.
    pub fn new(header: Header, rows: Vec<Vec<Value>>) -> Result<Self, FrameError> {
        if let Some(bad) = rows.iter().position(|row| row.len() != header.len()) {
            return Err(FrameError::decode(format!(
                "row {} has {} values for {} columns",
                bad,
                rows[bad].len(),
                header.len()
            )));
        }
        Ok(Self {
            header,
            num_rows: rows.len(),
            data: Deferred::ready(rows),
        })
    }

    /// A frame of `num_rows` rows whose data is supplied later through the resolver.
    pub fn pending(header: Header, num_rows: usize) -> (Resolver<Vec<Vec<Value>>>, Self) {
        let (resolver, data) = Deferred::pending();
        (
            resolver,
            Self {
                header,
                num_rows,
                data,
            },
        )
    }

    pub fn from_dataframe(df: &DataFrame) -> Result<Self, FrameError> {
        let header = Header::new(
            df.get_column_names()
                .iter()
                .map(|name| name.to_string())
                .collect(),
        )?;
        let columns = df
            .get_columns()
            .iter()
            .map(column_values)
            .collect::<Result<Vec<_>, _>>()?;
        let rows = (0..df.height())
            .map(|i| columns.iter().map(|values| values[i].clone()).collect())
            .collect();
        Self::new(header, rows)
    }
}

impl Frame for MemoryFrame {
    fn header(&self) -> &Header {
        &self.header
    }

    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn rows(&self, query: RowsQuery<'_>) -> Result<Vec<AsyncRow>, FrameError> {
        check_range(&query, self.num_rows)?;
        if let Some(column) = query.order_by {
            self.header.require(column)?;
            return Err(FrameError::protocol(
                "in-memory frames cannot order rows; wrap the frame in Sortable",
            ));
        }
        let (slots, rows): (Vec<RowSlots>, Vec<AsyncRow>) = (query.start..query.end)
            .map(|_| AsyncRow::pending(&self.header))
            .unzip();
        let start = query.start;
        self.data.then(move |outcome| match outcome {
            Ok(data) => {
                for (offset, slot) in slots.iter().enumerate() {
                    let index = start + offset;
                    match data.get(index) {
                        Some(values) => slot.fill(index, values.clone()),
                        None => slot.fail(&FrameError::decode(format!(
                            "row {} missing from supplied data",
                            index
                        ))),
                    }
                }
            }
            Err(err) => slots.iter().for_each(|slot| slot.fail(err)),
        });
        Ok(rows)
    }
}
