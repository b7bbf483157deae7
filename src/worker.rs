//! Wire types exchanged with the background worker, and the worker loop itself.
//!
//! The worker owns the [`ColumnSource`] and serves requests one at a time in
//! arrival order. Replies carry the `query_id` of their request; pairing them
//! back up is the client's job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use tracing::debug;

use crate::error::FrameError;
use crate::rank::compute_ranks;
use crate::source::{ColumnChunk, ColumnSource};

/// Shared flag telling the worker a request's result is no longer wanted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Decode a row range. With `want_chunks`, each column is also streamed as
    /// a `Chunk` reply as soon as it is decoded.
    Query {
        row_start: usize,
        row_end: usize,
        columns: Option<Vec<String>>,
        want_chunks: bool,
    },
    /// Compute the rank array of one column.
    ColumnRanks { column: String },
}

#[derive(Debug)]
pub struct Envelope {
    pub query_id: u64,
    pub cancel: CancelToken,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Result(Vec<ColumnChunk>),
    Chunk(ColumnChunk),
    Indices(Vec<usize>),
    Error(FrameError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub query_id: u64,
    pub body: Response,
}

/// Serve requests until the client hangs up.
pub(crate) fn run(
    source: Arc<dyn ColumnSource>,
    requests: Receiver<Envelope>,
    replies: Sender<Message>,
) {
    debug!("background worker started");
    for envelope in requests {
        if envelope.cancel.is_cancelled() {
            debug!(query_id = envelope.query_id, "skipping cancelled request");
            continue;
        }
        if !serve(source.as_ref(), envelope, &replies) {
            break;
        }
    }
    debug!("background worker stopped");
}

/// Handle one request. Returns false once the reply channel is closed.
fn serve(source: &dyn ColumnSource, envelope: Envelope, replies: &Sender<Message>) -> bool {
    let Envelope {
        query_id,
        cancel,
        request,
    } = envelope;
    let send = |body: Response| replies.send(Message { query_id, body }).is_ok();

    let body = match request {
        Request::Query {
            row_start,
            row_end,
            columns,
            want_chunks: false,
        } => match source.decode(row_start, row_end, columns.as_deref()) {
            Ok(chunks) => Response::Result(chunks),
            Err(err) => Response::Error(err),
        },
        Request::Query {
            row_start,
            row_end,
            columns,
            want_chunks: true,
        } => {
            let columns = columns.unwrap_or_else(|| source.metadata().columns.clone());
            let mut decoded = Vec::with_capacity(columns.len());
            let mut failure = None;
            for column in columns {
                if cancel.is_cancelled() {
                    debug!(query_id, "request cancelled mid-stream");
                    return true;
                }
                match source.decode(row_start, row_end, Some(std::slice::from_ref(&column))) {
                    Ok(chunks) => {
                        for chunk in chunks {
                            if !send(Response::Chunk(chunk.clone())) {
                                return false;
                            }
                            decoded.push(chunk);
                        }
                    }
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            match failure {
                Some(err) => Response::Error(err),
                None => Response::Result(decoded),
            }
        }
        Request::ColumnRanks { column } => match column_ranks(source, &column) {
            Ok(ranks) => Response::Indices(ranks),
            Err(err) => Response::Error(err),
        },
    };
    send(body)
}

/// Decode only `column`, over every row, and rank it.
pub(crate) fn column_ranks(
    source: &dyn ColumnSource,
    column: &str,
) -> Result<Vec<usize>, FrameError> {
    let metadata = source.metadata();
    if !metadata.has_column(column) {
        return Err(FrameError::InvalidColumn(column.to_string()));
    }
    let num_rows = metadata.num_rows();
    let chunks = source.decode(0, num_rows, Some(&[column.to_string()]))?;
    let chunk = chunks
        .into_iter()
        .find(|chunk| chunk.column == column)
        .ok_or_else(|| FrameError::decode(format!("column {} was not decoded", column)))?;
    if chunk.values.len() != num_rows {
        return Err(FrameError::decode(format!(
            "column {} decoded {} values for {} rows",
            column,
            chunk.values.len(),
            num_rows
        )));
    }
    Ok(compute_ranks(&chunk.values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::value::Value;
    use std::sync::mpsc;
    use std::thread;

    fn source() -> Arc<dyn ColumnSource> {
        Arc::new(
            MemorySource::new(
                vec![
                    ("k".into(), [3, 1, 2, 1].map(Value::from).to_vec()),
                    ("s".into(), ["d", "a", "c", "b"].map(Value::from).to_vec()),
                ],
                2,
            )
            .unwrap(),
        )
    }

    fn exchange(requests: Vec<Envelope>) -> Vec<Message> {
        let (req_tx, req_rx) = mpsc::channel();
        let (rep_tx, rep_rx) = mpsc::channel();
        let src = source();
        let handle = thread::spawn(move || run(src, req_rx, rep_tx));
        for envelope in requests {
            req_tx.send(envelope).unwrap();
        }
        drop(req_tx);
        handle.join().unwrap();
        rep_rx.into_iter().collect()
    }

    fn envelope(query_id: u64, request: Request) -> Envelope {
        Envelope {
            query_id,
            cancel: CancelToken::default(),
            request,
        }
    }

    #[test]
    fn test_column_ranks_reply() {
        let replies = exchange(vec![envelope(
            1,
            Request::ColumnRanks { column: "k".into() },
        )]);
        assert_eq!(
            replies,
            vec![Message {
                query_id: 1,
                body: Response::Indices(vec![3, 0, 2, 0])
            }]
        );
    }

    #[test]
    fn test_unknown_column_rank_is_error() {
        let replies = exchange(vec![envelope(
            4,
            Request::ColumnRanks { column: "zz".into() },
        )]);
        assert_eq!(
            replies[0].body,
            Response::Error(FrameError::InvalidColumn("zz".into()))
        );
    }

    #[test]
    fn test_query_streams_chunks_before_result() {
        let replies = exchange(vec![envelope(
            2,
            Request::Query {
                row_start: 2,
                row_end: 4,
                columns: None,
                want_chunks: true,
            },
        )]);
        assert_eq!(replies.len(), 3);
        assert!(matches!(&replies[0].body, Response::Chunk(c) if c.column == "k"));
        assert!(matches!(&replies[1].body, Response::Chunk(c) if c.column == "s"));
        match &replies[2].body {
            Response::Result(chunks) => {
                assert_eq!(chunks.len(), 2);
                assert_eq!(chunks[1].values, vec![Value::from("c"), Value::from("b")]);
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_request_is_skipped() {
        let cancelled = envelope(
            7,
            Request::Query {
                row_start: 0,
                row_end: 2,
                columns: None,
                want_chunks: false,
            },
        );
        cancelled.cancel.cancel();
        let replies = exchange(vec![
            cancelled,
            envelope(8, Request::ColumnRanks { column: "s".into() }),
        ]);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].query_id, 8);
        assert_eq!(replies[0].body, Response::Indices(vec![3, 0, 2, 1]));
    }
}
