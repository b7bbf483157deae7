//! Caller-side half of the worker protocol.
//!
//! The client owns the background thread and a table of in-flight requests
//! keyed by `query_id`. Replies are read off the channel only when the owner
//! calls [`WorkerClient::pump`], so every resolver and every continuation runs
//! on the caller thread.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::deferred::{Deferred, Resolver};
use crate::error::FrameError;
use crate::source::{ColumnChunk, ColumnSource};
use crate::worker::{self, CancelToken, Envelope, Message, Request, Response};

/// Final reply to a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Rows(Vec<ColumnChunk>),
    Indices(Vec<usize>),
}

/// Called on the caller thread for each streamed chunk of a request.
pub type ChunkHandler = Box<dyn FnMut(&ColumnChunk)>;

/// Identifies an in-flight request for cancellation.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    query_id: u64,
    cancel: CancelToken,
}

impl RequestHandle {
    pub fn query_id(&self) -> u64 {
        self.query_id
    }
}

struct Pending {
    resolver: Resolver<Reply>,
    on_chunk: Option<ChunkHandler>,
    cancel: CancelToken,
}

struct Link {
    requests: Sender<Envelope>,
    replies: Receiver<Message>,
}

pub struct WorkerClient {
    source: Arc<dyn ColumnSource>,
    thread_name: String,
    link: RefCell<Option<Link>>,
    next_id: Cell<u64>,
    pending: RefCell<HashMap<u64, Pending>>,
}

impl WorkerClient {
    /// The worker thread is not started until the first request.
    pub fn new(source: Arc<dyn ColumnSource>, thread_name: impl Into<String>) -> Self {
        Self {
            source,
            thread_name: thread_name.into(),
            link: RefCell::new(None),
            next_id: Cell::new(1),
            pending: RefCell::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &Arc<dyn ColumnSource> {
        &self.source
    }

    /// Send `request` to the worker. The returned deferred settles when the
    /// final reply is pumped; `on_chunk` sees each streamed chunk before that.
    pub fn submit(
        &self,
        request: Request,
        on_chunk: Option<ChunkHandler>,
    ) -> (RequestHandle, Deferred<Reply>) {
        let query_id = self.next_id.get();
        self.next_id.set(query_id + 1);
        let cancel = CancelToken::default();
        let (resolver, reply) = Deferred::pending();

        self.pending.borrow_mut().insert(
            query_id,
            Pending {
                resolver,
                on_chunk,
                cancel: cancel.clone(),
            },
        );
        let envelope = Envelope {
            query_id,
            cancel: cancel.clone(),
            request,
        };
        if let Err(err) = self.send(envelope) {
            self.worker_lost(err);
        }
        (RequestHandle { query_id, cancel }, reply)
    }

    pub fn request(&self, request: Request) -> Deferred<Reply> {
        self.submit(request, None).1
    }

    /// Stop waiting for `handle`. Its deferred is rejected with `Cancelled` and
    /// the worker is told to skip or abandon the work. Returns false if the
    /// request had already completed.
    pub fn cancel(&self, handle: &RequestHandle) -> bool {
        handle.cancel.cancel();
        let entry = self.pending.borrow_mut().remove(&handle.query_id);
        match entry {
            Some(entry) => {
                debug!(query_id = handle.query_id, "request cancelled");
                entry.resolver.reject(FrameError::Cancelled);
                true
            }
            None => false,
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_running(&self) -> bool {
        self.link.borrow().is_some()
    }

    /// Dispatch replies that have arrived. With a timeout, waits up to that long
    /// for the first one (only while requests are outstanding); the rest are
    /// drained without blocking.
    pub fn pump(&self, timeout: Option<Duration>) -> usize {
        let mut wait = timeout.filter(|_| self.pending_requests() > 0);
        let mut handled = 0;
        loop {
            let next = {
                let link = self.link.borrow();
                let Some(link) = link.as_ref() else {
                    return handled;
                };
                match wait.take() {
                    Some(timeout) => link.replies.recv_timeout(timeout).map_err(|err| {
                        matches!(err, RecvTimeoutError::Disconnected)
                    }),
                    None => link
                        .replies
                        .try_recv()
                        .map_err(|err| matches!(err, TryRecvError::Disconnected)),
                }
            };
            match next {
                Ok(message) => {
                    self.dispatch(message);
                    handled += 1;
                }
                Err(true) => {
                    self.worker_lost(FrameError::transport("background worker stopped"));
                    return handled;
                }
                Err(false) => return handled,
            }
        }
    }

    fn send(&self, envelope: Envelope) -> Result<(), FrameError> {
        let mut link = self.link.borrow_mut();
        if link.is_none() {
            *link = Some(self.spawn()?);
        }
        match link.as_ref() {
            Some(link) => link
                .requests
                .send(envelope)
                .map_err(|_| FrameError::transport("background worker stopped")),
            None => Err(FrameError::transport("background worker not running")),
        }
    }

    fn spawn(&self) -> Result<Link, FrameError> {
        let (requests, inbox) = mpsc::channel();
        let (outbox, replies) = mpsc::channel();
        let source = Arc::clone(&self.source);
        thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || worker::run(source, inbox, outbox))
            .map_err(FrameError::from)?;
        debug!(thread = %self.thread_name, "spawned background worker");
        Ok(Link { requests, replies })
    }

    fn dispatch(&self, message: Message) {
        let query_id = message.query_id;
        let outcome = match message.body {
            Response::Chunk(chunk) => return self.deliver_chunk(query_id, &chunk),
            Response::Result(chunks) => Ok(Reply::Rows(chunks)),
            Response::Indices(ranks) => Ok(Reply::Indices(ranks)),
            Response::Error(err) => Err(err),
        };
        let entry = self.pending.borrow_mut().remove(&query_id);
        let Some(entry) = entry else {
            let err = FrameError::protocol(format!("reply for unknown query {}", query_id));
            warn!("{}", err);
            return;
        };
        match outcome {
            Ok(reply) => entry.resolver.resolve(reply),
            Err(err) => entry.resolver.reject(err),
        };
    }

    fn deliver_chunk(&self, query_id: u64, chunk: &ColumnChunk) {
        // The handler is taken out while it runs so it may submit new requests.
        let handler = self
            .pending
            .borrow_mut()
            .get_mut(&query_id)
            .map(|entry| entry.on_chunk.take());
        match handler {
            None => {
                let err = FrameError::protocol(format!("chunk for unknown query {}", query_id));
                warn!("{}", err);
            }
            Some(None) => {}
            Some(Some(mut handler)) => {
                handler(chunk);
                if let Some(entry) = self.pending.borrow_mut().get_mut(&query_id) {
                    entry.on_chunk = Some(handler);
                }
            }
        }
    }

    /// Reject everything in flight and forget the worker; the next request
    /// starts a new one.
    fn worker_lost(&self, err: FrameError) {
        warn!(pending = self.pending_requests(), "{}", err);
        self.link.borrow_mut().take();
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        for (_, entry) in pending {
            entry.cancel.cancel();
            entry.resolver.reject(err.clone());
        }
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        for entry in self.pending.get_mut().values() {
            entry.cancel.cancel();
        }
    }
}
