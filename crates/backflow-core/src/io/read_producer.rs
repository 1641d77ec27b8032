//! Demand-gated chunk reads from a [`ReadResource`].
//!
//! Each granted demand unit performs exactly one bounded read of at most
//! `chunk_size` bytes. A zero-length read closes the resource and finishes
//! the flow; a read error closes the resource and fails it. An open failure
//! is not thrown from the constructor: the producer still performs the
//! handshake and delivers the failure on the first request.
//!
//! The producer owns its resource, so it serves a single subscription; a
//! second subscriber is handed an immediate open failure.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::io::resource::{BytesReader, FileReader, ReadResource};
use crate::protocol::{
    Completion, Consumer, Demand, FlowError, Producer, SharedProducer, Subscription,
};

/// Streams chunks of at most `chunk_size` bytes from an in-memory buffer.
pub fn read_bytes(data: impl Into<Bytes>, chunk_size: usize) -> SharedProducer<Bytes> {
    read_resource(BytesReader::new(data), chunk_size)
}

/// Streams chunks of at most `chunk_size` bytes from a file.
pub fn read_path(path: impl Into<PathBuf>, chunk_size: usize) -> SharedProducer<Bytes> {
    read_resource(FileReader::new(path), chunk_size)
}

/// Streams chunks of at most `chunk_size` bytes from any [`ReadResource`].
///
/// # Panics
///
/// Panics if `chunk_size` is zero.
pub fn read_resource<R: ReadResource>(resource: R, chunk_size: usize) -> SharedProducer<Bytes> {
    assert!(chunk_size > 0, "chunk size must be positive");
    Arc::new(ReadProducer {
        resource: Mutex::new(Some(resource)),
        chunk_size,
    })
}

struct ReadProducer<R> {
    resource: Mutex<Option<R>>,
    chunk_size: usize,
}

impl<R: ReadResource> Producer for ReadProducer<R> {
    type Output = Bytes;

    fn subscribe(&self, consumer: Arc<dyn Consumer<Input = Bytes>>) {
        let source = match self.resource.lock().take() {
            Some(mut resource) => match resource.open() {
                Ok(()) => Source::Open(resource),
                Err(failure) => Source::Broken(failure),
            },
            None => Source::Broken(FlowError::OpenFailed(
                "resource already consumed by an earlier subscription".into(),
            )),
        };
        let channel = Arc::new(ReadChannel {
            chunk_size: self.chunk_size,
            consumer: consumer.clone(),
            inner: Mutex::new(ReadState {
                source,
                demand: Demand::NONE,
                draining: false,
                terminal: false,
            }),
        });
        consumer.on_subscribe(channel);
    }
}

enum Source<R> {
    Open(R),
    /// Open failed; the stored failure is delivered on first request.
    Broken(FlowError),
    Closed,
}

struct ReadState<R> {
    source: Source<R>,
    demand: Demand,
    draining: bool,
    terminal: bool,
}

struct ReadChannel<R> {
    chunk_size: usize,
    consumer: Arc<dyn Consumer<Input = Bytes>>,
    inner: Mutex<ReadState<R>>,
}

enum Step {
    Emit(Bytes),
    Complete(Completion),
    Idle,
}

impl<R: ReadResource> ReadChannel<R> {
    // One bounded read per demand unit, iteratively. The read itself runs
    // under the lock; delivery does not.
    fn drain(&self) {
        loop {
            let step = {
                let mut guard = self.inner.lock();
                let state = &mut *guard;
                if state.terminal {
                    state.draining = false;
                    Step::Idle
                } else if let Source::Broken(_) = &state.source {
                    state.terminal = true;
                    state.draining = false;
                    let Source::Broken(failure) =
                        std::mem::replace(&mut state.source, Source::Closed)
                    else {
                        return;
                    };
                    Step::Complete(Completion::Failed(failure))
                } else if !state.demand.has_demand() {
                    state.draining = false;
                    Step::Idle
                } else if let Source::Open(resource) = &mut state.source {
                    let mut buf = vec![0u8; self.chunk_size];
                    match resource.read(&mut buf) {
                        Ok(0) => {
                            resource.close();
                            state.source = Source::Closed;
                            state.terminal = true;
                            state.draining = false;
                            Step::Complete(Completion::Finished)
                        }
                        Ok(n) => {
                            state.demand -= Demand::of(1);
                            buf.truncate(n);
                            Step::Emit(Bytes::from(buf))
                        }
                        Err(failure) => {
                            resource.close();
                            state.source = Source::Closed;
                            state.terminal = true;
                            state.draining = false;
                            Step::Complete(Completion::Failed(failure))
                        }
                    }
                } else {
                    state.draining = false;
                    Step::Idle
                }
            };
            match step {
                Step::Emit(chunk) => {
                    let replenished = self.consumer.on_next(chunk);
                    if replenished.has_demand() {
                        self.inner.lock().demand += replenished;
                    }
                }
                Step::Complete(completion) => {
                    self.consumer.on_complete(completion);
                    return;
                }
                Step::Idle => return,
            }
        }
    }
}

impl<R: ReadResource> Subscription for ReadChannel<R> {
    fn request(&self, demand: Demand) {
        {
            let mut state = self.inner.lock();
            if state.terminal {
                return;
            }
            state.demand += demand;
            if state.draining {
                return;
            }
            state.draining = true;
        }
        self.drain();
    }

    // Closes the resource and goes silent: no completion follows a cancel.
    fn cancel(&self) {
        let mut state = self.inner.lock();
        if state.terminal {
            return;
        }
        state.terminal = true;
        state.demand = Demand::NONE;
        if let Source::Open(mut resource) = std::mem::replace(&mut state.source, Source::Closed) {
            resource.close();
            debug!("read channel cancelled, resource closed");
        }
    }
}
