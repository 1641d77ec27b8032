//! Writes upstream chunks through a [`WriteResource`].
//!
//! `write_through` turns a chunk flow into a flow of per-chunk byte counts.
//! Each upstream chunk is written to completion, retrying partial writes on
//! the remainder, before its total is reported downstream. A write of zero
//! bytes finishes the flow; a write error fails it. Whichever of upstream
//! completion, write error, or downstream cancel happens first, the
//! resource is closed exactly once because terminal transitions move it out
//! of the operator's state.
//!
//! Downstream demand is forwarded to the upstream unchanged, one chunk per
//! reported count.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::io::resource::WriteResource;
use crate::protocol::{
    Completion, Consumer, Demand, FlowError, Producer, SharedProducer, Subscription,
};

/// Writes chunks from `upstream` into `resource`, emitting written byte
/// counts per chunk.
pub fn write_through<R: WriteResource>(
    upstream: SharedProducer<Bytes>,
    resource: R,
) -> SharedProducer<usize> {
    Arc::new(WriteThrough {
        upstream,
        resource: Mutex::new(Some(resource)),
    })
}

struct WriteThrough<R> {
    upstream: SharedProducer<Bytes>,
    resource: Mutex<Option<R>>,
}

impl<R: WriteResource> Producer for WriteThrough<R> {
    type Output = usize;

    fn subscribe(&self, consumer: Arc<dyn Consumer<Input = usize>>) {
        let opened = match self.resource.lock().take() {
            Some(mut resource) => resource.open().map(|()| resource),
            None => Err(FlowError::OpenFailed(
                "resource already consumed by an earlier subscription".into(),
            )),
        };
        let core = Arc::new(WriteCore {
            inner: Mutex::new(WriteState {
                downstream: Some(consumer.clone()),
                phase: WritePhase::AwaitingUpstream,
                resource: None,
                pending_demand: Demand::NONE,
            }),
        });
        consumer.on_subscribe(Arc::new(WriteChannel {
            core: Arc::clone(&core),
        }));
        match opened {
            Ok(resource) => {
                core.inner.lock().resource = Some(resource);
                self.upstream.subscribe(Arc::new(WriteUplink { core }));
            }
            Err(failure) => {
                let downstream = {
                    let mut state = core.inner.lock();
                    state.phase = WritePhase::Completed;
                    state.downstream.take()
                };
                if let Some(downstream) = downstream {
                    downstream.on_complete(Completion::Failed(failure));
                }
            }
        }
    }
}

enum WritePhase {
    /// Resource open, upstream handshake outstanding.
    AwaitingUpstream,
    Streaming {
        upstream: Arc<dyn Subscription>,
    },
    Completed,
}

struct WriteState<R> {
    downstream: Option<Arc<dyn Consumer<Input = usize>>>,
    phase: WritePhase,
    resource: Option<R>,
    pending_demand: Demand,
}

struct WriteCore<R> {
    inner: Mutex<WriteState<R>>,
}

enum WriteOutcome {
    Report(Arc<dyn Consumer<Input = usize>>, usize),
    Terminate {
        downstream: Option<Arc<dyn Consumer<Input = usize>>>,
        upstream: Option<Arc<dyn Subscription>>,
        completion: Completion,
    },
    Dropped,
}

impl<R: WriteResource> WriteCore<R> {
    fn chunk(&self, chunk: &Bytes) -> WriteOutcome {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let Some(mut resource) = state.resource.take() else {
            return WriteOutcome::Dropped;
        };
        let mut written = 0usize;
        while written < chunk.len() {
            match resource.write(&chunk[written..]) {
                Ok(0) => {
                    resource.close();
                    return Self::terminate(state, Completion::Finished);
                }
                Ok(n) => written += n,
                Err(failure) => {
                    resource.close();
                    return Self::terminate(state, Completion::Failed(failure));
                }
            }
        }
        state.resource = Some(resource);
        match &state.downstream {
            Some(downstream) => WriteOutcome::Report(Arc::clone(downstream), written),
            None => WriteOutcome::Dropped,
        }
    }

    fn terminate(state: &mut WriteState<R>, completion: Completion) -> WriteOutcome {
        if let Some(mut resource) = state.resource.take() {
            resource.close();
        }
        let upstream = match std::mem::replace(&mut state.phase, WritePhase::Completed) {
            WritePhase::Streaming { upstream } => Some(upstream),
            WritePhase::AwaitingUpstream | WritePhase::Completed => None,
        };
        state.pending_demand = Demand::NONE;
        WriteOutcome::Terminate {
            downstream: state.downstream.take(),
            upstream,
            completion,
        }
    }

    fn run(&self, outcome: WriteOutcome) -> Demand {
        match outcome {
            WriteOutcome::Report(downstream, written) => downstream.on_next(written),
            WriteOutcome::Terminate {
                downstream,
                upstream,
                completion,
            } => {
                if let Some(upstream) = upstream {
                    upstream.cancel();
                }
                if let Some(downstream) = downstream {
                    downstream.on_complete(completion);
                }
                Demand::NONE
            }
            WriteOutcome::Dropped => {
                debug!("dropping chunk arriving after terminal transition");
                Demand::NONE
            }
        }
    }
}

struct WriteChannel<R> {
    core: Arc<WriteCore<R>>,
}

impl<R: WriteResource> Subscription for WriteChannel<R> {
    fn request(&self, demand: Demand) {
        if !demand.has_demand() {
            return;
        }
        let upstream = {
            let mut guard = self.core.inner.lock();
            let state = &mut *guard;
            match &state.phase {
                WritePhase::Streaming { upstream } => Some(Arc::clone(upstream)),
                WritePhase::AwaitingUpstream => {
                    state.pending_demand += demand;
                    None
                }
                WritePhase::Completed => None,
            }
        };
        if let Some(upstream) = upstream {
            upstream.request(demand);
        }
    }

    fn cancel(&self) {
        let outcome = {
            let mut guard = self.core.inner.lock();
            let state = &mut *guard;
            if state.downstream.is_none() && state.resource.is_none() {
                return;
            }
            state.downstream = None;
            WriteCore::terminate(state, Completion::Finished)
        };
        // terminate() already dropped the downstream, so this only cancels
        // the upstream and closes nothing twice.
        self.core.run(outcome);
    }
}

struct WriteUplink<R> {
    core: Arc<WriteCore<R>>,
}

impl<R: WriteResource> Consumer for WriteUplink<R> {
    type Input = Bytes;

    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let (keep, pending) = {
            let mut guard = self.core.inner.lock();
            let state = &mut *guard;
            match &state.phase {
                WritePhase::AwaitingUpstream => {
                    state.phase = WritePhase::Streaming {
                        upstream: Arc::clone(&subscription),
                    };
                    let pending = state.pending_demand;
                    state.pending_demand = Demand::NONE;
                    (true, pending)
                }
                _ => (false, Demand::NONE),
            }
        };
        if keep {
            if pending.has_demand() {
                subscription.request(pending);
            }
        } else {
            subscription.cancel();
        }
    }

    fn on_next(&self, chunk: Bytes) -> Demand {
        let outcome = self.core.chunk(&chunk);
        self.core.run(outcome)
    }

    fn on_complete(&self, completion: Completion) {
        let outcome = {
            let mut state = self.core.inner.lock();
            WriteCore::terminate(&mut state, completion)
        };
        self.core.run(outcome);
    }
}
