//! Terminal consumer that drains a chunk flow into a [`WriteResource`].
//!
//! Demand is incremental: one unit up front, one more after each fully
//! written chunk, so the sink never holds more than a single chunk in
//! flight. The final outcome, total bytes written or the failure that ended
//! the flow, is readable through [`WriteSink::result`] once the flow
//! terminates.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::io::resource::WriteResource;
use crate::protocol::{Completion, Consumer, Demand, FlowError, Producer, Subscription};

/// Drains a `Bytes` flow into a resource, one chunk at a time.
pub struct WriteSink<R> {
    inner: Mutex<SinkState<R>>,
}

struct SinkState<R> {
    resource: Option<R>,
    subscription: Option<Arc<dyn Subscription>>,
    written: u64,
    outcome: Option<Result<u64, FlowError>>,
}

impl<R: WriteResource> WriteSink<R> {
    /// Opens `resource` and subscribes the sink to `producer`.
    ///
    /// An open failure is recorded as the sink's result without touching
    /// the producer.
    pub fn attach<P>(producer: &P, mut resource: R) -> Arc<Self>
    where
        P: Producer<Output = Bytes> + ?Sized,
    {
        let opened = resource.open();
        let sink = Arc::new(Self {
            inner: Mutex::new(SinkState {
                resource: opened.is_ok().then_some(resource),
                subscription: None,
                written: 0,
                outcome: opened.err().map(Err),
            }),
        });
        if sink.inner.lock().resource.is_some() {
            let erased: Arc<dyn Consumer<Input = Bytes>> = sink.clone();
            producer.subscribe(erased);
        }
        sink
    }

    /// The flow's outcome: bytes written on success, the terminal failure
    /// otherwise. `None` while the flow is still live.
    #[must_use]
    pub fn result(&self) -> Option<Result<u64, FlowError>> {
        self.inner.lock().outcome.clone()
    }

    /// Stops the flow and closes the resource. The result reports the
    /// bytes written so far.
    pub fn cancel(&self) {
        let subscription = {
            let mut state = self.inner.lock();
            if state.outcome.is_some() {
                return;
            }
            if let Some(mut resource) = state.resource.take() {
                resource.close();
            }
            state.outcome = Some(Ok(state.written));
            state.subscription.take()
        };
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }

    fn settle(&self, outcome: Result<u64, FlowError>) -> Option<Arc<dyn Subscription>> {
        let mut state = self.inner.lock();
        if state.outcome.is_some() {
            return None;
        }
        if let Some(mut resource) = state.resource.take() {
            resource.close();
        }
        state.outcome = Some(outcome);
        state.subscription.take()
    }
}

impl<R: WriteResource> Consumer for WriteSink<R> {
    type Input = Bytes;

    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        {
            let mut state = self.inner.lock();
            if state.outcome.is_some() {
                drop(state);
                subscription.cancel();
                return;
            }
            state.subscription = Some(Arc::clone(&subscription));
        }
        subscription.request(Demand::of(1));
    }

    fn on_next(&self, chunk: Bytes) -> Demand {
        let failed = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            let Some(resource) = &mut state.resource else {
                return Demand::NONE;
            };
            let mut written = 0usize;
            let mut failed = None;
            while written < chunk.len() {
                match resource.write(&chunk[written..]) {
                    Ok(0) => {
                        failed = Some(Ok(state.written + written as u64));
                        break;
                    }
                    Ok(n) => written += n,
                    Err(failure) => {
                        failed = Some(Err(failure));
                        break;
                    }
                }
            }
            state.written += written as u64;
            failed
        };
        match failed {
            None => Demand::of(1),
            Some(outcome) => {
                if let Some(subscription) = self.settle(outcome) {
                    subscription.cancel();
                }
                Demand::NONE
            }
        }
    }

    fn on_complete(&self, completion: Completion) {
        let outcome = {
            let state = self.inner.lock();
            match completion {
                Completion::Finished => Ok(state.written),
                Completion::Failed(failure) => Err(failure),
            }
        };
        // Upstream is already terminal; settle only closes the resource.
        self.settle(outcome);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
