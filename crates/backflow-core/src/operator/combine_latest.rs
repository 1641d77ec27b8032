//! Recomputes an output from the latest value of each source.
//!
//! ## Overview
//!
//! `combine_latest` subscribes to every source with unbounded internal
//! demand and keeps one latest-value slot per source, `None` until the
//! source first emits. Every source emission recomputes
//! `transform(slot_1, .., slot_n)` and delivers the result downstream if a
//! demand unit is available; emissions arriving without downstream demand
//! only refresh the slots, and the next `request` from an idle downstream
//! publishes the current snapshot. Intermediate combinations are never
//! queued.
//!
//! Completion policy: the first source failure fails the combinator and
//! cancels the remaining sources. A source finishing cleanly merely stops
//! contributing; the combinator finishes once every source has finished.
//!
//! Arities 2 through 4 share one core. The unused trailing slots of the
//! lower arities start out already finished and never receive a value, and
//! the arity-specific transform ignores them.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::protocol::{
    Completion, Consumer, Demand, FlowError, Producer, SharedProducer, Subscription,
};

type Transform<A, B, C, D, Out> =
    dyn Fn(Option<&A>, Option<&B>, Option<&C>, Option<&D>) -> Out + Send + Sync;

// ----------------------------------------------------------------------------
// Constructors
// ----------------------------------------------------------------------------

/// Combines the latest values of two sources.
///
/// The transform sees `None` for a source that has not emitted yet.
pub fn combine_latest<A, B, Out>(
    a: SharedProducer<A>,
    b: SharedProducer<B>,
    transform: impl Fn(Option<&A>, Option<&B>) -> Out + Send + Sync + 'static,
) -> SharedProducer<Out>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    Out: Send + Sync + 'static,
{
    Arc::new(CombineLatest::<A, B, (), (), Out> {
        a,
        b,
        c: None,
        d: None,
        transform: Arc::new(move |a, b, _, _| transform(a, b)),
    })
}

/// Combines the latest values of three sources.
pub fn combine_latest3<A, B, C, Out>(
    a: SharedProducer<A>,
    b: SharedProducer<B>,
    c: SharedProducer<C>,
    transform: impl Fn(Option<&A>, Option<&B>, Option<&C>) -> Out + Send + Sync + 'static,
) -> SharedProducer<Out>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    C: Send + Sync + 'static,
    Out: Send + Sync + 'static,
{
    Arc::new(CombineLatest::<A, B, C, (), Out> {
        a,
        b,
        c: Some(c),
        d: None,
        transform: Arc::new(move |a, b, c, _| transform(a, b, c)),
    })
}

/// Combines the latest values of four sources.
pub fn combine_latest4<A, B, C, D, Out>(
    a: SharedProducer<A>,
    b: SharedProducer<B>,
    c: SharedProducer<C>,
    d: SharedProducer<D>,
    transform: impl Fn(Option<&A>, Option<&B>, Option<&C>, Option<&D>) -> Out
        + Send
        + Sync
        + 'static,
) -> SharedProducer<Out>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    C: Send + Sync + 'static,
    D: Send + Sync + 'static,
    Out: Send + Sync + 'static,
{
    Arc::new(CombineLatest {
        a,
        b,
        c: Some(c),
        d: Some(d),
        transform: Arc::new(transform),
    })
}

// ----------------------------------------------------------------------------
// Producer
// ----------------------------------------------------------------------------

struct CombineLatest<A, B, C, D, Out> {
    a: SharedProducer<A>,
    b: SharedProducer<B>,
    c: Option<SharedProducer<C>>,
    d: Option<SharedProducer<D>>,
    transform: Arc<Transform<A, B, C, D, Out>>,
}

impl<A, B, C, D, Out> Producer for CombineLatest<A, B, C, D, Out>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    C: Send + Sync + 'static,
    D: Send + Sync + 'static,
    Out: Send + Sync + 'static,
{
    type Output = Out;

    fn subscribe(&self, consumer: Arc<dyn Consumer<Input = Out>>) {
        let core = Arc::new(CombineCore {
            transform: Arc::clone(&self.transform),
            inner: Mutex::new(CombineState {
                downstream: Some(consumer.clone()),
                latest_a: None,
                latest_b: None,
                latest_c: None,
                latest_d: None,
                finished: [false, false, self.c.is_none(), self.d.is_none()],
                uplinks: [None, None, None, None],
                demand: Demand::NONE,
                publishing: false,
                republish: false,
            }),
        });
        // Handshake precedes source wiring so an immediately-synchronous
        // source can never complete the combinator before the downstream
        // holds its channel.
        consumer.on_subscribe(Arc::new(CombineChannel {
            core: Arc::clone(&core),
        }));
        self.a.subscribe(Arc::new(SlotA {
            core: Arc::clone(&core),
        }));
        self.b.subscribe(Arc::new(SlotB {
            core: Arc::clone(&core),
        }));
        if let Some(c) = &self.c {
            c.subscribe(Arc::new(SlotC {
                core: Arc::clone(&core),
            }));
        }
        if let Some(d) = &self.d {
            d.subscribe(Arc::new(SlotD {
                core: Arc::clone(&core),
            }));
        }
    }
}

// ----------------------------------------------------------------------------
// Core state machine
// ----------------------------------------------------------------------------

struct CombineState<A, B, C, D, Out> {
    downstream: Option<Arc<dyn Consumer<Input = Out>>>,
    latest_a: Option<A>,
    latest_b: Option<B>,
    latest_c: Option<C>,
    latest_d: Option<D>,
    finished: [bool; 4],
    uplinks: [Option<Arc<dyn Subscription>>; 4],
    demand: Demand,
    publishing: bool,
    republish: bool,
}

struct CombineCore<A, B, C, D, Out> {
    transform: Arc<Transform<A, B, C, D, Out>>,
    inner: Mutex<CombineState<A, B, C, D, Out>>,
}

impl<A, B, C, D, Out> CombineCore<A, B, C, D, Out>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    C: Send + Sync + 'static,
    D: Send + Sync + 'static,
    Out: Send + Sync + 'static,
{
    // Emits one combined snapshot per trigger, with the lock released during
    // delivery. A trigger landing while a delivery is in flight folds into
    // the running loop via the republish flag instead of recursing.
    fn publish(&self) {
        {
            let mut state = self.inner.lock();
            if state.publishing {
                state.republish = true;
                return;
            }
            state.publishing = true;
        }
        loop {
            let step = {
                let mut guard = self.inner.lock();
                let state = &mut *guard;
                state.republish = false;
                match (&state.downstream, state.demand.has_demand()) {
                    (Some(downstream), true) => {
                        let downstream = Arc::clone(downstream);
                        state.demand -= Demand::of(1);
                        let out = (self.transform)(
                            state.latest_a.as_ref(),
                            state.latest_b.as_ref(),
                            state.latest_c.as_ref(),
                            state.latest_d.as_ref(),
                        );
                        Some((downstream, out))
                    }
                    _ => {
                        state.publishing = false;
                        None
                    }
                }
            };
            let Some((downstream, out)) = step else {
                return;
            };
            let replenished = downstream.on_next(out);
            let mut state = self.inner.lock();
            if replenished.has_demand() {
                state.demand += replenished;
            }
            if !state.republish {
                state.publishing = false;
                return;
            }
        }
    }

    fn slot_finished(&self, index: usize) {
        let downstream = {
            let mut state = self.inner.lock();
            state.uplinks[index] = None;
            state.finished[index] = true;
            if state.finished.iter().all(|f| *f) {
                state.demand = Demand::NONE;
                state.downstream.take()
            } else {
                None
            }
        };
        if let Some(downstream) = downstream {
            downstream.on_complete(Completion::Finished);
        }
    }

    fn slot_failed(&self, failure: FlowError) {
        let (downstream, uplinks) = {
            let mut state = self.inner.lock();
            state.demand = Demand::NONE;
            (
                state.downstream.take(),
                std::mem::take(&mut state.uplinks),
            )
        };
        for uplink in uplinks.into_iter().flatten() {
            uplink.cancel();
        }
        match downstream {
            Some(downstream) => downstream.on_complete(Completion::Failed(failure)),
            None => debug!("source failed after the combinator went terminal"),
        }
    }

    fn attach(&self, index: usize, subscription: Arc<dyn Subscription>) {
        let keep = {
            let mut state = self.inner.lock();
            if state.downstream.is_some() {
                state.uplinks[index] = Some(Arc::clone(&subscription));
                true
            } else {
                false
            }
        };
        if keep {
            subscription.request(Demand::UNBOUNDED);
        } else {
            subscription.cancel();
        }
    }
}

// ----------------------------------------------------------------------------
// Downstream channel
// ----------------------------------------------------------------------------

struct CombineChannel<A, B, C, D, Out> {
    core: Arc<CombineCore<A, B, C, D, Out>>,
}

impl<A, B, C, D, Out> Subscription for CombineChannel<A, B, C, D, Out>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    C: Send + Sync + 'static,
    D: Send + Sync + 'static,
    Out: Send + Sync + 'static,
{
    fn request(&self, demand: Demand) {
        if !demand.has_demand() {
            return;
        }
        let publish_snapshot = {
            let mut state = self.core.inner.lock();
            if state.downstream.is_none() {
                return;
            }
            let was_idle = !state.demand.has_demand();
            state.demand += demand;
            was_idle
        };
        // Demand arriving on an idle combinator pulls the current snapshot.
        if publish_snapshot {
            self.core.publish();
        }
    }

    fn cancel(&self) {
        let uplinks = {
            let mut state = self.core.inner.lock();
            state.downstream = None;
            state.demand = Demand::NONE;
            std::mem::take(&mut state.uplinks)
        };
        for uplink in uplinks.into_iter().flatten() {
            uplink.cancel();
        }
    }
}

// ----------------------------------------------------------------------------
// Per-source consumers
// ----------------------------------------------------------------------------

macro_rules! slot_consumer {
    ($name:ident, $input:ident, $latest:ident, $index:expr) => {
        struct $name<A, B, C, D, Out> {
            core: Arc<CombineCore<A, B, C, D, Out>>,
        }

        impl<A, B, C, D, Out> Consumer for $name<A, B, C, D, Out>
        where
            A: Send + Sync + 'static,
            B: Send + Sync + 'static,
            C: Send + Sync + 'static,
            D: Send + Sync + 'static,
            Out: Send + Sync + 'static,
        {
            type Input = $input;

            fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
                self.core.attach($index, subscription);
            }

            fn on_next(&self, value: $input) -> Demand {
                {
                    let mut state = self.core.inner.lock();
                    state.$latest = Some(value);
                }
                self.core.publish();
                Demand::NONE
            }

            fn on_complete(&self, completion: Completion) {
                match completion {
                    Completion::Finished => self.core.slot_finished($index),
                    Completion::Failed(failure) => self.core.slot_failed(failure),
                }
            }
        }
    };
}

slot_consumer!(SlotA, A, latest_a, 0);
slot_consumer!(SlotB, B, latest_b, 1);
slot_consumer!(SlotC, C, latest_c, 2);
slot_consumer!(SlotD, D, latest_d, 3);

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
