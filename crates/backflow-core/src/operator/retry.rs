//! Resubscribes to a failed upstream after a predicate-approved backoff.
//!
//! ## Overview
//!
//! `retry_when` forwards values untouched. When the upstream fails, the
//! failure is offered to a predicate: rejected failures propagate downstream
//! terminally, accepted ones are absorbed and a resubscription is scheduled
//! after `interval(retry_count)` on the supplied [`Scheduler`]. The retry
//! count resets to zero every time a value is successfully delivered
//! downstream, so backoff measures consecutive failures, not lifetime
//! failures.
//!
//! The downstream handshake happens exactly once. Resubscription replaces
//! only the upstream leg; outstanding downstream demand survives the swap
//! and is re-applied to the new upstream channel as soon as it arrives. A
//! value the upstream delivers while downstream demand is exhausted is held
//! in a one-slot buffer and delivered by the next `request`.
//!
//! Cancellation tears down exactly one of the live upstream channel or the
//! pending retry timer, whichever the operator currently holds.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::protocol::{
    Completion, Consumer, Demand, FlowError, Producer, SharedProducer, Subscription,
};
use crate::time::{Scheduler, TimerHandle};

/// Retries `upstream` on failures accepted by `predicate`, waiting
/// `interval(retry_count)` before each resubscription.
///
/// `interval` receives the 1-based count of consecutive failures.
pub fn retry_when<T: Send + Sync + 'static>(
    upstream: SharedProducer<T>,
    predicate: impl Fn(&FlowError) -> bool + Send + Sync + 'static,
    interval: impl Fn(u32) -> Duration + Send + Sync + 'static,
    scheduler: Arc<dyn Scheduler>,
) -> SharedProducer<T> {
    Arc::new(RetryWhen {
        upstream,
        predicate: Arc::new(predicate),
        interval: Arc::new(interval),
        scheduler,
    })
}

struct RetryWhen<T> {
    upstream: SharedProducer<T>,
    predicate: Arc<dyn Fn(&FlowError) -> bool + Send + Sync>,
    interval: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Send + Sync + 'static> Producer for RetryWhen<T> {
    type Output = T;

    fn subscribe(&self, consumer: Arc<dyn Consumer<Input = T>>) {
        let core = Arc::new(RetryCore {
            upstream: self.upstream.clone(),
            predicate: Arc::clone(&self.predicate),
            interval: Arc::clone(&self.interval),
            scheduler: Arc::clone(&self.scheduler),
            inner: Mutex::new(RetryState {
                phase: RetryPhase::AwaitingUpstream,
                demand: Demand::NONE,
                retries: 0,
                downstream: Some(consumer.clone()),
            }),
        });
        consumer.on_subscribe(Arc::new(RetryChannel {
            core: Arc::clone(&core),
        }));
        core.resubscribe();
    }
}

// ----------------------------------------------------------------------------
// Core state machine
// ----------------------------------------------------------------------------

enum RetryPhase<T> {
    /// Waiting for the first upstream handshake.
    AwaitingUpstream,
    /// Upstream failed; a resubscription timer may be armed.
    Retrying(Option<TimerHandle>),
    /// Upstream live. `buffered` holds a value that arrived with downstream
    /// demand exhausted.
    Ready {
        upstream: Arc<dyn Subscription>,
        buffered: Option<T>,
    },
    Completed,
}

struct RetryState<T> {
    phase: RetryPhase<T>,
    demand: Demand,
    retries: u32,
    downstream: Option<Arc<dyn Consumer<Input = T>>>,
}

struct RetryCore<T> {
    upstream: SharedProducer<T>,
    predicate: Arc<dyn Fn(&FlowError) -> bool + Send + Sync>,
    interval: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
    scheduler: Arc<dyn Scheduler>,
    inner: Mutex<RetryState<T>>,
}

impl<T: Send + Sync + 'static> RetryCore<T> {
    fn resubscribe(self: &Arc<Self>) {
        let go = {
            let state = self.inner.lock();
            state.downstream.is_some()
                && matches!(
                    state.phase,
                    RetryPhase::AwaitingUpstream | RetryPhase::Retrying(_)
                )
        };
        if go {
            self.upstream.subscribe(Arc::new(RetryUplink {
                core: Arc::clone(self),
            }));
        }
    }

    fn attach(&self, subscription: Arc<dyn Subscription>) {
        let demand = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            match state.phase {
                RetryPhase::AwaitingUpstream | RetryPhase::Retrying(_) => {
                    // A handle still present here has already fired; the
                    // subscription it produced is the one being attached.
                    state.phase = RetryPhase::Ready {
                        upstream: Arc::clone(&subscription),
                        buffered: None,
                    };
                    Some(state.demand)
                }
                RetryPhase::Ready { .. } | RetryPhase::Completed => None,
            }
        };
        match demand {
            Some(demand) if demand.has_demand() => subscription.request(demand),
            Some(_) => {}
            None => subscription.cancel(),
        }
    }

    fn upstream_value(&self, value: T) -> Demand {
        let downstream = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            match &mut state.phase {
                RetryPhase::Ready { buffered, .. } => {
                    if state.demand.has_demand() {
                        state.demand -= Demand::of(1);
                        state.retries = 0;
                        match &state.downstream {
                            Some(downstream) => Some((Arc::clone(downstream), value)),
                            None => None,
                        }
                    } else {
                        *buffered = Some(value);
                        None
                    }
                }
                _ => {
                    debug!("dropping value from a detached upstream");
                    None
                }
            }
        };
        let Some((downstream, value)) = downstream else {
            return Demand::NONE;
        };
        let replenished = downstream.on_next(value);
        if replenished.has_demand() {
            self.inner.lock().demand += replenished;
        }
        replenished
    }

    fn upstream_completed(self: &Arc<Self>, completion: Completion) {
        let failure = match completion {
            Completion::Finished => {
                let downstream = {
                    let mut state = self.inner.lock();
                    if matches!(state.phase, RetryPhase::Completed) {
                        return;
                    }
                    state.phase = RetryPhase::Completed;
                    state.downstream.take()
                };
                if let Some(downstream) = downstream {
                    downstream.on_complete(Completion::Finished);
                }
                return;
            }
            Completion::Failed(failure) => failure,
        };

        enum Next<T> {
            GiveUp(Arc<dyn Consumer<Input = T>>, FlowError),
            Schedule(Duration),
            Done,
        }
        let next = {
            let mut state = self.inner.lock();
            if matches!(state.phase, RetryPhase::Completed) {
                Next::Done
            } else if (self.predicate)(&failure) {
                state.retries += 1;
                state.phase = RetryPhase::Retrying(None);
                Next::Schedule((self.interval)(state.retries))
            } else {
                state.phase = RetryPhase::Completed;
                match state.downstream.take() {
                    Some(downstream) => Next::GiveUp(downstream, failure),
                    None => Next::Done,
                }
            }
        };
        match next {
            Next::GiveUp(downstream, failure) => {
                downstream.on_complete(Completion::Failed(failure));
            }
            Next::Schedule(delay) => {
                let core = Arc::clone(self);
                let handle = self
                    .scheduler
                    .schedule_after(delay, Box::new(move || core.resubscribe()));
                let stale = {
                    let mut state = self.inner.lock();
                    match &mut state.phase {
                        RetryPhase::Retrying(slot @ None) => {
                            *slot = Some(handle);
                            None
                        }
                        // Cancelled, resubscribed, or replaced while the
                        // timer was being armed.
                        _ => Some(handle),
                    }
                };
                if let Some(handle) = stale {
                    handle.cancel();
                }
            }
            Next::Done => {}
        }
    }
}

// ----------------------------------------------------------------------------
// Downstream channel
// ----------------------------------------------------------------------------

struct RetryChannel<T> {
    core: Arc<RetryCore<T>>,
}

enum RequestAction<T> {
    DeliverBuffered {
        downstream: Arc<dyn Consumer<Input = T>>,
        value: T,
        upstream: Arc<dyn Subscription>,
        carried: Demand,
    },
    Forward(Arc<dyn Subscription>, Demand),
    Hold,
}

impl<T: Send + Sync + 'static> Subscription for RetryChannel<T> {
    fn request(&self, demand: Demand) {
        if !demand.has_demand() {
            return;
        }
        let action = {
            let mut guard = self.core.inner.lock();
            let state = &mut *guard;
            if state.downstream.is_none() {
                return;
            }
            state.demand += demand;
            match &mut state.phase {
                RetryPhase::Ready { upstream, buffered } => match buffered.take() {
                    Some(value) => {
                        state.demand -= Demand::of(1);
                        state.retries = 0;
                        match &state.downstream {
                            Some(downstream) => RequestAction::DeliverBuffered {
                                downstream: Arc::clone(downstream),
                                value,
                                upstream: Arc::clone(upstream),
                                carried: demand - Demand::of(1),
                            },
                            None => RequestAction::Hold,
                        }
                    }
                    None => RequestAction::Forward(Arc::clone(upstream), demand),
                },
                // Demand is re-applied when the next upstream attaches.
                _ => RequestAction::Hold,
            }
        };
        match action {
            RequestAction::DeliverBuffered {
                downstream,
                value,
                upstream,
                carried,
            } => {
                let replenished = downstream.on_next(value);
                if replenished.has_demand() {
                    self.core.inner.lock().demand += replenished;
                }
                let total = carried + replenished;
                if total.has_demand() {
                    upstream.request(total);
                }
            }
            RequestAction::Forward(upstream, demand) => upstream.request(demand),
            RequestAction::Hold => {}
        }
    }

    fn cancel(&self) {
        enum Teardown {
            Upstream(Arc<dyn Subscription>),
            Timer(TimerHandle),
            Nothing,
        }
        let teardown = {
            let mut guard = self.core.inner.lock();
            let state = &mut *guard;
            state.downstream = None;
            state.demand = Demand::NONE;
            match std::mem::replace(&mut state.phase, RetryPhase::Completed) {
                RetryPhase::Ready { upstream, .. } => Teardown::Upstream(upstream),
                RetryPhase::Retrying(Some(handle)) => Teardown::Timer(handle),
                _ => Teardown::Nothing,
            }
        };
        match teardown {
            Teardown::Upstream(upstream) => upstream.cancel(),
            Teardown::Timer(handle) => handle.cancel(),
            Teardown::Nothing => {}
        }
    }
}

// ----------------------------------------------------------------------------
// Upstream consumer
// ----------------------------------------------------------------------------

struct RetryUplink<T> {
    core: Arc<RetryCore<T>>,
}

impl<T: Send + Sync + 'static> Consumer for RetryUplink<T> {
    type Input = T;

    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.core.attach(subscription);
    }

    fn on_next(&self, value: T) -> Demand {
        self.core.upstream_value(value)
    }

    fn on_complete(&self, completion: Completion) {
        self.core.upstream_completed(completion);
    }
}
