//! Gates a primary flow on a boolean regulator flow.
//!
//! ## Overview
//!
//! `throttle_while` forwards primary values while the regulator's last word
//! was `false` (or before it has said anything) and withholds them while it
//! is `true`. When the regulator releases the gate, at most one withheld
//! value is emitted: the most recent one under the `latest` policy, the
//! earliest retained one otherwise.
//!
//! The gate distinguishes "throttled with a value pending" from "throttled
//! with nothing new since the gate closed". The latter phase exists so a
//! regulator that flaps `true`/`false` with no intervening primary traffic
//! cannot replay a value that was already delivered.
//!
//! Completion of either side, success or failure, terminates the operator
//! and cancels the other side's subscription.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::protocol::{
    Completion, Consumer, Demand, Producer, SharedProducer, Subscription,
};

/// Throttles `primary` while the latest `regulator` value is `true`.
///
/// With `latest` set, a withheld value is overwritten by newer primary
/// traffic; otherwise the first withheld value is kept and newer traffic is
/// discarded until the gate reopens.
pub fn throttle_while<T: Send + Sync + 'static>(
    primary: SharedProducer<T>,
    regulator: SharedProducer<bool>,
    latest: bool,
) -> SharedProducer<T> {
    Arc::new(ThrottleWhile {
        primary,
        regulator,
        latest,
    })
}

struct ThrottleWhile<T> {
    primary: SharedProducer<T>,
    regulator: SharedProducer<bool>,
    latest: bool,
}

impl<T: Send + Sync + 'static> Producer for ThrottleWhile<T> {
    type Output = T;

    fn subscribe(&self, consumer: Arc<dyn Consumer<Input = T>>) {
        let core = Arc::new(ThrottleCore {
            latest: self.latest,
            inner: Mutex::new(ThrottleState {
                downstream: Some(consumer.clone()),
                gate: Gate::Waiting,
                ready: None,
                demand: Demand::NONE,
                delivering: false,
                uplinks: [None, None],
            }),
        });
        consumer.on_subscribe(Arc::new(ThrottleChannel {
            core: Arc::clone(&core),
        }));
        self.primary.subscribe(Arc::new(PrimaryUplink {
            core: Arc::clone(&core),
        }));
        self.regulator.subscribe(Arc::new(RegulatorUplink { core }));
    }
}

// ----------------------------------------------------------------------------
// Gate state machine
// ----------------------------------------------------------------------------

enum Gate<T> {
    /// No primary or regulator traffic yet. The gate starts open.
    Waiting,
    /// Gate open; primary values pass straight through.
    Publishing,
    /// Gate closed, nothing withheld since it closed. Reopening from here
    /// emits nothing.
    ThrottlingAwaitingOutput,
    /// Gate closed with a withheld value.
    Throttling(T),
    Terminal,
}

struct ThrottleState<T> {
    downstream: Option<Arc<dyn Consumer<Input = T>>>,
    gate: Gate<T>,
    // Emit-decided value awaiting downstream demand.
    ready: Option<T>,
    demand: Demand,
    delivering: bool,
    uplinks: [Option<Arc<dyn Subscription>>; 2],
}

struct ThrottleCore<T> {
    latest: bool,
    inner: Mutex<ThrottleState<T>>,
}

impl<T: Send + Sync + 'static> ThrottleCore<T> {
    fn primary_value(&self, value: T) {
        {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            match std::mem::replace(&mut state.gate, Gate::Terminal) {
                Gate::Waiting | Gate::Publishing => {
                    state.gate = Gate::Publishing;
                    Self::stage(state, self.latest, value);
                }
                Gate::ThrottlingAwaitingOutput => {
                    state.gate = Gate::Throttling(value);
                }
                Gate::Throttling(pending) => {
                    state.gate = if self.latest {
                        Gate::Throttling(value)
                    } else {
                        Gate::Throttling(pending)
                    };
                }
                Gate::Terminal => {}
            }
        }
        self.deliver();
    }

    fn regulator_value(&self, throttled: bool) {
        {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            match std::mem::replace(&mut state.gate, Gate::Terminal) {
                Gate::Waiting | Gate::Publishing => {
                    state.gate = if throttled {
                        Gate::ThrottlingAwaitingOutput
                    } else {
                        Gate::Publishing
                    };
                }
                Gate::ThrottlingAwaitingOutput => {
                    // Reopening with nothing withheld emits nothing.
                    state.gate = if throttled {
                        Gate::ThrottlingAwaitingOutput
                    } else {
                        Gate::Publishing
                    };
                }
                Gate::Throttling(pending) => {
                    if throttled {
                        state.gate = Gate::Throttling(pending);
                    } else {
                        state.gate = Gate::Publishing;
                        Self::stage(state, self.latest, pending);
                    }
                }
                Gate::Terminal => {}
            }
        }
        self.deliver();
    }

    // Places an emit-decided value in the ready slot. An undrained earlier
    // value is overwritten only under the latest policy.
    fn stage(state: &mut ThrottleState<T>, latest: bool, value: T) {
        if state.ready.is_none() || latest {
            state.ready = Some(value);
        } else {
            debug!("discarding value staged behind an undelivered one");
        }
    }

    fn deliver(&self) {
        {
            let mut state = self.inner.lock();
            if state.delivering {
                return;
            }
            state.delivering = true;
        }
        loop {
            let step = {
                let mut guard = self.inner.lock();
                let state = &mut *guard;
                match (&state.downstream, state.ready.is_some(), state.demand.has_demand()) {
                    (Some(downstream), true, true) => {
                        let downstream = Arc::clone(downstream);
                        state.demand -= Demand::of(1);
                        state.ready.take().map(|value| (downstream, value))
                    }
                    _ => {
                        state.delivering = false;
                        None
                    }
                }
            };
            let Some((downstream, value)) = step else {
                return;
            };
            let replenished = downstream.on_next(value);
            if replenished.has_demand() {
                self.inner.lock().demand += replenished;
            }
        }
    }

    fn complete(&self, completion: Completion) {
        let (downstream, uplinks) = {
            let mut state = self.inner.lock();
            if matches!(state.gate, Gate::Terminal) && state.downstream.is_none() {
                return;
            }
            state.gate = Gate::Terminal;
            state.ready = None;
            state.demand = Demand::NONE;
            (
                state.downstream.take(),
                std::mem::take(&mut state.uplinks),
            )
        };
        for uplink in uplinks.into_iter().flatten() {
            uplink.cancel();
        }
        if let Some(downstream) = downstream {
            downstream.on_complete(completion);
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
// Channel and uplinks
// ----------------------------------------------------------------------------

struct ThrottleChannel<T> {
    core: Arc<ThrottleCore<T>>,
}

impl<T: Send + Sync + 'static> Subscription for ThrottleChannel<T> {
    fn request(&self, demand: Demand) {
        if !demand.has_demand() {
            return;
        }
        {
            let mut state = self.core.inner.lock();
            if state.downstream.is_none() {
                return;
            }
            state.demand += demand;
        }
        self.core.deliver();
    }

    fn cancel(&self) {
        let uplinks = {
            let mut state = self.core.inner.lock();
            state.gate = Gate::Terminal;
            state.downstream = None;
            state.ready = None;
            state.demand = Demand::NONE;
            std::mem::take(&mut state.uplinks)
        };
        for uplink in uplinks.into_iter().flatten() {
            uplink.cancel();
        }
    }
}

struct PrimaryUplink<T> {
    core: Arc<ThrottleCore<T>>,
}

impl<T: Send + Sync + 'static> Consumer for PrimaryUplink<T> {
    type Input = T;

    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.core.attach(0, subscription);
    }

    fn on_next(&self, value: T) -> Demand {
        self.core.primary_value(value);
        Demand::NONE
    }

    fn on_complete(&self, completion: Completion) {
        self.core.complete(completion);
    }
}

struct RegulatorUplink<T> {
    core: Arc<ThrottleCore<T>>,
}

impl<T: Send + Sync + 'static> Consumer for RegulatorUplink<T> {
    type Input = bool;

    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.core.attach(1, subscription);
    }

    fn on_next(&self, throttled: bool) -> Demand {
        self.core.regulator_value(throttled);
        Demand::NONE
    }

    fn on_complete(&self, completion: Completion) {
        self.core.complete(completion);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
