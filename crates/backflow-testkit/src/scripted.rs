//! Scriptable upstream for exercising retry and resubscription paths.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use backflow_core::{Completion, Consumer, Demand, FlowError, Producer, Subscription};

/// A [`Producer`] that replays a fixed sequence to every subscriber and
/// fails on chosen emission attempts.
///
/// Emission attempts are numbered globally across all subscriptions, so a
/// fail index of 0 makes the first subscription fail immediately while a
/// fresh resubscription starts from attempt 1 and succeeds. Each failing
/// attempt consumes its index without delivering a value; each subscription
/// replays the sequence from the start. This mirrors how a flaky upstream
/// looks to a retrying operator.
pub struct ScriptedProducer<T> {
    values: Vec<T>,
    fail_at: HashSet<u64>,
    error: FlowError,
    shared: Arc<Mutex<SharedCounters>>,
}

#[derive(Default)]
struct SharedCounters {
    attempts: u64,
    subscriptions: u64,
}

impl<T: Clone + Send + Sync + 'static> ScriptedProducer<T> {
    /// Creates a producer that replays `values` and never fails.
    #[must_use]
    pub fn new(values: Vec<T>) -> Arc<Self> {
        Self::failing_at(values, [])
    }

    /// Creates a producer that fails on the given global emission attempts.
    #[must_use]
    pub fn failing_at(values: Vec<T>, fail_at: impl IntoIterator<Item = u64>) -> Arc<Self> {
        Arc::new(Self {
            values,
            fail_at: fail_at.into_iter().collect(),
            error: FlowError::custom("scripted failure"),
            shared: Arc::new(Mutex::new(SharedCounters::default())),
        })
    }

    /// How many times `subscribe` has been called.
    #[must_use]
    pub fn subscription_count(&self) -> u64 {
        self.shared.lock().subscriptions
    }
}

impl<T: Clone + Send + Sync + 'static> Producer for ScriptedProducer<T> {
    type Output = T;

    fn subscribe(&self, consumer: Arc<dyn Consumer<Input = T>>) {
        self.shared.lock().subscriptions += 1;
        let channel = Arc::new(ScriptedChannel {
            values: self.values.clone(),
            fail_at: self.fail_at.clone(),
            error: self.error.clone(),
            shared: Arc::clone(&self.shared),
            consumer: consumer.clone(),
            inner: Mutex::new(ChannelState {
                position: 0,
                demand: Demand::NONE,
                draining: false,
                terminal: false,
            }),
        });
        consumer.on_subscribe(channel);
    }
}

struct ChannelState {
    position: usize,
    demand: Demand,
    draining: bool,
    terminal: bool,
}

struct ScriptedChannel<T> {
    values: Vec<T>,
    fail_at: HashSet<u64>,
    error: FlowError,
    shared: Arc<Mutex<SharedCounters>>,
    consumer: Arc<dyn Consumer<Input = T>>,
    inner: Mutex<ChannelState>,
}

enum Step<T> {
    Emit(T),
    Complete(Completion),
    Idle,
}

impl<T: Clone + Send + Sync + 'static> ScriptedChannel<T> {
    fn drain(&self) {
        loop {
            let step = {
                let mut state = self.inner.lock();
                if state.terminal || !state.demand.has_demand() {
                    state.draining = false;
                    Step::Idle
                } else if state.position == self.values.len() {
                    state.terminal = true;
                    state.draining = false;
                    Step::Complete(Completion::Finished)
                } else {
                    let attempt = {
                        let mut shared = self.shared.lock();
                        let attempt = shared.attempts;
                        shared.attempts += 1;
                        attempt
                    };
                    if self.fail_at.contains(&attempt) {
                        state.terminal = true;
                        state.draining = false;
                        Step::Complete(Completion::Failed(self.error.clone()))
                    } else {
                        let value = self.values[state.position].clone();
                        state.position += 1;
                        state.demand -= Demand::of(1);
                        Step::Emit(value)
                    }
                }
            };
            match step {
                Step::Emit(value) => {
                    let replenished = self.consumer.on_next(value);
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

impl<T: Clone + Send + Sync + 'static> Subscription for ScriptedChannel<T> {
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

    fn cancel(&self) {
        let mut state = self.inner.lock();
        state.terminal = true;
        state.demand = Demand::NONE;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
