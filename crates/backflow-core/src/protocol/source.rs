//! Small demand-correct producers.
//!
//! [`vec_producer`] emits a fixed sequence under demand and then finishes;
//! [`fail_producer`] fails on the first request. Both are used by operators
//! and tests as minimal well-behaved upstreams.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::contract::{Consumer, Producer, SharedConsumer, SharedProducer, Subscription};
use super::demand::Demand;
use super::error::{Completion, FlowError};

// Replays a fixed vector, once per subscriber.
struct VecProducer<T> {
    values: Vec<T>,
}

/// Creates a producer that emits `values` in order under demand, then
/// finishes.
pub fn vec_producer<T: Clone + Send + Sync + 'static>(values: Vec<T>) -> SharedProducer<T> {
    Arc::new(VecProducer { values })
}

impl<T: Clone + Send + Sync + 'static> Producer for VecProducer<T> {
    type Output = T;

    fn subscribe(&self, consumer: SharedConsumer<T>) {
        let channel = Arc::new(VecChannel {
            inner: Mutex::new(VecChannelInner {
                items: self.values.iter().cloned().collect(),
                demand: Demand::NONE,
                draining: false,
                terminal: false,
            }),
            consumer,
        });
        let erased: Arc<dyn Subscription> = channel.clone();
        channel.consumer.on_subscribe(erased);
    }
}

struct VecChannelInner<T> {
    items: VecDeque<T>,
    demand: Demand,
    draining: bool,
    terminal: bool,
}

struct VecChannel<T> {
    inner: Mutex<VecChannelInner<T>>,
    consumer: SharedConsumer<T>,
}

impl<T: Send + Sync> Subscription for VecChannel<T> {
    fn request(&self, demand: Demand) {
        if !demand.has_demand() {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.terminal {
            return;
        }
        inner.demand += demand;
        if inner.draining {
            // Re-entrant request from inside `on_next`; the outer drain
            // loop picks up the added demand.
            return;
        }
        inner.draining = true;

        let mut finished = false;
        loop {
            if inner.terminal {
                break;
            }
            if !inner.demand.has_demand() {
                break;
            }
            let Some(value) = inner.items.pop_front() else {
                finished = true;
                inner.terminal = true;
                break;
            };
            inner.demand -= Demand::of(1);
            drop(inner);
            let more = self.consumer.on_next(value);
            inner = self.inner.lock();
            inner.demand += more;
            if inner.items.is_empty() && !inner.terminal {
                finished = true;
                inner.terminal = true;
                break;
            }
        }
        inner.draining = false;
        drop(inner);

        if finished {
            self.consumer.on_complete(Completion::Finished);
        }
    }

    fn cancel(&self) {
        self.inner.lock().terminal = true;
    }
}

// Fails with a fixed error on the first request.
struct FailProducer<T> {
    error: FlowError,
    _output: std::marker::PhantomData<fn() -> T>,
}

/// Creates a producer that delivers `error` terminally on the first
/// request, without ever emitting a value.
#[must_use]
pub fn fail_producer<T: Send + Sync + 'static>(error: FlowError) -> SharedProducer<T> {
    Arc::new(FailProducer {
        error,
        _output: std::marker::PhantomData,
    })
}

impl<T: Send + Sync + 'static> Producer for FailProducer<T> {
    type Output = T;

    fn subscribe(&self, consumer: SharedConsumer<T>) {
        let channel = Arc::new(FailChannel {
            consumer,
            error: self.error.clone(),
            fired: Mutex::new(false),
        });
        let erased: Arc<dyn Subscription> = channel.clone();
        channel.consumer.on_subscribe(erased);
    }
}

struct FailChannel<T> {
    consumer: SharedConsumer<T>,
    error: FlowError,
    fired: Mutex<bool>,
}

impl<T: Send + Sync> Subscription for FailChannel<T> {
    fn request(&self, demand: Demand) {
        if !demand.has_demand() {
            return;
        }
        let first = {
            let mut fired = self.fired.lock();
            !std::mem::replace(&mut *fired, true)
        };
        if first {
            self.consumer
                .on_complete(Completion::Failed(self.error.clone()));
        }
    }

    fn cancel(&self) {
        *self.fired.lock() = true;
    }
}

#[cfg(test)]
mod tests {
    use super::super::sink::ProducerExt;
    use super::*;

    // --- VecProducer tests ---

    #[test]
    fn test_emits_all_values_under_unlimited_demand() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        let done2 = Arc::clone(&done);

        let _guard = vec_producer(vec![1, 2, 3]).sink(
            move |v| seen2.lock().push(v),
            move |c| *done2.lock() = Some(c),
        );

        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert_eq!(*done.lock(), Some(Completion::Finished));
    }

    #[test]
    fn test_respects_finite_demand() {
        use super::super::sink::CallbackConsumer;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let consumer = Arc::new(CallbackConsumer::new(
            Demand::of(2),
            move |v: i32| {
                seen2.lock().push(v);
                Demand::NONE
            },
            |_| panic!("should not complete while demand is outstanding"),
        ));
        let erased: Arc<dyn Consumer<Input = i32>> = consumer.clone();
        vec_producer(vec![1, 2, 3]).subscribe(erased);

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_reentrant_request_does_not_recurse() {
        use super::super::sink::CallbackConsumer;

        // One value per on_next, re-requested from inside the callback.
        // Large enough to overflow the stack if the drain recursed.
        let count = Arc::new(Mutex::new(0u32));
        let count2 = Arc::clone(&count);
        let consumer = Arc::new(CallbackConsumer::new(
            Demand::of(1),
            move |_: u32| {
                *count2.lock() += 1;
                Demand::of(1)
            },
            |_| {},
        ));
        let erased: Arc<dyn Consumer<Input = u32>> = consumer.clone();
        vec_producer((0..100_000).collect()).subscribe(erased);

        assert_eq!(*count.lock(), 100_000);
    }

    // --- FailProducer tests ---

    #[test]
    fn test_fails_on_first_request() {
        let done = Arc::new(Mutex::new(None));
        let done2 = Arc::clone(&done);

        let _guard = fail_producer::<i32>(FlowError::custom("boom")).sink(
            |_| panic!("no value expected"),
            move |c| *done2.lock() = Some(c),
        );

        assert_eq!(
            *done.lock(),
            Some(Completion::Failed(FlowError::custom("boom")))
        );
    }
}
