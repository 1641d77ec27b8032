//! Broadcast subject that buffers history for its first subscriber.
//!
//! ## Overview
//!
//! [`BufferSubject`] accepts values through [`BufferSubject::send`] and
//! broadcasts them to every subscribed consumer. Values sent before anyone
//! subscribes are queued; the first consumer to subscribe receives that
//! entire queue in order before seeing live traffic. Every later consumer
//! sees only values sent after it subscribed.
//!
//! A completion sent while still buffering is held back until the first
//! subscriber has drained the queue, so history is never cut short by an
//! early `complete`. After completion the subject drops further values and
//! hands the terminal signal to any late subscriber immediately.
//!
//! Delivery is demand-gated per subscriber. A live value is admitted to a
//! subscriber only when that subscriber has uncommitted demand for it;
//! otherwise the value is dropped for that subscriber. The buffered history
//! is exempt from this rule: it is retained until the first subscriber has
//! pulled all of it, however slowly.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::protocol::{Completion, Consumer, Demand, Producer, Subscription};

// ----------------------------------------------------------------------------
// BufferSubject
// ----------------------------------------------------------------------------

/// A broadcast subject with buffered history for the first subscriber.
///
/// Cloning is cheap; all clones feed the same subscriber set.
pub struct BufferSubject<T> {
    core: Arc<SubjectCore<T>>,
}

impl<T> Clone for BufferSubject<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for BufferSubject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> BufferSubject<T> {
    /// Creates an empty subject in the buffering phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(SubjectCore {
                inner: Mutex::new(Inner {
                    phase: Phase::Buffering(VecDeque::new()),
                    slots: Vec::new(),
                    next_slot: 0,
                }),
            }),
        }
    }

    /// Sends a value to the subject.
    ///
    /// Before the first subscription the value is buffered. Afterwards it is
    /// broadcast to each live subscriber with demand for it. After a
    /// completion has been captured the value is silently dropped.
    pub fn send(&self, value: T) {
        let pump_ids = {
            let mut guard = self.core.inner.lock();
            let inner = &mut *guard;
            match &mut inner.phase {
                Phase::Buffering(queue) => {
                    queue.push_back(value);
                    Vec::new()
                }
                Phase::Live => {
                    let mut ids = Vec::new();
                    for slot in &mut inner.slots {
                        if slot.admit() {
                            slot.backlog.push_back(value.clone());
                            ids.push(slot.id);
                        }
                    }
                    ids
                }
                Phase::BufferingAfterCompletion(..) | Phase::Completed(_) => Vec::new(),
            }
        };
        for id in pump_ids {
            self.core.pump(id);
        }
    }

    /// Sends a terminal signal to the subject.
    ///
    /// While buffering, the signal is captured and delivered to the first
    /// subscriber after the queue drains. While live, it is broadcast and
    /// the subject completes. Repeated calls are ignored.
    pub fn complete(&self, completion: Completion) {
        let pump_ids = {
            let mut guard = self.core.inner.lock();
            let inner = &mut *guard;
            match &mut inner.phase {
                Phase::Buffering(queue) => {
                    let queue = std::mem::take(queue);
                    inner.phase = Phase::BufferingAfterCompletion(queue, completion);
                    Vec::new()
                }
                Phase::Live => {
                    inner.phase = Phase::Completed(completion.clone());
                    let mut ids = Vec::new();
                    for slot in &mut inner.slots {
                        slot.pending_completion = Some(completion.clone());
                        ids.push(slot.id);
                    }
                    ids
                }
                Phase::BufferingAfterCompletion(..) | Phase::Completed(_) => {
                    debug!("ignoring completion sent to a completed subject");
                    Vec::new()
                }
            }
        };
        for id in pump_ids {
            self.core.pump(id);
        }
    }

    /// Convenience for `complete(Completion::Finished)`.
    pub fn finish(&self) {
        self.complete(Completion::Finished);
    }
}

impl<T: Clone + Send + Sync + 'static> Producer for BufferSubject<T> {
    type Output = T;

    fn subscribe(&self, consumer: Arc<dyn Consumer<Input = T>>) {
        let id = {
            let mut inner = self.core.inner.lock();
            let id = inner.next_slot;
            inner.next_slot += 1;
            let mut slot = Slot {
                id,
                consumer: Arc::clone(&consumer),
                demand: Demand::NONE,
                backlog: VecDeque::new(),
                seeding: false,
                pending_completion: None,
                pumping: false,
                done: false,
            };
            match std::mem::replace(&mut inner.phase, Phase::Live) {
                Phase::Buffering(queue) => {
                    slot.seeding = !queue.is_empty();
                    slot.backlog = queue;
                }
                Phase::Live => {}
                Phase::BufferingAfterCompletion(queue, completion) => {
                    slot.seeding = !queue.is_empty();
                    slot.backlog = queue;
                    slot.pending_completion = Some(completion.clone());
                    inner.phase = Phase::Completed(completion);
                }
                Phase::Completed(completion) => {
                    slot.pending_completion = Some(completion.clone());
                    inner.phase = Phase::Completed(completion);
                }
            }
            inner.slots.push(slot);
            id
        };
        consumer.on_subscribe(Arc::new(SlotSubscription {
            core: Arc::clone(&self.core),
            id,
        }));
        // Delivers a buffered completion even if the consumer never requests.
        self.core.pump(id);
    }
}

// ----------------------------------------------------------------------------
// Internals
// ----------------------------------------------------------------------------

enum Phase<T> {
    Buffering(VecDeque<T>),
    Live,
    BufferingAfterCompletion(VecDeque<T>, Completion),
    Completed(Completion),
}

struct Inner<T> {
    phase: Phase<T>,
    slots: Vec<Slot<T>>,
    next_slot: u64,
}

struct Slot<T> {
    id: u64,
    consumer: Arc<dyn Consumer<Input = T>>,
    demand: Demand,
    backlog: VecDeque<T>,
    // True while the initial history queue is still draining. Seeded values
    // are kept regardless of demand.
    seeding: bool,
    pending_completion: Option<Completion>,
    pumping: bool,
    done: bool,
}

impl<T> Slot<T> {
    // A live value is admitted only when there is demand beyond what the
    // backlog already commits to.
    fn admit(&self) -> bool {
        if self.done {
            return false;
        }
        if self.seeding {
            return true;
        }
        self.demand
            .remaining()
            .map_or(true, |r| r > self.backlog.len() as u64)
    }
}

struct SubjectCore<T> {
    inner: Mutex<Inner<T>>,
}

enum Step<T> {
    Deliver(Arc<dyn Consumer<Input = T>>, T),
    Complete(Arc<dyn Consumer<Input = T>>, Completion),
    Idle,
}

impl<T: Send + Sync + 'static> SubjectCore<T> {
    // Iterative drain for one slot. Values are handed to the consumer with
    // the lock released; replenished demand folds back in before the next
    // step. Re-entrant requests from on_next only add demand and return.
    fn pump(&self, id: u64) {
        {
            let mut inner = self.inner.lock();
            let Some(slot) = inner.slots.iter_mut().find(|s| s.id == id) else {
                return;
            };
            if slot.pumping {
                return;
            }
            slot.pumping = true;
        }
        loop {
            let step = {
                let mut inner = self.inner.lock();
                let Some(index) = inner.slots.iter().position(|s| s.id == id) else {
                    return;
                };
                let slot = &mut inner.slots[index];
                if slot.done {
                    // Cancelled mid-pump; the cancel left removal to us.
                    inner.slots.swap_remove(index);
                    Step::Idle
                } else if let Some(value) =
                    slot.demand.has_demand().then(|| slot.backlog.pop_front()).flatten()
                {
                    slot.demand -= Demand::of(1);
                    if slot.backlog.is_empty() {
                        slot.seeding = false;
                    }
                    Step::Deliver(Arc::clone(&slot.consumer), value)
                } else if slot.backlog.is_empty() {
                    if let Some(completion) = slot.pending_completion.take() {
                        slot.done = true;
                        let consumer = Arc::clone(&slot.consumer);
                        inner.slots.swap_remove(index);
                        Step::Complete(consumer, completion)
                    } else {
                        slot.pumping = false;
                        Step::Idle
                    }
                } else {
                    slot.pumping = false;
                    Step::Idle
                }
            };
            match step {
                Step::Deliver(consumer, value) => {
                    let replenished = consumer.on_next(value);
                    if replenished.has_demand() {
                        let mut inner = self.inner.lock();
                        if let Some(slot) = inner.slots.iter_mut().find(|s| s.id == id) {
                            slot.demand += replenished;
                        }
                    }
                }
                Step::Complete(consumer, completion) => {
                    consumer.on_complete(completion);
                    return;
                }
                Step::Idle => return,
            }
        }
    }
}

struct SlotSubscription<T> {
    core: Arc<SubjectCore<T>>,
    id: u64,
}

impl<T: Send + Sync + 'static> Subscription for SlotSubscription<T> {
    fn request(&self, demand: Demand) {
        {
            let mut inner = self.core.inner.lock();
            let Some(slot) = inner.slots.iter_mut().find(|s| s.id == self.id) else {
                return;
            };
            if slot.done {
                return;
            }
            slot.demand += demand;
        }
        self.core.pump(self.id);
    }

    fn cancel(&self) {
        let mut inner = self.core.inner.lock();
        if let Some(index) = inner.slots.iter().position(|s| s.id == self.id) {
            inner.slots[index].done = true;
            if !inner.slots[index].pumping {
                inner.slots.swap_remove(index);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::sink::CallbackConsumer;
    use parking_lot::Mutex as PlMutex;

    fn collecting_consumer<T: Clone + Send + Sync + 'static>(
        log: &Arc<PlMutex<Vec<T>>>,
        completions: &Arc<PlMutex<Vec<Completion>>>,
    ) -> Arc<CallbackConsumer<T>> {
        let values = Arc::clone(log);
        let ends = Arc::clone(completions);
        Arc::new(CallbackConsumer::new(
            Demand::UNBOUNDED,
            move |value| {
                values.lock().push(value);
                Demand::NONE
            },
            move |completion| ends.lock().push(completion),
        ))
    }

    // --- buffering tests ---

    #[test]
    fn test_first_subscriber_receives_buffered_history() {
        let subject = BufferSubject::new();
        subject.send(1);
        subject.send(2);

        let log = Arc::new(PlMutex::new(Vec::new()));
        let completions = Arc::new(PlMutex::new(Vec::new()));
        let consumer = collecting_consumer(&log, &completions);
        let erased: Arc<dyn Consumer<Input = i32>> = consumer;
        subject.subscribe(erased);

        subject.send(3);
        assert_eq!(*log.lock(), vec![1, 2, 3]);
        assert!(completions.lock().is_empty());
    }

    #[test]
    fn test_second_subscriber_sees_only_live_values() {
        let subject = BufferSubject::new();
        subject.send(1);

        let first_log = Arc::new(PlMutex::new(Vec::new()));
        let first_ends = Arc::new(PlMutex::new(Vec::new()));
        let first: Arc<dyn Consumer<Input = i32>> =
            collecting_consumer(&first_log, &first_ends);
        subject.subscribe(first);

        let second_log = Arc::new(PlMutex::new(Vec::new()));
        let second_ends = Arc::new(PlMutex::new(Vec::new()));
        let second: Arc<dyn Consumer<Input = i32>> =
            collecting_consumer(&second_log, &second_ends);
        subject.subscribe(second);

        subject.send(2);
        assert_eq!(*first_log.lock(), vec![1, 2]);
        assert_eq!(*second_log.lock(), vec![2]);
    }

    #[test]
    fn test_history_respects_demand() {
        let subject = BufferSubject::new();
        subject.send(1);
        subject.send(2);
        subject.send(3);

        let log = Arc::new(PlMutex::new(Vec::new()));
        let values = Arc::clone(&log);
        let consumer = Arc::new(CallbackConsumer::new(
            Demand::of(2),
            move |value| {
                values.lock().push(value);
                Demand::NONE
            },
            |_| {},
        ));
        let erased: Arc<dyn Consumer<Input = i32>> = consumer.clone();
        subject.subscribe(erased);

        assert_eq!(*log.lock(), vec![1, 2]);
        consumer.request(Demand::of(1));
        assert_eq!(*log.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_live_value_dropped_without_demand() {
        let subject = BufferSubject::new();

        let log = Arc::new(PlMutex::new(Vec::new()));
        let values = Arc::clone(&log);
        let consumer = Arc::new(CallbackConsumer::new(
            Demand::NONE,
            move |value| {
                values.lock().push(value);
                Demand::NONE
            },
            |_| {},
        ));
        let erased: Arc<dyn Consumer<Input = i32>> = consumer.clone();
        subject.subscribe(erased);

        subject.send(1);
        consumer.request(Demand::of(1));
        subject.send(2);
        assert_eq!(*log.lock(), vec![2]);
    }

    // --- completion tests ---

    #[test]
    fn test_completion_before_subscribe_delivered_after_history() {
        let subject = BufferSubject::new();
        subject.send(1);
        subject.finish();
        subject.send(2);

        let log = Arc::new(PlMutex::new(Vec::new()));
        let completions = Arc::new(PlMutex::new(Vec::new()));
        let consumer: Arc<dyn Consumer<Input = i32>> =
            collecting_consumer(&log, &completions);
        subject.subscribe(consumer);

        assert_eq!(*log.lock(), vec![1]);
        assert_eq!(*completions.lock(), vec![Completion::Finished]);
    }

    #[test]
    fn test_late_subscriber_after_completion_gets_only_completion() {
        let subject = BufferSubject::<i32>::new();

        let first_log = Arc::new(PlMutex::new(Vec::new()));
        let first_ends = Arc::new(PlMutex::new(Vec::new()));
        let first: Arc<dyn Consumer<Input = i32>> =
            collecting_consumer(&first_log, &first_ends);
        subject.subscribe(first);
        subject.send(1);
        subject.finish();

        let late_log = Arc::new(PlMutex::new(Vec::new()));
        let late_ends = Arc::new(PlMutex::new(Vec::new()));
        let late: Arc<dyn Consumer<Input = i32>> =
            collecting_consumer(&late_log, &late_ends);
        subject.subscribe(late);

        assert!(late_log.lock().is_empty());
        assert_eq!(*late_ends.lock(), vec![Completion::Finished]);
        assert_eq!(*first_ends.lock(), vec![Completion::Finished]);
    }

    #[test]
    fn test_completion_delivered_at_most_once() {
        let subject = BufferSubject::<i32>::new();

        let log = Arc::new(PlMutex::new(Vec::new()));
        let completions = Arc::new(PlMutex::new(Vec::new()));
        let consumer: Arc<dyn Consumer<Input = i32>> =
            collecting_consumer(&log, &completions);
        subject.subscribe(consumer);

        subject.finish();
        subject.finish();
        subject.complete(Completion::Failed(crate::FlowError::custom("late")));
        assert_eq!(*completions.lock(), vec![Completion::Finished]);
    }

    // --- cancellation tests ---

    #[test]
    fn test_cancelled_subscriber_receives_nothing_further() {
        let subject = BufferSubject::new();

        let log = Arc::new(PlMutex::new(Vec::new()));
        let completions = Arc::new(PlMutex::new(Vec::new()));
        let consumer = collecting_consumer(&log, &completions);
        let erased: Arc<dyn Consumer<Input = i32>> = consumer.clone();
        subject.subscribe(erased);

        subject.send(1);
        consumer.cancel();
        subject.send(2);
        subject.finish();

        assert_eq!(*log.lock(), vec![1]);
        assert!(completions.lock().is_empty());
    }

    #[test]
    fn test_reentrant_request_from_on_next_drains_iteratively() {
        let subject = BufferSubject::new();
        for i in 0..1000 {
            subject.send(i);
        }

        let log = Arc::new(PlMutex::new(Vec::new()));
        let values = Arc::clone(&log);
        // One unit up front, one replenished per value. Replenishment from
        // inside on_next must not recurse.
        let consumer = Arc::new(CallbackConsumer::new(
            Demand::of(1),
            move |value| {
                values.lock().push(value);
                Demand::of(1)
            },
            |_| {},
        ));
        let erased: Arc<dyn Consumer<Input = i32>> = consumer.clone();
        subject.subscribe(erased);

        assert_eq!(log.lock().len(), 1000);
    }

    #[test]
    fn test_cancel_during_delivery_releases_the_slot() {
        struct CancelOnFirstValue {
            subscription: PlMutex<Option<Arc<dyn Subscription>>>,
            seen: PlMutex<Vec<i32>>,
        }

        impl Consumer for CancelOnFirstValue {
            type Input = i32;

            fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
                subscription.request(Demand::UNBOUNDED);
                *self.subscription.lock() = Some(subscription);
            }

            fn on_next(&self, value: i32) -> Demand {
                self.seen.lock().push(value);
                if let Some(subscription) = self.subscription.lock().take() {
                    subscription.cancel();
                }
                Demand::NONE
            }

            fn on_complete(&self, _completion: Completion) {
                panic!("cancelled subscriber must not complete");
            }
        }

        let subject = BufferSubject::new();
        let consumer = Arc::new(CancelOnFirstValue {
            subscription: PlMutex::new(None),
            seen: PlMutex::new(Vec::new()),
        });
        let erased: Arc<dyn Consumer<Input = i32>> = consumer.clone();
        subject.subscribe(erased);

        subject.send(1);
        subject.send(2);

        assert_eq!(*consumer.seen.lock(), vec![1]);
        // The re-entrant cancel ran while the delivery pump held the slot;
        // once the pump unwinds, the subject must not retain the consumer.
        assert_eq!(Arc::strong_count(&consumer), 1);
    }
}
