//! Drops batch elements that were already delivered on this subscription.
//!
//! The operator works on batches (`Vec<T>`). Each element is checked against
//! a set of everything seen so far; a batch that filters down to nothing is
//! swallowed and one replacement demand unit is returned upstream, so the
//! downstream never observes an empty batch and never loses a demand unit
//! to one.

use std::hash::Hash;
use std::sync::Arc;

use fxhash::FxHashSet;
use parking_lot::Mutex;

use crate::protocol::{Completion, Consumer, Demand, Producer, SharedProducer, Subscription};

/// Filters batches down to never-seen elements.
pub fn distinct<T>(upstream: SharedProducer<Vec<T>>) -> SharedProducer<Vec<T>>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    distinct_by(upstream, Clone::clone)
}

/// Filters batches down to elements whose key was never seen.
///
/// Useful when `T` itself is not hashable or when uniqueness should be
/// judged on a projection of the value.
pub fn distinct_by<T, K>(
    upstream: SharedProducer<Vec<T>>,
    key: impl Fn(&T) -> K + Send + Sync + 'static,
) -> SharedProducer<Vec<T>>
where
    T: Send + Sync + 'static,
    K: Eq + Hash + Send + Sync + 'static,
{
    Arc::new(Distinct {
        upstream,
        key: Arc::new(key),
    })
}

struct Distinct<T, K> {
    upstream: SharedProducer<Vec<T>>,
    key: Arc<dyn Fn(&T) -> K + Send + Sync>,
}

impl<T, K> Producer for Distinct<T, K>
where
    T: Send + Sync + 'static,
    K: Eq + Hash + Send + Sync + 'static,
{
    type Output = Vec<T>;

    fn subscribe(&self, consumer: Arc<dyn Consumer<Input = Vec<T>>>) {
        self.upstream.subscribe(Arc::new(DistinctUplink {
            seen: Mutex::new(FxHashSet::default()),
            key: Arc::clone(&self.key),
            downstream: consumer,
        }));
    }
}

struct DistinctUplink<T, K> {
    seen: Mutex<FxHashSet<K>>,
    key: Arc<dyn Fn(&T) -> K + Send + Sync>,
    downstream: Arc<dyn Consumer<Input = Vec<T>>>,
}

impl<T, K> Consumer for DistinctUplink<T, K>
where
    T: Send + Sync + 'static,
    K: Eq + Hash + Send + Sync + 'static,
{
    type Input = Vec<T>;

    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.downstream.on_subscribe(subscription);
    }

    fn on_next(&self, batch: Vec<T>) -> Demand {
        let fresh: Vec<T> = {
            let mut seen = self.seen.lock();
            batch
                .into_iter()
                .filter(|value| seen.insert((self.key)(value)))
                .collect()
        };
        if fresh.is_empty() {
            // The swallowed batch consumed a demand unit; replace it.
            Demand::of(1)
        } else {
            self.downstream.on_next(fresh)
        }
    }

    fn on_complete(&self, completion: Completion) {
        self.downstream.on_complete(completion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::sink::CallbackConsumer;
    use crate::protocol::source::vec_producer;

    fn collect(producer: &SharedProducer<Vec<i32>>) -> Vec<Vec<i32>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let values = Arc::clone(&log);
        let consumer = Arc::new(CallbackConsumer::new(
            Demand::UNBOUNDED,
            move |batch| {
                values.lock().push(batch);
                Demand::NONE
            },
            |_| {},
        ));
        let erased: Arc<dyn Consumer<Input = Vec<i32>>> = consumer;
        producer.subscribe(erased);
        let out = log.lock().clone();
        out
    }

    #[test]
    fn test_repeated_elements_are_dropped() {
        let upstream = vec_producer(vec![vec![1, 2], vec![2, 3], vec![1, 4]]);
        let producer = distinct(upstream);
        assert_eq!(collect(&producer), vec![vec![1, 2], vec![3], vec![4]]);
    }

    #[test]
    fn test_fully_seen_batch_is_swallowed() {
        let upstream = vec_producer(vec![vec![1, 2], vec![2, 1], vec![3]]);
        let producer = distinct(upstream);
        assert_eq!(collect(&producer), vec![vec![1, 2], vec![3]]);
    }

    #[test]
    fn test_swallowed_batch_replaces_its_demand_unit() {
        let upstream = vec_producer(vec![vec![1], vec![1], vec![2]]);
        let producer = distinct(upstream);

        let log = Arc::new(Mutex::new(Vec::new()));
        let values = Arc::clone(&log);
        // Two units of demand, never replenished. The duplicate batch must
        // not count against them.
        let consumer = Arc::new(CallbackConsumer::new(
            Demand::of(2),
            move |batch: Vec<i32>| {
                values.lock().push(batch);
                Demand::NONE
            },
            |_| {},
        ));
        let erased: Arc<dyn Consumer<Input = Vec<i32>>> = consumer;
        producer.subscribe(erased);

        assert_eq!(*log.lock(), vec![vec![1], vec![2]]);
    }

    #[test]
    fn test_distinct_by_projects_the_key() {
        let upstream = vec_producer(vec![vec![(1, "a"), (1, "b")], vec![(2, "c")]]);
        let producer = distinct_by(upstream, |pair: &(i32, &str)| pair.0);

        let log = Arc::new(Mutex::new(Vec::new()));
        let values = Arc::clone(&log);
        let consumer = Arc::new(CallbackConsumer::new(
            Demand::UNBOUNDED,
            move |batch| {
                values.lock().push(batch);
                Demand::NONE
            },
            |_| {},
        ));
        let erased: Arc<dyn Consumer<Input = Vec<(i32, &str)>>> = consumer;
        producer.subscribe(erased);

        assert_eq!(*log.lock(), vec![vec![(1, "a")], vec![(2, "c")]]);
    }
}
