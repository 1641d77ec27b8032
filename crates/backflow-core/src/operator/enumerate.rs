//! Pairs each value with its zero-based emission index.
//!
//! The operator is stateless apart from a counter and forwards the upstream
//! channel to the downstream consumer untouched, so demand and cancellation
//! cost nothing extra.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::protocol::{Completion, Consumer, Demand, Producer, SharedProducer, Subscription};

/// Wraps `upstream` so every value arrives as `(index, value)`.
pub fn enumerate<T: Send + Sync + 'static>(
    upstream: SharedProducer<T>,
) -> SharedProducer<(usize, T)> {
    Arc::new(Enumerate { upstream })
}

struct Enumerate<T> {
    upstream: SharedProducer<T>,
}

impl<T: Send + Sync + 'static> Producer for Enumerate<T> {
    type Output = (usize, T);

    fn subscribe(&self, consumer: Arc<dyn Consumer<Input = (usize, T)>>) {
        self.upstream.subscribe(Arc::new(EnumerateUplink {
            index: AtomicUsize::new(0),
            downstream: consumer,
        }));
    }
}

struct EnumerateUplink<T> {
    index: AtomicUsize,
    downstream: Arc<dyn Consumer<Input = (usize, T)>>,
}

impl<T: Send + Sync + 'static> Consumer for EnumerateUplink<T> {
    type Input = T;

    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.downstream.on_subscribe(subscription);
    }

    fn on_next(&self, value: T) -> Demand {
        let index = self.index.fetch_add(1, Ordering::Relaxed);
        self.downstream.on_next((index, value))
    }

    fn on_complete(&self, completion: Completion) {
        self.downstream.on_complete(completion);
    }
}
