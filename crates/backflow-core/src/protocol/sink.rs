//! Callback-based consumers.
//!
//! [`CallbackConsumer`] adapts a pair of closures into a [`Consumer`] with
//! an explicit demand policy: an initial demand requested on subscribe, and
//! whatever demand the value closure returns per delivery. The
//! [`ProducerExt::sink`] shorthand subscribes an unlimited-demand callback
//! consumer and returns a guard that cancels on drop.

use std::sync::Arc;

use parking_lot::Mutex;

use super::contract::{Consumer, Producer, Subscription};
use super::demand::Demand;
use super::error::Completion;

/// Consumer lifecycle: demand requested before the handshake is
/// accumulated and forwarded once the subscription arrives.
enum CallbackState {
    Unsubscribed(Demand),
    Subscribed(Arc<dyn Subscription>),
    Finished,
}

/// A consumer built from closures, with a caller-controlled demand policy.
///
/// Useful on its own for demand-sensitive consumption (request values one
/// at a time, from any thread, via [`request`](Self::request)) and as the
/// engine behind [`ProducerExt::sink`].
pub struct CallbackConsumer<T> {
    on_value: Box<dyn Fn(T) -> Demand + Send + Sync>,
    on_completion: Box<dyn Fn(Completion) + Send + Sync>,
    state: Mutex<CallbackState>,
}

impl<T> CallbackConsumer<T> {
    /// Creates a consumer that requests `initial_demand` on subscribe and
    /// thereafter returns whatever `on_value` returns per delivery.
    pub fn new(
        initial_demand: Demand,
        on_value: impl Fn(T) -> Demand + Send + Sync + 'static,
        on_completion: impl Fn(Completion) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_value: Box::new(on_value),
            on_completion: Box::new(on_completion),
            state: Mutex::new(CallbackState::Unsubscribed(initial_demand)),
        }
    }

    /// Creates a consumer with unlimited demand.
    pub fn unlimited(
        on_value: impl Fn(T) + Send + Sync + 'static,
        on_completion: impl Fn(Completion) + Send + Sync + 'static,
    ) -> Self {
        Self::new(
            Demand::UNBOUNDED,
            move |value| {
                on_value(value);
                Demand::NONE
            },
            on_completion,
        )
    }

    /// Grants additional demand.
    ///
    /// Before the handshake the demand is accumulated and requested as soon
    /// as the subscription arrives; afterwards it is forwarded directly.
    pub fn request(&self, demand: Demand) {
        if !demand.has_demand() {
            return;
        }
        let subscription = {
            let mut state = self.state.lock();
            match &mut *state {
                CallbackState::Unsubscribed(pending) => {
                    *pending += demand;
                    None
                }
                CallbackState::Subscribed(subscription) => Some(Arc::clone(subscription)),
                CallbackState::Finished => None,
            }
        };
        if let Some(subscription) = subscription {
            subscription.request(demand);
        }
    }

    /// Cancels the subscription, if any, and stops accepting values.
    pub fn cancel(&self) {
        let subscription = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, CallbackState::Finished) {
                CallbackState::Subscribed(subscription) => Some(subscription),
                CallbackState::Unsubscribed(_) | CallbackState::Finished => None,
            }
        };
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}

impl<T: Send + Sync> Consumer for CallbackConsumer<T> {
    type Input = T;

    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let accepted = {
            let mut state = self.state.lock();
            match &*state {
                CallbackState::Unsubscribed(pending) => {
                    let pending = *pending;
                    *state = CallbackState::Subscribed(Arc::clone(&subscription));
                    Some(pending)
                }
                CallbackState::Subscribed(_) | CallbackState::Finished => None,
            }
        };
        match accepted {
            Some(pending) => {
                if pending.has_demand() {
                    subscription.request(pending);
                }
            }
            // Duplicate handshake: the newcomer is torn down.
            None => subscription.cancel(),
        }
    }

    fn on_next(&self, value: T) -> Demand {
        let live = !matches!(*self.state.lock(), CallbackState::Finished);
        if !live {
            return Demand::NONE;
        }
        (self.on_value)(value)
    }

    fn on_complete(&self, completion: Completion) {
        let first = {
            let mut state = self.state.lock();
            !matches!(
                std::mem::replace(&mut *state, CallbackState::Finished),
                CallbackState::Finished
            )
        };
        if first {
            (self.on_completion)(completion);
        }
    }
}

/// Cancels its consumer when dropped.
///
/// Returned by [`ProducerExt::sink`]; keep it alive for as long as values
/// should keep flowing.
pub struct SinkGuard {
    cancel: Box<dyn Fn() + Send + Sync>,
}

impl SinkGuard {
    fn new<T: Send + Sync + 'static>(consumer: Arc<CallbackConsumer<T>>) -> Self {
        Self {
            cancel: Box::new(move || consumer.cancel()),
        }
    }

    /// Cancels the subscription now instead of at drop.
    pub fn cancel(self) {
        (self.cancel)();
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        (self.cancel)();
    }
}

/// Convenience subscriptions for any [`Producer`].
pub trait ProducerExt: Producer {
    /// Attaches an unlimited-demand callback consumer.
    ///
    /// The returned [`SinkGuard`] cancels the subscription when dropped.
    fn sink(
        &self,
        on_value: impl Fn(Self::Output) + Send + Sync + 'static,
        on_completion: impl Fn(Completion) + Send + Sync + 'static,
    ) -> SinkGuard
    where
        Self::Output: Send + Sync + 'static,
    {
        let consumer = Arc::new(CallbackConsumer::unlimited(on_value, on_completion));
        let erased: Arc<dyn Consumer<Input = Self::Output>> = consumer.clone();
        self.subscribe(erased);
        SinkGuard::new(consumer)
    }
}

impl<P: Producer + ?Sized> ProducerExt for P {}
