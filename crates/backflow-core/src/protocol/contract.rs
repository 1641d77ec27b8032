//! The `Producer` / `Consumer` / `Subscription` traits.
//!
//! These three roles form the backpressure handshake: a value source, a
//! value sink, and the live control handle between them. Exactly one
//! subscription exists per active subscribe; it is owned by the consumer,
//! while the producer only holds it for delivery bookkeeping.

use std::sync::Arc;

use super::demand::Demand;
use super::error::Completion;

/// The live control handle a consumer uses to pull values or tear down.
///
/// Both methods must be callable from any thread, including re-entrantly
/// from inside the consumer's own `on_next` callback. After cancellation
/// or completion the handle silently ignores further calls.
pub trait Subscription: Send + Sync {
    /// Grants additional demand to the producer.
    ///
    /// Requests of [`Demand::NONE`] are ignored.
    fn request(&self, demand: Demand);

    /// Cancels the subscription.
    ///
    /// Idempotent; may race with completion. No value or completion is
    /// delivered after cancellation takes effect.
    fn cancel(&self);
}

/// A value sink in the handshake.
pub trait Consumer: Send + Sync {
    /// The type of value this consumer accepts.
    type Input;

    /// Receives the subscription, exactly once, before any value.
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    /// Receives one value; the returned demand is added back to the
    /// producer's outstanding budget.
    fn on_next(&self, value: Self::Input) -> Demand;

    /// Receives the terminal signal, at most once.
    fn on_complete(&self, completion: Completion);
}

/// A value source in the handshake.
///
/// Subscribing must synchronously hand the consumer a [`Subscription`]
/// before any value is delivered, and the producer must never deliver a
/// value while outstanding demand is zero.
pub trait Producer: Send + Sync {
    /// The type of value this producer emits.
    type Output;

    /// Establishes exactly one subscription for `consumer`.
    fn subscribe(&self, consumer: SharedConsumer<Self::Output>);
}

/// A type-erased, shareable producer.
pub type SharedProducer<T> = Arc<dyn Producer<Output = T>>;

/// A type-erased, shareable consumer.
pub type SharedConsumer<T> = Arc<dyn Consumer<Input = T>>;

impl<T> Producer for SharedProducer<T> {
    type Output = T;

    fn subscribe(&self, consumer: SharedConsumer<T>) {
        (**self).subscribe(consumer);
    }
}
