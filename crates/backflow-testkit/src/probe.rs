//! Recording consumer with a scriptable demand policy.

use std::sync::Arc;

use parking_lot::Mutex;

use backflow_core::{Completion, Consumer, Demand, Subscription};

struct ProbeState<T> {
    subscription: Option<Arc<dyn Subscription>>,
    values: Vec<T>,
    completions: Vec<Completion>,
}

/// A [`Consumer`] that records everything it receives.
///
/// On subscribe it requests `initial` demand; every delivered value
/// replenishes `per_value` demand. With `initial == Demand::NONE` the probe
/// stays passive until the test calls [`ProbeConsumer::request`], which is
/// the usual way to exercise an operator's buffering behavior.
pub struct ProbeConsumer<T> {
    initial: Demand,
    per_value: Demand,
    state: Mutex<ProbeState<T>>,
}

impl<T: Send + 'static> ProbeConsumer<T> {
    /// Creates a probe with explicit initial and per-value demand.
    #[must_use]
    pub fn new(initial: Demand, per_value: Demand) -> Arc<Self> {
        Arc::new(Self {
            initial,
            per_value,
            state: Mutex::new(ProbeState {
                subscription: None,
                values: Vec::new(),
                completions: Vec::new(),
            }),
        })
    }

    /// Creates a probe that requests unbounded demand up front.
    #[must_use]
    pub fn unlimited() -> Arc<Self> {
        Self::new(Demand::UNBOUNDED, Demand::NONE)
    }

    /// Creates a probe that requests nothing until told to.
    #[must_use]
    pub fn passive() -> Arc<Self> {
        Self::new(Demand::NONE, Demand::NONE)
    }

    /// Requests more demand on the recorded subscription.
    ///
    /// # Panics
    ///
    /// Panics if no subscription has been received yet.
    pub fn request(&self, demand: Demand) {
        let subscription = {
            let state = self.state.lock();
            state
                .subscription
                .as_ref()
                .map(Arc::clone)
                .expect("probe has no subscription")
        };
        subscription.request(demand);
    }

    /// Cancels the recorded subscription, if any.
    pub fn cancel(&self) {
        let subscription = {
            let state = self.state.lock();
            state.subscription.as_ref().map(Arc::clone)
        };
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }

    /// True once a subscription handshake has arrived.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.state.lock().subscription.is_some()
    }

    /// All completion signals received so far. More than one is a
    /// protocol violation worth asserting on.
    #[must_use]
    pub fn completions(&self) -> Vec<Completion> {
        self.state.lock().completions.clone()
    }

    /// The single completion signal, if exactly one arrived.
    #[must_use]
    pub fn completion(&self) -> Option<Completion> {
        let state = self.state.lock();
        if state.completions.len() == 1 {
            state.completions.first().cloned()
        } else {
            None
        }
    }

    /// True once `Completion::Finished` has been received.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state
            .lock()
            .completions
            .iter()
            .any(Completion::is_finished)
    }
}

impl<T: Clone + Send + 'static> ProbeConsumer<T> {
    /// All values received so far.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.state.lock().values.clone()
    }
}

impl<T: Send + Sync + 'static> Consumer for ProbeConsumer<T> {
    type Input = T;

    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        {
            let mut state = self.state.lock();
            state.subscription = Some(Arc::clone(&subscription));
        }
        if self.initial.has_demand() {
            subscription.request(self.initial);
        }
    }

    fn on_next(&self, value: T) -> Demand {
        self.state.lock().values.push(value);
        self.per_value
    }

    fn on_complete(&self, completion: Completion) {
        self.state.lock().completions.push(completion);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use backflow_core::protocol::source::vec_producer;
    use backflow_core::Producer;

    #[test]
    fn test_unlimited_probe_records_everything() {
        let probe = ProbeConsumer::unlimited();
        let erased: Arc<dyn Consumer<Input = i32>> = probe.clone();
        vec_producer(vec![1, 2, 3]).subscribe(erased);

        assert_eq!(probe.values(), vec![1, 2, 3]);
        assert!(probe.is_finished());
    }

    #[test]
    fn test_passive_probe_receives_nothing_until_request() {
        let probe = ProbeConsumer::passive();
        let erased: Arc<dyn Consumer<Input = i32>> = probe.clone();
        vec_producer(vec![1, 2, 3]).subscribe(erased);

        assert!(probe.is_subscribed());
        assert!(probe.values().is_empty());

        probe.request(Demand::of(2));
        assert_eq!(probe.values(), vec![1, 2]);
        assert!(probe.completions().is_empty());
    }
}
