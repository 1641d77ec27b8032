//! The [`Scheduler`] trait and its cancellation token.

use std::time::Duration;

/// A deferred-execution context.
///
/// Time is expressed as a [`Duration`] since the scheduler's own epoch, so
/// a deterministic implementation can advance its clock manually.
pub trait Scheduler: Send + Sync {
    /// The current time, relative to the scheduler's epoch.
    fn now(&self) -> Duration;

    /// Runs `action` once, `delay` after [`now`](Self::now).
    fn schedule_after(&self, delay: Duration, action: Box<dyn FnOnce() + Send>) -> TimerHandle;

    /// Runs `action` every `interval`, starting one `interval` from
    /// [`now`](Self::now), until the handle is cancelled.
    fn schedule_repeating(
        &self,
        interval: Duration,
        action: Box<dyn Fn() + Send + Sync>,
    ) -> TimerHandle;
}

/// Cancellation token for a scheduled action.
///
/// Consuming [`cancel`](Self::cancel) makes double-cancellation
/// unrepresentable. Dropping the handle without cancelling leaves the timer
/// armed.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    /// Creates a handle that runs `cancel` when cancelled.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Creates a handle for an action that cannot be revoked.
    #[must_use]
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Revokes the scheduled action if it has not fired yet.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}
