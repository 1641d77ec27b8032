//! Virtual-time scheduler for deterministic timer tests.
//!
//! Time never moves on its own. A test calls [`VirtualScheduler::advance`]
//! (or [`VirtualScheduler::run`]) and every timer due inside that window
//! fires synchronously, in order of due time with insertion order breaking
//! ties. Actions scheduled by a running action participate in the same
//! advance when they fall inside the window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use backflow_core::time::{Scheduler, TimerHandle};

enum Task {
    Once(Box<dyn FnOnce() + Send>),
    Repeating {
        interval: Duration,
        action: Arc<dyn Fn() + Send + Sync>,
    },
}

struct Entry {
    seq: u64,
    due: Duration,
    task: Task,
}

struct Clock {
    now: Duration,
    next_seq: u64,
    queue: Vec<Entry>,
    cancelled: HashMap<u64, ()>,
}

/// A [`Scheduler`] driven entirely by the test.
///
/// Cloning the scheduler is cheap and all clones share one clock, so the
/// same instance can be handed to an operator and kept by the test.
#[derive(Clone)]
pub struct VirtualScheduler {
    clock: Arc<Mutex<Clock>>,
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualScheduler {
    /// Creates a scheduler with its clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(Mutex::new(Clock {
                now: Duration::ZERO,
                next_seq: 0,
                queue: Vec::new(),
                cancelled: HashMap::new(),
            })),
        }
    }

    /// Moves the clock forward by `by`, firing every timer due in the window.
    ///
    /// Timers fire in `(due, insertion order)` order. A repeating timer is
    /// rescheduled before its action runs, so a long advance fires it once
    /// per elapsed interval. Actions run with the clock set to their due
    /// time and with no internal lock held, so they may schedule or cancel
    /// freely.
    pub fn advance(&self, by: Duration) {
        let target = {
            let clock = self.clock.lock();
            clock.now + by
        };
        self.advance_to(target);
    }

    /// Fires every pending timer, advancing the clock as far as needed.
    ///
    /// A repeating timer with no terminating cancel would loop forever, so
    /// this drains one-shot timers only until the queue holds nothing but
    /// repeating entries, then stops.
    pub fn run(&self) {
        loop {
            let next = {
                let clock = self.clock.lock();
                clock
                    .queue
                    .iter()
                    .filter(|e| matches!(e.task, Task::Once(_)))
                    .map(|e| e.due)
                    .min()
            };
            match next {
                Some(due) => self.advance_to(due.max(self.now())),
                None => return,
            }
        }
    }

    /// The current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock.lock().now
    }

    fn advance_to(&self, target: Duration) {
        loop {
            let fired = {
                let mut clock = self.clock.lock();
                let cancelled = std::mem::take(&mut clock.cancelled);
                if !cancelled.is_empty() {
                    clock.queue.retain(|e| !cancelled.contains_key(&e.seq));
                }
                let next = clock
                    .queue
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.due <= target)
                    .min_by_key(|(_, e)| (e.due, e.seq))
                    .map(|(i, _)| i);
                match next {
                    Some(i) => {
                        let entry = clock.queue.swap_remove(i);
                        clock.now = clock.now.max(entry.due);
                        match entry.task {
                            Task::Once(action) => {
                                Some(Box::new(action) as Box<dyn FnOnce() + Send>)
                            }
                            Task::Repeating { interval, action } => {
                                // Re-armed under its original seq so the
                                // handle returned at insertion keeps
                                // cancelling it.
                                let due = entry.due + interval;
                                let rearmed = Arc::clone(&action);
                                clock.queue.push(Entry {
                                    seq: entry.seq,
                                    due,
                                    task: Task::Repeating {
                                        interval,
                                        action: rearmed,
                                    },
                                });
                                Some(Box::new(move || action()) as Box<dyn FnOnce() + Send>)
                            }
                        }
                    }
                    None => {
                        clock.now = clock.now.max(target);
                        None
                    }
                }
            };
            match fired {
                Some(action) => action(),
                None => return,
            }
        }
    }

    fn insert(&self, due: Duration, task: Task) -> TimerHandle {
        let seq = {
            let mut clock = self.clock.lock();
            let seq = clock.next_seq;
            clock.next_seq += 1;
            clock.queue.push(Entry { seq, due, task });
            seq
        };
        let clock = Arc::clone(&self.clock);
        TimerHandle::new(move || {
            clock.lock().cancelled.insert(seq, ());
        })
    }
}

impl Scheduler for VirtualScheduler {
    fn now(&self) -> Duration {
        VirtualScheduler::now(self)
    }

    fn schedule_after(&self, delay: Duration, action: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let due = self.clock.lock().now + delay;
        self.insert(due, Task::Once(action))
    }

    fn schedule_repeating(
        &self,
        interval: Duration,
        action: Box<dyn Fn() + Send + Sync>,
    ) -> TimerHandle {
        let due = self.clock.lock().now + interval;
        self.insert(
            due,
            Task::Repeating {
                interval,
                action: Arc::from(action),
            },
        )
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
