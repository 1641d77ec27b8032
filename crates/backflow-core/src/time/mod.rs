//! # Time
//!
//! The scheduler seam used by time-based operators.
//!
//! No scheduler implementation lives in this crate: operators take an
//! `Arc<dyn Scheduler>` explicitly (never an ambient global), and the
//! deterministic virtual-time implementation used by the test suite lives
//! in `backflow-testkit`.

pub mod scheduler;

pub use scheduler::{Scheduler, TimerHandle};
