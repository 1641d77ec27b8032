//! # Backflow Testkit
//!
//! Deterministic tooling for testing demand-driven operators:
//!
//! - [`VirtualScheduler`]: a virtual-time [`Scheduler`](backflow_core::time::Scheduler)
//!   whose clock only moves when the test advances it
//! - [`ProbeConsumer`]: a recording consumer with a scriptable demand policy
//! - [`ScriptedProducer`]: an upstream that emits a fixed sequence and fails
//!   on chosen emission indices, counted across resubscriptions
//!
//! The crates form a dev-dependency cycle on purpose: `backflow-core`'s own
//! test suite drives its operators with these probes.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod probe;
pub mod scripted;
pub mod virtual_scheduler;

pub use probe::ProbeConsumer;
pub use scripted::ScriptedProducer;
pub use virtual_scheduler::VirtualScheduler;
