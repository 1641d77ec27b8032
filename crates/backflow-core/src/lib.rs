//! # Backflow Core
//!
//! Composable, backpressure-aware data-flow operators built on a
//! demand-driven publish/subscribe protocol.
//!
//! A [`Producer`](protocol::Producer) emits values only after a
//! [`Consumer`](protocol::Consumer) grants numeric
//! [`Demand`](protocol::Demand), and every operator in a chain conserves,
//! buffers, or regenerates demand while staying thread-safe and
//! exactly-once-correct in teardown.
//!
//! This crate provides:
//!
//! - **Protocol**: the producer/consumer/subscription handshake and the
//!   `Demand` arithmetic that drives it
//! - **Subject**: a buffering broadcast subject that replays pre-subscribe
//!   history to its first consumer
//! - **Operators**: latest-value combination, predicate-gated retry with
//!   backoff, boolean-gated throttling, enumeration, and batch dedup
//! - **I/O adapters**: demand-gated byte-chunk producers and writers over
//!   readable/writable resources
//! - **Time**: the [`Scheduler`](time::Scheduler) seam used by the retry
//!   operator (deterministic implementation lives in `backflow-testkit`)
//!
//! ## Design Principles
//!
//! 1. **Demand conservation** - a producer never delivers more values than
//!    its consumer has requested, and consumes exactly one unit per value
//! 2. **One lock per operator instance** - every stateful operator guards a
//!    single state enum; side effects are computed while locked and executed
//!    after release
//! 3. **Iterative drains** - emission loops are trampolined so a consumer
//!    re-requesting from inside its own callback cannot overflow the stack
//! 4. **Single terminal event** - completion or failure is delivered at most
//!    once per consumer, and nothing is delivered after it
//!
//! ## Example
//!
//! ```rust,ignore
//! use backflow_core::io::read_bytes;
//! use backflow_core::protocol::ProducerExt;
//!
//! let guard = read_bytes("Hello!", 2).sink(
//!     |chunk| println!("chunk: {chunk:?}"),
//!     |completion| println!("done: {completion:?}"),
//! );
//! drop(guard);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod io;
pub mod operator;
pub mod protocol;
pub mod subject;
pub mod time;

pub use protocol::{
    Completion, Consumer, Demand, FlowError, Producer, ProducerExt, SharedConsumer,
    SharedProducer, Subscription,
};
