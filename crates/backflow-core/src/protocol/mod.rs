//! # Core Protocol
//!
//! The demand-driven publish/subscribe handshake every operator in this
//! crate is built on.
//!
//! ## Overview
//!
//! A [`Producer`] is subscribed with a [`Consumer`]. The producer must
//! synchronously hand the consumer a [`Subscription`] before delivering
//! anything. From then on:
//!
//! - the consumer grants [`Demand`] through [`Subscription::request`]
//! - the producer delivers one value per granted unit via
//!   [`Consumer::on_next`], adding any demand returned from the callback
//!   back to the outstanding budget
//! - a single terminal [`Completion`] ends the stream; nothing is delivered
//!   after it
//! - [`Subscription::cancel`] is idempotent and may race with completion
//!
//! A consumer may call `request` from inside its own `on_next` callback.
//! Producers in this crate therefore drain demand iteratively (a trampoline)
//! instead of recursing per value.
//!
//! ## Module Structure
//!
//! - [`demand`]: the `Demand` budget type and its saturating arithmetic
//! - [`error`]: `FlowError` and the terminal `Completion` signal
//! - [`contract`]: the `Producer` / `Consumer` / `Subscription` traits
//! - [`sink`]: callback-based consumers and the `ProducerExt::sink` shorthand
//! - [`source`]: small demand-correct producers (vector, immediate failure)

pub mod contract;
pub mod demand;
pub mod error;
pub mod sink;
pub mod source;

pub use contract::{Consumer, Producer, SharedConsumer, SharedProducer, Subscription};
pub use demand::Demand;
pub use error::{Completion, FlowError};
pub use sink::{CallbackConsumer, ProducerExt, SinkGuard};
pub use source::{fail_producer, vec_producer};
