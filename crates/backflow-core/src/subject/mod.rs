//! # Subjects
//!
//! Imperative entry points into a flow. A subject is a [`Producer`] whose
//! values come from explicit `send` calls rather than from an upstream.
//!
//! ## Module Structure
//!
//! - [`buffer_subject`]: broadcast subject that buffers history for its
//!   first subscriber
//!
//! [`Producer`]: crate::Producer

pub mod buffer_subject;

pub use buffer_subject::BufferSubject;
