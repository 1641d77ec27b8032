//! # Byte-stream adapters
//!
//! Bridges between the demand protocol and external byte resources.
//!
//! ## Module Structure
//!
//! - [`resource`]: the [`ReadResource`] and [`WriteResource`] abstractions
//!   with in-memory and file-backed implementations
//! - [`read_producer`]: demand-gated chunk reads from a [`ReadResource`]
//! - [`write_operator`]: writes upstream chunks through a [`WriteResource`],
//!   reporting per-chunk byte counts downstream
//! - [`write_sink`]: terminal consumer draining a chunk flow into a
//!   [`WriteResource`] with incremental demand

pub mod read_producer;
pub mod resource;
pub mod write_operator;
pub mod write_sink;

pub use read_producer::{read_bytes, read_path, read_resource};
pub use resource::{
    BytesReader, FileReader, FileWriter, FixedBufferWriter, ReadResource, WriteResource,
};
pub use write_operator::write_through;
pub use write_sink::WriteSink;
