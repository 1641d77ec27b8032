//! # Operators
//!
//! Stateful transformations over [`Producer`](crate::Producer) chains. Each
//! operator owns one `parking_lot::Mutex` around a phase enum; transitions
//! are computed under the lock and their side effects (downstream delivery,
//! upstream cancellation, timer arming) run after it is released.
//!
//! ## Module Structure
//!
//! - [`combine_latest`]: recompute from the latest value of 2 to 4 sources
//! - [`retry`]: resubscribe on predicate-approved failures with backoff
//! - [`throttle`]: gate a flow on a boolean regulator
//! - [`enumerate`]: pair each value with its emission index
//! - [`distinct`]: drop batch elements already seen on this subscription

pub mod combine_latest;
pub mod distinct;
pub mod enumerate;
pub mod retry;
pub mod throttle;

pub use combine_latest::{combine_latest, combine_latest3, combine_latest4};
pub use distinct::distinct;
pub use enumerate::enumerate;
pub use retry::retry_when;
pub use throttle::throttle_while;
