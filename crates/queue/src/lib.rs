//! Serialized, throttled execution lane for upstream calls.
//!
//! Any number of producers submit work; exactly one task runs at a time, in
//! submission order, with a minimum pause between consecutive tasks.

pub mod error;
pub mod runner;

pub use error::QueueError;
pub use runner::{QueueStats, RequestQueue};
