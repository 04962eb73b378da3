//! Inbound caller input.

pub mod coalescer;

pub use coalescer::{Coalescer, PendingInput};
