//! Turn orchestration.
//!
//! Ties the inbound buffer, the process supervisor, and the outbound
//! presentation chain together behind the [`Bridge`].

pub mod bridge;

pub use bridge::{Bridge, INJECT_FAILED_NOTICE};
