//! Domain model module declarations.

pub mod session;

pub use session::Session;
