//! Child process plumbing: spawning, stdio framing, the stream-json
//! protocol, and turn supervision.

pub mod codec;
pub mod drain;
pub mod protocol;
pub mod spawner;
pub mod supervisor;
pub mod writer;

pub use protocol::{Completion, Decoded, Event};
pub use supervisor::{Supervisor, SupervisorSettings, TurnEvent, TurnState};
