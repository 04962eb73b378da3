//! Outbound presentation of agent output.
//!
//! The [`ChatEndpoint`] trait decouples the streaming logic from the chat
//! service. [`stream::PresentationChain`] turns a turn's events into a
//! chain of remote messages that are edited in place as output arrives;
//! [`chain::MessageChain`] is the pure text buffer behind it.

pub mod chain;
pub mod render;
pub mod stream;

use std::future::Future;
use std::pin::Pin;

use crate::Result;

pub use chain::MessageChain;
pub use stream::PresentationChain;

/// Placeholder shown while the agent has not produced output yet.
pub const THINKING_PLACEHOLDER: &str = "\u{23f3} Thinking...";

/// Placeholder for a continuation message after a split.
pub const CONTINUATION_PLACEHOLDER: &str = "\u{23f3} ...";

/// Marker prepended to a cancelled turn's output.
pub const CANCELLED_MARKER: &str = "\u{1f6d1} Cancelled";

/// Address of a message on the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef {
    /// Conversation (channel) the message lives in.
    pub channel_id: String,
    /// Endpoint-assigned message identifier.
    pub message_id: String,
}

/// Interactive controls attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controls {
    /// Plain message.
    None,
    /// A button that cancels the running turn.
    Cancel,
}

/// Outcome of an edit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// The remote message now shows the new content.
    Applied,
    /// The remote message already showed this content.
    Unchanged,
}

/// Remote chat endpoint the bridge streams into.
///
/// Implementations convert plain text into the endpoint's markup and
/// retry transient failures themselves; an `Err` means the operation was
/// given up on.
pub trait ChatEndpoint: Send + Sync {
    /// Post a new message, optionally threaded under `reply_to`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the message could not be posted.
    fn post(
        &self,
        text: String,
        reply_to: Option<MessageRef>,
        controls: Controls,
    ) -> Pin<Box<dyn Future<Output = Result<MessageRef>> + Send + '_>>;

    /// Replace the content of an existing message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the edit could not be applied.
    fn edit(
        &self,
        target: MessageRef,
        text: String,
        controls: Controls,
    ) -> Pin<Box<dyn Future<Output = Result<EditOutcome>> + Send + '_>>;
}
