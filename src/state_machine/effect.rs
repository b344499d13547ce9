//! Effects produced by state transitions

use crate::conversation::Message;

/// Effects to be executed after state transition, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Append to the transcript (persists)
    AppendMessage(Message),

    /// Replace the transcript with the seed list (persists)
    ResetConversation,

    /// Build the prompt from the transcript and issue one request
    RequestCompletion { request_id: u64 },

    /// Abandon the in-flight request; its resolution must never be applied
    AbortRequest,

    /// Publish a fresh snapshot to connected clients
    NotifyClient,
}

impl Effect {
    pub fn append_user_message(text: impl Into<String>) -> Self {
        Effect::AppendMessage(Message::user(text))
    }

    pub fn append_bot_message(text: impl Into<String>, timestamp: i64) -> Self {
        Effect::AppendMessage(Message::bot(text, Some(timestamp)))
    }
}
