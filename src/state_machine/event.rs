//! Events that can occur in a widget session

use crate::llm::LlmErrorKind;

/// Key name that submits the input
pub const SUBMIT_KEY: &str = "Enter";

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    Toggle,
    InputChanged {
        text: String,
    },
    KeyPressed {
        key: String,
    },
    /// Send the current contents of the input
    Submit,
    /// Send `text` directly
    UserMessage {
        text: String,
    },
    ClearRequested,
    ClearConfirmed,
    ClearCancelled,
    DismissError,

    // Service events
    ServiceResponse {
        request_id: u64,
        outcome: ServiceOutcome,
        /// When the resolution arrived, in milliseconds since the epoch
        received_at: i64,
    },
}

/// How a request to the text-generation service resolved
#[derive(Debug, Clone)]
pub enum ServiceOutcome {
    /// Raw generated text, not yet trimmed or cleaned
    Completed { text: String },
    Failed { message: String, kind: LlmErrorKind },
}
