//! API request and response types

use crate::runtime::WidgetSnapshot;
use serde::{Deserialize, Serialize};

/// Request to mount a widget session
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Storage key to load and persist the transcript under
    #[serde(default)]
    pub storage_key: Option<String>,
}

/// Response for a newly mounted session
#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub snapshot: WidgetSnapshot,
}

/// Request to replace the input text
#[derive(Debug, Deserialize)]
pub struct InputRequest {
    pub text: String,
}

/// A key pressed while the input has focus
#[derive(Debug, Deserialize)]
pub struct KeyRequest {
    pub key: String,
}

/// Request to send a message; without `text` the current input is sent
#[derive(Debug, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub text: Option<String>,
}

/// Response for queued widget actions
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub queued: bool,
}

/// Generic success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
