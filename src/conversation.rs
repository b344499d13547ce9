//! Conversation transcript and its persistent store

pub mod validate;

use crate::db::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
pub use validate::{validate_transcript, Rejection, Validation};

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    /// Role label used when the transcript is written into a prompt
    pub fn label(self) -> &'static str {
        match self {
            Sender::User => "You",
            Sender::Bot => "Assistant",
        }
    }
}

/// A single transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub sender: Sender,
    /// Milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::User,
            timestamp: None,
        }
    }

    pub fn bot(text: impl Into<String>, timestamp: Option<i64>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::Bot,
            timestamp,
        }
    }
}

/// The transcript a widget starts with when no valid history exists
pub fn seed_conversation(greeting: &str) -> Vec<Message> {
    vec![Message::bot(greeting, None)]
}

/// Ordered, append-only transcript mirrored to a key-value store
///
/// The in-memory list is authoritative. Every mutation is followed by a full
/// write under the store key; a failed write is logged and remembered but
/// never undoes the mutation.
pub struct ConversationStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    seed: Vec<Message>,
    messages: Vec<Message>,
    last_write_error: Option<String>,
}

impl ConversationStore {
    /// Load the transcript stored under `key`, falling back to `seed`
    ///
    /// Never fails: unreadable, malformed or empty data all yield the seed.
    pub fn load(kv: Arc<dyn KeyValueStore>, key: impl Into<String>, seed: Vec<Message>) -> Self {
        let key = key.into();

        let raw = match kv.get(&key) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(storage_key = %key, error = %e, "Failed to read stored transcript");
                None
            }
        };

        let messages = match validate_transcript(raw.as_deref()) {
            Validation::Valid {
                messages,
                discarded,
            } => {
                if discarded > 0 {
                    tracing::warn!(
                        storage_key = %key,
                        kept = messages.len(),
                        discarded,
                        "Dropped malformed transcript entries"
                    );
                }
                messages
            }
            Validation::Rejected(Rejection::Missing) => {
                tracing::debug!(storage_key = %key, "No stored transcript, using seed");
                seed.clone()
            }
            Validation::Rejected(reason) => {
                tracing::warn!(storage_key = %key, reason = %reason, "Stored transcript rejected, using seed");
                seed.clone()
            }
        };

        Self {
            kv,
            key,
            seed,
            messages,
            last_write_error: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Error from the most recent failed write, cleared by the next success
    #[allow(dead_code)] // Inspected in tests
    pub fn last_write_error(&self) -> Option<&str> {
        self.last_write_error.as_deref()
    }

    /// Append to the tail and persist
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.persist();
    }

    /// Replace the transcript with the seed list and persist
    pub fn reset(&mut self) {
        self.messages.clone_from(&self.seed);
        self.persist();
    }

    /// Canonical JSON form of the transcript
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.messages).unwrap_or_else(|_| "[]".to_string())
    }

    /// Write the full transcript under the store key
    pub fn persist(&mut self) {
        let json = self.to_json();
        match self.kv.set(&self.key, &json) {
            Ok(()) => self.last_write_error = None,
            Err(e) => {
                tracing::error!(
                    storage_key = %self.key,
                    bytes = json.len(),
                    error = %e,
                    "Failed to persist transcript, keeping in-memory copy"
                );
                self.last_write_error = Some(e.to_string());
            }
        }
    }
}
