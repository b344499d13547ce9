//! Schema validation for persisted transcripts
//!
//! Stored data may have been written by an older build, truncated by a crash
//! mid-write, or edited by hand. Nothing read from storage reaches the
//! transcript without passing through [`validate_transcript`].

use super::{Message, Sender};
use serde_json::{Map, Value};
use thiserror::Error;

/// Outcome of validating a stored transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// At least one entry conformed; `discarded` counts the entries dropped
    Valid {
        messages: Vec<Message>,
        discarded: usize,
    },
    Rejected(Rejection),
}

/// Why a stored transcript could not be used
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no stored transcript")]
    Missing,
    #[error("stored transcript is not valid JSON: {0}")]
    NotJson(String),
    #[error("stored transcript is a JSON {0}, not an array")]
    NotAnArray(&'static str),
    #[error("stored transcript has no valid messages ({discarded} discarded)")]
    NoValidMessages { discarded: usize },
}

/// Validate a raw stored value, keeping only conforming entries
pub fn validate_transcript(raw: Option<&str>) -> Validation {
    let Some(raw) = raw else {
        return Validation::Rejected(Rejection::Missing);
    };

    let parsed: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return Validation::Rejected(Rejection::NotJson(e.to_string())),
    };

    let Value::Array(entries) = parsed else {
        return Validation::Rejected(Rejection::NotAnArray(json_type_name(&parsed)));
    };

    let total = entries.len();
    let messages: Vec<Message> = entries.iter().filter_map(validate_entry).collect();
    let discarded = total - messages.len();

    if messages.is_empty() {
        Validation::Rejected(Rejection::NoValidMessages { discarded })
    } else {
        Validation::Valid {
            messages,
            discarded,
        }
    }
}

fn validate_entry(entry: &Value) -> Option<Message> {
    let obj: &Map<String, Value> = entry.as_object()?;
    let text = obj.get("text")?.as_str()?;
    let sender = match obj.get("sender")?.as_str()? {
        "user" => Sender::User,
        "bot" => Sender::Bot,
        _ => return None,
    };

    if sender == Sender::User && text.trim().is_empty() {
        return None;
    }

    // A malformed timestamp is dropped rather than failing the whole entry
    let timestamp = obj.get("timestamp").and_then(Value::as_i64);

    Some(Message {
        text: text.to_string(),
        sender,
        timestamp,
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
