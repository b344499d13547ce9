//! Widget interaction state
//!
//! None of this is persisted: a fresh session always starts closed and idle.

use serde::Serialize;

/// Progress of the current exchange with the assistant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    /// A request is in flight; this is the single-flight guard
    Loading { request_id: u64 },
    /// The last request failed; `message` is safe to show to the user
    Error { message: String },
}

/// Complete interaction state of one widget session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WidgetState {
    pub is_open: bool,
    pub input: String,
    pub phase: Phase,
    /// A clear was requested and is waiting for confirmation
    pub confirming_clear: bool,
    /// Id of the most recently issued request
    pub last_request_id: u64,
}

/// Externally visible state of the widget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetView {
    Closed,
    OpenIdle,
    OpenLoading,
    OpenError,
}

impl WidgetState {
    pub fn view(&self) -> WidgetView {
        if !self.is_open {
            return WidgetView::Closed;
        }
        match self.phase {
            Phase::Idle => WidgetView::OpenIdle,
            Phase::Loading { .. } => WidgetView::OpenLoading,
            Phase::Error { .. } => WidgetView::OpenError,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::Loading { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match &self.phase {
            Phase::Error { message } => Some(message),
            _ => None,
        }
    }

    /// The text input is read-only while a request is in flight
    pub fn input_disabled(&self) -> bool {
        self.is_loading()
    }

    /// Whether the send control would currently do anything
    pub fn can_send(&self) -> bool {
        self.is_open && !self.is_loading() && !self.input.trim().is_empty()
    }
}
