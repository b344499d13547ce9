//! Pure state transition function
//!
//! Given the same state and event this always produces the same new state and
//! effects. All I/O (storage, network, client notification) happens in the
//! runtime that executes the returned effects.

use super::event::SUBMIT_KEY;
use super::state::{Phase, WidgetState};
use super::{Effect, Event, ServiceOutcome};
use crate::format::clean_generated_text;
use crate::llm::LlmErrorKind;
use thiserror::Error;

/// Bot message appended whenever a request fails
pub const FALLBACK_APOLOGY: &str = "⚠️ Error processing request. Please try again.";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: WidgetState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: WidgetState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Reasons a command is not applied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Message is empty")]
    EmptyMessage,
    #[error("A request is already in flight")]
    RequestInFlight,
    #[error("Input is disabled while a request is in flight")]
    InputDisabled,
    #[error("Widget is closed")]
    WidgetClosed,
    #[error("No error to dismiss")]
    NoErrorToDismiss,
    #[error("Clear was not requested")]
    ClearNotRequested,
    #[error("Ignoring resolution of request {0}, which is no longer pending")]
    StaleResponse(u64),
}

impl TransitionError {
    /// Rejections the user should never be told about
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::EmptyMessage | Self::RequestInFlight | Self::InputDisabled
        )
    }
}

/// Pure transition function
pub fn transition(state: &WidgetState, event: Event) -> Result<TransitionResult, TransitionError> {
    match event {
        Event::Toggle => {
            let mut next = state.clone();
            next.is_open = !state.is_open;
            if !next.is_open {
                next.confirming_clear = false;
            }
            Ok(TransitionResult::new(next).with_effect(Effect::NotifyClient))
        }

        Event::InputChanged { text } => {
            require_open(state)?;
            if state.is_loading() {
                return Err(TransitionError::InputDisabled);
            }
            let mut next = state.clone();
            next.input = text;
            Ok(TransitionResult::new(next).with_effect(Effect::NotifyClient))
        }

        Event::KeyPressed { key } if key == SUBMIT_KEY => send(state, &state.input),

        // Other keys only edit the input, which arrives as InputChanged
        Event::KeyPressed { .. } => Ok(TransitionResult::new(state.clone())),

        Event::Submit => send(state, &state.input),

        Event::UserMessage { text } => send(state, &text),

        Event::ClearRequested => {
            require_open(state)?;
            let mut next = state.clone();
            next.confirming_clear = true;
            Ok(TransitionResult::new(next).with_effect(Effect::NotifyClient))
        }

        Event::ClearConfirmed => {
            require_open(state)?;
            if !state.confirming_clear {
                return Err(TransitionError::ClearNotRequested);
            }

            let mut next = state.clone();
            next.confirming_clear = false;
            next.phase = Phase::Idle;

            let mut result = TransitionResult::new(next);
            if state.is_loading() {
                result = result.with_effect(Effect::AbortRequest);
            }
            Ok(result
                .with_effect(Effect::ResetConversation)
                .with_effect(Effect::NotifyClient))
        }

        Event::ClearCancelled => {
            if !state.confirming_clear {
                return Err(TransitionError::ClearNotRequested);
            }
            let mut next = state.clone();
            next.confirming_clear = false;
            Ok(TransitionResult::new(next).with_effect(Effect::NotifyClient))
        }

        Event::DismissError => {
            require_open(state)?;
            if !matches!(state.phase, Phase::Error { .. }) {
                return Err(TransitionError::NoErrorToDismiss);
            }
            let mut next = state.clone();
            next.phase = Phase::Idle;
            Ok(TransitionResult::new(next).with_effect(Effect::NotifyClient))
        }

        Event::ServiceResponse {
            request_id,
            outcome,
            received_at,
        } => {
            if state.phase != (Phase::Loading { request_id }) {
                return Err(TransitionError::StaleResponse(request_id));
            }

            let reply = match outcome {
                ServiceOutcome::Completed { text } => {
                    let cleaned = clean_generated_text(&text);
                    if cleaned.is_empty() {
                        Err(LlmErrorKind::MalformedResponse)
                    } else {
                        Ok(cleaned)
                    }
                }
                ServiceOutcome::Failed { kind, .. } => Err(kind),
            };

            // Idle/Error is only observable once the bot message is appended,
            // since effects run before the next event is taken
            let mut next = state.clone();
            let effect = match reply {
                Ok(text) => {
                    next.phase = Phase::Idle;
                    Effect::append_bot_message(text, received_at)
                }
                Err(kind) => {
                    next.phase = Phase::Error {
                        message: kind.user_message().to_string(),
                    };
                    Effect::append_bot_message(FALLBACK_APOLOGY, received_at)
                }
            };

            Ok(TransitionResult::new(next)
                .with_effect(effect)
                .with_effect(Effect::NotifyClient))
        }
    }
}

fn require_open(state: &WidgetState) -> Result<(), TransitionError> {
    if state.is_open {
        Ok(())
    } else {
        Err(TransitionError::WidgetClosed)
    }
}

fn send(state: &WidgetState, text: &str) -> Result<TransitionResult, TransitionError> {
    require_open(state)?;
    if state.is_loading() {
        return Err(TransitionError::RequestInFlight);
    }

    let text = text.trim();
    if text.is_empty() {
        return Err(TransitionError::EmptyMessage);
    }

    let request_id = state.last_request_id + 1;
    let mut next = state.clone();
    next.input.clear();
    next.phase = Phase::Loading { request_id };
    next.last_request_id = request_id;

    // The user message is appended before the request is built so the
    // prompt includes it and it always precedes the reply
    Ok(TransitionResult::new(next)
        .with_effect(Effect::append_user_message(text))
        .with_effect(Effect::RequestCompletion { request_id })
        .with_effect(Effect::NotifyClient))
}
