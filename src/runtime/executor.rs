//! Widget session executor

use super::{SessionConfig, SseEvent, WidgetSnapshot};

use crate::conversation::ConversationStore;
use crate::llm::{LlmRequest, LlmService};
use crate::state_machine::{transition, Effect, Event, ServiceOutcome, WidgetState};
use crate::system_prompt::build_prompt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Runs one widget session: applies events in order and executes their effects
pub struct WidgetRuntime<L: LlmService + 'static> {
    session_id: String,
    state: WidgetState,
    store: ConversationStore,
    llm: Arc<L>,
    config: Arc<SessionConfig>,
    event_rx: mpsc::Receiver<Event>,
    /// Weak so that dropping every handle ends the session
    event_tx: mpsc::WeakSender<Event>,
    broadcast_tx: broadcast::Sender<SseEvent>,
    snapshot_tx: watch::Sender<WidgetSnapshot>,
    /// Cancelled when the session is torn down
    lifetime: CancellationToken,
    /// Token for the in-flight request, a child of `lifetime`
    request_cancel: Option<CancellationToken>,
}

impl<L: LlmService + 'static> WidgetRuntime<L> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        store: ConversationStore,
        llm: Arc<L>,
        config: Arc<SessionConfig>,
        event_rx: mpsc::Receiver<Event>,
        event_tx: &mpsc::Sender<Event>,
        broadcast_tx: broadcast::Sender<SseEvent>,
        snapshot_tx: watch::Sender<WidgetSnapshot>,
        lifetime: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            state: WidgetState::default(),
            store,
            llm,
            config,
            event_rx,
            event_tx: event_tx.downgrade(),
            broadcast_tx,
            snapshot_tx,
            lifetime,
            request_cancel: None,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            session_id = %self.session_id,
            storage_key = %self.store.key(),
            messages = self.store.messages().len(),
            "Starting widget runtime"
        );

        loop {
            tokio::select! {
                biased;
                () = self.lifetime.cancelled() => break,
                event = self.event_rx.recv() => match event {
                    Some(event) => self.process_event(event),
                    None => break,
                },
            }
        }

        // Nothing that resolves after teardown may touch the transcript
        if let Some(token) = self.request_cancel.take() {
            tracing::debug!(session_id = %self.session_id, "Discarding pending request on teardown");
            token.cancel();
        }
        self.lifetime.cancel();
        let _ = self.broadcast_tx.send(SseEvent::Closed);

        tracing::info!(session_id = %self.session_id, "Widget runtime stopped");
    }

    fn process_event(&mut self, event: Event) {
        let resolves_request = matches!(event, Event::ServiceResponse { .. });

        if let Event::ServiceResponse {
            request_id,
            outcome: ServiceOutcome::Failed { message, kind },
            ..
        } = &event
        {
            tracing::warn!(
                session_id = %self.session_id,
                request_id,
                kind = ?kind,
                error = %message,
                "Completion failed"
            );
        }

        let result = match transition(&self.state, event) {
            Ok(result) => result,
            Err(e) if e.is_silent() => {
                tracing::debug!(session_id = %self.session_id, reason = %e, "Event ignored");
                return;
            }
            Err(e) => {
                tracing::info!(session_id = %self.session_id, reason = %e, "Event rejected");
                return;
            }
        };

        if resolves_request {
            self.request_cancel = None;
        }
        self.state = result.new_state;

        for effect in result.effects {
            self.execute_effect(effect);
        }
    }

    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::AppendMessage(message) => self.store.append(message),
            Effect::ResetConversation => {
                tracing::info!(session_id = %self.session_id, "Conversation cleared");
                self.store.reset();
            }
            Effect::RequestCompletion { request_id } => self.request_completion(request_id),
            Effect::AbortRequest => {
                if let Some(token) = self.request_cancel.take() {
                    tracing::debug!(session_id = %self.session_id, "Aborting in-flight request");
                    token.cancel();
                }
            }
            Effect::NotifyClient => self.publish(),
        }
    }

    fn request_completion(&mut self, request_id: u64) {
        let Some(event_tx) = self.event_tx.upgrade() else {
            tracing::debug!(session_id = %self.session_id, "Session detached, skipping request");
            return;
        };

        let request = LlmRequest {
            prompt: build_prompt(&self.config.preamble, self.store.messages()),
            settings: self.config.settings.clone(),
        };

        let cancel = self.lifetime.child_token();
        self.request_cancel = Some(cancel.clone());

        let llm = self.llm.clone();
        let session_id = self.session_id.clone();

        tracing::debug!(
            session_id = %session_id,
            request_id,
            messages = self.store.messages().len(),
            "Requesting completion"
        );

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(session_id = %session_id, request_id, "Request abandoned");
                    return;
                }
                result = llm.complete(&request) => match result {
                    Ok(response) => ServiceOutcome::Completed { text: response.text },
                    Err(e) => ServiceOutcome::Failed {
                        message: e.message,
                        kind: e.kind,
                    },
                },
            };

            let event = Event::ServiceResponse {
                request_id,
                outcome,
                received_at: chrono::Utc::now().timestamp_millis(),
            };
            let _ = event_tx.send(event).await;
        });
    }

    fn publish(&self) {
        let snapshot = WidgetSnapshot::build(&self.state, self.store.messages(), &self.config.formatter);
        self.snapshot_tx.send_replace(snapshot.clone());
        let _ = self.broadcast_tx.send(SseEvent::Snapshot { snapshot });
    }
}
