//! Runtime for widget sessions
//!
//! Each page view mounts its own session: a task that owns the interaction
//! state and the transcript, and applies events one at a time. The network
//! call is the only thing that runs concurrently with it, and its resolution
//! re-enters the same queue as an event.

mod executor;

#[cfg(test)]
pub mod testing;

pub use executor::WidgetRuntime;

use crate::config::{LlmConfig, WidgetConfig};
use crate::conversation::{seed_conversation, ConversationStore, Message, Sender};
use crate::db::KeyValueStore;
use crate::format::{FormattedText, Formatter};
use crate::llm::{GenerationSettings, LlmService};
use crate::state_machine::{Event, WidgetState, WidgetView};
use crate::system_prompt::build_preamble;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Settings shared by every session
pub struct SessionConfig {
    pub settings: GenerationSettings,
    pub preamble: String,
    pub formatter: Formatter,
    pub seed: Vec<Message>,
}

impl SessionConfig {
    pub fn new(llm: &LlmConfig, widget: &WidgetConfig) -> Self {
        Self {
            settings: GenerationSettings::from_config(llm),
            preamble: build_preamble(widget),
            formatter: Formatter::new(&widget.contact),
            seed: seed_conversation(&widget.greeting),
        }
    }
}

/// A message as the widget displays it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub sender: Sender,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Safe markup: formatted for bot messages, literal for user messages
    pub html: String,
}

/// Everything a client needs to draw the widget
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WidgetSnapshot {
    pub view: WidgetView,
    pub is_open: bool,
    pub input: String,
    pub input_disabled: bool,
    pub can_send: bool,
    pub loading: bool,
    pub error: Option<String>,
    pub confirming_clear: bool,
    pub messages: Vec<RenderedMessage>,
}

impl WidgetSnapshot {
    pub fn build(state: &WidgetState, messages: &[Message], formatter: &Formatter) -> Self {
        let messages = messages
            .iter()
            .map(|msg| {
                let formatted = match msg.sender {
                    Sender::Bot => formatter.format_reply(&msg.text),
                    Sender::User => FormattedText::literal(&msg.text),
                };
                RenderedMessage {
                    sender: msg.sender,
                    text: msg.text.clone(),
                    timestamp: msg.timestamp,
                    html: formatted.to_html(),
                }
            })
            .collect();

        Self {
            view: state.view(),
            is_open: state.is_open,
            input: state.input.clone(),
            input_disabled: state.input_disabled(),
            can_send: state.can_send(),
            loading: state.is_loading(),
            error: state.error().map(str::to_string),
            confirming_clear: state.confirming_clear,
            messages,
        }
    }
}

/// Events sent to SSE clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    Snapshot { snapshot: WidgetSnapshot },
    /// The session was torn down
    Closed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Session is closed: {0}")]
    Closed(String),
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub event_tx: mpsc::Sender<Event>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
    pub snapshot_rx: watch::Receiver<WidgetSnapshot>,
    lifetime: CancellationToken,
}

/// Bookkeeping for one live session
struct SessionEntry {
    handle: SessionHandle,
    storage_key: String,
    last_active: Mutex<Instant>,
    task: JoinHandle<()>,
}

impl SessionEntry {
    fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last = *self.last_active.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(last)
    }

    /// Cancel the runtime and wait until it has made its last write
    async fn teardown(self) {
        self.handle.lifetime.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(storage_key = %self.storage_key, error = %e, "Widget runtime task failed");
        }
    }
}

#[derive(Default)]
struct Sessions {
    by_id: HashMap<String, SessionEntry>,
    /// Storage key to the id of the one session that owns it
    owners: HashMap<String, String>,
}

impl Sessions {
    fn remove(&mut self, session_id: &str) -> Option<SessionEntry> {
        let entry = self.by_id.remove(session_id)?;
        if self.owners.get(&entry.storage_key).map(String::as_str) == Some(session_id) {
            self.owners.remove(&entry.storage_key);
        }
        Some(entry)
    }
}

/// Manager for all mounted widget sessions
///
/// A transcript is owned by exactly one live session. Mounting a key that is
/// already held tears the previous holder down first, so two sessions never
/// write over each other. Sessions that do not name a key get a private one.
pub struct SessionManager {
    kv: Arc<dyn KeyValueStore>,
    llm: Arc<dyn LlmService>,
    config: Arc<SessionConfig>,
    storage_key_prefix: String,
    sessions: RwLock<Sessions>,
    closing: CancellationToken,
}

impl SessionManager {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        llm: Arc<dyn LlmService>,
        config: SessionConfig,
        storage_key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            kv,
            llm,
            config: Arc::new(config),
            storage_key_prefix: storage_key_prefix.into(),
            sessions: RwLock::new(Sessions::default()),
            closing: CancellationToken::new(),
        }
    }

    /// Mount a session: load its transcript and start its runtime
    pub async fn open(&self, storage_key: Option<String>) -> (String, WidgetSnapshot) {
        let session_id = uuid::Uuid::new_v4().to_string();
        let storage_key = storage_key
            .unwrap_or_else(|| format!("{}:{session_id}", self.storage_key_prefix));

        // Held across the takeover so the key cannot change hands in between
        let mut sessions = self.sessions.write().await;

        if let Some(previous) = sessions.owners.get(&storage_key).cloned() {
            if let Some(entry) = sessions.remove(&previous) {
                tracing::info!(
                    session_id = %previous,
                    storage_key = %storage_key,
                    "Storage key remounted, closing previous session"
                );
                entry.teardown().await;
            }
        }

        let store = ConversationStore::load(self.kv.clone(), &storage_key, self.config.seed.clone());
        let initial = WidgetSnapshot::build(
            &WidgetState::default(),
            store.messages(),
            &self.config.formatter,
        );

        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(128);
        let (snapshot_tx, snapshot_rx) = watch::channel(initial.clone());
        let lifetime = CancellationToken::new();

        let runtime = WidgetRuntime::new(
            session_id.clone(),
            store,
            Arc::new(self.llm.clone()),
            self.config.clone(),
            event_rx,
            &event_tx,
            broadcast_tx.clone(),
            snapshot_tx,
            lifetime.clone(),
        );

        let id = session_id.clone();
        let task = tokio::spawn(async move {
            runtime.run().await;
            tracing::debug!(session_id = %id, "Widget runtime task finished");
        });

        tracing::info!(session_id = %session_id, storage_key = %storage_key, "Opened widget session");

        sessions
            .owners
            .insert(storage_key.clone(), session_id.clone());
        sessions.by_id.insert(
            session_id.clone(),
            SessionEntry {
                handle: SessionHandle {
                    event_tx,
                    broadcast_tx,
                    snapshot_rx,
                    lifetime,
                },
                storage_key,
                last_active: Mutex::new(Instant::now()),
                task,
            },
        );

        (session_id, initial)
    }

    /// Look up a live session, counting the lookup as activity
    pub async fn get(&self, session_id: &str) -> Result<SessionHandle, SessionError> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .by_id
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        entry.touch();
        Ok(entry.handle.clone())
    }

    /// Queue an event for a session
    pub async fn send_event(&self, session_id: &str, event: Event) -> Result<(), SessionError> {
        let handle = self.get(session_id).await?;
        handle
            .event_tx
            .send(event)
            .await
            .map_err(|_| SessionError::Closed(session_id.to_string()))
    }

    /// Latest published snapshot
    pub async fn snapshot(&self, session_id: &str) -> Result<WidgetSnapshot, SessionError> {
        let handle = self.get(session_id).await?;
        let snapshot = handle.snapshot_rx.borrow().clone();
        Ok(snapshot)
    }

    /// Current snapshot plus a receiver for every later one
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<(WidgetSnapshot, broadcast::Receiver<SseEvent>), SessionError> {
        let handle = self.get(session_id).await?;
        let rx = handle.broadcast_tx.subscribe();
        let snapshot = handle.snapshot_rx.borrow().clone();
        Ok((snapshot, rx))
    }

    /// Tear down a session, discarding any pending request
    pub async fn close(&self, session_id: &str) -> Result<(), SessionError> {
        let entry = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        entry.teardown().await;
        tracing::info!(session_id = %session_id, "Closed widget session");
        Ok(())
    }

    /// Tear down sessions with no activity for `idle_timeout`
    ///
    /// A session with a connected stream client is never idle.
    pub async fn reap_idle(&self, idle_timeout: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, SessionEntry)> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .by_id
                .iter()
                .filter(|(_, entry)| {
                    entry.handle.broadcast_tx.receiver_count() == 0
                        && entry.idle_for(now) >= idle_timeout
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let count = expired.len();
        for (session_id, entry) in expired {
            tracing::info!(session_id = %session_id, "Closing idle widget session");
            entry.teardown().await;
        }
        count
    }

    /// Periodically reap idle sessions until shutdown
    pub fn spawn_reaper(self: &Arc<Self>, idle_timeout: Duration) {
        let manager = Arc::downgrade(self);
        let closing = self.closing.clone();
        let period = (idle_timeout / 4).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = closing.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let reaped = manager.reap_idle(idle_timeout).await;
                if reaped > 0 {
                    tracing::debug!(reaped, "Reaped idle widget sessions");
                }
            }
        });
    }

    /// Tear down every session
    pub async fn shutdown(&self) {
        self.closing.cancel();
        let entries: Vec<_> = {
            let mut sessions = self.sessions.write().await;
            sessions.owners.clear();
            sessions.by_id.drain().map(|(_, entry)| entry).collect()
        };
        let count = entries.len();
        for entry in entries {
            entry.teardown().await;
        }
        tracing::info!(count, "Closed all widget sessions");
    }
}
