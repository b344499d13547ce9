//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::{SessionConfig, WidgetRuntime, WidgetSnapshot};
use crate::config::{LlmConfig, WidgetConfig};
use crate::conversation::{ConversationStore, Message};
use crate::db::{DbError, DbResult, KeyValueStore};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService};
use crate::state_machine::{Event, WidgetState};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Key-value stores
// ============================================================================

/// In-memory key-value store
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw value, bypassing any validation
    pub fn insert(&self, key: &str, raw: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), raw.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> DbResult<Option<String>> {
        Ok(self.value(key))
    }

    fn set(&self, key: &str, value: &str) -> DbResult<()> {
        self.insert(key, value);
        Ok(())
    }
}

/// Store whose writes always fail, as if the quota were zero
pub struct FailingStore;

impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> DbResult<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, value: &str) -> DbResult<()> {
        Err(DbError::QuotaExceeded {
            len: value.len(),
            quota: 0,
        })
    }
}

// ============================================================================
// Mock LLM Clients
// ============================================================================

/// Mock LLM client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, text: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(LlmResponse::text(text)));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_response(&self) -> Result<LlmResponse, LlmError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }
}

#[async_trait]
impl LlmService for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.next_response()
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Mock LLM client with configurable delay (for testing cancellation)
pub struct DelayedMockLlmClient {
    inner: MockLlmClient,
    delay: Duration,
    /// Notified when request starts (for test synchronization)
    pub request_started: Arc<Notify>,
}

impl DelayedMockLlmClient {
    pub fn new(model_id: impl Into<String>, delay: Duration) -> Self {
        Self {
            inner: MockLlmClient::new(model_id),
            delay,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_response(&self, text: &str) {
        self.inner.queue_response(text);
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.inner.recorded_requests()
    }
}

#[async_trait]
impl LlmService for DelayedMockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.inner.requests.lock().unwrap().push(request.clone());
        // notify_one stores a permit, so a late waiter still wakes
        self.request_started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.next_response()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ============================================================================
// Test runtime
// ============================================================================

pub const TEST_STORAGE_KEY: &str = "chatMessages";
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Helper for building test runtimes with minimal boilerplate
pub struct TestRuntime<L: LlmService + 'static> {
    pub kv: Arc<dyn KeyValueStore>,
    pub event_tx: mpsc::Sender<Event>,
    pub snapshot_rx: watch::Receiver<WidgetSnapshot>,
    pub llm: Arc<L>,
    pub lifetime: CancellationToken,
    pub handle: tokio::task::JoinHandle<()>,
}

impl TestRuntime<MockLlmClient> {
    /// Create a test runtime builder with an instant mock
    pub fn builder() -> TestRuntimeBuilder<MockLlmClient> {
        TestRuntimeBuilder {
            llm: Arc::new(MockLlmClient::new("test-model")),
            kv: Arc::new(MemoryStore::new()),
        }
    }
}

pub struct TestRuntimeBuilder<L> {
    llm: Arc<L>,
    kv: Arc<dyn KeyValueStore>,
}

impl<L: LlmService + 'static> TestRuntimeBuilder<L> {
    pub fn llm<M: LlmService + 'static>(self, llm: Arc<M>) -> TestRuntimeBuilder<M> {
        TestRuntimeBuilder { llm, kv: self.kv }
    }

    pub fn kv(mut self, kv: Arc<dyn KeyValueStore>) -> Self {
        self.kv = kv;
        self
    }

    pub fn build(self) -> TestRuntime<L> {
        let config = Arc::new(SessionConfig::new(
            &LlmConfig::default(),
            &WidgetConfig::default(),
        ));
        let store = ConversationStore::load(self.kv.clone(), TEST_STORAGE_KEY, config.seed.clone());
        let initial = WidgetSnapshot::build(&WidgetState::default(), store.messages(), &config.formatter);

        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(128);
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let lifetime = CancellationToken::new();

        let runtime = WidgetRuntime::new(
            "test-session".to_string(),
            store,
            self.llm.clone(),
            config,
            event_rx,
            &event_tx,
            broadcast_tx,
            snapshot_tx,
            lifetime.clone(),
        );

        let handle = tokio::spawn(async move {
            runtime.run().await;
        });

        TestRuntime {
            kv: self.kv,
            event_tx,
            snapshot_rx,
            llm: self.llm,
            lifetime,
            handle,
        }
    }
}

impl<L: LlmService + 'static> TestRuntime<L> {
    pub async fn send(&self, event: Event) {
        self.event_tx
            .send(event)
            .await
            .expect("Failed to send event");
    }

    /// Open the widget and send `text`
    pub async fn open_and_send(&self, text: &str) {
        self.send(Event::Toggle).await;
        self.send(Event::UserMessage {
            text: text.to_string(),
        })
        .await;
    }

    /// Wait until a published snapshot satisfies `pred`
    pub async fn wait_for(
        &mut self,
        pred: impl FnMut(&WidgetSnapshot) -> bool,
    ) -> WidgetSnapshot {
        let snapshot = tokio::time::timeout(WAIT_TIMEOUT, self.snapshot_rx.wait_for(pred))
            .await
            .expect("Timed out waiting for snapshot")
            .expect("Runtime stopped");
        snapshot.clone()
    }

    /// Wait for the pending request to resolve and `count` messages to exist
    pub async fn wait_for_settled(&mut self, count: usize) -> WidgetSnapshot {
        self.wait_for(|s| !s.loading && s.messages.len() == count)
            .await
    }

    /// Transcript as persisted in the key-value store
    pub fn stored_messages(&self) -> Vec<Message> {
        self.kv
            .get(TEST_STORAGE_KEY)
            .unwrap()
            .map(|raw| serde_json::from_str(&raw).unwrap())
            .unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{seed_conversation, Sender};
    use crate::state_machine::transition::FALLBACK_APOLOGY;
    use crate::state_machine::WidgetView;

    fn seed() -> Vec<Message> {
        seed_conversation(&WidgetConfig::default().greeting)
    }

    #[tokio::test]
    async fn test_mock_llm_client() {
        let mock = MockLlmClient::new("test-model");
        mock.queue_response("Hello");

        let request = LlmRequest {
            prompt: "hi".to_string(),
            settings: crate::llm::GenerationSettings::default(),
        };
        assert_eq!(mock.complete(&request).await.unwrap().text, "Hello");
        assert!(mock.complete(&request).await.is_err());
        assert_eq!(mock.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_successful_exchange_is_persisted() {
        let mut rt = TestRuntime::builder().build();
        rt.llm.queue_response(" Hello! ");

        rt.open_and_send("Hi").await;
        let snapshot = rt.wait_for_settled(3).await;

        assert_eq!(snapshot.view, WidgetView::OpenIdle);
        assert_eq!(snapshot.messages[1].text, "Hi");
        assert_eq!(snapshot.messages[2].text, "Hello!");
        assert!(snapshot.messages[2].timestamp.is_some());

        let stored = rt.stored_messages();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0], seed()[0]);
        assert_eq!(stored[1], Message::user("Hi"));
        assert_eq!(stored[2].sender, Sender::Bot);
        assert_eq!(stored[2].text, "Hello!");
    }

    #[tokio::test]
    async fn test_prompt_carries_full_transcript() {
        let mut rt = TestRuntime::builder().build();
        rt.llm.queue_response("Sure.");

        rt.open_and_send("  What do you build?  ").await;
        rt.wait_for_settled(3).await;

        let requests = rt.llm.recorded_requests();
        assert_eq!(requests.len(), 1);
        let prompt = &requests[0].prompt;
        assert!(prompt.contains("You: What do you build?\n"));
        assert!(prompt.contains(&format!("Assistant: {}", seed()[0].text)));
        assert!(prompt.ends_with("Assistant:"));
        assert_eq!(requests[0].settings.stop_sequences, vec!["You:".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_appends_single_apology() {
        let mut rt = TestRuntime::builder().build();
        rt.llm.queue_error(LlmError::server_error("HTTP 503: upstream down"));

        rt.open_and_send("Hi").await;
        let snapshot = rt.wait_for_settled(3).await;

        assert_eq!(snapshot.view, WidgetView::OpenError);
        assert_eq!(snapshot.messages[2].text, FALLBACK_APOLOGY);
        let banner = snapshot.error.unwrap();
        assert!(!banner.contains("503"));

        let bot_count = rt
            .stored_messages()
            .iter()
            .filter(|m| m.sender == Sender::Bot)
            .count();
        assert_eq!(bot_count, 2);

        rt.send(Event::DismissError).await;
        let snapshot = rt.wait_for(|s| s.error.is_none()).await;
        assert_eq!(snapshot.view, WidgetView::OpenIdle);
    }

    #[tokio::test]
    async fn test_send_while_loading_issues_one_request() {
        let llm = Arc::new(DelayedMockLlmClient::new(
            "test-model",
            Duration::from_millis(100),
        ));
        llm.queue_response("Only reply");
        let mut rt = TestRuntime::builder().llm(llm).build();

        rt.open_and_send("one").await;
        rt.send(Event::UserMessage {
            text: "two".to_string(),
        })
        .await;
        let snapshot = rt.wait_for_settled(3).await;

        assert_eq!(rt.llm.recorded_requests().len(), 1);
        let texts: Vec<_> = snapshot.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts[1..], ["one", "Only reply"]);
    }

    #[tokio::test]
    async fn test_loading_disables_input() {
        let llm = Arc::new(DelayedMockLlmClient::new(
            "test-model",
            Duration::from_millis(100),
        ));
        llm.queue_response("Done");
        let mut rt = TestRuntime::builder().llm(llm).build();

        rt.open_and_send("Hi").await;
        let loading = rt.wait_for(|s| s.loading).await;
        assert_eq!(loading.view, WidgetView::OpenLoading);
        assert!(loading.input_disabled);
        assert!(!loading.can_send);
        assert_eq!(loading.messages.last().unwrap().text, "Hi");

        let done = rt.wait_for_settled(3).await;
        assert!(!done.input_disabled);
    }

    #[tokio::test]
    async fn test_clear_resets_to_seed() {
        let kv = Arc::new(MemoryStore::new());
        kv.insert(
            TEST_STORAGE_KEY,
            r#"[{"text":"a","sender":"bot"},{"text":"b","sender":"user"},{"text":"c","sender":"bot"},{"text":"d","sender":"user"},{"text":"e","sender":"bot"}]"#,
        );
        let mut rt = TestRuntime::builder().kv(kv).build();
        assert_eq!(rt.snapshot_rx.borrow().messages.len(), 5);

        rt.send(Event::Toggle).await;
        rt.send(Event::ClearRequested).await;
        let confirming = rt.wait_for(|s| s.confirming_clear).await;
        assert_eq!(confirming.messages.len(), 5);

        rt.send(Event::ClearConfirmed).await;
        let snapshot = rt.wait_for(|s| s.messages.len() == 1).await;

        assert!(!snapshot.confirming_clear);
        assert_eq!(snapshot.messages[0].text, seed()[0].text);
        assert_eq!(rt.stored_messages(), seed());
    }

    #[tokio::test]
    async fn test_clear_while_loading_discards_late_reply() {
        let llm = Arc::new(DelayedMockLlmClient::new(
            "test-model",
            Duration::from_millis(100),
        ));
        llm.queue_response("Too late");
        let mut rt = TestRuntime::builder().llm(llm).build();

        rt.open_and_send("Hi").await;
        rt.llm.request_started.notified().await;

        rt.send(Event::ClearRequested).await;
        rt.send(Event::ClearConfirmed).await;
        let snapshot = rt.wait_for(|s| !s.loading && s.messages.len() == 1).await;
        assert_eq!(snapshot.view, WidgetView::OpenIdle);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(rt.snapshot_rx.borrow().messages.len(), 1);
        assert_eq!(rt.stored_messages(), seed());
    }

    #[tokio::test]
    async fn test_reply_applies_while_closed() {
        let llm = Arc::new(DelayedMockLlmClient::new(
            "test-model",
            Duration::from_millis(50),
        ));
        llm.queue_response("Welcome back");
        let mut rt = TestRuntime::builder().llm(llm).build();

        rt.open_and_send("Hi").await;
        rt.send(Event::Toggle).await;
        let snapshot = rt.wait_for_settled(3).await;
        assert_eq!(snapshot.view, WidgetView::Closed);

        rt.send(Event::Toggle).await;
        let snapshot = rt.wait_for(|s| s.is_open).await;
        assert_eq!(snapshot.view, WidgetView::OpenIdle);
        assert_eq!(snapshot.messages[2].text, "Welcome back");
    }

    #[tokio::test]
    async fn test_teardown_discards_pending_reply() {
        let llm = Arc::new(DelayedMockLlmClient::new(
            "test-model",
            Duration::from_millis(100),
        ));
        llm.queue_response("Never shown");
        let mut rt = TestRuntime::builder().llm(llm).build();

        rt.open_and_send("Hi").await;
        rt.wait_for(|s| s.loading).await;

        rt.lifetime.cancel();
        tokio::time::timeout(WAIT_TIMEOUT, &mut rt.handle)
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stored = rt.stored_messages();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1], Message::user("Hi"));
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_runtime() {
        let rt = TestRuntime::builder().build();
        let TestRuntime {
            event_tx, handle, ..
        } = rt;

        drop(event_tx);
        tokio::time::timeout(WAIT_TIMEOUT, handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_is_not_fatal() {
        let mut rt = TestRuntime::builder().kv(Arc::new(FailingStore)).build();
        rt.llm.queue_response("Still answering");

        rt.open_and_send("Hi").await;
        let snapshot = rt.wait_for_settled(3).await;

        assert_eq!(snapshot.view, WidgetView::OpenIdle);
        assert_eq!(snapshot.messages[2].text, "Still answering");
    }

    #[tokio::test]
    async fn test_transcript_survives_restart() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let mut first = TestRuntime::builder().kv(kv.clone()).build();
        first.llm.queue_response("Remember me");
        first.open_and_send("Hi").await;
        first.wait_for_settled(3).await;
        first.lifetime.cancel();

        let second = TestRuntime::builder().kv(kv).build();
        let snapshot = second.snapshot_rx.borrow().clone();
        assert_eq!(snapshot.view, WidgetView::Closed);
        assert_eq!(snapshot.messages.len(), 3);
        assert_eq!(snapshot.messages[2].text, "Remember me");
    }

    #[tokio::test]
    async fn test_enter_key_sends_input() {
        let mut rt = TestRuntime::builder().build();
        rt.llm.queue_response("Typed reply");

        rt.send(Event::Toggle).await;
        rt.send(Event::InputChanged {
            text: "typed".to_string(),
        })
        .await;
        rt.send(Event::KeyPressed {
            key: "Enter".to_string(),
        })
        .await;
        let snapshot = rt.wait_for_settled(3).await;

        assert_eq!(snapshot.input, "");
        assert_eq!(snapshot.messages[1].text, "typed");
    }
}
