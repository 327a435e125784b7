//! The tool-calling conversation engine.
//!
//! One user turn is processed as a sequence of phases: reasoning (the model
//! plans and may request SQL), tool execution (each request runs through the
//! query gate), a bounded retry loop when calls fail, and interpretation
//! (the model answers from the accumulated results). Progress is emitted as
//! [`ChatEvent`]s in real time; messages are committed to the store only at
//! phase boundaries, so a cancelled turn never leaves a half-written message.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::gate::SafeQueryGate;
use crate::inference::config::ModelConfig;
use crate::inference::types::{ChatCompletionRequest, ChatMessage};
use crate::inference::{ModelClient, ModelStream, ToolCallRequest};

use super::context::{build_budgeted_messages, default_ceiling, emergency_ceiling};
use super::errors::EngineError;
use super::events::ChatEvent;
use super::prompts;
use super::store::ConversationStore;
use super::tool;
use super::types::{Conversation, MessagePhase, StoredMessage, ToolCallRecord};
use crate::inference::Role;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Maximum retry rounds per user turn after failed tool calls. When the
/// budget is exhausted the turn advances to interpretation, where the model
/// is obliged to report the failures rather than fabricate data.
pub const MAX_RETRY_ROUNDS: u32 = 3;

/// Event channel depth. Consumers that fall this far behind apply
/// backpressure to the turn rather than dropping events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Drives conversation turns against the model provider and the query gate.
#[derive(Clone)]
pub struct ChatEngine {
    client: Arc<dyn ModelClient>,
    gate: Arc<SafeQueryGate>,
    store: Arc<dyn ConversationStore>,
    model: ModelConfig,
}

/// Which event kind a phase's content tokens map to.
#[derive(Clone, Copy, PartialEq, Eq)]
enum StreamMode {
    /// Planning text, shown to the user as thinking.
    Reasoning,
    /// Committed answer text.
    Answer,
}

/// Accumulated output of one streamed model call.
struct PhaseOutcome {
    text: String,
    tool_calls: Vec<ToolCallRequest>,
}

impl ChatEngine {
    pub fn new(
        client: Arc<dyn ModelClient>,
        gate: Arc<SafeQueryGate>,
        store: Arc<dyn ConversationStore>,
        model: ModelConfig,
    ) -> Self {
        Self {
            client,
            gate,
            store,
            model,
        }
    }

    /// Access to the conversation store (listing, deletion by a transport
    /// collaborator).
    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Process a user message, returning a live event stream.
    ///
    /// The turn runs on a spawned task; dropping the receiver cancels it at
    /// the next phase boundary. The stream always ends with a terminal
    /// `done` or `error` event unless cancelled.
    pub fn process_message_stream(
        &self,
        user_message: String,
        conversation_id: Option<String>,
    ) -> mpsc::Receiver<ChatEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_turn(user_message, conversation_id, &tx).await {
                match e {
                    EngineError::Cancelled => {
                        tracing::debug!("turn cancelled by consumer");
                    }
                    other => {
                        tracing::error!(error = %other, "turn failed");
                        let _ = tx
                            .send(ChatEvent::Error {
                                message: other.user_message(),
                            })
                            .await;
                    }
                }
            }
        });
        rx
    }

    /// Synchronous facade: process a message and return
    /// `(conversation_id, final_response_text)`, consuming the event stream
    /// internally until `done`.
    pub async fn process_message(
        &self,
        user_message: String,
        conversation_id: Option<String>,
    ) -> Result<(String, String), EngineError> {
        let mut rx = self.process_message_stream(user_message, conversation_id);
        let mut failure: Option<String> = None;
        while let Some(event) = rx.recv().await {
            match event {
                ChatEvent::Done {
                    conversation_id,
                    response,
                } => return Ok((conversation_id, response)),
                ChatEvent::Error { message } => failure = Some(message),
                _ => {}
            }
        }
        match failure {
            Some(message) => Err(EngineError::Provider(
                crate::inference::InferenceError::StreamError { reason: message },
            )),
            None => Err(EngineError::Cancelled),
        }
    }

    // ─── Phase machine ───────────────────────────────────────────────────

    async fn run_turn(
        &self,
        user_message: String,
        conversation_id: Option<String>,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Result<(), EngineError> {
        // Resolve or create the conversation; refresh the system timestamp.
        let conv_id = match conversation_id.filter(|id| self.store.get(id).is_some()) {
            Some(id) => {
                self.store.refresh_system(&id, &prompts::system_prompt())?;
                id
            }
            None => self.store.create(&prompts::system_prompt()).id,
        };

        self.store
            .append(&conv_id, vec![StoredMessage::new(Role::User, &user_message)])?;

        emit(tx, ChatEvent::thinking()).await?;

        let mut retry_round = 0u32;
        loop {
            // REASONING
            let conv = self.snapshot(&conv_id)?;
            // Composed from a fresh base so every model call carries a
            // current time reference.
            let base = prompts::system_prompt();
            let phase_prompt = if retry_round == 0 {
                prompts::reasoning_prompt(&base)
            } else {
                prompts::retry_prompt(&base)
            };
            let outcome = self
                .stream_phase(&conv, &phase_prompt, tx, StreamMode::Reasoning)
                .await?;

            if outcome.tool_calls.is_empty() {
                // The model answered without needing data.
                self.store.append(
                    &conv_id,
                    vec![StoredMessage::with_phase(
                        Role::Assistant,
                        &outcome.text,
                        MessagePhase::Output,
                    )],
                )?;
                emit(
                    tx,
                    ChatEvent::Done {
                        conversation_id: conv_id.clone(),
                        response: outcome.text,
                    },
                )
                .await?;
                return Ok(());
            }

            if !outcome.text.is_empty() {
                emit(
                    tx,
                    ChatEvent::Reasoning {
                        content: outcome.text.clone(),
                    },
                )
                .await?;
            }

            // EXECUTING_TOOLS — one at a time, in request order.
            let mut assistant = StoredMessage::assistant_tool_requests(
                (!outcome.text.is_empty()).then(|| outcome.text.clone()),
                outcome.tool_calls.clone(),
            );
            let mut tool_messages = Vec::new();
            let mut records = Vec::new();
            let mut any_failed = false;

            for call in &outcome.tool_calls {
                emit(
                    tx,
                    ChatEvent::ToolCall {
                        query: peek_query(&call.arguments),
                    },
                )
                .await?;

                let result = tool::run_tool_call(&self.gate, call);
                if !result.success {
                    tracing::warn!(query = %result.query, payload = %result.payload, "tool call failed");
                }
                any_failed |= !result.success;

                emit(
                    tx,
                    ChatEvent::ToolResult {
                        query: result.query.clone(),
                        success: result.success,
                        result: result.success.then(|| result.payload.clone()),
                    },
                )
                .await?;

                records.push(ToolCallRecord {
                    query: result.query,
                    response: result.payload.clone(),
                });
                tool_messages.push(StoredMessage::tool_result(&call.id, &result.payload));
            }

            assistant.tool_calls = Some(records);
            let mut batch = vec![assistant];
            batch.extend(tool_messages);
            self.store.append(&conv_id, batch)?;

            // RETRY_REASONING, bounded
            if any_failed && retry_round < MAX_RETRY_ROUNDS {
                retry_round += 1;
                tracing::info!(round = retry_round, "retrying after failed tool calls");
                continue;
            }
            break;
        }

        // INTERPRETING
        let conv = self.snapshot(&conv_id)?;
        let outcome = self
            .stream_phase(
                &conv,
                &prompts::interpretation_prompt(&prompts::system_prompt()),
                tx,
                StreamMode::Answer,
            )
            .await?;

        self.store.append(
            &conv_id,
            vec![StoredMessage::with_phase(
                Role::Assistant,
                &outcome.text,
                MessagePhase::Interpret,
            )],
        )?;
        emit(
            tx,
            ChatEvent::Done {
                conversation_id: conv_id,
                response: outcome.text,
            },
        )
        .await?;
        Ok(())
    }

    fn snapshot(&self, id: &str) -> Result<Conversation, EngineError> {
        self.store
            .get(id)
            .ok_or_else(|| EngineError::ConversationNotFound { id: id.to_string() })
    }

    /// Submit one streamed model call at the default ceiling, falling back to
    /// the emergency ceiling once if the provider rejects the request for
    /// context length.
    async fn stream_phase(
        &self,
        conversation: &Conversation,
        phase_prompt: &str,
        tx: &mpsc::Sender<ChatEvent>,
        mode: StreamMode,
    ) -> Result<PhaseOutcome, EngineError> {
        let ceilings = [
            default_ceiling(self.model.context_window, self.model.max_tokens),
            emergency_ceiling(self.model.context_window, self.model.max_tokens),
        ];

        for (attempt, ceiling) in ceilings.iter().enumerate() {
            let messages = build_budgeted_messages(conversation, phase_prompt, *ceiling);
            let request = self.build_request(messages);
            match self.client.stream_chat(request).await {
                Ok(stream) => return self.drain_stream(stream, tx, mode).await,
                Err(e) if e.is_context_length_error() && attempt == 0 => {
                    tracing::warn!("context length rejected, rebuilding at emergency ceiling");
                }
                Err(e) if e.is_context_length_error() => return Err(EngineError::ContextTooLarge),
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::ContextTooLarge)
    }

    fn build_request(&self, messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.model_name.clone(),
            messages,
            tools: Some(vec![tool::sql_tool_definition()]),
            tool_choice: Some("auto".to_string()),
            temperature: self.model.temperature,
            max_tokens: self.model.max_tokens,
            stream: true,
        }
    }

    async fn drain_stream(
        &self,
        mut stream: ModelStream,
        tx: &mpsc::Sender<ChatEvent>,
        mode: StreamMode,
    ) -> Result<PhaseOutcome, EngineError> {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        while let Some(item) = stream.next().await {
            let chunk = item?;

            if let Some(token) = chunk.reasoning {
                emit(tx, ChatEvent::ReasoningToken { token }).await?;
            }

            if let Some(token) = chunk.token {
                text.push_str(&token);
                let event = match mode {
                    StreamMode::Reasoning => ChatEvent::ReasoningToken { token },
                    StreamMode::Answer => ChatEvent::Token { token },
                };
                emit(tx, event).await?;
            }

            if let Some(calls) = chunk.tool_calls {
                if mode == StreamMode::Answer {
                    // The interpretation prompt forbids tools; drop the calls.
                    tracing::warn!(
                        count = calls.len(),
                        "model requested tools during interpretation, ignoring"
                    );
                } else {
                    tool_calls.extend(calls);
                }
            }
        }

        Ok(PhaseOutcome { text, tool_calls })
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Best-effort extraction of the query string for the `tool_call` event,
/// before the arguments are validated.
fn peek_query(arguments: &str) -> String {
    serde_json::from_str::<serde_json::Value>(arguments)
        .ok()
        .and_then(|v| v.get("query").and_then(|q| q.as_str()).map(str::to_string))
        .unwrap_or_default()
}

async fn emit(tx: &mpsc::Sender<ChatEvent>, event: ChatEvent) -> Result<(), EngineError> {
    tx.send(event).await.map_err(|_| EngineError::Cancelled)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::store::MemoryStore;
    use crate::inference::types::StreamChunk;
    use crate::inference::InferenceError;
    use async_trait::async_trait;
    use rusqlite::Connection;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    // Scripted model backend: each call pops the next scripted response.
    enum StubResponse {
        Chunks(Vec<StreamChunk>),
        /// Chunks held back until the oneshot fires.
        Deferred(oneshot::Receiver<()>, Vec<StreamChunk>),
        ContextRejected,
        Unavailable,
    }

    struct StubModel {
        responses: Mutex<VecDeque<StubResponse>>,
        requests_seen: Mutex<Vec<ChatCompletionRequest>>,
    }

    impl StubModel {
        fn new(responses: Vec<StubResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelClient for StubModel {
        async fn stream_chat(
            &self,
            request: ChatCompletionRequest,
        ) -> Result<ModelStream, InferenceError> {
            self.requests_seen.lock().unwrap().push(request);
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(StubResponse::Unavailable);
            match next {
                StubResponse::Chunks(chunks) => {
                    Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
                }
                StubResponse::Deferred(release, chunks) => {
                    let _ = release.await;
                    Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
                }
                StubResponse::ContextRejected => Err(InferenceError::HttpError {
                    status: 400,
                    body: "This model's maximum context length is 16000 tokens.".into(),
                }),
                StubResponse::Unavailable => Err(InferenceError::ConnectionFailed {
                    endpoint: "stub".into(),
                    reason: "no scripted response".into(),
                }),
            }
        }
    }

    fn text_chunks(text: &str) -> StubResponse {
        StubResponse::Chunks(
            text.split_inclusive(' ')
                .map(|t| StreamChunk {
                    token: Some(t.to_string()),
                    ..Default::default()
                })
                .collect(),
        )
    }

    fn tool_call_chunks(plan: &str, query: &str) -> StubResponse {
        StubResponse::Chunks(vec![
            StreamChunk {
                token: Some(plan.to_string()),
                ..Default::default()
            },
            StreamChunk {
                tool_calls: Some(vec![ToolCallRequest {
                    id: "call_1".to_string(),
                    name: tool::TOOL_NAME.to_string(),
                    arguments: format!(r#"{{"query":"{query}"}}"#),
                }]),
                finish_reason: Some("tool_calls".to_string()),
                ..Default::default()
            },
        ])
    }

    fn test_gate() -> Arc<SafeQueryGate> {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE entities (id INTEGER PRIMARY KEY, type TEXT NOT NULL);
            INSERT INTO entities (type)
                SELECT 'employee' FROM (SELECT 1 UNION SELECT 2 UNION SELECT 3 UNION
                                        SELECT 4 UNION SELECT 5 UNION SELECT 6 UNION
                                        SELECT 7 UNION SELECT 8 UNION SELECT 9 UNION SELECT 10);
            ",
        )
        .unwrap();
        Arc::new(SafeQueryGate::from_connection(conn))
    }

    fn test_engine(responses: Vec<StubResponse>) -> (ChatEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = ChatEngine::new(
            Arc::new(StubModel::new(responses)),
            test_gate(),
            store.clone(),
            ModelConfig::default(),
        );
        (engine, store)
    }

    fn event_types(events: &[ChatEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                ChatEvent::Status { .. } => "status",
                ChatEvent::ReasoningToken { .. } => "reasoning_token",
                ChatEvent::Token { .. } => "token",
                ChatEvent::Reasoning { .. } => "reasoning",
                ChatEvent::ToolCall { .. } => "tool_call",
                ChatEvent::ToolResult { .. } => "tool_result",
                ChatEvent::Done { .. } => "done",
                ChatEvent::Error { .. } => "error",
            })
            .collect()
    }

    async fn collect_events(mut rx: mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_tool_call_turn_end_to_end() {
        let (engine, store) = test_engine(vec![
            tool_call_chunks(
                "I will count the employees.",
                "SELECT COUNT(*) FROM entities WHERE type='employee'",
            ),
            text_chunks("10 employees are currently tracked."),
        ]);

        let rx = engine.process_message_stream("how many employees are tracked?".into(), None);
        let events = collect_events(rx).await;

        assert_eq!(
            event_types(&events),
            vec![
                "status",
                "reasoning_token",
                "reasoning",
                "tool_call",
                "tool_result",
                "token",
                "token",
                "token",
                "token",
                "token",
                "done",
            ]
        );

        let (conv_id, response) = match events.last().unwrap() {
            ChatEvent::Done {
                conversation_id,
                response,
            } => (conversation_id.clone(), response.clone()),
            other => panic!("expected done, got {other:?}"),
        };
        assert_eq!(response, "10 employees are currently tracked.");

        match &events[4] {
            ChatEvent::ToolResult {
                query,
                success,
                result,
            } => {
                assert!(success);
                assert!(query.starts_with("SELECT COUNT"));
                assert_eq!(result.as_deref(), Some(r#"{"results":[[10]]}"#));
            }
            other => panic!("expected tool_result, got {other:?}"),
        }

        // Conversation: system, user, assistant(reasoning), tool, assistant(interpret)
        let conv = store.get(&conv_id).unwrap();
        let phases: Vec<MessagePhase> = conv.messages.iter().map(|m| m.phase).collect();
        assert_eq!(
            phases,
            vec![
                MessagePhase::System,
                MessagePhase::Request,
                MessagePhase::Reasoning,
                MessagePhase::Tool,
                MessagePhase::Interpret,
            ]
        );
        let records = conv.messages[2].tool_calls.as_ref().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].response, r#"{"results":[[10]]}"#);
    }

    #[tokio::test]
    async fn test_no_tool_turn_is_output_tagged() {
        let (engine, store) = test_engine(vec![text_chunks("Hello! Ask me about the data.")]);

        let rx = engine.process_message_stream("hi".into(), None);
        let events = collect_events(rx).await;

        // No tool events for a turn that needed no data
        assert!(events
            .iter()
            .all(|e| !matches!(e, ChatEvent::ToolCall { .. } | ChatEvent::ToolResult { .. })));

        let conv_id = match events.last().unwrap() {
            ChatEvent::Done {
                conversation_id,
                response,
            } => {
                assert_eq!(response, "Hello! Ask me about the data.");
                conversation_id.clone()
            }
            other => panic!("expected done, got {other:?}"),
        };

        let conv = store.get(&conv_id).unwrap();
        assert_eq!(conv.messages.len(), 3);
        assert_eq!(conv.messages[2].phase, MessagePhase::Output);
    }

    #[tokio::test]
    async fn test_rejected_sql_triggers_single_retry() {
        let (engine, store) = test_engine(vec![
            tool_call_chunks("Dropping in.", "DROP TABLE entities"),
            tool_call_chunks("Retrying with a SELECT.", "SELECT COUNT(*) FROM entities"),
            text_chunks("There are 10 entities."),
        ]);

        let rx = engine.process_message_stream("count entities".into(), None);
        let events = collect_events(rx).await;

        let tool_results: Vec<&ChatEvent> = events
            .iter()
            .filter(|e| matches!(e, ChatEvent::ToolResult { .. }))
            .collect();
        assert_eq!(tool_results.len(), 2);
        match tool_results[0] {
            ChatEvent::ToolResult { success, result, .. } => {
                assert!(!success);
                assert!(result.is_none());
            }
            _ => unreachable!(),
        }
        match tool_results[1] {
            ChatEvent::ToolResult { success, .. } => assert!(success),
            _ => unreachable!(),
        }

        // The failed round's tool message carries the rejection text for the model
        let conv_id = match events.last().unwrap() {
            ChatEvent::Done { conversation_id, .. } => conversation_id.clone(),
            other => panic!("expected done, got {other:?}"),
        };
        let conv = store.get(&conv_id).unwrap();
        let first_tool = conv
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert!(first_tool
            .content
            .as_ref()
            .unwrap()
            .contains("Only SELECT queries are allowed"));
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_advances_to_interpretation() {
        let bad = || tool_call_chunks("trying", "DELETE FROM entities");
        let (engine, _store) = test_engine(vec![
            bad(),
            bad(),
            bad(),
            bad(), // initial round + MAX_RETRY_ROUNDS retries
            text_chunks("I could not query the database; every attempt was rejected."),
        ]);

        let rx = engine.process_message_stream("wipe it".into(), None);
        let events = collect_events(rx).await;

        let failures = events
            .iter()
            .filter(|e| matches!(e, ChatEvent::ToolResult { success: false, .. }))
            .count();
        assert_eq!(failures, (MAX_RETRY_ROUNDS + 1) as usize);
        assert!(matches!(events.last().unwrap(), ChatEvent::Done { .. }));
    }

    #[tokio::test]
    async fn test_provider_failure_commits_no_partial_message() {
        let (engine, store) = test_engine(vec![StubResponse::Unavailable]);

        let rx = engine.process_message_stream("hello".into(), None);
        let events = collect_events(rx).await;

        assert!(matches!(events.last().unwrap(), ChatEvent::Error { .. }));

        // Only system + user were committed
        let summaries = store.list();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].message_count, 2);
    }

    #[tokio::test]
    async fn test_existing_conversation_is_reused() {
        let (engine, store) = test_engine(vec![
            text_chunks("First answer."),
            text_chunks("Second answer."),
        ]);

        let (conv_id, _) = engine.process_message("one".into(), None).await.unwrap();
        let (same_id, _) = engine
            .process_message("two".into(), Some(conv_id.clone()))
            .await
            .unwrap();

        assert_eq!(conv_id, same_id);
        let conv = store.get(&conv_id).unwrap();
        // system + (user, assistant) * 2
        assert_eq!(conv.messages.len(), 5);
    }

    #[tokio::test]
    async fn test_unknown_conversation_id_creates_fresh() {
        let (engine, store) = test_engine(vec![text_chunks("Hi.")]);

        let (conv_id, _) = engine
            .process_message("hello".into(), Some("no-such-id".into()))
            .await
            .unwrap();
        assert_ne!(conv_id, "no-such-id");
        assert!(store.get(&conv_id).is_some());
    }

    #[tokio::test]
    async fn test_event_type_sequence_is_deterministic() {
        let script = || {
            vec![
                tool_call_chunks("plan", "SELECT COUNT(*) FROM entities"),
                text_chunks("10 entities."),
            ]
        };

        let (engine_a, _) = test_engine(script());
        let (engine_b, _) = test_engine(script());

        let a = collect_events(engine_a.process_message_stream("count".into(), None)).await;
        let b = collect_events(engine_b.process_message_stream("count".into(), None)).await;

        assert_eq!(event_types(&a), event_types(&b));
    }

    #[tokio::test]
    async fn test_context_rejection_rebuilds_once_then_fails() {
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(StubModel::new(vec![
            StubResponse::ContextRejected,
            StubResponse::ContextRejected,
        ]));
        let engine = ChatEngine::new(
            model.clone(),
            test_gate(),
            store.clone(),
            ModelConfig::default(),
        );

        let events = collect_events(engine.process_message_stream("big question".into(), None)).await;

        // One rebuild at the emergency ceiling, then give up
        assert_eq!(model.requests_seen.lock().unwrap().len(), 2);
        match events.last().unwrap() {
            ChatEvent::Error { message } => {
                assert!(message.contains("start a new conversation"), "got: {message}");
            }
            other => panic!("expected error, got {other:?}"),
        }

        // Only system + user were committed; the conversation stays intact
        let summaries = store.list();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].message_count, 2);
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_turn_at_phase_boundary() {
        let (release_tx, release_rx) = oneshot::channel();
        let (engine, store) = test_engine(vec![
            tool_call_chunks("plan", "SELECT COUNT(*) FROM entities"),
            StubResponse::Deferred(
                release_rx,
                vec![StreamChunk {
                    token: Some("late answer".to_string()),
                    ..Default::default()
                }],
            ),
        ]);

        let mut rx = engine.process_message_stream("count".into(), None);

        // Consume through the tool phase, then walk away mid-turn while the
        // interpretation stream is still held back.
        loop {
            let event = rx.recv().await.unwrap();
            if matches!(event, ChatEvent::ToolResult { .. }) {
                break;
            }
        }
        drop(rx);
        let _ = release_tx.send(());
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        // The tool phase committed as a whole; interpretation never did.
        let conv_id = store.list()[0].id.clone();
        let conv = store.get(&conv_id).unwrap();
        assert_eq!(conv.messages.len(), 4);
        assert_eq!(conv.messages.last().unwrap().role, Role::Tool);
    }

    #[tokio::test]
    async fn test_every_model_call_carries_current_time_reference() {
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(StubModel::new(vec![
            tool_call_chunks("plan", "SELECT COUNT(*) FROM entities"),
            text_chunks("10 entities."),
        ]));
        let engine = ChatEngine::new(model.clone(), test_gate(), store, ModelConfig::default());

        engine.process_message("count".into(), None).await.unwrap();

        let requests = model.requests_seen.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        for request in requests.iter() {
            let system = &request.messages[0];
            assert_eq!(system.role, Role::System);
            let content = system.content.as_deref().unwrap();
            assert!(content.contains("Current reference time"));
            assert!(content.contains(&today), "stale time reference: {content:.120}");
        }
    }
}
