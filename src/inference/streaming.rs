//! SSE streaming response parser for OpenAI-compatible chat completions.
//!
//! Reads a `reqwest::Response` as a byte stream, splits on SSE boundaries
//! (`data: …\n\n`), parses each chunk as JSON, and accumulates tool call
//! fragments across deltas until the stream ends.

use futures::stream::{self, Stream, StreamExt};
use uuid::Uuid;

use super::errors::InferenceError;
use super::types::{ChatCompletionChunk, StreamChunk, ToolCallRequest};

// ─── SSE line parser ─────────────────────────────────────────────────────────

/// Parse raw SSE bytes into `StreamChunk`s.
///
/// This is the main entry point for streaming. It:
/// 1. Splits the HTTP body into SSE events, buffering partial events across
///    network chunk boundaries
/// 2. Parses each `data:` line as a `ChatCompletionChunk`
/// 3. Accumulates tool call fragments per index across deltas
/// 4. Emits complete tool calls once, when the stream finishes
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<StreamChunk, InferenceError>> {
    let byte_stream = response.bytes_stream();

    let state = StreamState::new();

    stream::unfold(
        (byte_stream, state, String::new()),
        |(mut byte_stream, mut state, mut buffer)| async move {
            loop {
                // Check if we have a complete SSE event in the buffer
                if let Some(event_end) = buffer.find("\n\n") {
                    let event = buffer[..event_end].to_string();
                    buffer = buffer[event_end + 2..].to_string();

                    match state.process_event(&event) {
                        Ok(Some(chunk)) => return Some((Ok(chunk), (byte_stream, state, buffer))),
                        Ok(None) => continue, // keep-alive or empty delta
                        Err(e) => return Some((Err(e), (byte_stream, state, buffer))),
                    }
                }

                // Need more data from the stream
                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        let text = String::from_utf8_lossy(&bytes);
                        buffer.push_str(&text);
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(InferenceError::StreamError {
                                reason: format!("stream read error: {e}"),
                            }),
                            (byte_stream, state, buffer),
                        ));
                    }
                    None => {
                        // Stream ended without [DONE] — flush leftover buffer,
                        // then any pending tool calls
                        if !buffer.trim().is_empty() {
                            let event = buffer.trim().to_string();
                            buffer.clear();
                            match state.process_event(&event) {
                                Ok(Some(chunk)) => {
                                    return Some((Ok(chunk), (byte_stream, state, buffer)))
                                }
                                Ok(None) => {}
                                Err(e) => return Some((Err(e), (byte_stream, state, buffer))),
                            }
                        }
                        return match state.finalize() {
                            Some(chunk) => Some((Ok(chunk), (byte_stream, state, buffer))),
                            None => None,
                        };
                    }
                }
            }
        },
    )
}

// ─── Stream State ────────────────────────────────────────────────────────────

/// One tool call under assembly, keyed by its delta index.
///
/// Providers split a single tool call across many deltas: the first fragment
/// usually carries `id` and `name`, later ones append to `arguments`.
#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallBuilder {
    fn absorb(&mut self, fragment: &super::types::ChunkToolCall) {
        if let Some(ref id) = fragment.id {
            self.id = Some(id.clone());
        }
        if let Some(ref f) = fragment.function {
            if let Some(ref n) = f.name {
                self.name.push_str(n);
            }
            if let Some(ref a) = f.arguments {
                self.arguments.push_str(a);
            }
        }
    }

    fn build(self) -> ToolCallRequest {
        ToolCallRequest {
            id: self
                .id
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
            name: self.name,
            arguments: self.arguments,
        }
    }
}

/// Mutable state for accumulating tool call fragments across SSE events.
struct StreamState {
    /// In-progress tool calls, keyed by delta index.
    builders: Vec<(u32, ToolCallBuilder)>,
    /// Set once the final tool-call chunk has been emitted, so the [DONE]
    /// sentinel and stream end don't emit them a second time.
    emitted: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            builders: Vec::new(),
            emitted: false,
        }
    }

    /// Process a single SSE event string (may contain multiple `data:` lines).
    fn process_event(&mut self, event: &str) -> Result<Option<StreamChunk>, InferenceError> {
        let mut data_content = String::new();

        for line in event.lines() {
            if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
                let data = data.trim();
                if data == "[DONE]" {
                    return Ok(self.finalize());
                }
                data_content.push_str(data);
            }
            // Ignore non-data lines (comments, event types, etc.)
        }

        if data_content.is_empty() {
            return Ok(None); // Keep-alive or comment
        }

        let chunk: ChatCompletionChunk =
            serde_json::from_str(&data_content).map_err(|e| InferenceError::StreamError {
                reason: format!("failed to parse SSE chunk: {e} (data: {data_content})"),
            })?;

        self.process_chunk(chunk)
    }

    /// Process a parsed `ChatCompletionChunk`.
    fn process_chunk(
        &mut self,
        chunk: ChatCompletionChunk,
    ) -> Result<Option<StreamChunk>, InferenceError> {
        let choice = match chunk.choices.first() {
            Some(c) => c,
            None => return Ok(None),
        };

        let mut result = StreamChunk {
            token: None,
            reasoning: None,
            tool_calls: None,
            finish_reason: choice.finish_reason.clone(),
        };

        if let Some(ref content) = choice.delta.content {
            if !content.is_empty() {
                result.token = Some(content.clone());
            }
        }

        // Thinking models stream chain-of-thought separately from the answer.
        // Surfaced as its own field so callers can display it distinctly.
        if let Some(ref reasoning) = choice.delta.reasoning {
            if !reasoning.is_empty() {
                result.reasoning = Some(reasoning.clone());
            }
        }

        if let Some(ref tool_calls) = choice.delta.tool_calls {
            for tc in tool_calls {
                let index = tc.index.unwrap_or(0);
                match self.builders.iter_mut().find(|(idx, _)| *idx == index) {
                    Some((_, builder)) => builder.absorb(tc),
                    None => {
                        let mut builder = ToolCallBuilder::default();
                        builder.absorb(tc);
                        self.builders.push((index, builder));
                    }
                }
            }
        }

        if result.finish_reason.as_deref() == Some("tool_calls") {
            result.tool_calls = self.take_tool_calls();
        }

        if result.token.is_none()
            && result.reasoning.is_none()
            && result.tool_calls.is_none()
            && result.finish_reason.is_none()
        {
            return Ok(None);
        }

        Ok(Some(result))
    }

    /// Drain the builders into complete calls, ordered by delta index.
    fn take_tool_calls(&mut self) -> Option<Vec<ToolCallRequest>> {
        if self.builders.is_empty() || self.emitted {
            return None;
        }
        self.emitted = true;
        let mut pending = std::mem::take(&mut self.builders);
        pending.sort_by_key(|(idx, _)| *idx);
        Some(
            pending
                .into_iter()
                .map(|(_, builder)| builder.build())
                .collect(),
        )
    }

    /// Emit any pending tool calls at stream end.
    fn finalize(&mut self) -> Option<StreamChunk> {
        let calls = self.take_tool_calls()?;
        Some(StreamChunk {
            token: None,
            reasoning: None,
            tool_calls: Some(calls),
            finish_reason: Some("tool_calls".into()),
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
