//! LLM provider abstraction consumed by the agent loop.
//!
//! The loop depends on a callable that takes a message history and returns
//! assistant text plus optional tool calls; this module defines the trait and
//! a scripted mock for tests and examples. Wire formats, HTTP transport, and
//! retry wrappers live outside the core.
//!
//! # Streaming
//!
//! [`Provider::chat_stream`] accepts an optional `Sender<String>` for emitting
//! text chunks as they arrive. Implementations that stream send chunks through
//! the channel and still return the complete [`ChatResponse`]; the default
//! implementation calls [`Provider::chat_with_tools`] and forwards the full
//! content as one chunk. Implementations must drop the sender on return so
//! the consumer's forward loop terminates, and must record full usage in the
//! returned response.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::ctx::RunContext;
use crate::error::AgentError;
use crate::message::{ChatRequest, ChatResponse, ToolCall, ToolDefinition, Usage};

/// LLM client: given messages, returns assistant text and optional tool calls.
///
/// **Interaction**: Called once per loop iteration by `LlmAgent` and the
/// network router; called by the scheduler for synthesis prompts.
#[async_trait]
pub trait Provider: Send + Sync {
    /// One completion without tool definitions.
    async fn chat(&self, ctx: &RunContext, req: &ChatRequest) -> Result<ChatResponse, AgentError>;

    /// One completion with tool definitions offered to the model.
    ///
    /// Default implementation ignores the definitions and delegates to
    /// [`chat`](Provider::chat); providers that support native tool calling
    /// override this.
    async fn chat_with_tools(
        &self,
        ctx: &RunContext,
        req: &ChatRequest,
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, AgentError> {
        let _ = tools;
        self.chat(ctx, req).await
    }

    /// Streaming variant: when `chunk_tx` is `Some`, send text chunks as they
    /// arrive, then return the accumulated response.
    async fn chat_stream(
        &self,
        ctx: &RunContext,
        req: &ChatRequest,
        tools: &[ToolDefinition],
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<ChatResponse, AgentError> {
        let response = self.chat_with_tools(ctx, req, tools).await?;
        if let Some(tx) = chunk_tx {
            if !response.content.is_empty() {
                let _ = tx.send(response.content.clone()).await;
            }
        }
        Ok(response)
    }
}

/// One scripted turn for [`MockProvider`].
pub fn text_turn(content: impl Into<String>) -> ChatResponse {
    ChatResponse {
        content: content.into(),
        tool_calls: Vec::new(),
        usage: Usage::new(1, 1),
    }
}

/// Scripted turn that emits tool calls.
pub fn tool_turn(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse {
        content: content.into(),
        tool_calls,
        usage: Usage::new(1, 1),
    }
}

/// Scripted provider: returns pre-baked responses in order.
///
/// Records every request so tests can assert call counts and the exact
/// history the loop sent. Streaming splits the scripted content on
/// whitespace, one chunk per word.
pub struct MockProvider {
    turns: Mutex<Vec<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    pub fn script(turns: Vec<ChatResponse>) -> Self {
        Self {
            turns: Mutex::new(turns),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Single text-only turn.
    pub fn with_text(content: impl Into<String>) -> Self {
        Self::script(vec![text_turn(content)])
    }

    /// Number of completions served so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// The most recent request, if any.
    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().ok().and_then(|r| r.last().cloned())
    }

    fn next_turn(&self, req: &ChatRequest) -> Result<ChatResponse, AgentError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(req.clone());
        }
        let mut turns = match self.turns.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if turns.is_empty() {
            return Err(AgentError::ExecutionFailed(
                "mock provider script exhausted".into(),
            ));
        }
        Ok(turns.remove(0))
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn chat(&self, ctx: &RunContext, req: &ChatRequest) -> Result<ChatResponse, AgentError> {
        ctx.ensure_active()?;
        self.next_turn(req)
    }

    async fn chat_stream(
        &self,
        ctx: &RunContext,
        req: &ChatRequest,
        _tools: &[ToolDefinition],
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<ChatResponse, AgentError> {
        ctx.ensure_active()?;
        let response = self.next_turn(req)?;
        if let Some(tx) = chunk_tx {
            for word in response.content.split_inclusive(' ') {
                let _ = tx.send(word.to_string()).await;
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::collect_chunks;

    /// **Scenario**: Scripted turns are served in order, then the script
    /// reports exhaustion.
    #[tokio::test]
    async fn mock_serves_turns_in_order() {
        let ctx = RunContext::new();
        let provider = MockProvider::script(vec![text_turn("one"), text_turn("two")]);
        let req = ChatRequest::default();
        assert_eq!(provider.chat(&ctx, &req).await.unwrap().content, "one");
        assert_eq!(provider.chat(&ctx, &req).await.unwrap().content, "two");
        assert!(provider.chat(&ctx, &req).await.is_err());
        assert_eq!(provider.call_count(), 3);
    }

    /// **Scenario**: Default chat_stream forwards the full content as one
    /// chunk; the mock's override chunks per word.
    #[tokio::test]
    async fn streaming_emits_chunks_and_full_response() {
        let ctx = RunContext::new();
        let provider = MockProvider::with_text("hello streaming world");
        let (tx, rx) = mpsc::channel(16);
        let resp = provider
            .chat_stream(&ctx, &ChatRequest::default(), &[], Some(tx))
            .await
            .unwrap();
        assert_eq!(resp.content, "hello streaming world");
        let chunks = collect_chunks(rx).await;
        assert_eq!(chunks.concat(), "hello streaming world");
        assert!(chunks.len() > 1);
    }
}
