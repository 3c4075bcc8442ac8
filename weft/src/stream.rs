//! Streaming events emitted while an agent executes.
//!
//! [`StreamEvent`] is a closed tagged union replaying the execution to an
//! observer: text deltas for the final LLM turn, tool-call boundaries,
//! subagent delegation brackets, and a terminal `Done` or `Error`.
//! [`StreamSink`] wraps the optional channel: every send selects against the
//! run context, so a slow observer that never drains cancels the execution
//! rather than blocking it forever, and an observer that walked away (dropped
//! receiver) is ignored.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::ctx::RunContext;
use crate::error::AgentError;
use crate::message::Usage;

/// One streamed event. Tagged for wire-friendly serialization.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// One text token of the final (tool-free) LLM turn.
    TextDelta { content: String },
    /// Emitted before a tool call is dispatched.
    ToolCallStart {
        call_id: String,
        name: String,
        arguments: Value,
    },
    /// Emitted when a tool call's result is known (after post-tool hooks).
    ToolCallResult {
        call_id: String,
        name: String,
        content: String,
        is_error: bool,
    },
    /// A network router is delegating to a subagent.
    AgentStart { agent: String },
    /// The subagent returned; carries its usage and elapsed wall time.
    AgentFinish {
        agent: String,
        usage: Usage,
        elapsed_ms: u64,
    },
    /// Terminal event on normal completion.
    Done { output: String, usage: Usage },
    /// Terminal event on failure.
    Error { message: String },
}

/// Optional, cancellation-guarded sender for [`StreamEvent`]s.
///
/// **Interaction**: The agent loop and network router hold one sink per
/// execution; `disabled()` makes every send a no-op so non-streaming paths
/// share the same code.
#[derive(Clone, Debug)]
pub struct StreamSink {
    tx: Option<mpsc::Sender<StreamEvent>>,
}

impl StreamSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_active(&self) -> bool {
        self.tx.is_some()
    }

    /// Sends one event. Blocks until the observer drains or the context is
    /// cancelled (then returns `Cancelled`). A dropped receiver is treated as
    /// an observer that left: the event is discarded.
    pub async fn send(&self, ctx: &RunContext, event: StreamEvent) -> Result<(), AgentError> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        tokio::select! {
            _ = ctx.cancelled() => Err(AgentError::Cancelled),
            sent = tx.send(event) => {
                if sent.is_err() {
                    tracing::trace!("stream observer dropped; event discarded");
                }
                Ok(())
            }
        }
    }
}

/// Drains every event from a stream channel. Test/host helper.
pub async fn collect_events(rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut stream = ReceiverStream::new(rx);
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

/// Collects provider text chunks until the sender is dropped. The loop
/// buffers them and replays only the final turn's deltas.
pub(crate) async fn collect_chunks(mut rx: mpsc::Receiver<String>) -> Vec<String> {
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    chunks
}
