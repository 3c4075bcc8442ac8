//! The iterative LLM ↔ tool-call loop shared by [`LlmAgent`](super::LlmAgent)
//! and [`Network`](super::Network).
//!
//! One iteration is: pre-LLM hooks → provider call → post-LLM hooks → append
//! assistant message → either finish (no tool calls) or dispatch every tool
//! call concurrently, post-process results in the LLM-emitted order, and go
//! again. The iteration cap bounds LLM calls, not tool calls; hitting it with
//! tool calls still pending returns the last assistant content without error.
//!
//! Suspension captures the loop state (messages, usage, iteration, any tool
//! results still awaiting post-tool hooks) in a single-use closure; resuming
//! injects the human response and drives this same engine to completion.

use std::sync::Arc;

use futures::future::join_all;

use crate::ctx::RunContext;
use crate::error::AgentError;
use crate::message::{ChatMessage, ChatRequest, ToolCall, ToolDefinition, ToolResult, Usage};
use crate::processor::{ChainSignal, ProcessorChain};
use crate::llm::Provider;
use crate::stream::{collect_chunks, StreamEvent, StreamSink};
use crate::suspend::{ResumeFn, Suspension};
use crate::task::AgentResult;

/// Result of one dispatched tool call: the result fed back to the LLM plus
/// any usage the dispatch consumed (subagent delegation reports its own).
pub(crate) struct DispatchOutcome {
    pub result: ToolResult,
    pub usage: Usage,
}

impl DispatchOutcome {
    pub fn result(result: ToolResult) -> Self {
        Self {
            result,
            usage: Usage::default(),
        }
    }
}

/// Resolves tool definitions and executes tool calls for one loop run.
///
/// `LlmAgent` backs this with its registry; `Network` adds synthetic
/// `agent_<name>` tools that re-enter `Agent::execute` on subagents.
#[async_trait::async_trait]
pub(crate) trait Dispatcher: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Executes one call. Application-level failures come back as
    /// error-carrying results; `Err` is reserved for cancellation and
    /// suspension, which abort the loop.
    async fn dispatch(
        &self,
        ctx: &RunContext,
        call: &ToolCall,
        sink: &StreamSink,
    ) -> Result<DispatchOutcome, AgentError>;
}

/// Mutable loop state; owned by the engine, captured whole on suspension.
pub(crate) struct LoopState {
    pub messages: Vec<ChatMessage>,
    pub usage: Usage,
    /// 1-based index of the next LLM call.
    pub iteration: usize,
    /// Tool results still awaiting post-tool hooks (non-empty only when
    /// resuming a tool-phase suspension).
    pub pending: Vec<(ToolCall, ToolResult)>,
}

impl LoopState {
    pub fn start(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            usage: Usage::default(),
            iteration: 1,
            pending: Vec::new(),
        }
    }
}

enum Flow {
    Continue(LoopState),
    Finished(AgentResult),
}

/// The loop driver. Cheap to share; a suspension clones the `Arc` into its
/// resume closure.
pub(crate) struct LoopEngine {
    pub agent_name: String,
    pub provider: Arc<dyn Provider>,
    pub processors: Arc<ProcessorChain>,
    pub max_iterations: usize,
}

impl LoopEngine {
    /// Runs the loop to a terminal outcome. The sink is dropped on return,
    /// closing the stream channel; normal completion emits `Done` first.
    pub(crate) async fn run(
        self: Arc<Self>,
        ctx: RunContext,
        dispatcher: Arc<dyn Dispatcher>,
        mut state: LoopState,
        sink: StreamSink,
    ) -> Result<AgentResult, AgentError> {
        // Tool results left over from a resumed suspension.
        if !state.pending.is_empty() {
            let pending = std::mem::take(&mut state.pending);
            match self
                .settle_tool_results(&ctx, &dispatcher, state, pending, &sink)
                .await?
            {
                Flow::Finished(result) => return self.finish(&ctx, &sink, result).await,
                Flow::Continue(s) => {
                    state = s;
                    state.iteration += 1;
                }
            }
        }

        let definitions = dispatcher.definitions();

        loop {
            ctx.ensure_active()?;

            // The request is rebuilt from the owned history each iteration;
            // hook mutations apply to what is sent, not to the history.
            let mut req = ChatRequest::new(state.messages.clone());
            match self.processors.run_pre_llm(&ctx, &mut req).await? {
                ChainSignal::Continue => {}
                ChainSignal::Halt(response) => {
                    let result = AgentResult {
                        output: response,
                        usage: state.usage,
                        ..Default::default()
                    };
                    return self.finish(&ctx, &sink, result).await;
                }
                ChainSignal::Suspend { hook, payload } => {
                    return Err(self.suspend_for_user(&ctx, &dispatcher, state, hook, payload));
                }
            }

            let (mut resp, chunks) = if sink.is_active() {
                let (chunk_tx, chunk_rx) = tokio::sync::mpsc::channel(64);
                let (resp, chunks) = tokio::join!(
                    self.provider
                        .chat_stream(&ctx, &req, &definitions, Some(chunk_tx)),
                    collect_chunks(chunk_rx),
                );
                (resp.map_err(|e| self.provider_error(e))?, chunks)
            } else {
                let resp = self
                    .provider
                    .chat_with_tools(&ctx, &req, &definitions)
                    .await
                    .map_err(|e| self.provider_error(e))?;
                (resp, Vec::new())
            };

            state.usage = state.usage.add(&resp.usage);

            match self.processors.run_post_llm(&ctx, &mut resp).await? {
                ChainSignal::Continue => {}
                ChainSignal::Halt(response) => {
                    let result = AgentResult {
                        output: response,
                        usage: state.usage,
                        ..Default::default()
                    };
                    return self.finish(&ctx, &sink, result).await;
                }
                ChainSignal::Suspend { hook, payload } => {
                    // Keep the assistant turn so the resumed conversation
                    // records what the model wanted to do. This iteration's
                    // LLM call already happened; resume starts at the next.
                    state.messages.push(ChatMessage::assistant_with_tool_calls(
                        resp.content.clone(),
                        resp.tool_calls.clone(),
                    ));
                    state.iteration += 1;
                    return Err(self.suspend_for_user(&ctx, &dispatcher, state, hook, payload));
                }
            }

            state.messages.push(ChatMessage::assistant_with_tool_calls(
                resp.content.clone(),
                resp.tool_calls.clone(),
            ));

            if resp.tool_calls.is_empty() {
                // Final turn: replay the buffered deltas, then finish.
                for chunk in chunks {
                    sink.send(&ctx, StreamEvent::TextDelta { content: chunk })
                        .await?;
                }
                let result = AgentResult {
                    output: resp.content,
                    usage: state.usage,
                    ..Default::default()
                };
                return self.finish(&ctx, &sink, result).await;
            }

            if state.iteration >= self.max_iterations {
                tracing::debug!(
                    agent = %self.agent_name,
                    iterations = self.max_iterations,
                    dropped_tool_calls = resp.tool_calls.len(),
                    "iteration cap reached; returning last assistant content"
                );
                let result = AgentResult {
                    output: resp.content,
                    usage: state.usage,
                    ..Default::default()
                };
                return self.finish(&ctx, &sink, result).await;
            }

            // All starts are emitted before any result of this turn.
            for call in &resp.tool_calls {
                sink.send(
                    &ctx,
                    StreamEvent::ToolCallStart {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.args_value(),
                    },
                )
                .await?;
            }

            // Concurrent dispatch; join_all keeps the LLM-emitted order, so
            // the result vector is the ordered buffer the history drains from.
            let outcomes = join_all(
                resp.tool_calls
                    .iter()
                    .map(|call| self.dispatch_one(&ctx, &dispatcher, call, &sink)),
            )
            .await;

            if ctx.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let mut settled = Vec::with_capacity(outcomes.len());
            for (call, outcome) in resp.tool_calls.iter().zip(outcomes) {
                let outcome = outcome?;
                state.usage = state.usage.add(&outcome.usage);
                settled.push((call.clone(), outcome.result));
            }

            match self
                .settle_tool_results(&ctx, &dispatcher, state, settled, &sink)
                .await?
            {
                Flow::Finished(result) => return self.finish(&ctx, &sink, result).await,
                Flow::Continue(s) => {
                    state = s;
                    state.iteration += 1;
                }
            }
        }
    }

    /// Runs post-tool hooks over settled results in declaration order,
    /// appending one tool-result message per call.
    async fn settle_tool_results(
        self: &Arc<Self>,
        ctx: &RunContext,
        dispatcher: &Arc<dyn Dispatcher>,
        mut state: LoopState,
        results: Vec<(ToolCall, ToolResult)>,
        sink: &StreamSink,
    ) -> Result<Flow, AgentError> {
        let mut queue = results.into_iter();
        while let Some((call, mut result)) = queue.next() {
            match self.processors.run_post_tool(ctx, &call, &mut result).await? {
                ChainSignal::Continue => {}
                ChainSignal::Halt(response) => {
                    return Ok(Flow::Finished(AgentResult {
                        output: response,
                        usage: state.usage,
                        ..Default::default()
                    }));
                }
                ChainSignal::Suspend { hook, payload } => {
                    let remaining: Vec<_> = queue.collect();
                    return Err(self.suspend_for_tool(
                        ctx, dispatcher, state, call, remaining, hook, payload,
                    ));
                }
            }

            sink.send(
                ctx,
                StreamEvent::ToolCallResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    content: result.content.clone(),
                    is_error: result.is_error(),
                },
            )
            .await?;
            state
                .messages
                .push(ChatMessage::tool_result(call.id.clone(), result.content));
        }
        Ok(Flow::Continue(state))
    }

    /// Intercepts the built-in meta-tools, then defers to the dispatcher.
    async fn dispatch_one(
        &self,
        ctx: &RunContext,
        dispatcher: &Arc<dyn Dispatcher>,
        call: &ToolCall,
        sink: &StreamSink,
    ) -> Result<DispatchOutcome, AgentError> {
        let args = call.args_value();
        match call.name.as_str() {
            "ask_user" => {
                let Some(handler) = ctx.input_handler() else {
                    return Ok(DispatchOutcome::result(ToolResult::err(
                        "no input handler attached to this execution",
                    )));
                };
                let prompt = args
                    .get("prompt")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&call.arguments)
                    .to_string();
                match handler.ask_user(ctx, &prompt).await {
                    Ok(response) => Ok(DispatchOutcome::result(ToolResult::ok(response))),
                    Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
                    Err(e) => Ok(DispatchOutcome::result(ToolResult::err(e.to_string()))),
                }
            }
            "execute_plan" => {
                let Some(runner) = ctx.plan_runner() else {
                    return Ok(DispatchOutcome::result(ToolResult::err(
                        "no plan runner attached to this execution",
                    )));
                };
                let plan = args
                    .get("plan")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&call.arguments)
                    .to_string();
                match runner.execute_plan(ctx, &plan).await {
                    Ok(output) => Ok(DispatchOutcome::result(ToolResult::ok(output))),
                    Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
                    Err(e) => Ok(DispatchOutcome::result(ToolResult::err(e.to_string()))),
                }
            }
            "execute_code" => {
                let Some(runner) = ctx.code_runner() else {
                    return Ok(DispatchOutcome::result(ToolResult::err(
                        "no code runner attached to this execution",
                    )));
                };
                let code = args
                    .get("code")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&call.arguments)
                    .to_string();
                match runner.execute_code(ctx, &code).await {
                    Ok(output) => Ok(DispatchOutcome::result(ToolResult::ok(output))),
                    Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
                    Err(e) => Ok(DispatchOutcome::result(ToolResult::err(e.to_string()))),
                }
            }
            _ => dispatcher.dispatch(ctx, call, sink).await,
        }
    }

    /// Suspension raised from a pre/post-LLM hook: the resume input becomes a
    /// user message and the loop continues from the next iteration.
    fn suspend_for_user(
        self: &Arc<Self>,
        ctx: &RunContext,
        dispatcher: &Arc<dyn Dispatcher>,
        state: LoopState,
        hook: String,
        payload: serde_json::Value,
    ) -> AgentError {
        let engine = Arc::clone(self);
        let ctx = ctx.clone();
        let dispatcher = Arc::clone(dispatcher);
        let resume: ResumeFn = Box::new(move |input: String| {
            Box::pin(async move {
                let mut state = state;
                state.messages.push(ChatMessage::user(input));
                engine
                    .run(ctx, dispatcher, state, StreamSink::disabled())
                    .await
            })
        });
        AgentError::Suspended(Box::new(Suspension::new(hook, payload, resume)))
    }

    /// Suspension raised from a post-tool hook: the resume input replaces the
    /// suspended call's result; the rest of the batch settles on resume.
    #[allow(clippy::too_many_arguments)]
    fn suspend_for_tool(
        self: &Arc<Self>,
        ctx: &RunContext,
        dispatcher: &Arc<dyn Dispatcher>,
        state: LoopState,
        call: ToolCall,
        remaining: Vec<(ToolCall, ToolResult)>,
        hook: String,
        payload: serde_json::Value,
    ) -> AgentError {
        let engine = Arc::clone(self);
        let ctx = ctx.clone();
        let dispatcher = Arc::clone(dispatcher);
        let resume: ResumeFn = Box::new(move |input: String| {
            Box::pin(async move {
                let mut state = state;
                state
                    .messages
                    .push(ChatMessage::tool_result(call.id.clone(), input));
                state.pending = remaining;
                engine
                    .run(ctx, dispatcher, state, StreamSink::disabled())
                    .await
            })
        });
        AgentError::Suspended(Box::new(Suspension::new(hook, payload, resume)))
    }

    async fn finish(
        &self,
        ctx: &RunContext,
        sink: &StreamSink,
        result: AgentResult,
    ) -> Result<AgentResult, AgentError> {
        sink.send(
            ctx,
            StreamEvent::Done {
                output: result.output.clone(),
                usage: result.usage,
            },
        )
        .await?;
        Ok(result)
    }

    fn provider_error(&self, e: AgentError) -> AgentError {
        match e {
            AgentError::Cancelled => AgentError::Cancelled,
            e => AgentError::Provider {
                agent: self.agent_name.clone(),
                message: e.to_string(),
            },
        }
    }
}
