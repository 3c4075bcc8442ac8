//! Processor chain: ordered middleware around the agent loop.
//!
//! Processors hook three phases of each iteration: `pre_llm` (mutate the
//! outgoing request), `post_llm` (mutate the response, e.g. trim tool calls
//! or redact content), and `post_tool` (mutate one tool result). A hook
//! answers with [`HookAction`]: continue, halt with a canned user-facing
//! response, or suspend with an opaque payload for a human. Hooks run in
//! registration order; the first halt/suspend wins and short-circuits the
//! rest of that phase. The chain is immutable after construction.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::ctx::RunContext;
use crate::error::AgentError;
use crate::message::{ChatRequest, ChatResponse, ToolCall, ToolResult};

/// What a single hook decided.
#[derive(Debug, Clone)]
pub enum HookAction {
    /// Proceed to the next hook / the next loop stage.
    Continue,
    /// Terminate the execution successfully with this canned response.
    Halt(String),
    /// Pause the execution and surface this payload to a human.
    Suspend(Value),
}

/// Middleware hook. Implement any subset of the three phases; the defaults
/// pass through.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Hook name, used as the suspension step identifier.
    fn name(&self) -> &str;

    /// Called once per iteration before the LLM call; may mutate the request.
    async fn pre_llm(
        &self,
        ctx: &RunContext,
        req: &mut ChatRequest,
    ) -> Result<HookAction, AgentError> {
        let _ = (ctx, req);
        Ok(HookAction::Continue)
    }

    /// Called once per iteration after the LLM returns; may mutate the response.
    async fn post_llm(
        &self,
        ctx: &RunContext,
        resp: &mut ChatResponse,
    ) -> Result<HookAction, AgentError> {
        let _ = (ctx, resp);
        Ok(HookAction::Continue)
    }

    /// Called once per executed tool call after dispatch; may mutate the result.
    async fn post_tool(
        &self,
        ctx: &RunContext,
        call: &ToolCall,
        result: &mut ToolResult,
    ) -> Result<HookAction, AgentError> {
        let _ = (ctx, call, result);
        Ok(HookAction::Continue)
    }
}

/// Outcome of running one phase across the whole chain.
#[derive(Debug, Clone)]
pub enum ChainSignal {
    Continue,
    Halt(String),
    /// `hook` is the name of the processor that suspended.
    Suspend { hook: String, payload: Value },
}

/// Ordered, immutable sequence of processors.
#[derive(Clone, Default)]
pub struct ProcessorChain {
    processors: Vec<Arc<dyn Processor>>,
}

impl ProcessorChain {
    pub fn new(processors: Vec<Arc<dyn Processor>>) -> Self {
        Self { processors }
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub async fn run_pre_llm(
        &self,
        ctx: &RunContext,
        req: &mut ChatRequest,
    ) -> Result<ChainSignal, AgentError> {
        for p in &self.processors {
            match p.pre_llm(ctx, req).await? {
                HookAction::Continue => {}
                HookAction::Halt(response) => return Ok(ChainSignal::Halt(response)),
                HookAction::Suspend(payload) => {
                    return Ok(ChainSignal::Suspend {
                        hook: p.name().to_string(),
                        payload,
                    })
                }
            }
        }
        Ok(ChainSignal::Continue)
    }

    pub async fn run_post_llm(
        &self,
        ctx: &RunContext,
        resp: &mut ChatResponse,
    ) -> Result<ChainSignal, AgentError> {
        for p in &self.processors {
            match p.post_llm(ctx, resp).await? {
                HookAction::Continue => {}
                HookAction::Halt(response) => return Ok(ChainSignal::Halt(response)),
                HookAction::Suspend(payload) => {
                    return Ok(ChainSignal::Suspend {
                        hook: p.name().to_string(),
                        payload,
                    })
                }
            }
        }
        Ok(ChainSignal::Continue)
    }

    pub async fn run_post_tool(
        &self,
        ctx: &RunContext,
        call: &ToolCall,
        result: &mut ToolResult,
    ) -> Result<ChainSignal, AgentError> {
        for p in &self.processors {
            match p.post_tool(ctx, call, result).await? {
                HookAction::Continue => {}
                HookAction::Halt(response) => return Ok(ChainSignal::Halt(response)),
                HookAction::Suspend(payload) => {
                    return Ok(ChainSignal::Suspend {
                        hook: p.name().to_string(),
                        payload,
                    })
                }
            }
        }
        Ok(ChainSignal::Continue)
    }
}

impl std::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("hooks", &self.processors.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Traces every phase at debug level. No mutation, never halts.
#[derive(Debug, Default)]
pub struct LoggingProcessor;

#[async_trait]
impl Processor for LoggingProcessor {
    fn name(&self) -> &str {
        "logging"
    }

    async fn pre_llm(
        &self,
        _ctx: &RunContext,
        req: &mut ChatRequest,
    ) -> Result<HookAction, AgentError> {
        tracing::debug!(messages = req.messages.len(), "pre_llm");
        Ok(HookAction::Continue)
    }

    async fn post_llm(
        &self,
        _ctx: &RunContext,
        resp: &mut ChatResponse,
    ) -> Result<HookAction, AgentError> {
        tracing::debug!(
            content_len = resp.content.len(),
            tool_calls = resp.tool_calls.len(),
            "post_llm"
        );
        Ok(HookAction::Continue)
    }

    async fn post_tool(
        &self,
        _ctx: &RunContext,
        call: &ToolCall,
        result: &mut ToolResult,
    ) -> Result<HookAction, AgentError> {
        tracing::debug!(tool = %call.name, is_error = result.is_error(), "post_tool");
        Ok(HookAction::Continue)
    }
}

/// Suspends before any listed tool runs, surfacing a confirmation payload.
///
/// The post-LLM phase is the pause point so the tools are never dispatched
/// until a human resumes the execution.
pub struct ApprovalProcessor {
    tools: Vec<String>,
}

impl ApprovalProcessor {
    pub fn new(tools: Vec<String>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Processor for ApprovalProcessor {
    fn name(&self) -> &str {
        "approval"
    }

    async fn post_llm(
        &self,
        _ctx: &RunContext,
        resp: &mut ChatResponse,
    ) -> Result<HookAction, AgentError> {
        for call in &resp.tool_calls {
            if self.tools.iter().any(|t| t == &call.name) {
                return Ok(HookAction::Suspend(serde_json::json!({
                    "confirm": format!("{}?", call.name),
                    "tool": call.name,
                })));
            }
        }
        Ok(HookAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Redactor;

    #[async_trait]
    impl Processor for Redactor {
        fn name(&self) -> &str {
            "redactor"
        }

        async fn post_llm(
            &self,
            _ctx: &RunContext,
            resp: &mut ChatResponse,
        ) -> Result<HookAction, AgentError> {
            resp.content = resp.content.replace("secret", "[redacted]");
            Ok(HookAction::Continue)
        }
    }

    struct HaltAll;

    #[async_trait]
    impl Processor for HaltAll {
        fn name(&self) -> &str {
            "halt_all"
        }

        async fn pre_llm(
            &self,
            _ctx: &RunContext,
            _req: &mut ChatRequest,
        ) -> Result<HookAction, AgentError> {
            Ok(HookAction::Halt("blocked".into()))
        }
    }

    /// **Scenario**: Hooks mutate in place and the chain keeps going when
    /// everyone continues.
    #[tokio::test]
    async fn chain_applies_mutations_in_order() {
        let ctx = RunContext::new();
        let chain = ProcessorChain::new(vec![Arc::new(Redactor), Arc::new(LoggingProcessor)]);
        let mut resp = ChatResponse {
            content: "the secret plan".into(),
            ..Default::default()
        };
        let signal = chain.run_post_llm(&ctx, &mut resp).await.unwrap();
        assert!(matches!(signal, ChainSignal::Continue));
        assert_eq!(resp.content, "the [redacted] plan");
    }

    /// **Scenario**: The first halt wins and short-circuits later hooks.
    #[tokio::test]
    async fn first_halt_short_circuits() {
        let ctx = RunContext::new();
        let chain = ProcessorChain::new(vec![Arc::new(HaltAll), Arc::new(Redactor)]);
        let mut req = ChatRequest::default();
        match chain.run_pre_llm(&ctx, &mut req).await.unwrap() {
            ChainSignal::Halt(msg) => assert_eq!(msg, "blocked"),
            other => panic!("expected halt, got {other:?}"),
        }
    }

    /// **Scenario**: ApprovalProcessor suspends with the tool's confirmation
    /// payload and names itself as the suspension hook.
    #[tokio::test]
    async fn approval_suspends_on_listed_tool() {
        let ctx = RunContext::new();
        let chain = ProcessorChain::new(vec![Arc::new(ApprovalProcessor::new(vec![
            "delete".into(),
        ]))]);
        let mut resp = ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall::new("c1", "delete", "{}")],
            ..Default::default()
        };
        match chain.run_post_llm(&ctx, &mut resp).await.unwrap() {
            ChainSignal::Suspend { hook, payload } => {
                assert_eq!(hook, "approval");
                assert_eq!(payload["confirm"], "delete?");
            }
            other => panic!("expected suspend, got {other:?}"),
        }

        let mut harmless = ChatResponse {
            tool_calls: vec![ToolCall::new("c2", "greet", "{}")],
            ..Default::default()
        };
        assert!(matches!(
            chain.run_post_llm(&ctx, &mut harmless).await.unwrap(),
            ChainSignal::Continue
        ));
    }
}
