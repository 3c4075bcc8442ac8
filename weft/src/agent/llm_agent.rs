//! LlmAgent: an [`Agent`] that drives the tool-calling loop over a provider
//! and a tool registry.
//!
//! Build with [`LlmAgent::new`] and the `with_*` methods, then call
//! `execute` (blocking provider calls) or `execute_stream` (token deltas,
//! tool-call boundaries, and a terminal `Done` event).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weft::{AgentTask, LlmAgent, MockProvider, RunContext, ToolRegistry};
//! use weft::Agent as _;
//!
//! # async {
//! let agent = LlmAgent::new("helper", Arc::new(MockProvider::with_text("hello")))
//!     .with_system_prompt("You are terse.")
//!     .with_tools(ToolRegistry::new());
//! let result = agent.execute(&RunContext::new(), AgentTask::new("hi")).await.unwrap();
//! assert_eq!(result.output, "hello");
//! # };
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::engine::{DispatchOutcome, Dispatcher, LoopEngine, LoopState};
use crate::ctx::RunContext;
use crate::error::AgentError;
use crate::llm::Provider;
use crate::message::{ChatMessage, ToolCall, ToolDefinition};
use crate::processor::{Processor, ProcessorChain};
use crate::stream::{StreamEvent, StreamSink};
use crate::task::{AgentResult, AgentTask};
use crate::tools::ToolRegistry;
use crate::traits::{Agent, StreamingAgent};

/// Default iteration cap: a hard upper bound on LLM calls per execution.
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// Dispatcher backed by a plain tool registry.
struct RegistryDispatcher {
    registry: Arc<ToolRegistry>,
}

#[async_trait]
impl Dispatcher for RegistryDispatcher {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    async fn dispatch(
        &self,
        ctx: &RunContext,
        call: &ToolCall,
        _sink: &StreamSink,
    ) -> Result<DispatchOutcome, AgentError> {
        let result = self.registry.dispatch(ctx, &call.name, call.args_value()).await;
        if ctx.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(DispatchOutcome::result(result))
    }
}

/// An LLM-backed agent: iterative provider calls with parallel tool dispatch.
pub struct LlmAgent {
    name: String,
    description: String,
    system_prompt: Option<String>,
    /// Memory-injected system messages, placed after the system prompt.
    memory_notes: Vec<String>,
    /// Preloaded conversation history, placed before the task message.
    history: Vec<ChatMessage>,
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    processors: Arc<ProcessorChain>,
    max_iterations: usize,
}

impl LlmAgent {
    pub fn new(name: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: None,
            memory_notes: Vec::new(),
            history: Vec::new(),
            provider,
            registry: Arc::new(ToolRegistry::new()),
            processors: Arc::new(ProcessorChain::default()),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// System notes recalled from memory, injected after the system prompt.
    pub fn with_memory_notes(mut self, notes: Vec<String>) -> Self {
        self.memory_notes = notes;
        self
    }

    /// Conversation history loaded by the host, injected before the task.
    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_tools(mut self, registry: ToolRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_processors(mut self, processors: Vec<Arc<dyn Processor>>) -> Self {
        self.processors = Arc::new(ProcessorChain::new(processors));
        self
    }

    /// Overrides the hard upper bound on LLM calls (default 5).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    fn engine(&self) -> Arc<LoopEngine> {
        Arc::new(LoopEngine {
            agent_name: self.name.clone(),
            provider: Arc::clone(&self.provider),
            processors: Arc::clone(&self.processors),
            max_iterations: self.max_iterations,
        })
    }

    fn initial_messages(&self, task: &AgentTask) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(prompt) = &self.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }
        for note in &self.memory_notes {
            messages.push(ChatMessage::system(note.clone()));
        }
        messages.extend(self.history.iter().cloned());
        messages.push(
            ChatMessage::user(task.input.clone()).with_attachments(task.attachments.clone()),
        );
        messages
    }

    async fn run(
        &self,
        ctx: &RunContext,
        task: AgentTask,
        sink: StreamSink,
    ) -> Result<AgentResult, AgentError> {
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(RegistryDispatcher {
            registry: Arc::clone(&self.registry),
        });
        let state = LoopState::start(self.initial_messages(&task));
        self.engine().run(ctx.clone(), dispatcher, state, sink).await
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, ctx: &RunContext, task: AgentTask) -> Result<AgentResult, AgentError> {
        self.run(ctx, task, StreamSink::disabled()).await
    }
}

#[async_trait]
impl StreamingAgent for LlmAgent {
    async fn execute_stream(
        &self,
        ctx: &RunContext,
        task: AgentTask,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<AgentResult, AgentError> {
        self.run(ctx, task, StreamSink::new(tx)).await
    }
}
