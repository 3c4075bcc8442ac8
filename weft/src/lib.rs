//! # Weft
//!
//! The execution core of an LLM agent framework: tool-calling loops,
//! multi-agent routing, deterministic task graphs, background execution
//! handles, and a recurring-action scheduler. A host composes this core with
//! its LLM providers, tool implementations, and storage backends to build
//! assistants, research pipelines, and automated workflows.
//!
//! ## Design principles
//!
//! - **Capability interfaces**: Agents, providers, tools, stores, frontends,
//!   and input handlers are all traits held as `Arc<dyn …>`; nothing in the
//!   core talks to a concrete backend.
//! - **One cancellation model**: Every control-flow machine (loop, graph,
//!   scheduler, spawn) observes the same [`RunContext`] token; blocking
//!   operations select against it, and in-flight work is awaited before a
//!   cancelled execution returns.
//! - **Deterministic ordering**: Tool results enter history in the order the
//!   LLM emitted the calls regardless of completion order, and subagent tool
//!   listings are sorted for cacheable prompts.
//! - **Pause without corruption**: A processor hook can suspend an execution
//!   with an opaque payload; the captured state resumes exactly once with
//!   external input.
//!
//! ## Main modules
//!
//! - [`agent`]: [`LlmAgent`] (the loop), [`Network`] (subagent routing),
//!   [`spawn`] / [`AgentHandle`] (background execution).
//! - [`workflow`]: [`Workflow`], [`Step`], [`WorkflowContext`],
//!   [`FlowDefinition`] + [`build_workflow`], the comparison expressions.
//! - [`scheduler`]: [`Scheduler`] and the pure schedule arithmetic.
//! - [`processor`]: The Pre/Post/PostTool hook chain with halt and suspend.
//! - [`tools`]: [`Tool`] and [`ToolRegistry`].
//! - [`llm`]: The [`Provider`] contract and a scripted [`MockProvider`].
//! - [`store`]: The consumed persistence slice and in-memory doubles.
//! - [`message`] / [`task`] / [`stream`]: Value types and stream events.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weft::{Agent, AgentTask, LlmAgent, MockProvider, RunContext};
//!
//! # async {
//! let agent = LlmAgent::new("echo", Arc::new(MockProvider::with_text("hello")));
//! let result = agent
//!     .execute(&RunContext::new(), AgentTask::new("say hello"))
//!     .await
//!     .unwrap();
//! println!("{}", result.output);
//! # };
//! ```

pub mod agent;
pub mod ctx;
pub mod error;
pub mod llm;
pub mod message;
pub mod processor;
pub mod scheduler;
pub mod store;
pub mod stream;
pub mod suspend;
pub mod task;
pub mod tools;
pub mod traits;
pub mod workflow;

pub use agent::{spawn, AgentHandle, HandleState, LlmAgent, Network, DEFAULT_MAX_ITERATIONS};
pub use ctx::{CodeRunner, InputHandler, PlanRunner, RunContext};
pub use error::AgentError;
pub use llm::{text_turn, tool_turn, MockProvider, Provider};
pub use message::{
    Attachment, ChatMessage, ChatRequest, ChatResponse, Role, ToolCall, ToolDefinition,
    ToolResult, Usage,
};
pub use processor::{
    ApprovalProcessor, ChainSignal, HookAction, LoggingProcessor, Processor, ProcessorChain,
};
pub use scheduler::{compute_next_run, Scheduler, DEFAULT_TICK_INTERVAL, OWNER_CONFIG_KEY};
pub use store::{
    Frontend, InMemoryFrontend, InMemoryStore, ScheduledAction, Store, StoreError,
};
pub use stream::{collect_events, StreamEvent, StreamSink};
pub use suspend::Suspension;
pub use task::{AgentResult, AgentTask};
pub use tools::{MockTool, Tool, ToolError, ToolRegistry};
pub use traits::{Agent, StreamingAgent};
pub use workflow::{
    agent_step, build_workflow, evaluate, tool_step, AgentStepOptions, FlowDefinition,
    FlowResources, NodeDef, NodeKind, Step, StepInput, StepStatus, ToolStepOptions, Workflow,
    WorkflowBuildError, WorkflowContext,
};
