//! Workflows: dependency-ordered task graphs with conditional gates, retries,
//! loop shapes, and cascading failure semantics.
//!
//! # Main types
//!
//! - [`Workflow`]: A validated task graph; implements `Agent`.
//! - [`Step`]: One named node — body, `after` dependencies, `when` gate,
//!   retry policy, and shape (plain / ForEach / DoUntil / DoWhile).
//! - [`WorkflowContext`]: The mutex-guarded key→value bag steps communicate
//!   through, with `{{key}}` template resolution.
//! - [`agent_step`] / [`tool_step`]: Wrap agents and tools into steps using
//!   the `<name>.output` / `<name>.result` conventions.
//! - [`FlowDefinition`] + [`build_workflow`]: Translate a declarative
//!   node/edge description (llm / tool / condition / template) into an
//!   executable workflow.

mod context;
mod definition;
mod engine;
mod expr;
mod step;

pub use context::{WorkflowContext, INPUT_KEY, USAGE_KEY};
pub use definition::{
    build_workflow, DefinitionError, FlowDefinition, FlowResources, NodeDef, NodeKind,
};
pub use engine::{StepStatus, Workflow, WorkflowBuildError};
pub use expr::{evaluate, NamedPredicates};
pub use step::{
    agent_step, tool_step, AgentStepOptions, PredicateFn, RetryPolicy, Step, StepFn, StepInput,
    StepShape, ToolStepOptions, DEFAULT_FOREACH_CONCURRENCY, DEFAULT_LOOP_BOUND,
};
