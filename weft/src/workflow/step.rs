//! Workflow steps: named units of a task graph with dependencies, gating
//! predicates, retry policies, and execution shapes.
//!
//! A step is built from an async function over `(RunContext, WorkflowContext,
//! StepInput)` and decorated with [`Step::after`] (dependencies),
//! [`Step::when`] (gate), [`Step::retry`], and one of four shapes: plain,
//! [`Step::for_each`] over a context collection, [`Step::do_until`], or
//! [`Step::do_while`]. [`agent_step`] and [`tool_step`] wrap agents and tools
//! into steps with the `<name>.output` / `<name>.result` conventions.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use super::context::{display_value, WorkflowContext};
use crate::ctx::RunContext;
use crate::error::AgentError;
use crate::task::AgentTask;
use crate::tools::Tool;
use crate::traits::Agent;

/// Default ForEach concurrency.
pub const DEFAULT_FOREACH_CONCURRENCY: usize = 1;

/// Default bound for DoUntil / DoWhile.
pub const DEFAULT_LOOP_BOUND: usize = 100;

/// Per-invocation input for shaped steps: the ForEach element and the
/// iteration index.
#[derive(Debug, Clone, Default)]
pub struct StepInput {
    pub element: Option<Value>,
    pub index: Option<usize>,
}

/// The step body.
pub type StepFn = Arc<
    dyn Fn(RunContext, WorkflowContext, StepInput) -> BoxFuture<'static, Result<(), AgentError>>
        + Send
        + Sync,
>;

/// A predicate over the workflow context (When gates, loop conditions).
pub type PredicateFn = Arc<dyn Fn(&WorkflowContext) -> bool + Send + Sync>;

/// Retry policy: `attempts` additional tries with exponential backoff from
/// `base_delay` (delay × 2^(attempt−1)).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
}

/// How the step body runs.
#[derive(Clone)]
pub enum StepShape {
    /// Run the function once.
    Plain,
    /// Run once per element of the collection at `key`, with bounded
    /// concurrency. A missing or non-array value means zero invocations.
    ForEach { key: String, concurrency: usize },
    /// Run repeatedly until the predicate turns true; error past `max_iter`.
    DoUntil { predicate: PredicateFn, max_iter: usize },
    /// Run once, then repeat while the predicate stays true; error past
    /// `max_iter` invocations.
    DoWhile { predicate: PredicateFn, max_iter: usize },
}

impl std::fmt::Debug for StepShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "Plain"),
            Self::ForEach { key, concurrency } => f
                .debug_struct("ForEach")
                .field("key", key)
                .field("concurrency", concurrency)
                .finish(),
            Self::DoUntil { max_iter, .. } => {
                f.debug_struct("DoUntil").field("max_iter", max_iter).finish()
            }
            Self::DoWhile { max_iter, .. } => {
                f.debug_struct("DoWhile").field("max_iter", max_iter).finish()
            }
        }
    }
}

/// One named node of a workflow.
#[derive(Clone)]
pub struct Step {
    pub(crate) name: String,
    pub(crate) func: StepFn,
    pub(crate) after: Vec<String>,
    pub(crate) when: Option<PredicateFn>,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) shape: StepShape,
}

impl Step {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(RunContext, WorkflowContext, StepInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AgentError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |ctx, wf, input| Box::pin(f(ctx, wf, input))),
            after: Vec::new(),
            when: None,
            retry: None,
            shape: StepShape::Plain,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares dependencies: this step runs only after all of them settle.
    pub fn after(mut self, deps: &[&str]) -> Self {
        self.after = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Gating predicate: false means skipped-by-condition (dependents still run).
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
    {
        self.when = Some(Arc::new(predicate));
        self
    }

    /// Up to `attempts` additional tries with exponential backoff.
    pub fn retry(mut self, attempts: usize, base_delay: Duration) -> Self {
        self.retry = Some(RetryPolicy {
            attempts,
            base_delay,
        });
        self
    }

    /// Runs the body once per element of the array at `key`, sequentially.
    pub fn for_each(self, key: impl Into<String>) -> Self {
        self.for_each_concurrent(key, DEFAULT_FOREACH_CONCURRENCY)
    }

    /// Like [`Step::for_each`] with bounded concurrency across elements.
    pub fn for_each_concurrent(mut self, key: impl Into<String>, concurrency: usize) -> Self {
        self.shape = StepShape::ForEach {
            key: key.into(),
            concurrency: concurrency.max(1),
        };
        self
    }

    /// Repeats the body until the predicate returns true.
    pub fn do_until<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
    {
        self.shape = StepShape::DoUntil {
            predicate: Arc::new(predicate),
            max_iter: DEFAULT_LOOP_BOUND,
        };
        self
    }

    /// Runs the body once, then repeats while the predicate returns true.
    pub fn do_while<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
    {
        self.shape = StepShape::DoWhile {
            predicate: Arc::new(predicate),
            max_iter: DEFAULT_LOOP_BOUND,
        };
        self
    }

    /// Adjusts the iteration bound of a DoUntil / DoWhile shape.
    pub fn loop_bound(mut self, max_iter: usize) -> Self {
        match &mut self.shape {
            StepShape::DoUntil { max_iter: m, .. } | StepShape::DoWhile { max_iter: m, .. } => {
                *m = max_iter.max(1);
            }
            _ => {}
        }
        self
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("after", &self.after)
            .field("when", &self.when.is_some())
            .field("retry", &self.retry)
            .field("shape", &self.shape)
            .finish()
    }
}

/// Options for [`agent_step`].
#[derive(Debug, Clone, Default)]
pub struct AgentStepOptions {
    /// Read the agent input from this context key instead of the task input.
    pub input_from: Option<String>,
    /// Write the output here instead of `<name>.output`.
    pub output_to: Option<String>,
}

/// Wraps an [`Agent`] as a step: resolves the input, executes, writes the
/// output under `<name>.output` (or `output_to`), and folds usage into the
/// context accumulator.
pub fn agent_step(
    name: impl Into<String>,
    agent: Arc<dyn Agent>,
    opts: AgentStepOptions,
) -> Step {
    let name = name.into();
    let output_key = opts
        .output_to
        .clone()
        .unwrap_or_else(|| format!("{name}.output"));
    let input_from = opts.input_from;
    Step::new(name, move |ctx, wf, _input| {
        let agent = Arc::clone(&agent);
        let output_key = output_key.clone();
        let input_from = input_from.clone();
        async move {
            let input = match &input_from {
                Some(key) => wf.get(key).map(|v| display_value(&v)).unwrap_or_default(),
                None => wf.input(),
            };
            let result = agent.execute(&ctx, AgentTask::new(input)).await?;
            wf.add_usage(&result.usage);
            wf.set(output_key, Value::String(result.output));
            Ok(())
        }
    })
}

/// Options for [`tool_step`].
#[derive(Debug, Clone, Default)]
pub struct ToolStepOptions {
    /// Context key holding the call arguments.
    pub args_from: Option<String>,
    /// Static arguments, used when `args_from` is absent.
    pub args: Option<Value>,
    /// Write the result here instead of `<name>.result`.
    pub output_to: Option<String>,
}

/// Wraps one tool call as a step: coerces the arguments from the context,
/// calls the tool, and writes `result.content` under `<name>.result` (or
/// `output_to`).
///
/// Argument coercion: a JSON object/array passes through, a string is parsed
/// as raw JSON (falling back to the string itself), anything else marshals
/// as-is.
pub fn tool_step(
    name: impl Into<String>,
    tool: Arc<dyn Tool>,
    tool_name: impl Into<String>,
    opts: ToolStepOptions,
) -> Step {
    let name = name.into();
    let tool_name = tool_name.into();
    let output_key = opts
        .output_to
        .clone()
        .unwrap_or_else(|| format!("{name}.result"));
    let args_from = opts.args_from;
    let static_args = opts.args;
    Step::new(name.clone(), move |ctx, wf, _input| {
        let tool = Arc::clone(&tool);
        let tool_name = tool_name.clone();
        let output_key = output_key.clone();
        let args = match &args_from {
            Some(key) => coerce_args(wf.get(key)),
            None => static_args.clone().unwrap_or(Value::Null),
        };
        async move {
            let result = tool
                .execute(&ctx, &tool_name, args)
                .await
                .map_err(|e| AgentError::ExecutionFailed(e.to_string()))?;
            wf.set(output_key, Value::String(result.content));
            Ok(())
        }
    })
}

fn coerce_args(value: Option<Value>) -> Value {
    match value {
        None => Value::Null,
        Some(Value::String(s)) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        Some(other) => other,
    }
}
