//! Tools: the executable side of tool calling.
//!
//! A [`Tool`] exposes one or more declarative [`ToolDefinition`]s and an
//! `execute` entry point; the [`ToolRegistry`] concatenates definitions in
//! registration order and dispatches by name. Individual tool implementations
//! (knowledge, search, file, shell) live outside the core.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::ctx::RunContext;
use crate::message::{ToolDefinition, ToolResult};

/// Errors a tool can raise. These are converted into error-carrying
/// [`ToolResult`]s at the dispatch boundary so the LLM can read and react;
/// they never abort the loop.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The tool ran and failed.
    #[error("execution error: {0}")]
    Execution(String),
    /// The tool could not be reached.
    #[error("transport error: {0}")]
    Transport(String),
}

/// A callable capability set: declarative definitions plus an execute method.
///
/// One `Tool` may expose several definitions (e.g. a memory tool with
/// `remember` and `recall`); `execute` receives the specific name invoked.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Declarative definitions, in the order they should be offered to the LLM.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Executes the named entry point with JSON arguments.
    async fn execute(
        &self,
        ctx: &RunContext,
        name: &str,
        args: Value,
    ) -> Result<ToolResult, ToolError>;
}

/// Maps tool names to handlers.
///
/// Definitions are concatenated across registered tools in registration
/// order (stable prompt ordering); dispatch resolves the handler through a
/// name map. An unknown name yields an error-carrying result, not an `Err`.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool; its definitions are appended to the offering order.
    /// A name collision keeps the earlier registration.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let index = self.tools.len();
        for def in tool.definitions() {
            self.by_name.entry(def.name).or_insert(index);
        }
        self.tools.push(tool);
        self
    }

    /// Builder-style registration.
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// All definitions across registered tools, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().flat_map(|t| t.definitions()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatches one call. Tool-level errors and unknown names come back as
    /// error-carrying results so the caller can feed them to the LLM.
    pub async fn dispatch(&self, ctx: &RunContext, name: &str, args: Value) -> ToolResult {
        let Some(&index) = self.by_name.get(name) else {
            return ToolResult::err(format!("unknown tool: {name}"));
        };
        match self.tools[index].execute(ctx, name, args).await {
            Ok(result) => result,
            Err(e) => ToolResult::err(e.to_string()),
        }
    }

    /// Raw execution for callers that want the error channel (workflow tool
    /// steps). Unknown names are still a result-level error.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        name: &str,
        args: Value,
    ) -> Result<ToolResult, ToolError> {
        let Some(&index) = self.by_name.get(name) else {
            return Ok(ToolResult::err(format!("unknown tool: {name}")));
        };
        self.tools[index].execute(ctx, name, args).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.len())
            .field("names", &self.by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Scripted tool for tests and examples: fixed result, optional delay,
/// call recording. Observes cancellation while sleeping.
pub struct MockTool {
    name: String,
    result: ToolResult,
    delay: Option<Duration>,
    calls: std::sync::Mutex<Vec<Value>>,
}

impl MockTool {
    pub fn new(name: impl Into<String>, result: ToolResult) -> Self {
        Self {
            name: name.into(),
            result,
            delay: None,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn recorded_args(&self) -> Vec<Value> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: self.name.clone(),
            description: format!("mock tool {}", self.name),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }]
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        _name: &str,
        args: Value,
    ) -> Result<ToolResult, ToolError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(args);
        }
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = ctx.cancelled() => {
                    return Err(ToolError::Execution("cancelled".into()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Ok(self.result.clone())
    }
}
