//! Network: an agent that routes work to subagents through synthetic tools.
//!
//! Each subagent appears to the LLM as a tool named `agent_<name>` with a
//! `{task: string}` schema; a call re-enters [`Agent::execute`] on the
//! subagent with the parent task's attachments and context inherited. The
//! network runs the same loop as [`LlmAgent`](super::LlmAgent), so its own
//! registry tools and the meta-tools work unchanged. Networks are agents
//! themselves and nest recursively; each nesting level keeps its own
//! processor chain.
//!
//! Subagents are held sorted by name so the synthetic tool list is
//! deterministic across restarts, which keeps LLM prompts cacheable.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::engine::{DispatchOutcome, Dispatcher, LoopEngine, LoopState};
use crate::ctx::RunContext;
use crate::error::AgentError;
use crate::llm::Provider;
use crate::message::{Attachment, ChatMessage, ToolCall, ToolDefinition, ToolResult};
use crate::processor::{Processor, ProcessorChain};
use crate::stream::{StreamEvent, StreamSink};
use crate::task::{AgentResult, AgentTask};
use crate::tools::ToolRegistry;
use crate::traits::{Agent, StreamingAgent};

/// Prefix of synthetic subagent tool names.
pub const AGENT_TOOL_PREFIX: &str = "agent_";

/// Turns an agent name into a valid tool identifier (snake_case, no spaces).
fn tool_key(name: &str) -> String {
    name.replace([' ', '-'], "_")
}

/// A router over a sorted collection of subagents plus its own tools.
pub struct Network {
    name: String,
    description: String,
    system_prompt: Option<String>,
    provider: Arc<dyn Provider>,
    subagents: BTreeMap<String, Arc<dyn Agent>>,
    registry: Arc<ToolRegistry>,
    processors: Arc<ProcessorChain>,
    max_iterations: usize,
}

impl Network {
    pub fn new(name: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: None,
            provider,
            subagents: BTreeMap::new(),
            registry: Arc::new(ToolRegistry::new()),
            processors: Arc::new(ProcessorChain::default()),
            max_iterations: super::llm_agent::DEFAULT_MAX_ITERATIONS,
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

    /// Registers a subagent, keyed (and sorted) by its sanitized name.
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.subagents.insert(tool_key(agent.name()), agent);
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

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// The synthetic + registry tool definitions this network offers.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .subagents
            .iter()
            .map(|(key, agent)| subagent_definition(key, agent.as_ref()))
            .collect();
        defs.extend(self.registry.definitions());
        defs
    }

    async fn run(
        &self,
        ctx: &RunContext,
        task: AgentTask,
        sink: StreamSink,
    ) -> Result<AgentResult, AgentError> {
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(NetworkDispatcher {
            subagents: self.subagents.clone(),
            registry: Arc::clone(&self.registry),
            attachments: task.attachments.clone(),
            context: task.context.clone(),
        });
        let mut messages = Vec::new();
        if let Some(prompt) = &self.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }
        messages
            .push(ChatMessage::user(task.input.clone()).with_attachments(task.attachments.clone()));

        let engine = Arc::new(LoopEngine {
            agent_name: self.name.clone(),
            provider: Arc::clone(&self.provider),
            processors: Arc::clone(&self.processors),
            max_iterations: self.max_iterations,
        });
        engine
            .run(ctx.clone(), dispatcher, LoopState::start(messages), sink)
            .await
    }
}

#[async_trait]
impl Agent for Network {
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
impl StreamingAgent for Network {
    async fn execute_stream(
        &self,
        ctx: &RunContext,
        task: AgentTask,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<AgentResult, AgentError> {
        self.run(ctx, task, StreamSink::new(tx)).await
    }
}

fn subagent_definition(key: &str, agent: &dyn Agent) -> ToolDefinition {
    let description = if agent.description().is_empty() {
        format!("Delegate a task to the {} agent.", agent.name())
    } else {
        agent.description().to_string()
    };
    ToolDefinition {
        name: format!("{AGENT_TOOL_PREFIX}{key}"),
        description,
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task to delegate to this agent. Provide full context; the agent has no memory of the current conversation."
                }
            },
            "required": ["task"]
        }),
    }
}

/// Per-execution dispatcher: synthetic subagent tools first, registry after.
struct NetworkDispatcher {
    subagents: BTreeMap<String, Arc<dyn Agent>>,
    registry: Arc<ToolRegistry>,
    attachments: Vec<Attachment>,
    context: std::collections::HashMap<String, serde_json::Value>,
}

#[async_trait]
impl Dispatcher for NetworkDispatcher {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .subagents
            .iter()
            .map(|(key, agent)| subagent_definition(key, agent.as_ref()))
            .collect();
        defs.extend(self.registry.definitions());
        defs
    }

    async fn dispatch(
        &self,
        ctx: &RunContext,
        call: &ToolCall,
        sink: &StreamSink,
    ) -> Result<DispatchOutcome, AgentError> {
        let Some(key) = call.name.strip_prefix(AGENT_TOOL_PREFIX) else {
            let result = self.registry.dispatch(ctx, &call.name, call.args_value()).await;
            if ctx.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            return Ok(DispatchOutcome::result(result));
        };

        let Some(agent) = self.subagents.get(key) else {
            return Ok(DispatchOutcome::result(ToolResult::err(format!(
                "unknown agent: {key}"
            ))));
        };

        let args = call.args_value();
        let Some(task_input) = args.get("task").and_then(|v| v.as_str()) else {
            return Ok(DispatchOutcome::result(ToolResult::err(
                "missing required argument: task",
            )));
        };

        let subtask = AgentTask {
            input: task_input.to_string(),
            attachments: self.attachments.clone(),
            context: self.context.clone(),
        };

        sink.send(
            ctx,
            StreamEvent::AgentStart {
                agent: agent.name().to_string(),
            },
        )
        .await?;
        let started = Instant::now();

        match agent.execute(ctx, subtask).await {
            Ok(result) => {
                sink.send(
                    ctx,
                    StreamEvent::AgentFinish {
                        agent: agent.name().to_string(),
                        usage: result.usage,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    },
                )
                .await?;
                Ok(DispatchOutcome {
                    result: ToolResult::ok(result.output),
                    usage: result.usage,
                })
            }
            // Cancellation and suspension abort the routing loop; anything
            // else is fed back to the LLM as an error result.
            Err(e @ (AgentError::Cancelled | AgentError::Suspended(_))) => Err(e),
            Err(e) => Ok(DispatchOutcome::result(ToolResult::err(e.to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{text_turn, tool_turn, MockProvider};
    use crate::message::Role;
    use crate::tools::MockTool;

    fn subagent(name: &str, reply: &str) -> Arc<super::super::LlmAgent> {
        Arc::new(super::super::LlmAgent::new(
            name,
            Arc::new(MockProvider::with_text(reply)),
        ))
    }

    /// **Scenario**: Synthetic definitions come sorted by subagent name and
    /// registry tools follow.
    #[test]
    fn definitions_sorted_then_registry() {
        let network = Network::new("hub", Arc::new(MockProvider::with_text("")))
            .with_agent(subagent("zeta", "z"))
            .with_agent(subagent("alpha", "a"))
            .with_tools(ToolRegistry::new().with(Arc::new(MockTool::new(
                "lookup",
                ToolResult::ok(""),
            ))));
        let names: Vec<String> = network
            .tool_definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["agent_alpha", "agent_zeta", "lookup"]);
    }

    /// **Scenario**: An `agent_*` call delegates the task argument verbatim
    /// and the parent context map is inherited.
    #[tokio::test]
    async fn delegates_task_to_subagent() {
        let ctx = RunContext::new();
        let sub_provider = Arc::new(MockProvider::with_text("sub says hi"));
        let sub = Arc::new(
            super::super::LlmAgent::new("worker", sub_provider.clone())
                .with_description("does the work"),
        );
        let hub_provider = Arc::new(MockProvider::script(vec![
            tool_turn(
                "",
                vec![ToolCall::new("c1", "agent_worker", r#"{"task":"fetch the report"}"#)],
            ),
            text_turn("relayed"),
        ]));
        let network = Network::new("hub", hub_provider.clone()).with_agent(sub);

        let task = AgentTask::new("parent input").with_context("thread_id", "t-9");
        let result = network.execute(&ctx, task).await.unwrap();
        assert_eq!(result.output, "relayed");

        // The subagent saw the task argument verbatim.
        let sub_req = sub_provider.last_request().unwrap();
        let user = sub_req
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .unwrap();
        assert_eq!(user.content, "fetch the report");

        // The hub's final request carries the subagent output as the tool result.
        let hub_req = hub_provider.last_request().unwrap();
        let tool_msg = hub_req
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(tool_msg.content, "sub says hi");
    }

    /// **Scenario**: Streaming brackets delegation with agent_start and
    /// agent_finish, finish strictly after start.
    #[tokio::test]
    async fn streaming_brackets_delegation() {
        let ctx = RunContext::new();
        let network = Network::new(
            "hub",
            Arc::new(MockProvider::script(vec![
                tool_turn(
                    "",
                    vec![ToolCall::new("c1", "agent_worker", r#"{"task":"go"}"#)],
                ),
                text_turn("done"),
            ])),
        )
        .with_agent(subagent("worker", "ok"));

        let (tx, rx) = mpsc::channel(64);
        let (result, events) = tokio::join!(
            network.execute_stream(&ctx, AgentTask::new("hi"), tx),
            crate::stream::collect_events(rx),
        );
        assert_eq!(result.unwrap().output, "done");

        let start = events
            .iter()
            .position(|e| matches!(e, StreamEvent::AgentStart { .. }))
            .expect("agent_start");
        let finish = events
            .iter()
            .position(|e| matches!(e, StreamEvent::AgentFinish { .. }))
            .expect("agent_finish");
        assert!(start < finish);
        if let StreamEvent::AgentFinish { agent, .. } = &events[finish] {
            assert_eq!(agent, "worker");
        }
    }

    /// **Scenario**: Networks nest; the inner network is just another agent.
    #[tokio::test]
    async fn networks_nest() {
        let ctx = RunContext::new();
        let inner = Network::new(
            "inner-hub",
            Arc::new(MockProvider::script(vec![
                tool_turn(
                    "",
                    vec![ToolCall::new("c1", "agent_leaf", r#"{"task":"deep"}"#)],
                ),
                text_turn("inner done"),
            ])),
        )
        .with_agent(subagent("leaf", "leaf reply"));

        let outer = Network::new(
            "outer-hub",
            Arc::new(MockProvider::script(vec![
                tool_turn(
                    "",
                    vec![ToolCall::new("c1", "agent_inner_hub", r#"{"task":"mid"}"#)],
                ),
                text_turn("outer done"),
            ])),
        )
        .with_agent(Arc::new(inner));

        let result = outer.execute(&ctx, AgentTask::new("start")).await.unwrap();
        assert_eq!(result.output, "outer done");
    }

    /// **Scenario**: An unknown agent name degrades to an error result the
    /// LLM can read.
    #[tokio::test]
    async fn unknown_agent_is_result_level_error() {
        let ctx = RunContext::new();
        let provider = Arc::new(MockProvider::script(vec![
            tool_turn(
                "",
                vec![ToolCall::new("c1", "agent_ghost", r#"{"task":"boo"}"#)],
            ),
            text_turn("handled"),
        ]));
        let network = Network::new("hub", provider.clone());
        let result = network.execute(&ctx, AgentTask::new("x")).await.unwrap();
        assert_eq!(result.output, "handled");
        let req = provider.last_request().unwrap();
        let tool_msg = req.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.contains("unknown agent"));
    }
}
