//! Workflow-from-definition: translates a declarative node/edge description
//! into an executable [`Workflow`].
//!
//! Node kinds: `llm` (agent call), `tool` (tool call), `condition`
//! (expression routing to true/false branch lists), `template` (template
//! resolution). Edges `[from, to]` become step dependencies. A tool node
//! whose args carry `{{…}}` placeholders generates two steps: a resolver
//! writing `<id>__args`, then the call reading it back. A condition node
//! gates each branch target with a `when` predicate over `<id>.result`;
//! several conditions targeting the same node OR-compose.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::WorkflowContext;
use super::engine::{Workflow, WorkflowBuildError};
use super::expr::{evaluate, NamedPredicates};
use super::step::{tool_step, Step, ToolStepOptions};
use crate::ctx::RunContext;
use crate::error::AgentError;
use crate::task::AgentTask;
use crate::tools::Tool;
use crate::traits::Agent;

/// Declarative node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Llm,
    Tool,
    Condition,
    Template,
}

/// One declarative node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    pub kind: NodeKind,
    /// `llm`: key of the agent to call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// `llm`: input template; defaults to `{{input}}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// `tool`: name of the tool to call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// `tool`: JSON args, possibly templated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    /// `condition`: the expression to evaluate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub true_branch: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub false_branch: Vec<String>,
    /// `template`: the template body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl NodeDef {
    pub fn llm(id: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Llm,
            agent: Some(agent.into()),
            input: None,
            tool: None,
            args: None,
            expression: None,
            true_branch: Vec::new(),
            false_branch: Vec::new(),
            template: None,
        }
    }

    pub fn tool(id: impl Into<String>, tool: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            tool: Some(tool.into()),
            args: Some(args.into()),
            ..Self::bare(id, NodeKind::Tool)
        }
    }

    pub fn condition(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            expression: Some(expression.into()),
            ..Self::bare(id, NodeKind::Condition)
        }
    }

    pub fn template(id: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            template: Some(template.into()),
            ..Self::bare(id, NodeKind::Template)
        }
    }

    fn bare(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            agent: None,
            input: None,
            tool: None,
            args: None,
            expression: None,
            true_branch: Vec::new(),
            false_branch: Vec::new(),
            template: None,
        }
    }

    pub fn with_input(mut self, template: impl Into<String>) -> Self {
        self.input = Some(template.into());
        self
    }

    pub fn branches(mut self, true_branch: &[&str], false_branch: &[&str]) -> Self {
        self.true_branch = true_branch.iter().map(|s| s.to_string()).collect();
        self.false_branch = false_branch.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// A full declarative workflow: nodes plus `[from, to]` edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<(String, String)>,
}

/// Runtime resources the definition's references resolve against.
#[derive(Default)]
pub struct FlowResources {
    agents: HashMap<String, Arc<dyn Agent>>,
    tools: HashMap<String, Arc<dyn Tool>>,
    predicates: NamedPredicates,
}

impl FlowResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, key: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(key.into(), agent);
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(name.into(), tool);
        self
    }

    pub fn with_predicate(
        mut self,
        name: impl Into<String>,
        predicate: impl Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicates.insert(name.into(), Arc::new(predicate));
        self
    }
}

/// Translation-time validation failures.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("definition has no nodes")]
    Empty,
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),
    #[error("edge references unknown node: {0}")]
    UnknownEdgeNode(String),
    #[error("node {node} references unknown agent: {agent}")]
    UnknownAgent { node: String, agent: String },
    #[error("node {node} references unknown tool: {tool}")]
    UnknownTool { node: String, tool: String },
    #[error("node {node} is missing required field {field}")]
    MissingField { node: String, field: &'static str },
    #[error("condition node {0} has no branch targets")]
    EmptyCondition(String),
    #[error("condition node {node} targets unknown node: {target}")]
    UnknownBranchTarget { node: String, target: String },
    #[error(transparent)]
    Build(#[from] WorkflowBuildError),
}

/// Builds an executable workflow from a declarative definition.
pub fn build_workflow(
    def: &FlowDefinition,
    resources: &FlowResources,
) -> Result<Workflow, DefinitionError> {
    if def.nodes.is_empty() {
        return Err(DefinitionError::Empty);
    }

    let mut ids = HashSet::new();
    for node in &def.nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(DefinitionError::DuplicateNode(node.id.clone()));
        }
    }
    for (from, to) in &def.edges {
        for endpoint in [from, to] {
            if !ids.contains(endpoint.as_str()) {
                return Err(DefinitionError::UnknownEdgeNode(endpoint.clone()));
            }
        }
    }

    // Dependencies per node id from the edge list.
    let mut deps: HashMap<&str, Vec<String>> = HashMap::new();
    for (from, to) in &def.edges {
        let entry = deps.entry(to.as_str()).or_default();
        if !entry.contains(from) {
            entry.push(from.clone());
        }
    }

    // Branch gates: target id -> [(condition result key, wanted value)].
    let mut gates: HashMap<&str, Vec<(String, bool)>> = HashMap::new();
    for node in &def.nodes {
        if node.kind != NodeKind::Condition {
            continue;
        }
        if node.true_branch.is_empty() && node.false_branch.is_empty() {
            return Err(DefinitionError::EmptyCondition(node.id.clone()));
        }
        for (targets, wanted) in [(&node.true_branch, true), (&node.false_branch, false)] {
            for target in targets {
                if !ids.contains(target.as_str()) {
                    return Err(DefinitionError::UnknownBranchTarget {
                        node: node.id.clone(),
                        target: target.clone(),
                    });
                }
                gates
                    .entry(target.as_str())
                    .or_default()
                    .push((format!("{}.result", node.id), wanted));
                // Branch targets wait for the condition to settle.
                let entry = deps.entry(target.as_str()).or_default();
                if !entry.contains(&node.id) {
                    entry.push(node.id.clone());
                }
            }
        }
    }

    let predicates = Arc::new(clone_predicates(&resources.predicates));
    let mut steps = Vec::new();
    for node in &def.nodes {
        let node_deps = deps.get(node.id.as_str()).cloned().unwrap_or_default();
        let node_gates = gates.get(node.id.as_str()).cloned().unwrap_or_default();
        let built = match node.kind {
            NodeKind::Llm => build_llm_step(node, resources)?,
            NodeKind::Tool => {
                let (resolver, call) = build_tool_steps(node, resources)?;
                if let Some(resolver) = resolver {
                    let resolver_name = resolver.name().to_string();
                    steps.push(apply_gates(
                        resolver.after(&as_strs(&node_deps)),
                        &node_gates,
                    ));
                    let call = call.after(&[resolver_name.as_str()]);
                    steps.push(apply_gates(call, &node_gates));
                    continue;
                }
                call
            }
            NodeKind::Condition => build_condition_step(node, Arc::clone(&predicates))?,
            NodeKind::Template => build_template_step(node)?,
        };
        steps.push(apply_gates(built.after(&as_strs(&node_deps)), &node_gates));
    }

    Ok(Workflow::new(
        def.name.clone(),
        def.description.clone(),
        steps,
    )?)
}

fn as_strs(deps: &[String]) -> Vec<&str> {
    deps.iter().map(|s| s.as_str()).collect()
}

fn clone_predicates(src: &NamedPredicates) -> NamedPredicates {
    src.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect()
}

/// OR-composes condition gates onto a step's `when`.
fn apply_gates(step: Step, gates: &[(String, bool)]) -> Step {
    if gates.is_empty() {
        return step;
    }
    let gates = gates.to_vec();
    step.when(move |wf| {
        gates.iter().any(|(key, wanted)| {
            let value = wf
                .get(key)
                .and_then(|v| v.as_str().map(|s| s == "true"))
                .unwrap_or(false);
            value == *wanted
        })
    })
}

fn build_llm_step(node: &NodeDef, resources: &FlowResources) -> Result<Step, DefinitionError> {
    let agent_key = node.agent.as_ref().ok_or(DefinitionError::MissingField {
        node: node.id.clone(),
        field: "agent",
    })?;
    let agent = resources
        .agents
        .get(agent_key)
        .cloned()
        .ok_or_else(|| DefinitionError::UnknownAgent {
            node: node.id.clone(),
            agent: agent_key.clone(),
        })?;
    let input_template = node.input.clone().unwrap_or_else(|| "{{input}}".to_string());
    let output_key = format!("{}.output", node.id);
    Ok(Step::new(node.id.clone(), move |ctx: RunContext, wf, _input| {
        let agent = Arc::clone(&agent);
        let input_template = input_template.clone();
        let output_key = output_key.clone();
        async move {
            let input = wf.resolve(&input_template);
            let result = agent.execute(&ctx, AgentTask::new(input)).await?;
            wf.add_usage(&result.usage);
            wf.set(output_key, Value::String(result.output));
            Ok::<(), AgentError>(())
        }
    }))
}

/// A templated tool node becomes (resolver, call); a static one just (None, call).
fn build_tool_steps(
    node: &NodeDef,
    resources: &FlowResources,
) -> Result<(Option<Step>, Step), DefinitionError> {
    let tool_name = node.tool.as_ref().ok_or(DefinitionError::MissingField {
        node: node.id.clone(),
        field: "tool",
    })?;
    let tool = resources
        .tools
        .get(tool_name)
        .cloned()
        .ok_or_else(|| DefinitionError::UnknownTool {
            node: node.id.clone(),
            tool: tool_name.clone(),
        })?;

    let args = node.args.clone().unwrap_or_default();
    if args.contains("{{") {
        let args_key = format!("{}__args", node.id);
        let resolver_key = args_key.clone();
        let template = args.clone();
        let resolver = Step::new(args_key.clone(), move |_ctx, wf, _input| {
            let resolver_key = resolver_key.clone();
            let template = template.clone();
            async move {
                let resolved = wf.resolve_json(&template);
                wf.set(resolver_key, resolved);
                Ok(())
            }
        });
        let call = tool_step(
            node.id.clone(),
            tool,
            tool_name.clone(),
            ToolStepOptions {
                args_from: Some(args_key),
                args: None,
                output_to: None,
            },
        );
        return Ok((Some(resolver), call));
    }

    let static_args = if args.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&args).unwrap_or(Value::String(args))
    };
    let call = tool_step(
        node.id.clone(),
        tool,
        tool_name.clone(),
        ToolStepOptions {
            args_from: None,
            args: Some(static_args),
            output_to: None,
        },
    );
    Ok((None, call))
}

fn build_condition_step(
    node: &NodeDef,
    predicates: Arc<NamedPredicates>,
) -> Result<Step, DefinitionError> {
    let expression = node
        .expression
        .clone()
        .ok_or(DefinitionError::MissingField {
            node: node.id.clone(),
            field: "expression",
        })?;
    let result_key = format!("{}.result", node.id);
    Ok(Step::new(node.id.clone(), move |_ctx, wf, _input| {
        let expression = expression.clone();
        let result_key = result_key.clone();
        let predicates = Arc::clone(&predicates);
        async move {
            let outcome = evaluate(&expression, &wf, &predicates);
            wf.set(result_key, Value::String(outcome.to_string()));
            Ok(())
        }
    }))
}

fn build_template_step(node: &NodeDef) -> Result<Step, DefinitionError> {
    let template = node.template.clone().ok_or(DefinitionError::MissingField {
        node: node.id.clone(),
        field: "template",
    })?;
    let output_key = format!("{}.output", node.id);
    Ok(Step::new(node.id.clone(), move |_ctx, wf, _input| {
        let template = template.clone();
        let output_key = output_key.clone();
        async move {
            let resolved = wf.resolve(&template);
            wf.set(output_key, Value::String(resolved));
            Ok(())
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;
    use crate::message::ToolResult;
    use crate::tools::MockTool;

    fn resources() -> FlowResources {
        FlowResources::new()
            .with_agent(
                "writer",
                Arc::new(crate::agent::LlmAgent::new(
                    "writer",
                    Arc::new(MockProvider::with_text("drafted")),
                )),
            )
            .with_tool("search", Arc::new(MockTool::new("search", ToolResult::ok("hit"))))
    }

    /// **Scenario**: Validation errors for empty, duplicate, bad edges, bad
    /// references, and branchless conditions.
    #[test]
    fn definition_validation() {
        let empty = FlowDefinition {
            name: "w".into(),
            description: String::new(),
            nodes: vec![],
            edges: vec![],
        };
        assert!(matches!(
            build_workflow(&empty, &resources()),
            Err(DefinitionError::Empty)
        ));

        let dup = FlowDefinition {
            name: "w".into(),
            description: String::new(),
            nodes: vec![NodeDef::template("a", "x"), NodeDef::template("a", "y")],
            edges: vec![],
        };
        assert!(matches!(
            build_workflow(&dup, &resources()),
            Err(DefinitionError::DuplicateNode(_))
        ));

        let bad_edge = FlowDefinition {
            name: "w".into(),
            description: String::new(),
            nodes: vec![NodeDef::template("a", "x")],
            edges: vec![("a".into(), "ghost".into())],
        };
        assert!(matches!(
            build_workflow(&bad_edge, &resources()),
            Err(DefinitionError::UnknownEdgeNode(_))
        ));

        let bad_agent = FlowDefinition {
            name: "w".into(),
            description: String::new(),
            nodes: vec![NodeDef::llm("a", "nobody")],
            edges: vec![],
        };
        assert!(matches!(
            build_workflow(&bad_agent, &resources()),
            Err(DefinitionError::UnknownAgent { .. })
        ));

        let branchless = FlowDefinition {
            name: "w".into(),
            description: String::new(),
            nodes: vec![NodeDef::condition("c", "1 == 1")],
            edges: vec![],
        };
        assert!(matches!(
            build_workflow(&branchless, &resources()),
            Err(DefinitionError::EmptyCondition(_))
        ));
    }

    /// **Scenario**: llm → template chain resolves `{{id.output}}`.
    #[tokio::test]
    async fn llm_then_template() {
        let def = FlowDefinition {
            name: "draft".into(),
            description: String::new(),
            nodes: vec![
                NodeDef::llm("write", "writer"),
                NodeDef::template("wrap", "article: {{write.output}}"),
            ],
            edges: vec![("write".into(), "wrap".into())],
        };
        let wf = build_workflow(&def, &resources()).unwrap();
        let ctx = RunContext::new();
        let result = wf.execute(&ctx, AgentTask::new("topic")).await.unwrap();
        assert_eq!(result.output, "article: drafted");
    }

    /// **Scenario**: A templated tool node splits into resolver + call, and
    /// the tool sees the substituted JSON args.
    #[tokio::test]
    async fn templated_tool_node_resolves_args() {
        let tool = Arc::new(MockTool::new("search", ToolResult::ok("found")));
        let res = FlowResources::new().with_tool("search", tool.clone());
        let def = FlowDefinition {
            name: "lookup".into(),
            description: String::new(),
            nodes: vec![NodeDef::tool("find", "search", r#"{"q": "{{input}}"}"#)],
            edges: vec![],
        };
        let wf = build_workflow(&def, &res).unwrap();
        assert_eq!(wf.step_names(), vec!["find__args", "find"]);

        let ctx = RunContext::new();
        let result = wf.execute(&ctx, AgentTask::new("rust jobs")).await.unwrap();
        assert_eq!(result.output, "found");
        assert_eq!(tool.recorded_args()[0]["q"], "rust jobs");
    }

    /// **Scenario**: A condition routes to the true branch; the false branch
    /// is skipped by its gate but downstream joins still run.
    #[tokio::test]
    async fn condition_routes_branches() {
        let res = resources();
        let def = FlowDefinition {
            name: "route".into(),
            description: String::new(),
            nodes: vec![
                NodeDef::template("score", "8"),
                NodeDef::condition("gate", "{{score.output}} > 5")
                    .branches(&["good"], &["bad"]),
                NodeDef::template("good", "high"),
                NodeDef::template("bad", "low"),
                NodeDef::template("summary", "picked: {{good.output}}{{bad.output}}"),
            ],
            edges: vec![
                ("score".into(), "gate".into()),
                ("good".into(), "summary".into()),
                ("bad".into(), "summary".into()),
            ],
        };
        let wf = build_workflow(&def, &res).unwrap();
        let ctx = RunContext::new();
        let result = wf.execute(&ctx, AgentTask::new("")).await.unwrap();
        assert_eq!(result.output, "picked: high");
    }

    /// **Scenario**: Definitions round-trip through serde (host configs).
    #[test]
    fn definition_deserializes() {
        let json = r#"{
            "name": "flow",
            "nodes": [
                {"id": "t", "kind": "template", "template": "hi {{input}}"},
                {"id": "c", "kind": "condition", "expression": "1 == 1", "true_branch": ["t2"]},
                {"id": "t2", "kind": "template", "template": "yes"}
            ],
            "edges": [["t", "c"]]
        }"#;
        let def: FlowDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.nodes.len(), 3);
        assert_eq!(def.nodes[1].kind, NodeKind::Condition);
        assert!(build_workflow(&def, &resources()).is_ok());
    }
}
