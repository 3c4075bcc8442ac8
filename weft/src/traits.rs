//! Core agent traits.
//!
//! An [`Agent`] is a named unit of work; implementations in this crate are
//! [`LlmAgent`](crate::agent::LlmAgent) (the tool-calling loop),
//! [`Network`](crate::agent::Network) (a router that delegates to subagents),
//! and [`Workflow`](crate::workflow::Workflow) (a dependency-ordered task
//! graph). Hosts implement it for anything else they want to compose.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::ctx::RunContext;
use crate::error::AgentError;
use crate::stream::StreamEvent;
use crate::task::{AgentResult, AgentTask};

/// A named unit of work.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Runs the task to completion (or suspension / cancellation).
    async fn execute(&self, ctx: &RunContext, task: AgentTask) -> Result<AgentResult, AgentError>;
}

/// An agent that can replay its execution to an observer.
///
/// Implementations must close the channel (drop every sender clone) before
/// returning; on normal completion a terminal [`StreamEvent::Done`] precedes
/// the close, on suspension or error the channel just closes.
#[async_trait]
pub trait StreamingAgent: Agent {
    async fn execute_stream(
        &self,
        ctx: &RunContext,
        task: AgentTask,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<AgentResult, AgentError>;
}
