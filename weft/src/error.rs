//! Error kinds surfaced by the execution core.
//!
//! Halt is deliberately absent: a processor halt is surface-level success
//! (the loop returns the canned response as output). Transport failures from
//! providers surface unchanged apart from being tagged with the agent name;
//! retries around them are the caller's concern.

use crate::store::StoreError;
use crate::suspend::Suspension;

/// Error returned by `Agent::execute` and the machinery underneath it.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Provider (transport-level) failure, tagged with the agent it hit.
    #[error("agent {agent}: provider error: {message}")]
    Provider { agent: String, message: String },

    /// The run context was cancelled; in-flight work was awaited first.
    #[error("execution cancelled")]
    Cancelled,

    /// A workflow loop shape (DoUntil / DoWhile) exhausted its bound.
    /// The agent loop's iteration cap is not an error.
    #[error("max iterations exceeded ({0})")]
    MaxIterations(usize),

    /// A workflow step failed after retries; the inner error is preserved.
    #[error("workflow step {step} failed: {source}")]
    WorkflowStep {
        step: String,
        #[source]
        source: Box<AgentError>,
    },

    /// Execution paused at a processor hook; resume via the carried closure.
    #[error("execution suspended at {}", .0.step())]
    Suspended(Box<Suspension>),

    /// A suspension's resume closure was consumed already.
    #[error("suspension already resumed")]
    AlreadyResumed,

    /// Failure of a spawned background execution, shared across observers.
    #[error("background execution failed: {0}")]
    Background(std::sync::Arc<AgentError>),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Anything else: panics recovered from spawned agents, malformed
    /// scheduled actions, and similar execution-level failures.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

impl AgentError {
    /// Borrows the suspension when this is a `Suspended` error.
    pub fn as_suspension(&self) -> Option<&Suspension> {
        match self {
            AgentError::Suspended(s) => Some(s),
            _ => None,
        }
    }
}
