//! Run-scoped context: cooperative cancellation plus per-run handlers.
//!
//! [`RunContext`] plays the role a `ctx` value plays in the execution model:
//! every blocking operation in the core selects against its cancellation
//! token, and optional handlers ([`InputHandler`], [`PlanRunner`],
//! [`CodeRunner`]) ride along for the built-in meta-tools. It is cheap to
//! clone (token + `Arc`s) and child contexts derive their token so cancelling
//! a parent propagates to every execution unit spawned under it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;

/// Solicits a human response mid-execution; discovered by the `ask_user`
/// meta-tool and by workflow steps that need operator input.
#[async_trait]
pub trait InputHandler: Send + Sync {
    async fn ask_user(&self, ctx: &RunContext, prompt: &str) -> Result<String, AgentError>;
}

/// Executes a prepared plan on behalf of the `execute_plan` meta-tool.
#[async_trait]
pub trait PlanRunner: Send + Sync {
    async fn execute_plan(&self, ctx: &RunContext, plan: &str) -> Result<String, AgentError>;
}

/// Runs a code snippet on behalf of the `execute_code` meta-tool.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn execute_code(&self, ctx: &RunContext, code: &str) -> Result<String, AgentError>;
}

/// Run-scoped context carried through every execution unit.
///
/// **Interaction**: Consumed by the agent loop, the workflow engine, spawn
/// handles, and the scheduler. `child()` derives a context whose token is
/// cancelled when the parent's is, so cancellation fans out.
#[derive(Clone, Default)]
pub struct RunContext {
    cancel: CancellationToken,
    input_handler: Option<Arc<dyn InputHandler>>,
    plan_runner: Option<Arc<dyn PlanRunner>>,
    code_runner: Option<Arc<dyn CodeRunner>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a human-input handler (builder pattern).
    pub fn with_input_handler(mut self, handler: Arc<dyn InputHandler>) -> Self {
        self.input_handler = Some(handler);
        self
    }

    pub fn with_plan_runner(mut self, runner: Arc<dyn PlanRunner>) -> Self {
        self.plan_runner = Some(runner);
        self
    }

    pub fn with_code_runner(mut self, runner: Arc<dyn CodeRunner>) -> Self {
        self.code_runner = Some(runner);
        self
    }

    /// Derives a child context: same handlers, a child cancellation token.
    /// Cancelling the parent cancels the child; not the other way around.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            input_handler: self.input_handler.clone(),
            plan_runner: self.plan_runner.clone(),
            code_runner: self.code_runner.clone(),
        }
    }

    /// Requests cooperative cancellation of this context and its children.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The underlying token; used by handles that cancel a derived context.
    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when the context is cancelled. Select against this in every
    /// blocking operation.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn input_handler(&self) -> Option<&Arc<dyn InputHandler>> {
        self.input_handler.as_ref()
    }

    pub fn plan_runner(&self) -> Option<&Arc<dyn PlanRunner>> {
        self.plan_runner.as_ref()
    }

    pub fn code_runner(&self) -> Option<&Arc<dyn CodeRunner>> {
        self.code_runner.as_ref()
    }

    /// Returns `Err(AgentError::Cancelled)` when already cancelled; used at
    /// loop boundaries to fail fast without racing the token.
    pub fn ensure_active(&self) -> Result<(), AgentError> {
        if self.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("cancelled", &self.is_cancelled())
            .field("input_handler", &self.input_handler.is_some())
            .field("plan_runner", &self.plan_runner.is_some())
            .field("code_runner", &self.code_runner.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Cancelling a parent context cancels derived children,
    /// but cancelling a child leaves the parent running.
    #[tokio::test]
    async fn cancellation_propagates_parent_to_child() {
        let parent = RunContext::new();
        let child = parent.child();
        assert!(!child.is_cancelled());

        parent.cancel();
        child.cancelled().await;
        assert!(child.is_cancelled());

        let parent = RunContext::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    /// **Scenario**: ensure_active reports Cancelled only after cancel.
    #[test]
    fn ensure_active_reflects_token() {
        let ctx = RunContext::new();
        assert!(ctx.ensure_active().is_ok());
        ctx.cancel();
        assert!(matches!(ctx.ensure_active(), Err(AgentError::Cancelled)));
    }

    /// **Scenario**: Handlers ride along through child derivation.
    #[tokio::test]
    async fn handlers_are_inherited_by_children() {
        struct Fixed;
        #[async_trait]
        impl InputHandler for Fixed {
            async fn ask_user(&self, _ctx: &RunContext, _prompt: &str) -> Result<String, AgentError> {
                Ok("yes".to_string())
            }
        }

        let ctx = RunContext::new().with_input_handler(Arc::new(Fixed));
        let child = ctx.child();
        let handler = child.input_handler().expect("inherited handler");
        assert_eq!(handler.ask_user(&child, "ok?").await.unwrap(), "yes");
    }
}
