//! Background execution handles: run any agent on its own task and observe it.
//!
//! [`spawn`] launches `Agent::execute` on an independent tokio task under a
//! derived cancellation token and hands back an [`AgentHandle`]. The handle's
//! state machine is monotonic (pending → running → one of completed / failed /
//! cancelled) and publication is ordered: the outcome slot is written, then
//! the state transitions, then the done latch fires — any observer that sees
//! done sees the final outcome. A panic inside the agent is recovered from
//! the task join error and reported as a failure.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::ctx::RunContext;
use crate::error::AgentError;
use crate::task::{AgentResult, AgentTask};
use crate::traits::Agent;

/// Lifecycle of one background execution. Terminal states never transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleState {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl HandleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }
}

/// Observable reference to a spawned execution.
pub struct AgentHandle {
    id: String,
    agent_name: String,
    state: AtomicU8,
    outcome: Mutex<Option<Result<AgentResult, Arc<AgentError>>>>,
    done: CancellationToken,
    cancel: CancellationToken,
}

impl AgentHandle {
    /// Unique id of this spawn.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the spawned agent.
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Current state. When a terminal state is loaded this waits for the done
    /// latch first, closing the publication race window.
    pub async fn state(&self) -> HandleState {
        let state = self.load_state();
        if state.is_terminal() {
            self.done.cancelled().await;
            return self.load_state();
        }
        state
    }

    fn load_state(&self) -> HandleState {
        HandleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Completes when the execution reaches a terminal state. Composable with
    /// `tokio::select!` across several handles.
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.done.cancelled()
    }

    /// Blocks until done, or until the waiter's context cancels (the waiter
    /// gets `Cancelled`; the spawned execution is unaffected).
    pub async fn wait(&self, ctx: &RunContext) -> Result<AgentResult, AgentError> {
        tokio::select! {
            _ = ctx.cancelled() => Err(AgentError::Cancelled),
            _ = self.done.cancelled() => self.outcome(),
        }
    }

    /// Non-blocking snapshot of the outcome; `None` until done. Every call
    /// after completion returns the same value.
    pub fn result(&self) -> Option<Result<AgentResult, Arc<AgentError>>> {
        let slot = match self.outcome.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.clone()
    }

    /// Cancels the derived context; the running agent observes it through its
    /// own ctx and winds down cooperatively.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn outcome(&self) -> Result<AgentResult, AgentError> {
        match self.result() {
            Some(Ok(result)) => Ok(result),
            Some(Err(e)) => match e.as_ref() {
                AgentError::Cancelled => Err(AgentError::Cancelled),
                _ => Err(AgentError::Background(e)),
            },
            // done fired, so the outcome is published; this arm is defensive
            // against a poisoned lock only.
            None => Err(AgentError::ExecutionFailed(
                "background outcome missing".into(),
            )),
        }
    }

    fn publish(&self, outcome: Result<AgentResult, AgentError>, state: HandleState) {
        {
            let mut slot = match self.outcome.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *slot = Some(outcome.map_err(Arc::new));
        }
        self.state.store(state as u8, Ordering::Release);
        self.done.cancel();
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.id)
            .field("agent", &self.agent_name)
            .field("state", &self.load_state())
            .finish()
    }
}

/// Launches `agent.execute(task)` on an independent task flow.
pub fn spawn(ctx: &RunContext, agent: Arc<dyn Agent>, task: AgentTask) -> Arc<AgentHandle> {
    let child_ctx = ctx.child();
    let handle = Arc::new(AgentHandle {
        id: Uuid::new_v4().to_string(),
        agent_name: agent.name().to_string(),
        state: AtomicU8::new(HandleState::Pending as u8),
        outcome: Mutex::new(None),
        done: CancellationToken::new(),
        cancel: child_ctx.cancellation_token(),
    });

    let supervisor = Arc::clone(&handle);
    tokio::spawn(async move {
        supervisor
            .state
            .store(HandleState::Running as u8, Ordering::Release);

        let run_ctx = child_ctx.clone();
        let inner = tokio::spawn(async move { agent.execute(&run_ctx, task).await });

        match inner.await {
            Ok(Ok(result)) => supervisor.publish(Ok(result), HandleState::Completed),
            Ok(Err(AgentError::Cancelled)) => {
                supervisor.publish(Err(AgentError::Cancelled), HandleState::Cancelled)
            }
            Ok(Err(e)) => supervisor.publish(Err(e), HandleState::Failed),
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    let payload = join_err.into_panic();
                    let text = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    format!("agent panicked: {text}")
                } else {
                    "agent task aborted".to_string()
                };
                supervisor.publish(
                    Err(AgentError::ExecutionFailed(message)),
                    HandleState::Failed,
                );
            }
        }
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Fixed(&'static str);

    #[async_trait]
    impl Agent for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn description(&self) -> &str {
            ""
        }
        async fn execute(
            &self,
            _ctx: &RunContext,
            _task: AgentTask,
        ) -> Result<AgentResult, AgentError> {
            Ok(AgentResult::from_output(self.0))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Agent for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            ""
        }
        async fn execute(
            &self,
            ctx: &RunContext,
            _task: AgentTask,
        ) -> Result<AgentResult, AgentError> {
            tokio::select! {
                _ = ctx.cancelled() => Err(AgentError::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs(60)) => {
                    Ok(AgentResult::from_output("overslept"))
                }
            }
        }
    }

    struct Panicky;

    #[async_trait]
    impl Agent for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            ""
        }
        async fn execute(
            &self,
            _ctx: &RunContext,
            _task: AgentTask,
        ) -> Result<AgentResult, AgentError> {
            panic!("boom");
        }
    }

    /// **Scenario**: A spawn completes, done fires, and result is stable
    /// across reads.
    #[tokio::test]
    async fn spawn_completes_and_result_is_stable() {
        let ctx = RunContext::new();
        let handle = spawn(&ctx, Arc::new(Fixed("hi")), AgentTask::new("x"));

        let result = handle.wait(&ctx).await.unwrap();
        assert_eq!(result.output, "hi");
        assert_eq!(handle.state().await, HandleState::Completed);

        // Done completes immediately once terminal.
        tokio::time::timeout(Duration::from_millis(10), handle.done())
            .await
            .expect("done should be immediate");

        let first = handle.result().unwrap().unwrap();
        let second = handle.result().unwrap().unwrap();
        assert_eq!(first, second);
    }

    /// **Scenario**: Cancel propagates through the derived context and the
    /// handle lands in Cancelled.
    #[tokio::test]
    async fn cancel_reaches_the_running_agent() {
        let ctx = RunContext::new();
        let handle = spawn(&ctx, Arc::new(Sleepy), AgentTask::new("x"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        handle.done().await;
        assert_eq!(handle.state().await, HandleState::Cancelled);
        assert!(matches!(
            handle.wait(&ctx).await,
            Err(AgentError::Cancelled)
        ));
    }

    /// **Scenario**: Cancelling the parent context cancels the spawn too.
    #[tokio::test]
    async fn parent_cancellation_propagates() {
        let ctx = RunContext::new();
        let handle = spawn(&ctx, Arc::new(Sleepy), AgentTask::new("x"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();
        handle.done().await;
        assert_eq!(handle.state().await, HandleState::Cancelled);
    }

    /// **Scenario**: A panicking agent is recovered as Failed with a
    /// synthetic error naming the panic.
    #[tokio::test]
    async fn panic_is_recovered_as_failure() {
        let ctx = RunContext::new();
        let handle = spawn(&ctx, Arc::new(Panicky), AgentTask::new("x"));
        handle.done().await;
        assert_eq!(handle.state().await, HandleState::Failed);
        let err = handle.result().unwrap().unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert!(err.to_string().contains("boom"));
    }

    /// **Scenario**: A waiter's cancelled context returns its own error
    /// without disturbing the spawned flow.
    #[tokio::test]
    async fn waiter_cancellation_does_not_cancel_the_spawn() {
        let ctx = RunContext::new();
        let handle = spawn(&ctx, Arc::new(Fixed("late")), AgentTask::new("x"));

        let waiter = RunContext::new();
        waiter.cancel();
        assert!(matches!(
            handle.wait(&waiter).await,
            Err(AgentError::Cancelled)
        ));

        // The spawn itself still completes.
        let result = handle.wait(&ctx).await.unwrap();
        assert_eq!(result.output, "late");
    }
}
