//! Example: spawning agents on background handles and joining them.
//!
//! Two agents run concurrently; the handles are awaited together and one of
//! them is cancelled mid-flight.
//!
//! Run: `cargo run -p weft-examples --example background_spawn`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use weft::{spawn, Agent, AgentError, AgentResult, AgentTask, RunContext};

struct SlowEcho {
    name: String,
    delay: Duration,
}

#[async_trait]
impl Agent for SlowEcho {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "echoes its input after a delay"
    }

    async fn execute(&self, ctx: &RunContext, task: AgentTask) -> Result<AgentResult, AgentError> {
        tokio::select! {
            _ = ctx.cancelled() => Err(AgentError::Cancelled),
            _ = tokio::time::sleep(self.delay) => Ok(AgentResult::from_output(task.input)),
        }
    }
}

#[tokio::main]
async fn main() {
    let ctx = RunContext::new();

    let quick = spawn(
        &ctx,
        Arc::new(SlowEcho {
            name: "quick".into(),
            delay: Duration::from_millis(50),
        }),
        AgentTask::new("quick result"),
    );
    let stuck = spawn(
        &ctx,
        Arc::new(SlowEcho {
            name: "stuck".into(),
            delay: Duration::from_secs(3_600),
        }),
        AgentTask::new("never seen"),
    );

    match quick.wait(&ctx).await {
        Ok(result) => println!("{}: {}", quick.agent_name(), result.output),
        Err(e) => println!("{}: {e}", quick.agent_name()),
    }

    stuck.cancel();
    stuck.done().await;
    println!("{}: {:?}", stuck.agent_name(), stuck.state().await);
}
