//! Recurring-action scheduler: a periodic dispatcher that fires stored
//! actions whose next-run timestamp has passed.
//!
//! Each tick loads due actions from the [`Store`], reads the owner id from
//! store config (an empty owner silently skips the tick), and handles every
//! action independently: the next-run bookkeeping is advanced **before**
//! execution so a slow action cannot double-fire on the next tick, then the
//! action's tool calls are dispatched, optionally synthesized through the
//! provider, and delivered via the [`Frontend`]. One action's failure never
//! stops the others; exactly-once delivery is explicitly not promised.

pub mod schedule;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::ctx::RunContext;
use crate::error::AgentError;
use crate::llm::Provider;
use crate::message::{ChatMessage, ChatRequest};
use crate::store::{Frontend, ScheduledAction, Store};
use crate::tools::ToolRegistry;

pub use schedule::{civil_from_days, compute_next_run, days_from_civil, is_once, weekday};

/// Store config key naming the delivery target.
pub const OWNER_CONFIG_KEY: &str = "owner_id";

/// Default tick cadence.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// The periodic dispatcher.
pub struct Scheduler {
    store: Arc<dyn Store>,
    registry: Arc<ToolRegistry>,
    provider: Arc<dyn Provider>,
    frontend: Arc<dyn Frontend>,
    tz_offset_hours: i32,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        registry: ToolRegistry,
        provider: Arc<dyn Provider>,
        frontend: Arc<dyn Frontend>,
    ) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            provider,
            frontend,
            tz_offset_hours: 0,
            interval: DEFAULT_TICK_INTERVAL,
        }
    }

    /// Local timezone as whole hours relative to UTC.
    pub fn with_timezone_offset(mut self, hours: i32) -> Self {
        self.tz_offset_hours = hours;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Ticks until the context is cancelled. Cancellation stops new ticks;
    /// an in-flight tick finishes its current action handling on its own.
    pub async fn run(&self, ctx: &RunContext) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let now = chrono::Utc::now().timestamp();
            if let Err(e) = self.tick(ctx, now).await {
                tracing::warn!(error = %e, "scheduler tick failed");
            }
        }
    }

    /// One pass over the actions due at `now`. A store failure on load
    /// aborts the tick; everything after is per-action and isolated.
    pub async fn tick(&self, ctx: &RunContext, now: i64) -> Result<(), AgentError> {
        let due = self.store.due_scheduled_actions(ctx, now).await?;
        if due.is_empty() {
            return Ok(());
        }

        let owner = self
            .store
            .get_config(ctx, OWNER_CONFIG_KEY)
            .await?
            .unwrap_or_default();
        if owner.is_empty() {
            tracing::debug!("no owner configured; skipping tick");
            return Ok(());
        }

        for action in due {
            if ctx.is_cancelled() {
                return Ok(());
            }
            // Advance first: if execution outlives a tick the action must
            // not be due again.
            self.advance(ctx, &action, now).await;
            if let Err(e) = self.fire(ctx, &owner, &action).await {
                tracing::warn!(action = %action.id, error = %e, "scheduled action failed");
            }
        }
        Ok(())
    }

    async fn advance(&self, ctx: &RunContext, action: &ScheduledAction, now: i64) {
        if is_once(&action.schedule) {
            if let Err(e) = self
                .store
                .set_scheduled_action_enabled(ctx, &action.id, false)
                .await
            {
                tracing::warn!(action = %action.id, error = %e, "failed to disable once-action");
            }
            return;
        }
        match compute_next_run(&action.schedule, now, self.tz_offset_hours) {
            Some(next_run) => {
                let mut updated = action.clone();
                updated.next_run = next_run;
                if let Err(e) = self.store.update_scheduled_action(ctx, &updated).await {
                    tracing::warn!(action = %action.id, error = %e, "failed to advance next run");
                }
            }
            None => {
                // An unparseable schedule would stay due and refire every
                // tick; disable it instead.
                tracing::warn!(action = %action.id, schedule = %action.schedule, "unparseable schedule; disabling");
                let _ = self
                    .store
                    .set_scheduled_action_enabled(ctx, &action.id, false)
                    .await;
            }
        }
    }

    async fn fire(
        &self,
        ctx: &RunContext,
        owner: &str,
        action: &ScheduledAction,
    ) -> Result<(), AgentError> {
        let calls = parse_tool_calls(&action.tool_calls)?;
        let mut outputs = Vec::with_capacity(calls.len());
        for call in &calls {
            let result = self
                .registry
                .dispatch(ctx, &call.name, call.args.clone())
                .await;
            outputs.push((call.name.clone(), result.content));
        }

        let text = match &action.synthesis_prompt {
            Some(prompt) => {
                let combined = outputs
                    .iter()
                    .map(|(name, content)| format!("[{name}]\n{content}"))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                let req = ChatRequest::new(vec![
                    ChatMessage::system(prompt.clone()),
                    ChatMessage::user(combined),
                ]);
                self.provider.chat(ctx, &req).await?.content
            }
            None => {
                let mut text = action.description.clone();
                for (name, content) in &outputs {
                    text.push_str(&format!("\n\n[{name}]\n{content}"));
                }
                text
            }
        };

        self.frontend.send(ctx, owner, &text).await?;
        Ok(())
    }
}

/// One stored call: tool name plus JSON arguments.
#[derive(Debug, Clone, Deserialize)]
struct StoredToolCall {
    #[serde(alias = "tool")]
    name: String,
    #[serde(default, alias = "arguments", alias = "params")]
    args: Value,
}

/// Accepts a direct JSON array of calls, or the legacy array of
/// JSON-encoded strings.
fn parse_tool_calls(raw: &str) -> Result<Vec<StoredToolCall>, AgentError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if let Ok(calls) = serde_json::from_str::<Vec<StoredToolCall>>(raw) {
        return Ok(calls);
    }
    if let Ok(encoded) = serde_json::from_str::<Vec<String>>(raw) {
        return encoded
            .iter()
            .map(|s| {
                serde_json::from_str::<StoredToolCall>(s).map_err(|e| {
                    AgentError::InvalidInput(format!("malformed legacy tool call: {e}"))
                })
            })
            .collect();
    }
    Err(AgentError::InvalidInput(
        "scheduled action tool_calls is neither a call array nor a string array".into(),
    ))
}
