//! Persistence and delivery contracts consumed by the scheduler, plus
//! in-memory implementations for tests and examples.
//!
//! The core touches only a narrow slice of the host's persistence: loading
//! due scheduled actions, writing back their next-run bookkeeping, and
//! reading configuration values. Everything else about storage lives outside.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ctx::RunContext;
use crate::error::AgentError;

/// A stored recurring action. `tool_calls` is kept serialized; the scheduler
/// parses it at fire time (see the scheduler module for accepted formats).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub id: String,
    pub description: String,
    /// `HH:MM <recurrence>`, e.g. `08:00 daily` or `21:30 weekly(friday)`.
    pub schedule: String,
    /// Serialized tool-call list.
    pub tool_calls: String,
    /// Optional prompt used to synthesize the tool outputs into one message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_prompt: Option<String>,
    /// Unix seconds of the next firing.
    pub next_run: i64,
    pub enabled: bool,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// The slice of host persistence the core consumes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Enabled actions whose `next_run` is at or before `now`.
    async fn due_scheduled_actions(
        &self,
        ctx: &RunContext,
        now: i64,
    ) -> Result<Vec<ScheduledAction>, StoreError>;

    async fn update_scheduled_action(
        &self,
        ctx: &RunContext,
        action: &ScheduledAction,
    ) -> Result<(), StoreError>;

    async fn set_scheduled_action_enabled(
        &self,
        ctx: &RunContext,
        id: &str,
        enabled: bool,
    ) -> Result<(), StoreError>;

    /// Configuration lookup; `Ok(None)` when the key is unset.
    async fn get_config(&self, ctx: &RunContext, key: &str)
        -> Result<Option<String>, StoreError>;
}

/// Delivers scheduler output to the owner. Returns a message id.
#[async_trait]
pub trait Frontend: Send + Sync {
    async fn send(
        &self,
        ctx: &RunContext,
        owner_id: &str,
        text: &str,
    ) -> Result<String, AgentError>;
}

/// Concurrent in-memory [`Store`] for tests and examples.
#[derive(Default)]
pub struct InMemoryStore {
    actions: DashMap<String, ScheduledAction>,
    config: DashMap<String, String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_action(&self, action: ScheduledAction) {
        self.actions.insert(action.id.clone(), action);
    }

    pub fn set_config(&self, key: impl Into<String>, value: impl Into<String>) {
        self.config.insert(key.into(), value.into());
    }

    pub fn action(&self, id: &str) -> Option<ScheduledAction> {
        self.actions.get(id).map(|a| a.clone())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn due_scheduled_actions(
        &self,
        _ctx: &RunContext,
        now: i64,
    ) -> Result<Vec<ScheduledAction>, StoreError> {
        let mut due: Vec<ScheduledAction> = self
            .actions
            .iter()
            .filter(|a| a.enabled && a.next_run <= now)
            .map(|a| a.clone())
            .collect();
        due.sort_by(|a, b| a.next_run.cmp(&b.next_run));
        Ok(due)
    }

    async fn update_scheduled_action(
        &self,
        _ctx: &RunContext,
        action: &ScheduledAction,
    ) -> Result<(), StoreError> {
        if !self.actions.contains_key(&action.id) {
            return Err(StoreError::NotFound(action.id.clone()));
        }
        self.actions.insert(action.id.clone(), action.clone());
        Ok(())
    }

    async fn set_scheduled_action_enabled(
        &self,
        _ctx: &RunContext,
        id: &str,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .actions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.enabled = enabled;
        Ok(())
    }

    async fn get_config(
        &self,
        _ctx: &RunContext,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self.config.get(key).map(|v| v.clone()))
    }
}

/// Records every delivery; tests assert against `sent()`.
#[derive(Default)]
pub struct InMemoryFrontend {
    sent: DashMap<u64, (String, String)>,
    counter: std::sync::atomic::AtomicU64,
}

impl InMemoryFrontend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries in send order as (owner_id, text).
    pub fn sent(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(u64, (String, String))> = self
            .sent
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, pair)| pair).collect()
    }
}

#[async_trait]
impl Frontend for InMemoryFrontend {
    async fn send(
        &self,
        _ctx: &RunContext,
        owner_id: &str,
        text: &str,
    ) -> Result<String, AgentError> {
        let seq = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.sent
            .insert(seq, (owner_id.to_string(), text.to_string()));
        Ok(format!("msg-{seq}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(id: &str, next_run: i64, enabled: bool) -> ScheduledAction {
        ScheduledAction {
            id: id.into(),
            description: String::new(),
            schedule: "08:00 daily".into(),
            tool_calls: "[]".into(),
            synthesis_prompt: None,
            next_run,
            enabled,
        }
    }

    /// **Scenario**: Due filtering honors next_run and the enabled flag.
    #[tokio::test]
    async fn due_actions_filtering() {
        let ctx = RunContext::new();
        let store = InMemoryStore::new();
        store.put_action(action("past", 100, true));
        store.put_action(action("future", 10_000, true));
        store.put_action(action("disabled", 100, false));

        let due = store.due_scheduled_actions(&ctx, 500).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["past"]);
    }

    /// **Scenario**: Enable toggle persists; updating a missing action fails.
    #[tokio::test]
    async fn update_and_toggle() {
        let ctx = RunContext::new();
        let store = InMemoryStore::new();
        store.put_action(action("a", 100, true));
        store
            .set_scheduled_action_enabled(&ctx, "a", false)
            .await
            .unwrap();
        assert!(!store.action("a").unwrap().enabled);

        let ghost = action("ghost", 1, true);
        assert!(store.update_scheduled_action(&ctx, &ghost).await.is_err());
    }

    /// **Scenario**: Frontend records deliveries in order.
    #[tokio::test]
    async fn frontend_records_in_order() {
        let ctx = RunContext::new();
        let frontend = InMemoryFrontend::new();
        frontend.send(&ctx, "owner", "first").await.unwrap();
        frontend.send(&ctx, "owner", "second").await.unwrap();
        let sent = frontend.sent();
        assert_eq!(sent[0].1, "first");
        assert_eq!(sent[1].1, "second");
    }
}
