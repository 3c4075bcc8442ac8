//! WorkflowContext: the mutable key→value bag carried through one workflow
//! execution.
//!
//! All reads and writes serialize through one mutex; the usage accumulator
//! shares it. Conventions: the `input` key holds the initial task input when
//! non-empty, step `X`'s default output lives at `X.output` (`X.result` for
//! tool steps), and templates reference values as `{{key}}`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::message::Usage;

/// Key holding the initial task input.
pub const INPUT_KEY: &str = "input";

/// Reserved key exposing the accumulated usage.
pub const USAGE_KEY: &str = "_usage";

struct Inner {
    values: HashMap<String, Value>,
    usage: Usage,
    last_written: Option<String>,
}

/// Shared, mutex-guarded context for one workflow run. Cloning shares the
/// underlying map; the context exists only for one `execute` call.
#[derive(Clone)]
pub struct WorkflowContext {
    inner: Arc<Mutex<Inner>>,
}

impl Default for WorkflowContext {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                values: HashMap::new(),
                usage: Usage::default(),
                last_written: None,
            })),
        }
    }

    /// Context seeded with the task input (skipped when empty).
    pub fn with_input(input: &str) -> Self {
        let ctx = Self::new();
        if !input.is_empty() {
            ctx.set(INPUT_KEY, Value::String(input.to_string()));
        }
        ctx
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if key == USAGE_KEY {
            return serde_json::to_value(self.usage()).ok();
        }
        self.lock().values.get(key).cloned()
    }

    /// Serialized write; records the key as the most recent write.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key == USAGE_KEY {
            tracing::warn!(key = %key, "attempted write to reserved usage key ignored");
            return;
        }
        let mut inner = self.lock();
        inner.values.insert(key.clone(), value.into());
        inner.last_written = Some(key);
    }

    /// The initial task input, or empty when none was set.
    pub fn input(&self) -> String {
        self.get(INPUT_KEY)
            .map(|v| display_value(&v))
            .unwrap_or_default()
    }

    /// Atomically folds usage into the accumulator.
    pub fn add_usage(&self, usage: &Usage) {
        let mut inner = self.lock();
        inner.usage = inner.usage.add(usage);
    }

    pub fn usage(&self) -> Usage {
        self.lock().usage
    }

    /// The most recently written (key, value) pair, if any.
    pub fn last_written(&self) -> Option<(String, Value)> {
        let inner = self.lock();
        let key = inner.last_written.clone()?;
        let value = inner.values.get(&key).cloned()?;
        Some((key, value))
    }

    /// Substitutes every `{{key}}` with the display-stringified value at
    /// `key`; a missing key resolves to the empty string.
    pub fn resolve(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            match after.find("}}") {
                Some(close) => {
                    let key = after[..close].trim();
                    if let Some(value) = self.get(key) {
                        out.push_str(&display_value(&value));
                    }
                    rest = &after[close + 2..];
                }
                None => {
                    // Unterminated placeholder: keep the raw text.
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// JSON-valued template resolution: a template that is exactly one
    /// `{{key}}` yields the stored value directly (missing → `null`); any
    /// other template resolves to a JSON string.
    pub fn resolve_json(&self, template: &str) -> Value {
        let trimmed = template.trim();
        if let Some(key) = single_placeholder(trimmed) {
            return self.get(key).unwrap_or(Value::Null);
        }
        Value::String(self.resolve(template))
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("WorkflowContext")
            .field("keys", &inner.values.keys().collect::<Vec<_>>())
            .field("usage", &inner.usage)
            .finish()
    }
}

/// `fmt`-style stringification: strings render without quotes, everything
/// else as compact JSON.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn single_placeholder(s: &str) -> Option<&str> {
    let body = s.strip_prefix("{{")?.strip_suffix("}}")?;
    let key = body.trim();
    // A second placeholder means this is not a single-key template.
    if key.contains("{{") || key.contains("}}") {
        return None;
    }
    Some(key)
}
