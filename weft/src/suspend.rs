//! Suspend/resume protocol: a processor hook pauses execution, a human
//! supplies input, and the captured loop continues in-process.
//!
//! A hook returns [`HookAction::Suspend`](crate::processor::HookAction) with
//! an opaque payload; the loop wraps the captured continuation in a
//! [`Suspension`] and surfaces it as
//! [`AgentError::Suspended`](crate::error::AgentError). The host inspects
//! [`Suspension::payload`], shows whatever UI it wants, and calls
//! [`Suspension::resume`] exactly once with the response. Resuming injects the
//! response into the conversation (a user message for LLM-phase suspensions, a
//! synthetic tool result for tool-phase ones) and drives the loop to a final
//! result. Durability is out of scope: the continuation lives in this process.

use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::AgentError;
use crate::task::AgentResult;

/// The captured continuation: consumes the human response, returns the final
/// result of the resumed execution.
pub type ResumeFn = Box<dyn FnOnce(String) -> BoxFuture<'static, Result<AgentResult, AgentError>> + Send>;

/// A paused execution: the hook that paused it, the payload it surfaced, and
/// a single-use resume closure.
pub struct Suspension {
    step: String,
    payload: Value,
    resume: Mutex<Option<ResumeFn>>,
}

impl Suspension {
    pub(crate) fn new(step: impl Into<String>, payload: Value, resume: ResumeFn) -> Self {
        Self {
            step: step.into(),
            payload,
            resume: Mutex::new(Some(resume)),
        }
    }

    /// Name of the processor hook that raised the suspension.
    pub fn step(&self) -> &str {
        &self.step
    }

    /// Opaque payload the hook surfaced for the human.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Resumes the captured execution with the given response.
    ///
    /// Single-use: a second call returns
    /// [`AgentError::AlreadyResumed`]. Not idempotent and not meant to be
    /// raced from multiple tasks.
    pub async fn resume(&self, input: impl Into<String>) -> Result<AgentResult, AgentError> {
        let f = {
            let mut slot = match self.resume.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take().ok_or(AgentError::AlreadyResumed)?
        };
        f(input.into()).await
    }
}

impl std::fmt::Debug for Suspension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let consumed = match self.resume.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        };
        f.debug_struct("Suspension")
            .field("step", &self.step)
            .field("payload", &self.payload)
            .field("resumed", &consumed)
            .finish()
    }
}
