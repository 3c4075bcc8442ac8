//! Agent implementations: the LLM loop, the network router, and background
//! spawning.
//!
//! # Main types
//!
//! - [`LlmAgent`]: Drives the iterative LLM ↔ tool-call loop over a provider
//!   and a tool registry.
//! - [`Network`]: Exposes subagents as synthetic `agent_<name>` tools and
//!   delegates through the same loop; networks nest.
//! - [`spawn`] / [`AgentHandle`]: Runs any agent on an independent task flow
//!   with observable state, a done latch, and cooperative cancellation.

mod engine;
mod llm_agent;
mod network;
mod spawn;

pub use llm_agent::{LlmAgent, DEFAULT_MAX_ITERATIONS};
pub use network::{Network, AGENT_TOOL_PREFIX};
pub use spawn::{spawn, AgentHandle, HandleState};
