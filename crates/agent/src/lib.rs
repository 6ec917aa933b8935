//! The conversation agent for Parley.
//!
//! A turn follows a **Thought → Action → Observation** cycle:
//!
//! 1. **Receive** a user message, optionally with an image
//! 2. **Build context** (system prompt + offered tools + recent history)
//! 3. **Ask the model** for an answer or a tool request
//! 4. **If tool request**: run the tool, feed the observation back, go to 3
//! 5. **If answer**: persist it and finish the turn
//!
//! The cycle ends on an answer, a user stop, or an exhausted step budget.
//! [`ChatService`] wraps the loop with persistence, per-session ordering and
//! the history cache.

pub mod intent;
pub mod prompt;
pub mod reasoning;
pub mod scheduler;
pub mod scratchpad;
pub mod service;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use intent::{ActionRequest, Intent};
pub use reasoning::{LoopSettings, LoopState, ReasoningLoop, TurnInput, TurnOutcome};
pub use scheduler::{TurnPermit, TurnScheduler};
pub use scratchpad::{Scratchpad, TraceEntry, TraceKind};
pub use service::{ChatService, ServiceParts, TurnReply, STOPPED_MARKER};
pub use stream_event::AgentStreamEvent;
