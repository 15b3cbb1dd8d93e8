//! The `LlmDriver` trait -- the external collaborator that actually talks
//! to an LLM-backed coding agent.
//!
//! The core components (classifier, resolver, queue, supervisor) depend
//! only on this trait, which is specified purely by interface:
//! `send(session_id, prompt, project_path, agent_persona)` plus
//! `stream`/`complete`/`error` events keyed by session id, and
//! `cancel_current()`. This module defines that interface as an
//! object-safe trait, grounded in the same shape as the `Harness` trait
//! this workspace already used for agent adapters, plus one concrete
//! subprocess-backed implementation and a scripted test double so the
//! workspace builds and runs end-to-end.
//!
//! # Design choice: request/stream bundling
//!
//! A fire-and-forget `send` whose `stream`/`complete`/`error` events arrive
//! later on a separate subscription does not translate into an object-safe
//! Rust trait without an external event-bus type threaded through every
//! caller. Instead, `send` returns the per-session event stream directly --
//! the same request-keyed-by-session-id semantics, collapsed into one call.
//! See DESIGN.md for the full rationale.

pub mod scripted;
pub mod subprocess;

use std::path::Path;
use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

pub use scripted::{ScriptedDriver, ScriptedResponse};
pub use subprocess::SubprocessDriver;

/// One event in a session's reply stream. Every variant carries the
/// `session_id` the caller passed to `send`, so that a driver backed by
/// multiple in-flight sessions (or late callbacks after a cancel) can be
/// demultiplexed by the caller. `foreman-core`'s queue engine only ever has
/// one session in flight per project at a time, but the field is
/// load-bearing: a cancelled session's late events are dropped by comparing
/// `session_id` against the session the caller is still expecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmEvent {
    /// An incremental chunk of content, forwarded as `task-progress`.
    Stream { session_id: String, content: String },
    /// The session finished successfully with the given full content.
    Complete { session_id: String, content: String },
    /// The session ended in error.
    Error { session_id: String, error: String },
}

impl LlmEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Stream { session_id, .. }
            | Self::Complete { session_id, .. }
            | Self::Error { session_id, .. } => session_id,
        }
    }
}

/// Adapter interface for driving an LLM-backed coding agent.
///
/// Implementors translate a single prompt, under a chosen persona, into a
/// stream of [`LlmEvent`]s. At most one session may be in flight per driver
/// instance at a time; callers must await a session's `Complete`/`Error`
/// (or call [`LlmDriver::cancel_current`]) before sending another.
#[async_trait]
pub trait LlmDriver: Send + Sync {
    /// Human-readable name for this driver (e.g. "subprocess", "scripted").
    fn name(&self) -> &str;

    /// Send a prompt under the given agent persona and return the event
    /// stream for that session. The stream ends after yielding exactly one
    /// of `Complete` or `Error` (possibly preceded by any number of
    /// `Stream` chunks).
    async fn send(
        &self,
        session_id: &str,
        prompt: &str,
        project_path: &Path,
        agent_persona: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = LlmEvent> + Send>>>;

    /// Cancel whatever session is currently in flight, if any. Idempotent.
    async fn cancel_current(&self) -> Result<()>;
}

// Compile-time assertion: LlmDriver must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn LlmDriver) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_event_session_id_accessor() {
        let stream = LlmEvent::Stream {
            session_id: "task_1".to_string(),
            content: "hi".to_string(),
        };
        assert_eq!(stream.session_id(), "task_1");

        let complete = LlmEvent::Complete {
            session_id: "task_2".to_string(),
            content: "done".to_string(),
        };
        assert_eq!(complete.session_id(), "task_2");

        let error = LlmEvent::Error {
            session_id: "task_3".to_string(),
            error: "boom".to_string(),
        };
        assert_eq!(error.session_id(), "task_3");
    }
}
