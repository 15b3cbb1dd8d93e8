//! Control-plane crate: the four cooperating components that drive
//! autonomous multi-agent task execution to a terminal state --
//! error classification, output quality assessment, the task queue
//! engine, and the autonomous supervisor loop -- plus the `LlmDriver`
//! collaborator interface they all depend on.

pub mod classifier;
pub mod llm;
pub mod queue;
pub mod resolver;
pub mod supervisor;
