//! A deterministic, in-memory [`LlmDriver`] used by property and scenario
//! tests -- no subprocess, no network. Grounded in the same role the
//! `FakeHarness` test double played for `Harness`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::Stream;
use tokio::sync::Mutex;

use super::{LlmDriver, LlmEvent};

/// One pre-scripted reply for a single `send` call.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Complete immediately with the given content, no intermediate chunks.
    Complete(String),
    /// Stream the given chunks, then complete with the given final content.
    Stream(Vec<String>, String),
    /// Fail with the given error text.
    Error(String),
}

/// A record of one `send` invocation, kept for test assertions.
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub session_id: String,
    pub prompt: String,
    pub project_path: PathBuf,
    pub agent_persona: String,
}

/// An [`LlmDriver`] that replays a fixed queue of [`ScriptedResponse`]s,
/// one per call to `send`, in order. Recording every call lets tests assert
/// on exactly what prompt/persona the queue engine built.
pub struct ScriptedDriver {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    calls: Mutex<Vec<ScriptedCall>>,
}

impl ScriptedDriver {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A driver that always completes immediately with `"ok"`.
    pub fn always_ok() -> Self {
        Self::new(vec![])
    }

    pub async fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl LlmDriver for ScriptedDriver {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        session_id: &str,
        prompt: &str,
        project_path: &Path,
        agent_persona: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = LlmEvent> + Send>>> {
        self.calls.lock().await.push(ScriptedCall {
            session_id: session_id.to_string(),
            prompt: prompt.to_string(),
            project_path: project_path.to_path_buf(),
            agent_persona: agent_persona.to_string(),
        });

        let response = self
            .responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| ScriptedResponse::Complete("ok".to_string()));

        let session_id = session_id.to_string();
        let events: Vec<LlmEvent> = match response {
            ScriptedResponse::Complete(content) => vec![LlmEvent::Complete {
                session_id,
                content,
            }],
            ScriptedResponse::Stream(chunks, content) => chunks
                .into_iter()
                .map(|content| LlmEvent::Stream {
                    session_id: session_id.clone(),
                    content,
                })
                .chain(std::iter::once(LlmEvent::Complete {
                    session_id: session_id.clone(),
                    content,
                }))
                .collect(),
            ScriptedResponse::Error(error) => vec![LlmEvent::Error { session_id, error }],
        };

        Ok(Box::pin(futures::stream::iter(events)))
    }

    async fn cancel_current(&self) -> Result<()> {
        Ok(())
    }
}

/// An [`LlmDriver`] that always refuses to send, used to exercise the
/// "LLM driver unavailable" error path without a subprocess.
pub struct NullDriver;

#[async_trait]
impl LlmDriver for NullDriver {
    fn name(&self) -> &str {
        "null"
    }

    async fn send(
        &self,
        _session_id: &str,
        _prompt: &str,
        _project_path: &Path,
        _agent_persona: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = LlmEvent> + Send>>> {
        bail!("null driver cannot send: no LLM backend configured")
    }

    async fn cancel_current(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn scripted_driver_replays_in_order() {
        let driver = ScriptedDriver::new(vec![
            ScriptedResponse::Complete("first".to_string()),
            ScriptedResponse::Error("second failed".to_string()),
        ]);

        let events: Vec<LlmEvent> = driver
            .send("s1", "p1", Path::new("/tmp"), "developer")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            events,
            vec![LlmEvent::Complete {
                session_id: "s1".to_string(),
                content: "first".to_string()
            }]
        );

        let events: Vec<LlmEvent> = driver
            .send("s2", "p2", Path::new("/tmp"), "developer")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            events,
            vec![LlmEvent::Error {
                session_id: "s2".to_string(),
                error: "second failed".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn scripted_driver_defaults_to_ok_when_exhausted() {
        let driver = ScriptedDriver::always_ok();
        let events: Vec<LlmEvent> = driver
            .send("s1", "p1", Path::new("/tmp"), "developer")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            events,
            vec![LlmEvent::Complete {
                session_id: "s1".to_string(),
                content: "ok".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn scripted_driver_records_calls() {
        let driver = ScriptedDriver::always_ok();
        driver
            .send("s1", "hello world", Path::new("/work"), "tester")
            .await
            .unwrap();

        let calls = driver.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].session_id, "s1");
        assert_eq!(calls[0].prompt, "hello world");
        assert_eq!(calls[0].agent_persona, "tester");
    }

    #[tokio::test]
    async fn null_driver_refuses_to_send() {
        let driver = NullDriver;
        let result = driver.send("s1", "p1", Path::new("/tmp"), "developer").await;
        assert!(result.is_err());
    }
}
