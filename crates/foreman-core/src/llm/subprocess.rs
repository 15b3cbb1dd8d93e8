//! Subprocess-backed [`LlmDriver`]: shells out to an external agent CLI and
//! demultiplexes its line-oriented stdout into [`LlmEvent`]s.
//!
//! Grounded in the same spawn/stream/kill shape as this workspace's former
//! Claude Code adapter, generalized from a per-pid process map to a single
//! current-session slot (at most one LLM call in flight per process) and
//! from JSONL tool-call events to the narrower stream/complete/error union
//! this driver interface exposes.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{LlmDriver, LlmEvent};

/// The in-flight session, if any. Holding the child lets `cancel_current`
/// kill it; holding the session id lets a cancel distinguish "nothing
/// running" from "something running that must be killed".
struct CurrentSession {
    session_id: String,
    child: Child,
}

/// Drives an external agent CLI as a subprocess, one line of stdout per
/// [`LlmEvent::Stream`] chunk, with the final exit status deciding whether
/// the session ends in `Complete` or `Error`.
pub struct SubprocessDriver {
    binary_path: String,
    args: Vec<String>,
    current: Arc<Mutex<Option<CurrentSession>>>,
}

impl SubprocessDriver {
    /// Create a driver that will look for `binary` on `$PATH`, invoked with
    /// `args` (the persona and prompt are not implicitly added -- callers
    /// that need persona-specific flags should bake them into `args` or
    /// wrap this driver).
    pub fn new(binary: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            binary_path: binary.into(),
            args,
            current: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl LlmDriver for SubprocessDriver {
    fn name(&self) -> &str {
        "subprocess"
    }

    async fn send(
        &self,
        session_id: &str,
        prompt: &str,
        project_path: &Path,
        agent_persona: &str,
    ) -> Result<std::pin::Pin<Box<dyn Stream<Item = LlmEvent> + Send>>> {
        {
            let current = self.current.lock().await;
            if current.is_some() {
                bail!(
                    "a session is already in flight; call cancel_current() before sending another"
                );
            }
        }

        let mut cmd = tokio::process::Command::new(&self.binary_path);
        cmd.args(&self.args)
            .arg("--persona")
            .arg(agent_persona)
            .current_dir(project_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn agent binary '{}'", self.binary_path))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                warn!(session_id, error = %e, "failed to write prompt to agent stdin");
            }
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .context("spawned agent process has no stdout")?;

        {
            let mut current = self.current.lock().await;
            *current = Some(CurrentSession {
                session_id: session_id.to_string(),
                child,
            });
        }

        let session_id = session_id.to_string();
        let current_slot = Arc::clone(&self.current);
        let stream = async_stream::stream! {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            let mut buf = String::new();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.is_empty() {
                            continue;
                        }
                        buf.push_str(&line);
                        buf.push('\n');
                        yield LlmEvent::Stream {
                            session_id: session_id.clone(),
                            content: line,
                        };
                    }
                    Ok(None) => break,
                    Err(e) => {
                        if take_if_current(&current_slot, &session_id).await {
                            yield LlmEvent::Error {
                                session_id: session_id.clone(),
                                error: format!("stdout read error: {e}"),
                            };
                        }
                        return;
                    }
                }
            }

            if take_if_current(&current_slot, &session_id).await {
                yield LlmEvent::Complete {
                    session_id: session_id.clone(),
                    content: buf.trim_end().to_string(),
                };
            }
        };

        Ok(Box::pin(stream))
    }

    async fn cancel_current(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        if let Some(mut session) = current.take() {
            debug!(session_id = %session.session_id, "cancelling in-flight agent session");
            if let Err(e) = session.child.kill().await {
                warn!(session_id = %session.session_id, error = %e, "failed to kill agent process");
            }
        }
        Ok(())
    }
}

/// Clear the current-session slot iff it still holds `session_id`, returning
/// whether it did. A `cancel_current()` call racing the tail of the stream
/// already took the slot (and killed the child) by the time stdout hits EOF,
/// so the stream's own terminal event must check before yielding -- the
/// session id distinguishes a genuine completion from a late callback after
/// cancel.
async fn take_if_current(slot: &Arc<Mutex<Option<CurrentSession>>>, session_id: &str) -> bool {
    let mut current = slot.lock().await;
    match current.as_ref() {
        Some(session) if session.session_id == session_id => {
            *current = None;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn send_streams_lines_and_completes() {
        let tmp = tempfile::tempdir().unwrap();
        let script_path = tmp.path().join("fake_agent.sh");
        std::fs::write(&script_path, "#!/bin/sh\necho line-one\necho line-two\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let driver = SubprocessDriver::new(script_path.to_str().unwrap(), vec![]);
        let events: Vec<LlmEvent> = driver
            .send("task_1", "hello", tmp.path(), "developer")
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            events[0],
            LlmEvent::Stream {
                session_id: "task_1".to_string(),
                content: "line-one".to_string()
            }
        );
        assert!(matches!(events.last(), Some(LlmEvent::Complete { .. })));
    }

    #[tokio::test]
    async fn second_send_without_cancel_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let script_path = tmp.path().join("slow_agent.sh");
        std::fs::write(&script_path, "#!/bin/sh\nsleep 5\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let driver = SubprocessDriver::new(script_path.to_str().unwrap(), vec![]);
        let _first = driver
            .send("task_1", "hello", tmp.path(), "developer")
            .await
            .unwrap();

        let second = driver.send("task_2", "hello", tmp.path(), "developer").await;
        assert!(second.is_err());

        driver.cancel_current().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_current_kills_process() {
        let tmp = tempfile::tempdir().unwrap();
        let script_path = tmp.path().join("sleepy_agent.sh");
        std::fs::write(&script_path, "#!/bin/sh\nsleep 60\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let driver = SubprocessDriver::new(script_path.to_str().unwrap(), vec![]);
        let _ = driver
            .send("task_1", "hello", tmp.path(), "developer")
            .await
            .unwrap();

        driver.cancel_current().await.unwrap();
        // A second send should now succeed since the slot was freed.
        let result = driver.send("task_2", "hi", tmp.path(), "developer").await;
        assert!(result.is_ok());
        driver.cancel_current().await.unwrap();
    }
}
