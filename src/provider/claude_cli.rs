//! Subprocess backend driving the `claude` CLI.
//!
//! Multi-turn conversation via `--resume`:
//!   first turn:  `claude -p MSG --append-system-prompt ... --output-format stream-json ...`
//!                the session id from the `system`/`init` line is yielded as
//!                a `session_id` carrier before any text.
//!   later turns: `claude -p MSG --resume <handle> --output-format stream-json ...`
//!                the CLI maintains history internally, so `history` in the
//!                request is ignored.
//!
//! The CLI runs its own tools; those executions are opaque here, so this
//! backend never emits `tool_start` or `tool_done`.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

use crate::event::Event;

use super::{EventStream, TurnRequest};

/// Backend that spawns the `claude` CLI per turn.
pub struct ClaudeCliProvider {
    bin: String,
    model: String,
}

impl ClaudeCliProvider {
    pub fn new(bin: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            model: model.into(),
        }
    }

    pub(super) fn execute_turn(&self, request: TurnRequest) -> EventStream {
        let bin = self.bin.clone();
        let model = self.model.clone();
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            run_turn(bin, model, request, tx).await;
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

async fn run_turn(bin: String, model: String, request: TurnRequest, tx: mpsc::Sender<Event>) {
    let mut cmd = Command::new(&bin);
    cmd.arg("-p")
        .arg(&request.message)
        .args([
            "--output-format",
            "stream-json",
            "--verbose",
            "--include-partial-messages",
            "--dangerously-skip-permissions",
            "--allowedTools",
            "all",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Prevent nested CLI sessions from blocking
    cmd.env_remove("CLAUDECODE").env_remove("CLAUDE_CODE");

    if let Some(handle) = &request.resume_handle {
        cmd.args(["--resume", handle]);
    } else if !request.system_prompt.is_empty() {
        cmd.args(["--append-system-prompt", &request.system_prompt]);
    }

    info!(
        model = %model,
        resume = request.resume_handle.is_some(),
        "turn started"
    );

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(bin = %bin, error = %e, "failed to spawn claude CLI");
            let _ = tx.send(Event::error(format!("failed to spawn {bin}: {e}"))).await;
            return;
        }
    };

    let Some(stdout) = child.stdout.take() else {
        let _ = tx.send(Event::error("claude CLI stdout was not piped")).await;
        return;
    };
    let stderr = child.stderr.take();

    let mut lines = BufReader::new(stdout).lines();
    let mut handle_emitted = false;
    let mut in_text_block = false;
    let mut terminated = false;

    loop {
        // A closed channel means the consumer is gone (cancellation or
        // drop); kill the child instead of waiting for more output.
        let line = tokio::select! {
            _ = tx.closed() => {
                info!("turn abandoned, killing claude CLI");
                let _ = child.kill().await;
                return;
            }
            next = lines.next_line() => match next {
                Ok(Some(line)) => line,
                _ => break,
            },
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            debug!(line = %line.chars().take(120).collect::<String>(), "non-JSON line");
            continue;
        };

        match value.get("type").and_then(|t| t.as_str()) {
            Some("system") if value.get("subtype").and_then(|s| s.as_str()) == Some("init") => {
                if let Some(id) = value.get("session_id").and_then(|s| s.as_str()) {
                    if !handle_emitted {
                        handle_emitted = true;
                        debug!(handle = %id, "captured resumption handle");
                        if tx
                            .send(Event::SessionId { id: id.to_string() })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
            Some("stream_event") => {
                let raw = value.get("event").cloned().unwrap_or_default();
                match raw.get("type").and_then(|t| t.as_str()) {
                    Some("content_block_start") => {
                        let block_type = raw
                            .get("content_block")
                            .and_then(|b| b.get("type"))
                            .and_then(|t| t.as_str());
                        in_text_block = block_type == Some("text");
                    }
                    Some("content_block_delta") => {
                        let delta = raw.get("delta").cloned().unwrap_or_default();
                        if delta.get("type").and_then(|t| t.as_str()) == Some("text_delta")
                            && in_text_block
                        {
                            let text = delta
                                .get("text")
                                .and_then(|t| t.as_str())
                                .unwrap_or_default();
                            if tx.send(Event::text(text)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some("message_stop") => in_text_block = false,
                    _ => {}
                }
            }
            Some("result") => {
                in_text_block = false;
                if let Some(id) = value.get("session_id").and_then(|s| s.as_str()) {
                    if !handle_emitted {
                        handle_emitted = true;
                        if tx
                            .send(Event::SessionId { id: id.to_string() })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
                info!("turn done");
                terminated = true;
                let _ = tx.send(Event::Done).await;
                break;
            }
            _ => {}
        }
    }

    let status = child.wait().await;

    let mut stderr_text = String::new();
    if let Some(mut stderr) = stderr {
        let _ = stderr.read_to_string(&mut stderr_text).await;
    }
    let stderr_text = stderr_text.trim();

    match status {
        Ok(status) if !status.success() => {
            if !stderr_text.is_empty() {
                error!(stderr = %stderr_text.chars().take(500).collect::<String>(), "claude CLI stderr");
            }
            if !terminated {
                let message = if stderr_text.is_empty() {
                    format!("claude CLI exited with {status}")
                } else {
                    stderr_text.to_string()
                };
                let _ = tx.send(Event::error(message)).await;
            }
        }
        Ok(_) => {
            if !terminated {
                let _ = tx.send(Event::Done).await;
            }
        }
        Err(e) => {
            if !terminated {
                let _ = tx.send(Event::error(format!("claude CLI wait failed: {e}"))).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn request(message: &str) -> TurnRequest {
        TurnRequest {
            system_prompt: String::new(),
            history: Vec::new(),
            message: message.to_string(),
            resume_handle: None,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropped_stream_kills_the_child() {
        use std::os::unix::fs::PermissionsExt;

        // Stand-in binary that records its pid and then blocks.
        let temp = TempDir::new().unwrap();
        let pid_file = temp.path().join("pid");
        let script_path = temp.path().join("fake-cli");
        std::fs::write(
            &script_path,
            format!("#!/bin/sh\necho $$ > {}\nsleep 30\n", pid_file.display()),
        )
        .unwrap();
        let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script_path, perms).unwrap();

        let provider =
            ClaudeCliProvider::new(script_path.to_str().unwrap(), "test-model");
        let stream = provider.execute_turn(request("hi"));

        let mut pid = None;
        for _ in 0..200 {
            if let Ok(text) = std::fs::read_to_string(&pid_file) {
                if let Ok(parsed) = text.trim().parse::<u32>() {
                    pid = Some(parsed);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let pid = pid.expect("child never started");

        drop(stream);

        let proc_path = format!("/proc/{pid}");
        for _ in 0..200 {
            if !std::path::Path::new(&proc_path).exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("child still running after the stream was dropped");
    }
}
