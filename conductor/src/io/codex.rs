//! Model CLI backend for the [`Agent`] capability.
//!
//! Each call spawns the configured command (default `codex exec`), feeds it a
//! rendered transcript on stdin and reads the final message from the file
//! named by `--output-last-message`. Tool use is negotiated in-band: when
//! tools are offered the model answers either with `{"tool_calls": [...]}`
//! or with its final answer.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::agents::invoker::extract_json;
use crate::agents::{Agent, AgentReply, AgentRequest, ToolCall};
use crate::core::types::Role;
use crate::error::AgentError;
use crate::io::config::EngineConfig;
use crate::io::process::run_command_with_timeout;

const STDERR_TAIL_BYTES: usize = 2_000;

#[derive(Debug, Clone)]
pub struct CodexAgent {
    workdir: PathBuf,
    scratch_dir: PathBuf,
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

#[derive(Deserialize)]
struct ToolCallEnvelope {
    tool_calls: Vec<ToolCall>,
}

impl CodexAgent {
    pub fn new(
        workdir: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            workdir: workdir.into(),
            scratch_dir: scratch_dir.into(),
            command: config.agent.command.clone(),
            timeout: config.agent_timeout(),
            output_limit_bytes: config.agent_output_limit_bytes,
        }
    }

    /// Blocking body of one call. The child is killed once `abort` fires.
    #[instrument(skip_all, fields(role = request.role.as_str(), tools = request.tools.len()))]
    fn exec(
        &self,
        request: &AgentRequest,
        abort: &CancellationToken,
    ) -> Result<AgentReply, AgentError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| AgentError::Backend(anyhow!("agent.command is empty")))?;
        fs::create_dir_all(&self.scratch_dir)
            .with_context(|| format!("create scratch dir {}", self.scratch_dir.display()))?;

        let call_id = uuid::Uuid::new_v4();
        let output_path = self.scratch_dir.join(format!("{call_id}.out"));
        let schema_path = self.scratch_dir.join(format!("{call_id}.schema.json"));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--sandbox")
            .arg("read-only")
            .arg("--skip-git-repo-check");
        // Tool-call envelopes would not satisfy the answer schema, so the
        // schema is only enforced by the CLI when no tools are offered.
        if let Some(schema) = &request.output_schema
            && request.tools.is_empty()
        {
            let body = serde_json::to_vec_pretty(schema).context("serialize output schema")?;
            fs::write(&schema_path, body)
                .with_context(|| format!("write output schema {}", schema_path.display()))?;
            cmd.arg("--output-schema").arg(&schema_path);
        }
        cmd.arg("--output-last-message")
            .arg(&output_path)
            .arg("-")
            .current_dir(&self.workdir);

        info!("starting agent command");
        let transcript = render_transcript(request);
        let output = run_command_with_timeout(
            cmd,
            Some(transcript.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
            abort,
        )
        .context("run agent command")?;

        let answer = fs::read_to_string(&output_path).unwrap_or_default();
        let _ = fs::remove_file(&output_path);
        let _ = fs::remove_file(&schema_path);

        if output.aborted {
            return Err(AgentError::Cancelled);
        }
        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "agent command timed out");
            return Err(AgentError::Timeout(self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent command failed");
            return Err(AgentError::Transient(format!(
                "agent command exited with {:?}: {}",
                output.status.code(),
                output.stderr_tail(STDERR_TAIL_BYTES)
            )));
        }
        debug!(bytes = answer.len(), "agent command finished");
        parse_reply(&answer, !request.tools.is_empty())
    }
}

#[async_trait]
impl Agent for CodexAgent {
    async fn complete(&self, request: &AgentRequest) -> Result<AgentReply, AgentError> {
        let agent = self.clone();
        let request = request.clone();
        // Dropping this future (caller timeout or cancel) kills the child.
        let abort = CancellationToken::new();
        let _kill_on_drop = abort.clone().drop_guard();
        tokio::task::spawn_blocking(move || agent.exec(&request, &abort))
            .await
            .map_err(|err| AgentError::Backend(anyhow!("agent worker panicked: {err}")))?
    }
}

/// Prompt, history and tool instructions as one stdin document.
fn render_transcript(request: &AgentRequest) -> String {
    let mut out = String::new();
    if !request.history.is_empty() {
        out.push_str("<transcript>\n");
        for message in &request.history {
            let who = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            out.push_str(&format!("[{who}]\n{}\n\n", message.content.trim_end()));
        }
        out.push_str("</transcript>\n\n");
    }
    out.push_str(request.prompt.trim_end());
    out.push('\n');
    if !request.tools.is_empty() {
        let specs = serde_json::to_string_pretty(&request.tools).unwrap_or_default();
        out.push_str("\n<tools>\n");
        out.push_str(&specs);
        out.push_str(
            "\n</tools>\n\nTo inspect files, reply with ONLY \
             {\"tool_calls\": [{\"name\": ..., \"arguments\": {...}}]}. \
             Results will be returned in the transcript. \
             Otherwise reply with your final answer.\n",
        );
    }
    out
}

/// Interpret the model's final message.
///
/// Empty output counts as a transient failure.
pub fn parse_reply(text: &str, tools_offered: bool) -> Result<AgentReply, AgentError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AgentError::Transient("agent returned an empty response".to_string()));
    }
    if tools_offered
        && let Ok(value) = extract_json(trimmed)
        && let Ok(envelope) = serde_json::from_value::<ToolCallEnvelope>(value)
        && !envelope.tool_calls.is_empty()
    {
        return Ok(AgentReply::ToolCalls(envelope.tool_calls));
    }
    Ok(AgentReply::Text(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentRole, ToolSpec};
    use crate::core::types::Message;
    use serde_json::json;

    fn request(tools: Vec<ToolSpec>) -> AgentRequest {
        AgentRequest {
            role: AgentRole::Coder,
            prompt: "Do the task.".to_string(),
            history: vec![Message::user("earlier"), Message::tool("[read_file] body")],
            tools,
            output_schema: None,
        }
    }

    #[test]
    fn empty_reply_is_transient() {
        assert!(matches!(parse_reply("  \n", false), Err(AgentError::Transient(_))));
    }

    #[test]
    fn tool_envelope_is_only_recognized_when_tools_were_offered() {
        let text = r#"{"tool_calls": [{"name": "read_file", "arguments": {"path": "a"}}]}"#;
        match parse_reply(text, true).expect("reply") {
            AgentReply::ToolCalls(calls) => assert_eq!(calls[0].name, "read_file"),
            other => panic!("expected tool calls, got {other:?}"),
        }
        assert!(matches!(parse_reply(text, false), Ok(AgentReply::Text(_))));
        assert!(matches!(parse_reply(r#"{"summary": "x"}"#, true), Ok(AgentReply::Text(_))));
    }

    #[test]
    fn transcript_includes_history_and_tools() {
        let spec = ToolSpec {
            name: "read_file".to_string(),
            description: "Read".to_string(),
            parameters: json!({"type": "object"}),
        };
        let text = render_transcript(&request(vec![spec]));
        assert!(text.starts_with("<transcript>"));
        assert!(text.contains("[tool]\n[read_file] body"));
        assert!(text.contains("<tools>"));
        assert!(text.contains("tool_calls"));

        let plain = render_transcript(&request(Vec::new()));
        assert!(!plain.contains("<tools>"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_transient() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = EngineConfig::default();
        config.agent.command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "cat >/dev/null; exit 3".to_string(),
        ];
        let agent = CodexAgent::new(temp.path(), temp.path().join("scratch"), &config);
        let err = agent.complete(&request(Vec::new())).await.unwrap_err();
        assert!(matches!(err, AgentError::Transient(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropped_call_kills_the_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = EngineConfig::default();
        config.agent.command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "cat >/dev/null; sleep 1; touch finished".to_string(),
        ];
        let agent = CodexAgent::new(temp.path(), temp.path().join("scratch"), &config);

        let req = request(Vec::new());
        let call = agent.complete(&req);
        let elapsed = tokio::time::timeout(Duration::from_millis(200), call).await;
        assert!(elapsed.is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!temp.path().join("finished").exists());
    }
}
