//! Engine configuration stored under `.conductor/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Engine configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Revision rounds a task may spend before approval is forced.
    pub max_task_retries: u32,

    /// Context-collection rounds allowed per turn before `context` degrades to `plan`.
    pub max_context_rounds: u32,

    /// Human-requested plan revisions before planning fails.
    pub max_plan_revisions: u32,

    /// Wall-clock limit for one agent call, in seconds.
    pub agent_timeout_secs: u64,

    /// How long to wait for a human answer, in seconds. `0` waits forever.
    pub input_timeout_secs: u64,

    /// Attempts for transient agent failures (empty or error responses).
    pub transient_attempts: u32,

    /// Base delay for exponential backoff between transient attempts.
    pub backoff_base_ms: u64,

    /// Attempts to obtain output that passes schema validation.
    pub structured_attempts: u32,

    /// Tool-call rounds allowed within one agent call.
    pub max_tool_rounds: u32,

    /// Byte budget for rendered prompts.
    pub prompt_budget_bytes: usize,

    /// Truncate agent process stdout/stderr beyond this many bytes.
    pub agent_output_limit_bytes: usize,

    pub agent: AgentCommandConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentCommandConfig {
    /// Model CLI invocation (e.g. `["codex","exec"]`).
    pub command: Vec<String>,
}

impl Default for AgentCommandConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string()],
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_task_retries: 2,
            max_context_rounds: 2,
            max_plan_revisions: 3,
            agent_timeout_secs: 10 * 60,
            input_timeout_secs: 0,
            transient_attempts: 3,
            backoff_base_ms: 500,
            structured_attempts: 2,
            max_tool_rounds: 5,
            prompt_budget_bytes: 60_000,
            agent_output_limit_bytes: 200_000,
            agent: AgentCommandConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.agent_timeout_secs == 0 {
            return Err(anyhow!("agent_timeout_secs must be > 0"));
        }
        if self.transient_attempts == 0 {
            return Err(anyhow!("transient_attempts must be > 0"));
        }
        if self.structured_attempts == 0 {
            return Err(anyhow!("structured_attempts must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.agent_output_limit_bytes == 0 {
            return Err(anyhow!("agent_output_limit_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    /// `None` means wait for input indefinitely.
    pub fn input_timeout(&self) -> Option<Duration> {
        (self.input_timeout_secs > 0).then(|| Duration::from_secs(self.input_timeout_secs))
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = EngineConfig {
            max_task_retries: 4,
            input_timeout_secs: 30,
            ..EngineConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_plan_revisions = 1\n[agent]\ncommand = [\"my-agent\"]\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_plan_revisions, 1);
        assert_eq!(cfg.max_task_retries, 2);
        assert_eq!(cfg.agent.command, vec!["my-agent".to_string()]);
        assert_eq!(cfg.input_timeout(), None);
    }

    #[test]
    fn rejects_empty_agent_command() {
        let cfg = EngineConfig {
            agent: AgentCommandConfig {
                command: Vec::new(),
            },
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
