//! Per-attempt task artifacts under `.conductor/tasks/`.
//!
//! Layout: `<conversationId>/<frame leaf>/<attempt>/{proposal,evaluation}.json`.
//! These are product artifacts for humans and UIs; the engine never reads them back.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::path::FramePath;
use crate::core::types::{Evaluation, FilePlan};

#[derive(Debug, Clone)]
pub struct TaskLog {
    dir: PathBuf,
}

impl TaskLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn attempt_dir(&self, frame: &FramePath, attempt: u32) -> PathBuf {
        self.dir
            .join(frame.conversation_id())
            .join(frame.leaf().replace('/', "_"))
            .join(attempt.to_string())
    }

    pub fn write_proposal(
        &self,
        frame: &FramePath,
        attempt: u32,
        plan: &FilePlan,
    ) -> Result<PathBuf> {
        let path = self.attempt_dir(frame, attempt).join("proposal.json");
        write_json(&path, plan)?;
        Ok(path)
    }

    pub fn write_evaluation(
        &self,
        frame: &FramePath,
        attempt: u32,
        evaluation: &Evaluation,
    ) -> Result<PathBuf> {
        let path = self.attempt_dir(frame, attempt).join("evaluation.json");
        write_json(&path, evaluation)?;
        Ok(path)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create task log dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
