//! Durable run-record storage (`.conductor/conversations/<id>.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::record::RunRecord;

/// Directory of per-conversation run records.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn record_path(&self, conversation_id: &str) -> Result<PathBuf> {
        if conversation_id.is_empty()
            || !conversation_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(anyhow!("invalid conversation id {conversation_id:?}"));
        }
        Ok(self.dir.join(format!("{conversation_id}.json")))
    }

    /// Load a run record; `None` if the conversation is unknown.
    pub fn load(&self, conversation_id: &str) -> Result<Option<RunRecord>> {
        let path = self.record_path(conversation_id)?;
        if !path.exists() {
            return Ok(None);
        }
        load_record(&path).map(Some)
    }

    pub fn save(&self, record: &RunRecord) -> Result<()> {
        let path = self.record_path(&record.conversation_id)?;
        write_record(&path, record)
    }

    /// Ids of all stored conversations, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let entries =
            fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))?;
        for entry in entries {
            let path = entry.context("read checkpoint entry")?.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn load_record(path: &Path) -> Result<RunRecord> {
    debug!(path = %path.display(), "loading run record");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run record {}", path.display()))?;
    let record: RunRecord = serde_json::from_str(&contents)
        .with_context(|| format!("parse run record {}", path.display()))?;
    debug!(status = ?record.status, stage = ?record.stage, "run record loaded");
    Ok(record)
}

/// Atomically write a run record (temp file + rename).
fn write_record(path: &Path, record: &RunRecord) -> Result<()> {
    debug!(
        path = %path.display(),
        status = ?record.status,
        stage = ?record.stage,
        "writing run record"
    );
    let mut buf = serde_json::to_string_pretty(record)?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("run record path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp run record {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace run record {}", path.display()))?;
    Ok(())
}
