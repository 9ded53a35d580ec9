//! Typed errors at the seams where callers branch on the failure kind.
//!
//! Plumbing code (config, checkpoints, CLI) uses `anyhow`; the types here are
//! the ones the engine inspects to decide what a failure means for the turn.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of one agent invocation after the invoker's own retries.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Empty or error response from the backend. Retried with backoff by the invoker.
    #[error("transient agent failure: {0}")]
    Transient(String),
    /// Output never matched the expected structure within the attempt bound.
    #[error("invalid agent output after {attempts} attempt(s): {message}")]
    InvalidOutput { attempts: u32, message: String },
    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),
    #[error("agent call cancelled")]
    Cancelled,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Failure of a single file operation. Aborts the rest of the plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FileOperationError {
    #[error("{path}: file does not exist")]
    MissingFile { path: String },
    #[error("{path}: file already exists")]
    AlreadyExists { path: String },
    #[error("{path}: {detail}")]
    RangeOutOfBounds { path: String, detail: String },
    #[error("{path}: overlapping edit ranges")]
    OverlappingEdits { path: String },
    #[error("{path}: patch does not apply: {detail}")]
    ContextMismatch { path: String, detail: String },
    #[error("{path}: path escapes the workspace")]
    OutsideWorkspace { path: String },
    #[error("{path}: {detail}")]
    Io { path: String, detail: String },
}

/// Which phase of a turn produced the fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    ClassificationFailure,
    ContextFailure,
    PlanningFailure,
    GenerationFailure,
    EvaluationFailure,
    FileOperationFailure,
    ChatFailure,
    InputTimeout,
    Cancelled,
    CheckpointFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ClassificationFailure => "classificationFailure",
            ErrorKind::ContextFailure => "contextFailure",
            ErrorKind::PlanningFailure => "planningFailure",
            ErrorKind::GenerationFailure => "generationFailure",
            ErrorKind::EvaluationFailure => "evaluationFailure",
            ErrorKind::FileOperationFailure => "fileOperationFailure",
            ErrorKind::ChatFailure => "chatFailure",
            ErrorKind::InputTimeout => "inputTimeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::CheckpointFailure => "checkpointFailure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal error for the current turn. Carried by the terminal `turnFailed` event.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TurnError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TurnError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Escalate an agent failure into the phase's error kind.
    ///
    /// Cancellation keeps its own kind regardless of the phase it hit.
    pub fn from_agent(kind: ErrorKind, err: &AgentError) -> Self {
        match err {
            AgentError::Cancelled => Self::new(ErrorKind::Cancelled, "turn cancelled"),
            other => Self::new(kind, other.to_string()),
        }
    }

    pub fn checkpoint(err: &anyhow::Error) -> Self {
        Self::new(ErrorKind::CheckpointFailure, format!("{err:#}"))
    }
}

impl From<FileOperationError> for TurnError {
    fn from(err: FileOperationError) -> Self {
        Self::new(ErrorKind::FileOperationFailure, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_agent_error_keeps_cancelled_kind() {
        let err = TurnError::from_agent(ErrorKind::PlanningFailure, &AgentError::Cancelled);
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[test]
    fn kind_serializes_as_wire_name() {
        let json = serde_json::to_string(&ErrorKind::FileOperationFailure).expect("json");
        assert_eq!(json, "\"fileOperationFailure\"");
        assert_eq!(ErrorKind::FileOperationFailure.to_string(), "fileOperationFailure");
    }
}
