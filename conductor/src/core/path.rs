//! Stable addresses for frames nested inside a conversation run.
//!
//! A frame path is `<conversationId>/<leaf>`, where the leaf is `plan`,
//! `code`, or `task-<taskId>`. Interrupts record the path of the frame that
//! raised them so a resume is routed back to exactly that frame.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FramePath(String);

impl FramePath {
    pub fn plan(conversation_id: &str) -> Self {
        Self(format!("{conversation_id}/plan"))
    }

    pub fn code(conversation_id: &str) -> Self {
        Self(format!("{conversation_id}/code"))
    }

    pub fn task(conversation_id: &str, task_id: &str) -> Self {
        Self(format!("{conversation_id}/task-{task_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Conversation id (everything before the first `/`).
    pub fn conversation_id(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(cid, _)| cid)
    }

    /// Frame leaf (everything after the first `/`).
    pub fn leaf(&self) -> &str {
        self.0.split_once('/').map_or("", |(_, leaf)| leaf)
    }
}

impl fmt::Display for FramePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
