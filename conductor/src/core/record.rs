//! The persisted run record: one per conversation.
//!
//! Every nested run is an explicit frame in this record, addressed by its
//! [`FramePath`]. The engine mutates the record and checkpoints it after each
//! transition, so a suspended run can be re-entered after a restart.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::path::FramePath;
use crate::core::transitions::TaskPhase;
use crate::core::types::{
    Classification, ConversationState, InterruptRequest, Message, ProjectPlan, TaskRunState,
};
use crate::error::TurnError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Active,
    AwaitingInput,
    Completed,
    Failed,
}

/// Top-level stage of the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Classify,
    Collect,
    Chat,
    Plan,
    Code,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlannerPhase {
    Propose,
    Approval,
    Feedback,
    Execute,
}

/// Summary of a finished plan step, fed into later steps' context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub task_id: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerFrame {
    pub path: FramePath,
    pub phase: PlannerPhase,
    pub plan: Option<ProjectPlan>,
    /// Planner-local history: proposals and human feedback.
    pub history: Vec<Message>,
    pub revisions: u32,
    /// Index of the next step to execute.
    pub next_step: usize,
    pub completed: Vec<StepSummary>,
}

impl PlannerFrame {
    pub fn new(conversation_id: &str) -> Self {
        Self {
            path: FramePath::plan(conversation_id),
            phase: PlannerPhase::Propose,
            plan: None,
            history: Vec::new(),
            revisions: 0,
            next_step: 0,
            completed: Vec::new(),
        }
    }
}

/// One task cycle. Lives in the record only while the task is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFrame {
    pub path: FramePath,
    pub task_id: Option<String>,
    pub description: String,
    pub phase: TaskPhase,
    pub state: TaskRunState,
    /// Number of proposals generated so far.
    pub attempt: u32,
    /// Operations of `state.last_plan` already applied.
    pub applied: usize,
}

impl TaskFrame {
    pub fn new(
        path: FramePath,
        task_id: Option<String>,
        description: String,
        state: TaskRunState,
    ) -> Self {
        Self {
            path,
            task_id,
            description,
            phase: TaskPhase::Generate,
            state,
            attempt: 0,
            applied: 0,
        }
    }
}

/// The interrupt a suspended run is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInterrupt {
    pub frame: FramePath,
    pub request_id: String,
    pub request: InterruptRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub conversation_id: String,
    pub status: RunStatus,
    pub stage: Stage,
    /// 1-indexed user turn.
    pub turn: u32,
    pub state: ConversationState,
    pub classification: Option<Classification>,
    pub planner: Option<PlannerFrame>,
    pub tasks: BTreeMap<FramePath, TaskFrame>,
    pub pending: Option<PendingInterrupt>,
    /// Counter for interrupt request ids.
    pub next_request: u64,
    pub error: Option<TurnError>,
}

impl RunRecord {
    /// Fresh record for a new conversation whose first turn is `prompt`.
    pub fn new(conversation_id: impl Into<String>, prompt: &str) -> Self {
        let mut state = ConversationState::default();
        state.message_history.push(Message::user(prompt));
        Self {
            conversation_id: conversation_id.into(),
            status: RunStatus::Active,
            stage: Stage::Classify,
            turn: 1,
            state,
            classification: None,
            planner: None,
            tasks: BTreeMap::new(),
            pending: None,
            next_request: 1,
            error: None,
        }
    }

    /// Start a new user turn on a completed conversation.
    pub fn begin_turn(&mut self, prompt: &str) {
        self.state.message_history.push(Message::user(prompt));
        self.state.context_retry_count = 0;
        self.turn += 1;
        self.stage = Stage::Classify;
        self.status = RunStatus::Active;
        self.classification = None;
        self.planner = None;
        self.tasks.clear();
        self.pending = None;
    }

    /// Allocate the next interrupt request id (`<conversationId>-r<N>`).
    pub fn allocate_request_id(&mut self) -> String {
        let id = format!("{}-r{}", self.conversation_id, self.next_request);
        self.next_request += 1;
        id
    }

    pub fn is_resumable(&self) -> bool {
        matches!(self.status, RunStatus::Active | RunStatus::AwaitingInput)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_at_classification() {
        let record = RunRecord::new("c-1", "hello");
        assert_eq!(record.stage, Stage::Classify);
        assert_eq!(record.status, RunStatus::Active);
        assert_eq!(record.state.latest_request(), Some("hello"));
        assert!(record.is_resumable());
    }

    #[test]
    fn request_ids_are_unique_and_scoped() {
        let mut record = RunRecord::new("c-1", "hello");
        assert_eq!(record.allocate_request_id(), "c-1-r1");
        assert_eq!(record.allocate_request_id(), "c-1-r2");
    }

    #[test]
    fn begin_turn_resets_context_rounds() {
        let mut record = RunRecord::new("c-1", "first");
        record.state.context_retry_count = 2;
        record.status = RunStatus::Completed;
        record.stage = Stage::Done;
        record.begin_turn("second");
        assert_eq!(record.turn, 2);
        assert_eq!(record.state.context_retry_count, 0);
        assert_eq!(record.stage, Stage::Classify);
        assert_eq!(record.state.latest_request(), Some("second"));
    }

    #[test]
    fn failed_record_is_not_resumable() {
        let mut record = RunRecord::new("c-1", "x");
        record.status = RunStatus::Failed;
        assert!(!record.is_resumable());
    }
}
