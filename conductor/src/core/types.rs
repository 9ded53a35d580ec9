//! Shared data model for conversations, plans, and file operations.
//!
//! These types are the wire contract with agents, checkpoints, and the
//! transport layer. Field names serialize in camelCase.

use serde::{Deserialize, Serialize};

/// One atomic, dependency-aware unit of a [`ProjectPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub task_id: String,
    pub description: String,
    #[serde(default)]
    pub guidelines: Vec<String>,
    #[serde(default)]
    pub id_dependencies: Vec<String>,
    #[serde(default)]
    pub target_resource: String,
    #[serde(default)]
    pub file_dependencies: Vec<String>,
    #[serde(default)]
    pub pitfalls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPlan {
    pub strategy: String,
    pub steps: Vec<ExecutionStep>,
}

/// Zero-indexed position in a text file. `character` counts chars, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

/// End-exclusive range between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    pub range: TextRange,
    pub new_text: String,
}

/// A single filesystem mutation. Exactly one variant per operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FileOperation {
    Create { path: String, content: String },
    Delete { path: String },
    Replace { path: String, content: String },
    Edit { path: String, edits: Vec<TextEdit> },
    Patch { path: String, unified_diff: String },
    NoOp { reason: String },
}

impl FileOperation {
    /// Target path, or `None` for `NoOp`.
    pub fn path(&self) -> Option<&str> {
        match self {
            FileOperation::Create { path, .. }
            | FileOperation::Delete { path }
            | FileOperation::Replace { path, .. }
            | FileOperation::Edit { path, .. }
            | FileOperation::Patch { path, .. } => Some(path),
            FileOperation::NoOp { .. } => None,
        }
    }

    pub fn operation_type(&self) -> OperationType {
        match self {
            FileOperation::Create { .. } => OperationType::Create,
            FileOperation::Delete { .. } => OperationType::Delete,
            FileOperation::Replace { .. } => OperationType::Replace,
            FileOperation::Edit { .. } => OperationType::Edit,
            FileOperation::Patch { .. } => OperationType::Patch,
            FileOperation::NoOp { .. } => OperationType::NoOp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    Create,
    Delete,
    Replace,
    Edit,
    Patch,
    NoOp,
}

/// A proposed set of file operations for one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub summary: String,
    pub operations: Vec<FileOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_notes: Option<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Grade {
    Pass,
    RevisionNeeded,
}

/// Evaluator verdict on a not-yet-applied [`FilePlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub grade: Grade,
    pub feedback: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_approach: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// Top-level phase selected by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Chat,
    Context,
    Plan,
    Code,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Route::Chat => "chat",
            Route::Context => "context",
            Route::Plan => "plan",
            Route::Code => "code",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub route: Route,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSnippet {
    pub file_path: String,
    #[serde(default)]
    pub start_line: usize,
    #[serde(default)]
    pub end_line: usize,
    pub content: String,
    #[serde(default)]
    pub relevance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalExcerpt {
    pub source: String,
    pub excerpt: String,
}

/// Structured result of one context-collection round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextBundle {
    pub retrieval_summary: String,
    #[serde(default)]
    pub project_structure: String,
    #[serde(default)]
    pub code_snippets: Vec<CodeSnippet>,
    #[serde(default)]
    pub external_context: Vec<ExternalExcerpt>,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

impl ContextBundle {
    /// Render the bundle as prompt text.
    pub fn render(&self) -> String {
        let mut out = format!("Summary: {}\n", self.retrieval_summary.trim());
        if !self.project_structure.trim().is_empty() {
            out.push_str(&format!("Structure:\n{}\n", self.project_structure.trim()));
        }
        for snippet in &self.code_snippets {
            out.push_str(&format!(
                "--- {} (lines {}-{}) {}\n{}\n",
                snippet.file_path,
                snippet.start_line,
                snippet.end_line,
                snippet.relevance,
                snippet.content.trim_end()
            ));
        }
        for external in &self.external_context {
            out.push_str(&format!("[{}] {}\n", external.source, external.excerpt.trim()));
        }
        if !self.gaps.is_empty() {
            out.push_str(&format!("Gaps: {}\n", self.gaps.join("; ")));
        }
        out
    }
}

/// Long-lived state of one conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub message_history: Vec<Message>,
    pub accumulated_context: Vec<ContextBundle>,
    pub context_retry_count: u32,
}

impl ConversationState {
    /// The most recent user message, if any.
    pub fn latest_request(&self) -> Option<&str> {
        self.message_history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    pub fn rendered_context(&self) -> String {
        self.accumulated_context
            .iter()
            .map(ContextBundle::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Ephemeral state of one generate/evaluate/approve/apply cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunState {
    pub message_history: Vec<Message>,
    pub last_plan: Option<FilePlan>,
    pub feedback_history: Vec<Evaluation>,
    pub retry_count: u32,
    pub static_context: String,
    pub dynamic_context: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterruptKind {
    Approval,
    FreeTextFeedback,
}

/// One entry of an operation approval payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPreview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub operation_type: OperationType,
    pub diff: String,
}

/// What the human is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApprovalPayload {
    Operations(Vec<OperationPreview>),
    Steps(Vec<ExecutionStep>),
}

/// A suspension point waiting on human input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum InterruptRequest {
    Approval(ApprovalPayload),
    FreeTextFeedback,
}

impl InterruptRequest {
    pub fn kind(&self) -> InterruptKind {
        match self {
            InterruptRequest::Approval(_) => InterruptKind::Approval,
            InterruptRequest::FreeTextFeedback => InterruptKind::FreeTextFeedback,
        }
    }
}

/// Opaque value supplied by the human to resume an interrupt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterruptResume(pub String);

impl InterruptResume {
    pub const APPROVED: &'static str = "approved";

    pub fn is_approved(&self) -> bool {
        self.0 == Self::APPROVED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_operation_uses_tagged_camel_case_wire_shape() {
        let op: FileOperation = serde_json::from_value(json!({
            "type": "patch",
            "path": "src/lib.rs",
            "unifiedDiff": "@@ -1 +1 @@\n-a\n+b\n"
        }))
        .expect("parse");
        assert_eq!(op.operation_type(), OperationType::Patch);
        assert_eq!(op.path(), Some("src/lib.rs"));

        let noop = serde_json::to_value(FileOperation::NoOp {
            reason: "already done".to_string(),
        })
        .expect("json");
        assert_eq!(noop, json!({"type": "noOp", "reason": "already done"}));
    }

    #[test]
    fn interrupt_requests_match_wire_shape() {
        let feedback = serde_json::to_value(InterruptRequest::FreeTextFeedback).expect("json");
        assert_eq!(feedback, json!({"kind": "freeTextFeedback"}));

        let approval = InterruptRequest::Approval(ApprovalPayload::Operations(vec![
            OperationPreview {
                file_path: Some("README.md".to_string()),
                operation_type: OperationType::Replace,
                diff: "-a\n+b\n".to_string(),
            },
        ]));
        let value = serde_json::to_value(&approval).expect("json");
        assert_eq!(
            value,
            json!({"kind": "approval", "payload": [
                {"filePath": "README.md", "operationType": "replace", "diff": "-a\n+b\n"}
            ]})
        );
        let back: InterruptRequest = serde_json::from_value(value).expect("parse");
        assert_eq!(back, approval);
    }

    #[test]
    fn step_approval_payload_round_trips_through_untagged_enum() {
        let request = InterruptRequest::Approval(ApprovalPayload::Steps(vec![ExecutionStep {
            task_id: "1".to_string(),
            description: "do it".to_string(),
            guidelines: Vec::new(),
            id_dependencies: Vec::new(),
            target_resource: "src/lib.rs".to_string(),
            file_dependencies: Vec::new(),
            pitfalls: Vec::new(),
        }]));
        let json = serde_json::to_string(&request).expect("json");
        let back: InterruptRequest = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, request);
    }

    #[test]
    fn only_literal_approved_resumes_approval() {
        assert!(InterruptResume("approved".to_string()).is_approved());
        assert!(!InterruptResume("Approved".to_string()).is_approved());
        assert!(!InterruptResume("looks good".to_string()).is_approved());
    }

    #[test]
    fn latest_request_skips_assistant_messages() {
        let state = ConversationState {
            message_history: vec![
                Message::user("first"),
                Message::assistant("reply"),
                Message::user("second"),
                Message::assistant("another"),
            ],
            ..ConversationState::default()
        };
        assert_eq!(state.latest_request(), Some("second"));
    }
}
