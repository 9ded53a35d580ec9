//! Deterministic phase transitions for the task cycle.
//!
//! The engine performs the agent calls and interrupts; the decision of where
//! to go next lives here so it can be tested without any I/O.

use serde::{Deserialize, Serialize};

use crate::core::types::{Evaluation, FilePlan, Grade, InterruptResume, Message, TaskRunState};

/// Phase of one task cycle.
///
/// `GENERATE → EVALUATE → {GENERATE | APPROVAL}`, `APPROVAL → {APPLY | FEEDBACK}`,
/// `FEEDBACK → GENERATE`, `APPLY → END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskPhase {
    Generate,
    Evaluate,
    Approval,
    Feedback,
    Apply,
    End,
}

/// Record a fresh proposal: it becomes `last_plan` and is appended to the history.
pub fn record_proposal(state: &mut TaskRunState, plan: FilePlan) -> TaskPhase {
    let serialized = serde_json::to_string_pretty(&plan).unwrap_or_else(|_| plan.summary.clone());
    state
        .message_history
        .push(Message::assistant(format!("Proposed file plan:\n{serialized}")));
    state.last_plan = Some(plan);
    TaskPhase::Evaluate
}

/// Decide the phase after an evaluation.
///
/// A `pass` always goes to approval. A revision request goes back to
/// generation until `retry_count` reaches `max_retries`, after which approval
/// is forced.
pub fn after_evaluation(
    state: &mut TaskRunState,
    evaluation: Evaluation,
    max_retries: u32,
) -> TaskPhase {
    if evaluation.grade == Grade::Pass || state.retry_count >= max_retries {
        return TaskPhase::Approval;
    }
    state.feedback_history.push(evaluation);
    state.retry_count += 1;
    TaskPhase::Generate
}

/// Decide the phase after the human answered an approval request.
pub fn after_approval(resume: &InterruptResume) -> TaskPhase {
    if resume.is_approved() {
        TaskPhase::Apply
    } else {
        TaskPhase::Feedback
    }
}

/// Append free-text human feedback verbatim and return to generation.
pub fn after_feedback(state: &mut TaskRunState, feedback: &InterruptResume) -> TaskPhase {
    state.message_history.push(Message::user(feedback.0.clone()));
    TaskPhase::Generate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::test_support::{evaluation, file_plan};

    #[test]
    fn pass_goes_to_approval_regardless_of_retry_count() {
        for retry_count in [0, 1, 2, 10] {
            let mut state = TaskRunState {
                retry_count,
                ..TaskRunState::default()
            };
            let next = after_evaluation(&mut state, evaluation(Grade::Pass), 2);
            assert_eq!(next, TaskPhase::Approval);
            assert!(state.feedback_history.is_empty());
            assert_eq!(state.retry_count, retry_count);
        }
    }

    #[test]
    fn revision_under_cap_regenerates_and_records_feedback() {
        let mut state = TaskRunState::default();
        let next = after_evaluation(&mut state, evaluation(Grade::RevisionNeeded), 2);
        assert_eq!(next, TaskPhase::Generate);
        assert_eq!(state.feedback_history.len(), 1);
        assert_eq!(state.retry_count, 1);
    }

    #[test]
    fn repeated_revisions_are_forced_into_approval_at_cap() {
        let mut state = TaskRunState::default();
        let mut generations = 0;
        let mut phase = TaskPhase::Generate;
        while phase == TaskPhase::Generate {
            generations += 1;
            phase = after_evaluation(&mut state, evaluation(Grade::RevisionNeeded), 2);
        }
        assert_eq!(phase, TaskPhase::Approval);
        assert_eq!(state.retry_count, 2);
        assert_eq!(state.feedback_history.len(), 2);
        // Initial generation plus two revisions.
        assert_eq!(generations, 3);
    }

    #[test]
    fn approval_routes_on_literal_approved() {
        assert_eq!(
            after_approval(&InterruptResume("approved".to_string())),
            TaskPhase::Apply
        );
        assert_eq!(
            after_approval(&InterruptResume("please rename it".to_string())),
            TaskPhase::Feedback
        );
    }

    #[test]
    fn feedback_is_appended_verbatim() {
        let mut state = TaskRunState::default();
        let text = "  use the builder pattern\n";
        let next = after_feedback(&mut state, &InterruptResume(text.to_string()));
        assert_eq!(next, TaskPhase::Generate);
        let last = state.message_history.last().expect("message");
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, text);
    }

    #[test]
    fn proposal_becomes_last_plan_and_history_entry() {
        let mut state = TaskRunState::default();
        let plan = file_plan(Vec::new());
        assert_eq!(record_proposal(&mut state, plan.clone()), TaskPhase::Evaluate);
        assert_eq!(state.last_plan, Some(plan));
        assert_eq!(state.message_history.len(), 1);
        assert_eq!(state.message_history[0].role, Role::Assistant);
    }
}
