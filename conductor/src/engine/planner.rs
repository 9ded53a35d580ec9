//! Plan route: propose, get the plan approved, then run each step in order.

use tracing::{info, instrument};

use crate::core::path::FramePath;
use crate::core::record::{PlannerFrame, PlannerPhase, Stage, StepSummary, TaskFrame};
use crate::core::types::{
    ApprovalPayload, ExecutionStep, InterruptRequest, Message, ProjectPlan, TaskRunState,
};
use crate::error::{ErrorKind, TurnError};
use crate::events::Event;

use super::turn::Turn;

impl Turn<'_> {
    #[instrument(skip_all, fields(conversation_id = %self.record.conversation_id))]
    pub(super) async fn plan(&mut self) -> Result<(), TurnError> {
        let conversation_id = self.conversation_id();
        let mut frame = self
            .record
            .planner
            .clone()
            .unwrap_or_else(|| PlannerFrame::new(&conversation_id));

        loop {
            match frame.phase {
                PlannerPhase::Propose => {
                    let inputs = self.turn_inputs();
                    let previous = frame.plan.as_ref().map(|plan| plan.steps.clone());
                    let plan = self
                        .ctx
                        .agents
                        .planner
                        .run(&inputs, previous.as_deref(), frame.history.clone(), self.cancel)
                        .await
                        .map_err(|err| TurnError::from_agent(ErrorKind::PlanningFailure, &err))?;
                    let serialized = serde_json::to_string_pretty(&plan)
                        .unwrap_or_else(|_| plan.strategy.clone());
                    frame
                        .history
                        .push(Message::assistant(format!("Proposed plan:\n{serialized}")));
                    self.publish(Event::PlanProposed {
                        plan: plan.clone(),
                        revision: frame.revisions,
                    });
                    frame.plan = Some(plan);
                    frame.phase = PlannerPhase::Approval;
                }
                PlannerPhase::Approval => {
                    let steps = current_plan(&frame)?.steps.clone();
                    let path = frame.path.clone();
                    let resume = self
                        .interrupt(&path, InterruptRequest::Approval(ApprovalPayload::Steps(steps)))
                        .await?;
                    if resume.is_approved() {
                        info!(revisions = frame.revisions, "plan approved");
                        frame.phase = PlannerPhase::Execute;
                    } else if frame.revisions >= self.ctx.config.max_plan_revisions {
                        return Err(TurnError::new(
                            ErrorKind::PlanningFailure,
                            format!("plan rejected after {} revisions", frame.revisions),
                        ));
                    } else {
                        frame.phase = PlannerPhase::Feedback;
                    }
                }
                PlannerPhase::Feedback => {
                    let path = frame.path.clone();
                    let resume = self.interrupt(&path, InterruptRequest::FreeTextFeedback).await?;
                    frame.history.push(Message::user(resume.0));
                    frame.revisions += 1;
                    frame.phase = PlannerPhase::Propose;
                }
                PlannerPhase::Execute => {
                    self.execute_steps(&mut frame).await?;
                    let done: Vec<String> = frame
                        .completed
                        .iter()
                        .map(|s| format!("- {}: {}", s.task_id, s.summary))
                        .collect();
                    self.record.state.message_history.push(Message::assistant(format!(
                        "Executed plan:\n{}",
                        done.join("\n")
                    )));
                    self.record.stage = Stage::Done;
                    return self.store_planner(&frame);
                }
            }
            self.store_planner(&frame)?;
        }
    }

    /// Run the approved steps strictly in list order, one task at a time.
    async fn execute_steps(&mut self, frame: &mut PlannerFrame) -> Result<(), TurnError> {
        let plan = current_plan(frame)?.clone();
        let total = plan.steps.len();
        while frame.next_step < total {
            let index = frame.next_step;
            let step = &plan.steps[index];
            let path = FramePath::task(&self.record.conversation_id, &step.task_id);

            if !self.record.tasks.contains_key(&path) {
                self.publish(Event::StepStarted {
                    step: step.clone(),
                    index,
                    total,
                });
                let state = TaskRunState {
                    static_context: self.static_context(),
                    dynamic_context: step_context(
                        &self.record.state.rendered_context(),
                        step,
                        &frame.completed,
                    ),
                    ..TaskRunState::default()
                };
                let task = TaskFrame::new(
                    path.clone(),
                    Some(step.task_id.clone()),
                    step.description.clone(),
                    state,
                );
                self.publish(Event::TaskStarted {
                    frame: path.clone(),
                    description: step.description.clone(),
                });
                self.record.tasks.insert(path.clone(), task);
                self.store_planner(frame)?;
            }

            let summary = self.run_task(&path).await?;
            self.record.tasks.remove(&path);
            frame.completed.push(StepSummary {
                task_id: step.task_id.clone(),
                summary,
            });
            frame.next_step += 1;
            self.store_planner(frame)?;
        }
        Ok(())
    }
}

fn current_plan(frame: &PlannerFrame) -> Result<&ProjectPlan, TurnError> {
    frame
        .plan
        .as_ref()
        .ok_or_else(|| TurnError::new(ErrorKind::PlanningFailure, "planner frame has no plan"))
}

/// Dynamic context for one plan step.
fn step_context(
    conversation_context: &str,
    step: &ExecutionStep,
    completed: &[StepSummary],
) -> String {
    let mut out = String::new();
    if !conversation_context.trim().is_empty() {
        out.push_str(conversation_context.trim_end());
        out.push_str("\n\n");
    }
    if !step.target_resource.trim().is_empty() {
        out.push_str(&format!("Target: {}\n", step.target_resource));
    }
    let lists = [
        ("Guidelines", &step.guidelines),
        ("Pitfalls", &step.pitfalls),
        ("Relevant files", &step.file_dependencies),
    ];
    for (title, items) in lists {
        if items.is_empty() {
            continue;
        }
        out.push_str(&format!("{title}:\n"));
        for item in items {
            out.push_str(&format!("- {item}\n"));
        }
    }
    if !completed.is_empty() {
        out.push_str("Completed steps:\n");
        for done in completed {
            out.push_str(&format!("- {}: {}\n", done.task_id, done.summary));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::step;

    #[test]
    fn step_context_lists_guidance_and_earlier_steps() {
        let mut current = step("2", &["1"]);
        current.guidelines = vec!["keep the public API".to_string()];
        current.file_dependencies = vec!["src/lib.rs".to_string()];
        let completed = vec![StepSummary {
            task_id: "1".to_string(),
            summary: "added retry helper".to_string(),
        }];
        let text = step_context("Summary: retry logic lives in net.rs", &current, &completed);
        assert!(text.starts_with("Summary: retry logic"));
        assert!(text.contains("Guidelines:\n- keep the public API"));
        assert!(text.contains("Relevant files:\n- src/lib.rs"));
        assert!(text.contains("- 1: added retry helper"));
        assert!(!text.contains("Pitfalls"));
    }
}
