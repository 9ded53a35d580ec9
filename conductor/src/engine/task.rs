//! Task runner: GENERATE → EVALUATE → APPROVAL → (FEEDBACK →) APPLY → END.
//!
//! The frame is copied out of the record, advanced one phase at a time and
//! written back with a checkpoint after every transition.

use tracing::{debug, info, instrument, warn};

use crate::core::fileops::preview_plan;
use crate::core::path::FramePath;
use crate::core::record::TaskFrame;
use crate::core::transitions::{
    TaskPhase, after_approval, after_evaluation, after_feedback, record_proposal,
};
use crate::core::types::{ApprovalPayload, FilePlan, InterruptRequest, OperationPreview};
use crate::error::{ErrorKind, TurnError};
use crate::events::Event;
use crate::io::prompt::TaskInputs;

use super::turn::Turn;

impl Turn<'_> {
    /// Drive the task frame at `path` to END. Returns the applied plan's summary.
    ///
    /// The frame stays in the record; the caller removes it together with its
    /// own bookkeeping in one checkpoint.
    #[instrument(skip_all, fields(frame = %path))]
    pub(super) async fn run_task(&mut self, path: &FramePath) -> Result<String, TurnError> {
        let mut frame = self.record.tasks.get(path).cloned().ok_or_else(|| {
            TurnError::new(ErrorKind::GenerationFailure, format!("no task frame at {path}"))
        })?;

        loop {
            match frame.phase {
                TaskPhase::Generate => self.generate(&mut frame).await?,
                TaskPhase::Evaluate => self.evaluate(&mut frame).await?,
                TaskPhase::Approval => {
                    let previews = self.previews(last_plan(&frame)?);
                    let resume = self
                        .interrupt(
                            path,
                            InterruptRequest::Approval(ApprovalPayload::Operations(previews)),
                        )
                        .await?;
                    frame.phase = after_approval(&resume);
                }
                TaskPhase::Feedback => {
                    let resume = self.interrupt(path, InterruptRequest::FreeTextFeedback).await?;
                    frame.phase = after_feedback(&mut frame.state, &resume);
                }
                TaskPhase::Apply => self.apply(&mut frame)?,
                TaskPhase::End => {
                    let summary = last_plan(&frame)?.summary.clone();
                    info!(attempts = frame.attempt, "task completed");
                    self.publish(Event::TaskCompleted {
                        frame: path.clone(),
                        summary: summary.clone(),
                    });
                    return Ok(summary);
                }
            }
            debug!(phase = ?frame.phase, retry_count = frame.state.retry_count, "task transition");
            self.store_task(&frame)?;
        }
    }

    fn task_inputs(frame: &TaskFrame) -> TaskInputs {
        TaskInputs {
            description: frame.description.clone(),
            static_context: frame.state.static_context.clone(),
            dynamic_context: frame.state.dynamic_context.clone(),
            feedback: frame.state.feedback_history.clone(),
        }
    }

    async fn generate(&mut self, frame: &mut TaskFrame) -> Result<(), TurnError> {
        let inputs = Self::task_inputs(frame);
        let plan = self
            .ctx
            .agents
            .coder
            .run(
                &inputs,
                frame.task_id.as_deref(),
                frame.state.message_history.clone(),
                self.cancel,
            )
            .await
            .map_err(|err| TurnError::from_agent(ErrorKind::GenerationFailure, &err))?;

        frame.attempt += 1;
        if let Err(err) = self.ctx.task_log.write_proposal(&frame.path, frame.attempt, &plan) {
            warn!(err = %err, "could not write proposal artifact");
        }
        self.publish(Event::ProposalGenerated {
            frame: frame.path.clone(),
            attempt: frame.attempt,
            plan: plan.clone(),
        });
        frame.phase = record_proposal(&mut frame.state, plan);
        Ok(())
    }

    async fn evaluate(&mut self, frame: &mut TaskFrame) -> Result<(), TurnError> {
        let plan = last_plan(frame)?.clone();
        let previews = self.previews(&plan);
        let inputs = Self::task_inputs(frame);
        let evaluation = self
            .ctx
            .agents
            .evaluator
            .run(&inputs, &plan, &previews, self.cancel)
            .await
            .map_err(|err| TurnError::from_agent(ErrorKind::EvaluationFailure, &err))?;

        if let Err(err) = self
            .ctx
            .task_log
            .write_evaluation(&frame.path, frame.attempt, &evaluation)
        {
            warn!(err = %err, "could not write evaluation artifact");
        }
        self.publish(Event::Evaluated {
            frame: frame.path.clone(),
            attempt: frame.attempt,
            evaluation: evaluation.clone(),
        });
        frame.phase = after_evaluation(
            &mut frame.state,
            evaluation,
            self.ctx.config.max_task_retries,
        );
        Ok(())
    }

    /// Apply operations in list order. The first failure aborts the rest;
    /// operations already applied stay applied.
    fn apply(&mut self, frame: &mut TaskFrame) -> Result<(), TurnError> {
        let plan = last_plan(frame)?.clone();
        for (index, op) in plan.operations.iter().enumerate().skip(frame.applied) {
            self.ctx.files.apply(op)?;
            frame.applied = index + 1;
            self.publish(Event::OperationApplied {
                frame: frame.path.clone(),
                index,
                file_path: op.path().map(str::to_string),
                operation_type: op.operation_type(),
            });
            self.store_task(frame)?;
        }
        frame.phase = TaskPhase::End;
        Ok(())
    }

    fn previews(&self, plan: &FilePlan) -> Vec<OperationPreview> {
        preview_plan(&plan.operations, |path| self.ctx.files.read(path))
    }
}

fn last_plan(frame: &TaskFrame) -> Result<&FilePlan, TurnError> {
    frame.state.last_plan.as_ref().ok_or_else(|| {
        TurnError::new(
            ErrorKind::GenerationFailure,
            format!("task {} has no proposal", frame.path),
        )
    })
}
