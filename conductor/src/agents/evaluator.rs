//! Evaluator agent: grades a proposal against the unchanged codebase.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agents::invoker::{AgentInvoker, Invocation};
use crate::agents::{AgentRole, parse_schema};
use crate::core::types::{Evaluation, FilePlan, Grade, OperationPreview};
use crate::error::AgentError;
use crate::io::prompt::{PromptBuilder, TaskInputs};

const EVALUATION_SCHEMA: &str = include_str!("../../schemas/evaluation.schema.json");

#[derive(Clone)]
pub struct EvaluatorAgent {
    invoker: AgentInvoker,
    prompts: PromptBuilder,
    schema: Value,
}

impl EvaluatorAgent {
    pub fn new(invoker: AgentInvoker, prompts: PromptBuilder) -> Result<Self, AgentError> {
        Ok(Self {
            invoker,
            prompts,
            schema: parse_schema(EVALUATION_SCHEMA)?,
        })
    }

    pub async fn run(
        &self,
        input: &TaskInputs,
        proposal: &FilePlan,
        previews: &[OperationPreview],
        cancel: &CancellationToken,
    ) -> Result<Evaluation, AgentError> {
        let proposal_json = serde_json::to_string_pretty(proposal)
            .map_err(|err| AgentError::Backend(err.into()))?;
        let prompt = self.prompts.evaluator(input, &proposal_json, previews)?;
        let invocation = Invocation::new(AgentRole::Evaluator, prompt, Vec::new()).with_tools();
        let evaluation: Evaluation = self
            .invoker
            .structured(invocation, &self.schema, cancel, |eval: Evaluation| {
                if eval.grade == Grade::RevisionNeeded && eval.feedback.trim().is_empty() {
                    Err(vec!["revisionNeeded requires non-empty feedback".to_string()])
                } else {
                    Ok(eval)
                }
            })
            .await?;
        info!(grade = ?evaluation.grade, "proposal evaluated");
        Ok(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedAgent, ScriptedReply, evaluation, file_plan, invoker_for};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn evaluator_sees_previews_and_returns_grade() {
        let agent = Arc::new(ScriptedAgent::new());
        agent.push(
            AgentRole::Evaluator,
            ScriptedReply::Json(serde_json::to_value(evaluation(Grade::Pass)).expect("json")),
        );
        let evaluator =
            EvaluatorAgent::new(invoker_for(agent.clone()), PromptBuilder::new(100_000))
                .expect("new");
        let previews = vec![OperationPreview {
            file_path: Some("README.md".to_string()),
            operation_type: crate::core::types::OperationType::Replace,
            diff: "-teh\n+the\n".to_string(),
        }];
        let result = evaluator
            .run(
                &TaskInputs::default(),
                &file_plan(Vec::new()),
                &previews,
                &CancellationToken::new(),
            )
            .await
            .expect("evaluate");
        assert_eq!(result.grade, Grade::Pass);
        assert!(agent.calls(AgentRole::Evaluator)[0].prompt.contains("+the"));
    }

    #[tokio::test]
    async fn revision_without_feedback_is_corrected() {
        let agent = Arc::new(ScriptedAgent::new());
        agent.push(
            AgentRole::Evaluator,
            ScriptedReply::Json(json!({
                "grade": "revisionNeeded", "feedback": " ", "strengths": [], "weaknesses": []
            })),
        );
        agent.push(
            AgentRole::Evaluator,
            ScriptedReply::Json(json!({
                "grade": "revisionNeeded",
                "feedback": "handle errors",
                "strengths": [],
                "weaknesses": []
            })),
        );
        let evaluator =
            EvaluatorAgent::new(invoker_for(agent), PromptBuilder::new(100_000)).expect("new");
        let result = evaluator
            .run(&TaskInputs::default(), &file_plan(Vec::new()), &[], &CancellationToken::new())
            .await
            .expect("evaluate");
        assert_eq!(result.feedback, "handle errors");
    }
}
