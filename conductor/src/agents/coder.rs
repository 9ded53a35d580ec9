//! Coder agent: proposes a [`FilePlan`] for one task without touching files.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agents::invoker::{AgentInvoker, Invocation};
use crate::agents::{AgentRole, parse_schema};
use crate::core::invariants::validate_file_plan;
use crate::core::types::{FilePlan, Message};
use crate::error::AgentError;
use crate::io::prompt::{PromptBuilder, TaskInputs};

const FILE_PLAN_SCHEMA: &str = include_str!("../../schemas/file_plan.schema.json");

#[derive(Clone)]
pub struct CoderAgent {
    invoker: AgentInvoker,
    prompts: PromptBuilder,
    schema: Value,
}

impl CoderAgent {
    pub fn new(invoker: AgentInvoker, prompts: PromptBuilder) -> Result<Self, AgentError> {
        Ok(Self {
            invoker,
            prompts,
            schema: parse_schema(FILE_PLAN_SCHEMA)?,
        })
    }

    /// Generate a proposal. `history` is the task's own message history, so
    /// earlier proposals and human feedback are visible to the agent.
    pub async fn run(
        &self,
        input: &TaskInputs,
        task_id: Option<&str>,
        history: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<FilePlan, AgentError> {
        let prompt = self.prompts.coder(input)?;
        let invocation = Invocation::new(AgentRole::Coder, prompt, history).with_tools();
        let mut plan: FilePlan = self
            .invoker
            .structured(invocation, &self.schema, cancel, |plan: FilePlan| {
                let errors = validate_file_plan(&plan);
                if errors.is_empty() { Ok(plan) } else { Err(errors) }
            })
            .await?;
        if let Some(id) = task_id {
            plan.task_id = Some(id.to_string());
        }
        info!(operations = plan.operations.len(), "file plan proposed");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FileOperation;
    use crate::test_support::{ScriptedAgent, ScriptedReply, file_plan, invoker_for};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn task_id_is_stamped_and_history_forwarded() {
        let agent = Arc::new(ScriptedAgent::new());
        let proposal = file_plan(vec![FileOperation::Create {
            path: "src/retry.rs".to_string(),
            content: "pub fn retry() {}\n".to_string(),
        }]);
        agent.push(
            AgentRole::Coder,
            ScriptedReply::Json(serde_json::to_value(&proposal).expect("json")),
        );
        let coder =
            CoderAgent::new(invoker_for(agent.clone()), PromptBuilder::new(100_000)).expect("new");
        let history = vec![Message::user("use exponential backoff")];
        let plan = coder
            .run(&TaskInputs::default(), Some("retry"), history, &CancellationToken::new())
            .await
            .expect("plan");
        assert_eq!(plan.task_id.as_deref(), Some("retry"));
        assert_eq!(plan.operations, proposal.operations);

        let call = &agent.calls(AgentRole::Coder)[0];
        assert_eq!(call.history[0].content, "use exponential backoff");
        assert!(!call.tools.is_empty());
    }

    #[tokio::test]
    async fn empty_operation_list_is_rejected() {
        let agent = Arc::new(ScriptedAgent::new());
        let empty = json!({"summary": "nothing", "operations": [], "reasoning": "none"});
        agent.push(AgentRole::Coder, ScriptedReply::Json(empty.clone()));
        agent.push(AgentRole::Coder, ScriptedReply::Json(empty));
        let coder = CoderAgent::new(invoker_for(agent), PromptBuilder::new(100_000)).expect("new");
        let err = coder
            .run(&TaskInputs::default(), None, Vec::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidOutput { attempts: 2, .. }));
    }
}
