//! Planner agent: turns a request into an ordered [`ProjectPlan`].

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agents::invoker::{AgentInvoker, Invocation};
use crate::agents::{AgentRole, parse_schema};
use crate::core::invariants::normalize_plan;
use crate::core::types::{ExecutionStep, Message, ProjectPlan};
use crate::error::AgentError;
use crate::io::prompt::{PromptBuilder, TurnInputs};

pub const PROJECT_PLAN_SCHEMA: &str = include_str!("../../schemas/project_plan.schema.json");

#[derive(Clone)]
pub struct PlannerAgent {
    invoker: AgentInvoker,
    prompts: PromptBuilder,
    schema: Value,
}

impl PlannerAgent {
    pub fn new(invoker: AgentInvoker, prompts: PromptBuilder) -> Result<Self, AgentError> {
        Ok(Self {
            invoker,
            prompts,
            schema: parse_schema(PROJECT_PLAN_SCHEMA)?,
        })
    }

    /// Propose a plan, or revise `previous` given the planner-local `history`.
    ///
    /// Plans listed out of dependency order are reordered; any other structural
    /// problem is sent back to the agent as a correction.
    pub async fn run(
        &self,
        input: &TurnInputs,
        previous: Option<&[ExecutionStep]>,
        history: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<ProjectPlan, AgentError> {
        let prompt = self.prompts.planner(input, previous)?;
        let invocation = Invocation::new(AgentRole::Planner, prompt, history);
        let plan = self
            .invoker
            .structured(invocation, &self.schema, cancel, normalize_plan)
            .await?;
        info!(steps = plan.steps.len(), "plan proposed");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedAgent, ScriptedReply, invoker_for, step};
    use std::sync::Arc;

    fn plan_json(steps: Vec<ExecutionStep>) -> Value {
        serde_json::to_value(ProjectPlan {
            strategy: "two steps".to_string(),
            steps,
        })
        .expect("json")
    }

    #[tokio::test]
    async fn out_of_order_plan_is_reordered() {
        let agent = Arc::new(ScriptedAgent::new());
        agent.push(
            AgentRole::Planner,
            ScriptedReply::Json(plan_json(vec![step("b", &["a"]), step("a", &[])])),
        );
        let planner =
            PlannerAgent::new(invoker_for(agent), PromptBuilder::new(100_000)).expect("new");
        let plan = planner
            .run(&TurnInputs::default(), None, Vec::new(), &CancellationToken::new())
            .await
            .expect("plan");
        let ids: Vec<&str> = plan.steps.iter().map(|s| s.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn cyclic_plan_is_corrected_once() {
        let agent = Arc::new(ScriptedAgent::new());
        agent.push(
            AgentRole::Planner,
            ScriptedReply::Json(plan_json(vec![step("a", &["b"]), step("b", &["a"])])),
        );
        agent.push(
            AgentRole::Planner,
            ScriptedReply::Json(plan_json(vec![step("a", &[]), step("b", &["a"])])),
        );
        let planner =
            PlannerAgent::new(invoker_for(agent.clone()), PromptBuilder::new(100_000))
                .expect("new");
        let plan = planner
            .run(&TurnInputs::default(), None, Vec::new(), &CancellationToken::new())
            .await
            .expect("plan");
        assert_eq!(plan.steps.len(), 2);

        let retry = &agent.calls(AgentRole::Planner)[1];
        let correction = retry.history.last().expect("correction");
        assert!(correction.content.contains("cycle"));
    }
}
