//! Classifier agent: routes each turn to chat, context, plan or code.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agents::invoker::{AgentInvoker, Invocation};
use crate::agents::{AgentRole, parse_schema};
use crate::core::types::Classification;
use crate::error::AgentError;
use crate::io::prompt::{PromptBuilder, TurnInputs};

const CLASSIFICATION_SCHEMA: &str = include_str!("../../schemas/classification.schema.json");

#[derive(Clone)]
pub struct ClassifierAgent {
    invoker: AgentInvoker,
    prompts: PromptBuilder,
    schema: Value,
}

impl ClassifierAgent {
    pub fn new(invoker: AgentInvoker, prompts: PromptBuilder) -> Result<Self, AgentError> {
        Ok(Self {
            invoker,
            prompts,
            schema: parse_schema(CLASSIFICATION_SCHEMA)?,
        })
    }

    /// Classify the latest request. The route cap is applied by the caller.
    pub async fn run(
        &self,
        input: &TurnInputs,
        cancel: &CancellationToken,
    ) -> Result<Classification, AgentError> {
        let prompt = self.prompts.classifier(input)?;
        let invocation = Invocation::new(AgentRole::Classifier, prompt, Vec::new());
        let classification: Classification = self
            .invoker
            .structured(invocation, &self.schema, cancel, Ok)
            .await?;
        info!(route = classification.route.as_str(), "request classified");
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Route;
    use crate::test_support::{ScriptedAgent, ScriptedReply, invoker_for};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn parses_route_and_reasoning() {
        let agent = Arc::new(ScriptedAgent::new());
        agent.push(
            AgentRole::Classifier,
            ScriptedReply::Json(json!({"route": "code", "reasoning": "single file fix"})),
        );
        let classifier =
            ClassifierAgent::new(invoker_for(agent.clone()), PromptBuilder::new(100_000))
                .expect("new");
        let input = TurnInputs {
            request: "Fix the typo".to_string(),
            ..TurnInputs::default()
        };
        let result = classifier.run(&input, &CancellationToken::new()).await.expect("classify");
        assert_eq!(result.route, Route::Code);

        let calls = agent.calls(AgentRole::Classifier);
        assert!(calls[0].tools.is_empty());
        assert!(calls[0].output_schema.is_some());
    }

    #[tokio::test]
    async fn unknown_route_is_rejected() {
        let agent = Arc::new(ScriptedAgent::new());
        for _ in 0..2 {
            agent.push(
                AgentRole::Classifier,
                ScriptedReply::Json(json!({"route": "deploy", "reasoning": "?"})),
            );
        }
        let classifier =
            ClassifierAgent::new(invoker_for(agent), PromptBuilder::new(100_000)).expect("new");
        let err = classifier
            .run(&TurnInputs::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidOutput { .. }));
    }
}
