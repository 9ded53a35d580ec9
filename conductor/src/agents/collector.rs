//! Context collector agent: gathers code and notes into a [`ContextBundle`].

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agents::invoker::{AgentInvoker, Invocation};
use crate::agents::{AgentRole, parse_schema};
use crate::core::types::ContextBundle;
use crate::error::AgentError;
use crate::io::prompt::{PromptBuilder, TurnInputs};

const CONTEXT_BUNDLE_SCHEMA: &str = include_str!("../../schemas/context_bundle.schema.json");

#[derive(Clone)]
pub struct CollectorAgent {
    invoker: AgentInvoker,
    prompts: PromptBuilder,
    schema: Value,
}

impl CollectorAgent {
    pub fn new(invoker: AgentInvoker, prompts: PromptBuilder) -> Result<Self, AgentError> {
        Ok(Self {
            invoker,
            prompts,
            schema: parse_schema(CONTEXT_BUNDLE_SCHEMA)?,
        })
    }

    /// One collection round. The collector may inspect files through tools.
    pub async fn run(
        &self,
        input: &TurnInputs,
        cancel: &CancellationToken,
    ) -> Result<ContextBundle, AgentError> {
        let prompt = self.prompts.collector(input)?;
        let invocation = Invocation::new(AgentRole::Collector, prompt, Vec::new()).with_tools();
        let bundle: ContextBundle = self
            .invoker
            .structured(invocation, &self.schema, cancel, Ok)
            .await?;
        info!(
            snippets = bundle.code_snippets.len(),
            confidence = bundle.confidence,
            "context collected"
        );
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ToolCall;
    use crate::test_support::{ScriptedAgent, ScriptedReply, context_bundle, invoker_for};
    use std::sync::Arc;

    #[tokio::test]
    async fn collector_can_read_files_before_answering() {
        let agent = Arc::new(ScriptedAgent::new());
        agent.push(
            AgentRole::Collector,
            ScriptedReply::ToolCalls(vec![ToolCall {
                name: "read_file".to_string(),
                arguments: serde_json::json!({"path": "README.md"}),
            }]),
        );
        let bundle = context_bundle("README explains setup");
        agent.push(
            AgentRole::Collector,
            ScriptedReply::Json(serde_json::to_value(&bundle).expect("json")),
        );

        let collector =
            CollectorAgent::new(invoker_for(agent.clone()), PromptBuilder::new(100_000))
                .expect("new");
        let result = collector
            .run(&TurnInputs::default(), &CancellationToken::new())
            .await
            .expect("collect");
        assert_eq!(result, bundle);

        let calls = agent.calls(AgentRole::Collector);
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].tools.is_empty());
    }
}
