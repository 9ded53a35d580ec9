//! Agent capability and the typed role wrappers built on it.
//!
//! The [`Agent`] trait decouples the engine from the model backend (currently
//! a model CLI, see `io::codex`). Tests use scripted agents that return
//! predetermined replies per role without spawning processes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::Message;
use crate::error::AgentError;

pub mod chat;
pub mod classifier;
pub mod coder;
pub mod collector;
pub mod evaluator;
pub mod invoker;
pub mod planner;
pub mod tools;

/// Which role an agent call plays. Backends may use it for routing or logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Classifier,
    Collector,
    Planner,
    Coder,
    Evaluator,
    Chat,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Classifier => "classifier",
            AgentRole::Collector => "collector",
            AgentRole::Planner => "planner",
            AgentRole::Coder => "coder",
            AgentRole::Evaluator => "evaluator",
            AgentRole::Chat => "chat",
        }
    }
}

/// Declared tool offered to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One call to the agent capability.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub role: AgentRole,
    pub prompt: String,
    pub history: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    /// JSON Schema the final answer must satisfy, if structured.
    pub output_schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentReply {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

/// Agent backend: given a prompt, history and optional tools, returns text or tool calls.
///
/// Implementations report empty or failed responses as [`AgentError::Transient`];
/// retries, timeouts and validation are handled by [`invoker::AgentInvoker`].
#[async_trait]
pub trait Agent: Send + Sync {
    async fn complete(&self, request: &AgentRequest) -> Result<AgentReply, AgentError>;
}

/// Parse a compiled-in JSON Schema.
pub(crate) fn parse_schema(raw: &str) -> Result<Value, AgentError> {
    serde_json::from_str(raw)
        .map_err(|err| AgentError::Backend(anyhow::anyhow!("embedded schema is invalid: {err}")))
}

/// The six role agents sharing one invoker and prompt builder.
#[derive(Clone)]
pub struct AgentSet {
    pub classifier: classifier::ClassifierAgent,
    pub collector: collector::CollectorAgent,
    pub planner: planner::PlannerAgent,
    pub coder: coder::CoderAgent,
    pub evaluator: evaluator::EvaluatorAgent,
    pub chat: chat::ChatAgent,
}

impl AgentSet {
    pub fn new(
        invoker: invoker::AgentInvoker,
        prompts: crate::io::prompt::PromptBuilder,
    ) -> Result<Self, AgentError> {
        Ok(Self {
            classifier: classifier::ClassifierAgent::new(invoker.clone(), prompts.clone())?,
            collector: collector::CollectorAgent::new(invoker.clone(), prompts.clone())?,
            planner: planner::PlannerAgent::new(invoker.clone(), prompts.clone())?,
            coder: coder::CoderAgent::new(invoker.clone(), prompts.clone())?,
            evaluator: evaluator::EvaluatorAgent::new(invoker.clone(), prompts.clone())?,
            chat: chat::ChatAgent::new(invoker, prompts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_schemas_compile() {
        for raw in [
            include_str!("../../schemas/classification.schema.json"),
            include_str!("../../schemas/context_bundle.schema.json"),
            include_str!("../../schemas/project_plan.schema.json"),
            include_str!("../../schemas/file_plan.schema.json"),
            include_str!("../../schemas/evaluation.schema.json"),
        ] {
            let schema = parse_schema(raw).expect("parse");
            assert!(jsonschema::validator_for(&schema).is_ok());
        }
    }
}
