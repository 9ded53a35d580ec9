//! Chat agent: free-text answer without touching the codebase.

use tokio_util::sync::CancellationToken;

use crate::agents::AgentRole;
use crate::agents::invoker::{AgentInvoker, Invocation};
use crate::error::AgentError;
use crate::io::prompt::{PromptBuilder, TurnInputs};

#[derive(Clone)]
pub struct ChatAgent {
    invoker: AgentInvoker,
    prompts: PromptBuilder,
}

impl ChatAgent {
    pub fn new(invoker: AgentInvoker, prompts: PromptBuilder) -> Self {
        Self { invoker, prompts }
    }

    pub async fn run(
        &self,
        input: &TurnInputs,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let prompt = self.prompts.chat(input)?;
        let reply = self
            .invoker
            .text(Invocation::new(AgentRole::Chat, prompt, Vec::new()), cancel)
            .await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(AgentError::InvalidOutput {
                attempts: 1,
                message: "chat reply was empty".to_string(),
            });
        }
        Ok(reply.to_string())
    }
}
