//! Invocation policy around an [`Agent`] backend.
//!
//! Adds, in order: cancellation and a per-call timeout, transient retry with
//! exponential backoff, the tool-call loop, and for structured calls schema
//! validation with corrective retries.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::agents::tools::ToolRegistry;
use crate::agents::{Agent, AgentReply, AgentRequest, AgentRole};
use crate::core::types::Message;
use crate::error::AgentError;
use crate::io::config::EngineConfig;

/// Retry, timeout and loop bounds for agent calls.
#[derive(Debug, Clone)]
pub struct InvokePolicy {
    pub timeout: Duration,
    pub transient_attempts: u32,
    pub backoff_base: Duration,
    pub structured_attempts: u32,
    pub max_tool_rounds: u32,
}

impl InvokePolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            timeout: config.agent_timeout(),
            transient_attempts: config.transient_attempts,
            backoff_base: config.backoff_base(),
            structured_attempts: config.structured_attempts,
            max_tool_rounds: config.max_tool_rounds,
        }
    }
}

/// A call to make: role, prompt, history, and whether tools are offered.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub role: AgentRole,
    pub prompt: String,
    pub history: Vec<Message>,
    pub with_tools: bool,
}

impl Invocation {
    pub fn new(role: AgentRole, prompt: String, history: Vec<Message>) -> Self {
        Self {
            role,
            prompt,
            history,
            with_tools: false,
        }
    }

    pub fn with_tools(mut self) -> Self {
        self.with_tools = true;
        self
    }
}

#[derive(Clone)]
pub struct AgentInvoker {
    agent: Arc<dyn Agent>,
    tools: ToolRegistry,
    policy: InvokePolicy,
}

impl AgentInvoker {
    pub fn new(agent: Arc<dyn Agent>, tools: ToolRegistry, policy: InvokePolicy) -> Self {
        Self {
            agent,
            tools,
            policy,
        }
    }

    pub fn policy(&self) -> &InvokePolicy {
        &self.policy
    }

    /// Free-text call.
    #[instrument(skip_all, fields(role = invocation.role.as_str()))]
    pub async fn text(
        &self,
        invocation: Invocation,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let mut request = self.request(&invocation, None);
        self.run_tool_loop(&mut request, cancel).await
    }

    /// Structured call: the final answer must parse as JSON, satisfy `schema`,
    /// deserialize into `T`, and pass `check`.
    ///
    /// `check` may normalize the value; returning `Err` lists problems that are
    /// sent back to the agent as a correction, like schema errors.
    #[instrument(skip_all, fields(role = invocation.role.as_str()))]
    pub async fn structured<T, F>(
        &self,
        invocation: Invocation,
        schema: &Value,
        cancel: &CancellationToken,
        mut check: F,
    ) -> Result<T, AgentError>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> Result<T, Vec<String>>,
    {
        let validator = jsonschema::validator_for(schema)
            .map_err(|err| AgentError::Backend(anyhow::anyhow!("invalid output schema: {err}")))?;
        let mut request = self.request(&invocation, Some(schema.clone()));
        let attempts = self.policy.structured_attempts.max(1);
        let mut last_problems = Vec::new();

        for attempt in 1..=attempts {
            let text = self.run_tool_loop(&mut request, cancel).await?;
            let problems = match extract_json(&text) {
                Err(problem) => vec![problem],
                Ok(value) => {
                    let schema_errors: Vec<String> =
                        validator.iter_errors(&value).map(|e| e.to_string()).collect();
                    if schema_errors.is_empty() {
                        match serde_json::from_value::<T>(value) {
                            Ok(parsed) => match check(parsed) {
                                Ok(valid) => return Ok(valid),
                                Err(problems) => problems,
                            },
                            Err(err) => vec![err.to_string()],
                        }
                    } else {
                        schema_errors
                    }
                }
            };
            warn!(attempt, problems = problems.len(), "structured output rejected");
            request.history.push(Message::assistant(text));
            request.history.push(Message::user(format!(
                "Your previous answer was rejected:\n- {}\n\
                 Respond again with a single JSON object that satisfies the output schema.",
                problems.join("\n- ")
            )));
            last_problems = problems;
        }

        Err(AgentError::InvalidOutput {
            attempts,
            message: last_problems.join("; "),
        })
    }

    fn request(&self, invocation: &Invocation, output_schema: Option<Value>) -> AgentRequest {
        AgentRequest {
            role: invocation.role,
            prompt: invocation.prompt.clone(),
            history: invocation.history.clone(),
            tools: if invocation.with_tools {
                self.tools.specs()
            } else {
                Vec::new()
            },
            output_schema,
        }
    }

    /// Call until the agent answers with text, executing tool calls in between.
    async fn run_tool_loop(
        &self,
        request: &mut AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let mut round = 0u32;
        loop {
            match self.call_with_retry(request, cancel).await? {
                AgentReply::Text(text) => return Ok(text),
                AgentReply::ToolCalls(calls) => {
                    if request.tools.is_empty() {
                        return Err(AgentError::InvalidOutput {
                            attempts: 1,
                            message: "agent requested tools but none were offered".to_string(),
                        });
                    }
                    round += 1;
                    if round > self.policy.max_tool_rounds {
                        return Err(AgentError::InvalidOutput {
                            attempts: round,
                            message: format!(
                                "exceeded {} tool-call rounds without a final answer",
                                self.policy.max_tool_rounds
                            ),
                        });
                    }
                    let calls_json = serde_json::to_string(&calls).unwrap_or_default();
                    request
                        .history
                        .push(Message::assistant(format!("tool_calls: {calls_json}")));
                    for call in &calls {
                        let result = match self.tools.invoke(call) {
                            Ok(output) => output,
                            Err(err) => format!("error: {err}"),
                        };
                        debug!(tool = %call.name, round, "tool call answered");
                        request
                            .history
                            .push(Message::tool(format!("[{}] {}", call.name, result)));
                    }
                }
            }
        }
    }

    /// One logical call: timeout and cancellation per attempt, backoff between
    /// transient failures.
    async fn call_with_retry(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentReply, AgentError> {
        let attempts = self.policy.transient_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                outcome = tokio::time::timeout(
                    self.policy.timeout,
                    self.agent.complete(request),
                ) => outcome,
            };
            match outcome {
                Err(_) => return Err(AgentError::Timeout(self.policy.timeout)),
                Ok(Err(AgentError::Transient(message))) if attempt < attempts => {
                    let delay = self.policy.backoff_base * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %message,
                        "transient agent failure, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Ok(result) => return result,
            }
        }
    }
}

/// Pull a JSON object out of agent text, tolerating a Markdown code fence.
pub fn extract_json(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    if body.is_empty() {
        return Err("answer was empty".to_string());
    }
    serde_json::from_str(body).map_err(|err| format!("answer is not valid JSON: {err}"))
}
