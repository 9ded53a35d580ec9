//! Test doubles and fixtures shared by unit and integration tests.
//!
//! Enabled with `cfg(test)` or the `test-support` feature.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use crate::agents::invoker::{AgentInvoker, InvokePolicy};
use crate::agents::tools::ToolRegistry;
use crate::agents::{Agent, AgentReply, AgentRequest, AgentRole, ToolCall};
use crate::core::fileops::{FileEffect, plan_effect};
use crate::core::types::{
    ContextBundle, Evaluation, ExecutionStep, FileOperation, FilePlan, Grade,
};
use crate::engine::{Engine, RunContext};
use crate::error::{AgentError, FileOperationError};
use crate::events::{Envelope, Event, EventBus};
use crate::io::config::EngineConfig;
use crate::io::files::FileMutator;
use crate::io::init::{ConductorPaths, InitOptions, init_conductor};

/// One scripted answer for an agent call.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Json(Value),
    ToolCalls(Vec<ToolCall>),
    Transient(String),
    /// Never answers; used to exercise timeouts and cancellation.
    Hang,
}

/// Agent returning queued replies per role and recording every request.
#[derive(Default)]
pub struct ScriptedAgent {
    replies: Mutex<HashMap<AgentRole, VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, role: AgentRole, reply: ScriptedReply) {
        self.replies
            .lock()
            .expect("replies lock")
            .entry(role)
            .or_default()
            .push_back(reply);
    }

    pub fn push_json(&self, role: AgentRole, value: impl serde::Serialize) {
        self.push(role, ScriptedReply::Json(serde_json::to_value(value).expect("json")));
    }

    /// Requests received for `role`, oldest first.
    pub fn calls(&self, role: AgentRole) -> Vec<AgentRequest> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|r| r.role == role)
            .cloned()
            .collect()
    }

    /// Roles of all requests, in call order.
    pub fn call_roles(&self) -> Vec<AgentRole> {
        self.calls.lock().expect("calls lock").iter().map(|r| r.role).collect()
    }

    pub fn remaining(&self, role: AgentRole) -> usize {
        self.replies
            .lock()
            .expect("replies lock")
            .get(&role)
            .map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn complete(&self, request: &AgentRequest) -> Result<AgentReply, AgentError> {
        self.calls.lock().expect("calls lock").push(request.clone());
        let next = self
            .replies
            .lock()
            .expect("replies lock")
            .get_mut(&request.role)
            .and_then(VecDeque::pop_front);
        match next {
            Some(ScriptedReply::Text(text)) => Ok(AgentReply::Text(text)),
            Some(ScriptedReply::Json(value)) => Ok(AgentReply::Text(value.to_string())),
            Some(ScriptedReply::ToolCalls(calls)) => Ok(AgentReply::ToolCalls(calls)),
            Some(ScriptedReply::Transient(message)) => Err(AgentError::Transient(message)),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            None => Err(AgentError::Backend(anyhow!(
                "no scripted reply for {}",
                request.role.as_str()
            ))),
        }
    }
}

/// In-memory workspace recording every `apply` call in order.
#[derive(Default)]
pub struct MemoryFiles {
    files: Mutex<BTreeMap<String, String>>,
    calls: Mutex<Vec<FileOperation>>,
}

impl MemoryFiles {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let store = Self::default();
        {
            let mut map = store.files.lock().expect("files lock");
            for (path, content) in files {
                map.insert((*path).to_string(), (*content).to_string());
            }
        }
        store
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.files.lock().expect("files lock").get(path).cloned()
    }

    /// Every operation passed to `apply`, including ones that failed.
    pub fn apply_calls(&self) -> Vec<FileOperation> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl FileMutator for MemoryFiles {
    fn read(&self, path: &str) -> Result<Option<String>, FileOperationError> {
        Ok(self.content(path))
    }

    fn apply(&self, op: &FileOperation) -> Result<(), FileOperationError> {
        self.calls.lock().expect("calls lock").push(op.clone());
        let Some(path) = op.path() else {
            return Ok(());
        };
        let mut files = self.files.lock().expect("files lock");
        match plan_effect(op, files.get(path).map(String::as_str))? {
            FileEffect::Write(content) => {
                files.insert(path.to_string(), content);
            }
            FileEffect::Remove => {
                files.remove(path);
            }
            FileEffect::Nothing => {}
        }
        Ok(())
    }

    fn outline(&self, limit: usize) -> Vec<String> {
        self.files
            .lock()
            .expect("files lock")
            .keys()
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Invocation policy with tiny delays for tests.
pub fn fast_policy() -> InvokePolicy {
    InvokePolicy {
        timeout: Duration::from_secs(5),
        transient_attempts: 3,
        backoff_base: Duration::from_millis(1),
        structured_attempts: 2,
        max_tool_rounds: 5,
    }
}

/// Invoker over `agent` with read-only tools on an empty in-memory workspace.
pub fn invoker_for(agent: Arc<ScriptedAgent>) -> AgentInvoker {
    let files: Arc<dyn FileMutator> = Arc::new(MemoryFiles::default());
    AgentInvoker::new(agent, ToolRegistry::read_only(files), fast_policy())
}

/// Config used by test engines: defaults with near-zero backoff.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        backoff_base_ms: 1,
        agent_timeout_secs: 5,
        ..EngineConfig::default()
    }
}

pub fn step(id: &str, deps: &[&str]) -> ExecutionStep {
    ExecutionStep {
        task_id: id.to_string(),
        description: format!("step {id}"),
        guidelines: Vec::new(),
        id_dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
        target_resource: String::new(),
        file_dependencies: Vec::new(),
        pitfalls: Vec::new(),
    }
}

pub fn evaluation(grade: Grade) -> Evaluation {
    Evaluation {
        grade,
        feedback: match grade {
            Grade::Pass => "looks good".to_string(),
            Grade::RevisionNeeded => "needs work".to_string(),
        },
        strengths: Vec::new(),
        weaknesses: Vec::new(),
        suggested_revision: None,
        alternative_approach: None,
    }
}

pub fn file_plan(operations: Vec<FileOperation>) -> FilePlan {
    FilePlan {
        task_id: None,
        summary: "test change".to_string(),
        operations,
        research_notes: None,
        reasoning: "because".to_string(),
    }
}

pub fn context_bundle(summary: &str) -> ContextBundle {
    ContextBundle {
        retrieval_summary: summary.to_string(),
        project_structure: String::new(),
        code_snippets: Vec::new(),
        external_context: Vec::new(),
        gaps: Vec::new(),
        confidence: 0.8,
    }
}

/// Engine over a temp `.conductor/` dir with a scripted agent and memory files.
pub struct TestHarness {
    pub temp: TempDir,
    pub agent: Arc<ScriptedAgent>,
    pub files: Arc<MemoryFiles>,
    pub engine: Engine,
    config: EngineConfig,
}

impl TestHarness {
    pub fn new(files: MemoryFiles) -> Self {
        Self::with_config(files, test_config())
    }

    pub fn with_config(files: MemoryFiles, config: EngineConfig) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        init_conductor(temp.path(), &InitOptions { force: false }).expect("init");
        let agent = Arc::new(ScriptedAgent::new());
        let files = Arc::new(files);
        let engine = build_engine(temp.path(), &agent, &files, config.clone());
        Self {
            temp,
            agent,
            files,
            engine,
            config,
        }
    }

    /// Fresh engine and bus over the same directories, agent and files, as
    /// after a process restart.
    pub fn restart(&mut self) {
        self.engine = build_engine(self.temp.path(), &self.agent, &self.files, self.config.clone());
    }

    pub fn paths(&self) -> ConductorPaths {
        ConductorPaths::new(self.temp.path())
    }
}

fn build_engine(
    root: &Path,
    agent: &Arc<ScriptedAgent>,
    files: &Arc<MemoryFiles>,
    config: EngineConfig,
) -> Engine {
    let paths = ConductorPaths::new(root);
    let agent: Arc<dyn Agent> = agent.clone();
    let files: Arc<dyn FileMutator> = files.clone();
    let ctx = RunContext::new(config, agent, files, EventBus::new(), &paths).expect("run context");
    Engine::new(ctx)
}

/// Answer input requests of `conversation_id` from `answers`, in order.
///
/// Subscribes before returning, so no event published after this call is
/// missed. The task ends at the turn's terminal event, or at the first input
/// request once `answers` is exhausted. It returns every event it saw.
pub fn spawn_responder(
    bus: &EventBus,
    conversation_id: &str,
    answers: Vec<&str>,
) -> JoinHandle<Vec<Envelope>> {
    let (mut backlog, mut receiver) = bus.subscribe_with_backlog(conversation_id);
    // Events of earlier turns are not this responder's business.
    if let Some(last_terminal) = backlog.iter().rposition(|e| e.event.is_terminal()) {
        backlog.drain(..=last_terminal);
    }
    let answered: HashSet<String> = backlog
        .iter()
        .filter_map(|e| match &e.event {
            Event::InputAnswered { request_id, .. } => Some(request_id.clone()),
            _ => None,
        })
        .collect();
    let bus = bus.clone();
    let conversation_id = conversation_id.to_string();
    let mut answers: VecDeque<String> = answers.into_iter().map(str::to_string).collect();
    tokio::spawn(async move {
        let mut seen = Vec::new();
        let mut last_seq = 0;
        let mut queue: VecDeque<Envelope> = backlog.into();
        loop {
            let envelope = match queue.pop_front() {
                Some(envelope) => envelope,
                None => match receiver.recv().await {
                    Ok(envelope) => envelope,
                    Err(_) => return seen,
                },
            };
            if envelope.conversation_id != conversation_id || envelope.seq <= last_seq {
                continue;
            }
            last_seq = envelope.seq;
            seen.push(envelope.clone());
            match &envelope.event {
                Event::InputRequested { request_id, .. } if answered.contains(request_id) => {}
                Event::InputRequested { request, .. } => match answers.pop_front() {
                    Some(answer) => {
                        bus.answer(&conversation_id, request.kind(), answer)
                            .expect("answer pending input");
                    }
                    None => return seen,
                },
                event if event.is_terminal() => return seen,
                _ => {}
            }
        }
    })
}

/// Event type names, for compact assertions.
pub fn event_types(events: &[Envelope]) -> Vec<String> {
    events
        .iter()
        .map(|e| {
            serde_json::to_value(&e.event)
                .ok()
                .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default()
        })
        .collect()
}
