//! Conversation engine: drives one run record through classification, the
//! chosen route, and any nested plan/task frames.
//!
//! The engine owns no conversation state in memory. Each call to
//! [`Engine::run`] loads the record from the checkpoint store, drives it until
//! the turn completes or fails, and checkpoints after every transition. A run
//! blocked on human input is therefore resumable from disk by calling `run`
//! again, even in a fresh process.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::agents::invoker::{AgentInvoker, InvokePolicy};
use crate::agents::tools::ToolRegistry;
use crate::agents::{Agent, AgentSet};
use crate::core::record::{RunRecord, RunStatus};
use crate::error::TurnError;
use crate::events::{Event, EventBus};
use crate::io::checkpoint::CheckpointStore;
use crate::io::codex::CodexAgent;
use crate::io::config::{EngineConfig, load_config};
use crate::io::files::{FileMutator, Workspace};
use crate::io::init::ConductorPaths;
use crate::io::prompt::PromptBuilder;
use crate::io::task_log::TaskLog;

mod planner;
mod task;
mod turn;

use turn::Turn;

/// Dependencies of a run, injected once at startup.
pub struct RunContext {
    pub config: EngineConfig,
    pub agents: AgentSet,
    pub files: Arc<dyn FileMutator>,
    pub bus: EventBus,
    pub store: CheckpointStore,
    pub task_log: TaskLog,
}

impl RunContext {
    pub fn new(
        config: EngineConfig,
        agent: Arc<dyn Agent>,
        files: Arc<dyn FileMutator>,
        bus: EventBus,
        paths: &ConductorPaths,
    ) -> Result<Self> {
        config.validate()?;
        let tools = ToolRegistry::read_only(Arc::clone(&files));
        let invoker = AgentInvoker::new(agent, tools, InvokePolicy::from_config(&config));
        let agents = AgentSet::new(invoker, PromptBuilder::new(config.prompt_budget_bytes))
            .context("build agents")?;
        Ok(Self {
            config,
            agents,
            files,
            bus,
            store: CheckpointStore::new(&paths.conversations_dir),
            task_log: TaskLog::new(&paths.tasks_dir),
        })
    }

    /// Context for a project directory using the configured model CLI.
    pub fn for_project(root: &Path, bus: EventBus) -> Result<Self> {
        let paths = ConductorPaths::new(root);
        let config = load_config(&paths.config_path)?;
        let agent = Arc::new(CodexAgent::new(root, &paths.scratch_dir, &config));
        let files = Arc::new(Workspace::new(root));
        Self::new(config, agent, files, bus, &paths)
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed(TurnError),
}

#[derive(Clone)]
pub struct Engine {
    ctx: Arc<RunContext>,
    running: Arc<Mutex<HashSet<String>>>,
}

/// Marks a conversation as being driven; cleared on drop.
struct RunningGuard {
    running: Arc<Mutex<HashSet<String>>>,
    conversation_id: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.conversation_id);
    }
}

impl Engine {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.ctx.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Create a conversation whose first turn is `prompt`. Returns its id.
    pub fn start(&self, prompt: &str) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(anyhow!("prompt must not be empty"));
        }
        let conversation_id = uuid::Uuid::new_v4().simple().to_string();
        let record = RunRecord::new(&conversation_id, prompt);
        self.ctx.store.save(&record)?;
        self.ctx.bus.publish(
            &conversation_id,
            Event::TurnStarted {
                turn: record.turn,
                request: prompt.to_string(),
            },
        );
        info!(conversation_id = %conversation_id, "conversation started");
        Ok(conversation_id)
    }

    /// Begin a new user turn on a completed conversation.
    pub fn send(&self, conversation_id: &str, prompt: &str) -> Result<()> {
        if prompt.trim().is_empty() {
            return Err(anyhow!("prompt must not be empty"));
        }
        let mut record = self.load(conversation_id)?;
        match record.status {
            RunStatus::Completed => {}
            RunStatus::Failed => {
                return Err(anyhow!("conversation {conversation_id} failed and cannot continue"));
            }
            RunStatus::Active | RunStatus::AwaitingInput => {
                return Err(anyhow!("conversation {conversation_id} has a turn in progress"));
            }
        }
        record.begin_turn(prompt);
        self.ctx.store.save(&record)?;
        self.ctx.bus.publish(
            conversation_id,
            Event::TurnStarted {
                turn: record.turn,
                request: prompt.to_string(),
            },
        );
        Ok(())
    }

    pub fn record(&self, conversation_id: &str) -> Result<Option<RunRecord>> {
        self.ctx.store.load(conversation_id)
    }

    /// Ids of all persisted conversations.
    pub fn conversation_ids(&self) -> Result<Vec<String>> {
        self.ctx.store.list()
    }

    /// Whether a turn of `conversation_id` is being driven by this engine.
    pub fn is_running(&self, conversation_id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(conversation_id)
    }

    fn load(&self, conversation_id: &str) -> Result<RunRecord> {
        self.ctx
            .store
            .load(conversation_id)?
            .ok_or_else(|| anyhow!("unknown conversation {conversation_id}"))
    }

    /// Drive the conversation's current turn to completion or failure.
    ///
    /// Re-enters a suspended run exactly where it stopped. Calling `run` on a
    /// finished turn returns its outcome without doing anything.
    #[instrument(skip_all, fields(conversation_id = %conversation_id))]
    pub async fn run(
        &self,
        conversation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let record = self.load(conversation_id)?;
        if !record.is_resumable() {
            return Ok(outcome_of(&record));
        }
        let _guard = self.claim(conversation_id)?;
        info!(stage = ?record.stage, status = ?record.status, "driving turn");
        let record = Turn::new(&self.ctx, record, cancel).drive().await;
        Ok(outcome_of(&record))
    }

    fn claim(&self, conversation_id: &str) -> Result<RunningGuard> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(conversation_id.to_string()) {
            return Err(anyhow!("conversation {conversation_id} is already running"));
        }
        Ok(RunningGuard {
            running: Arc::clone(&self.running),
            conversation_id: conversation_id.to_string(),
        })
    }
}

fn outcome_of(record: &RunRecord) -> TurnOutcome {
    match (&record.status, &record.error) {
        (RunStatus::Failed, Some(err)) => TurnOutcome::Failed(err.clone()),
        (RunStatus::Failed, None) => TurnOutcome::Failed(TurnError::new(
            crate::error::ErrorKind::CheckpointFailure,
            "run failed without a recorded error",
        )),
        _ => TurnOutcome::Completed,
    }
}
