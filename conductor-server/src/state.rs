//! Shared application state for the conductor server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use conductor::engine::{Engine, TurnOutcome};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a finished conversation's events stay replayable.
const EVENT_RETENTION: Duration = Duration::from_secs(10 * 60);

/// A turn driven in the background, with the token that cancels it.
struct RunningTurn {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Turns {
    next_generation: u64,
    running: HashMap<String, RunningTurn>,
    /// Generation of the last finished turn, until its events are dropped.
    finished: HashMap<String, u64>,
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    turns: Arc<Mutex<Turns>>,
    retention: Duration,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self::with_retention(engine, EVENT_RETENTION)
    }

    /// State whose finished conversations drop their events after `retention`.
    pub fn with_retention(engine: Engine, retention: Duration) -> Self {
        Self {
            engine,
            turns: Arc::new(Mutex::new(Turns::default())),
            retention,
        }
    }

    /// Drive the conversation's current turn on a background task.
    ///
    /// Returns `false` if a turn of this conversation is already being driven.
    pub fn spawn_turn(&self, conversation_id: &str) -> bool {
        let cancel = CancellationToken::new();
        let generation = {
            let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
            if turns.running.contains_key(conversation_id) {
                return false;
            }
            turns.next_generation += 1;
            let generation = turns.next_generation;
            turns.running.insert(
                conversation_id.to_string(),
                RunningTurn {
                    generation,
                    cancel: cancel.clone(),
                },
            );
            generation
        };

        let state = self.clone();
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            match state.engine.run(&conversation_id, &cancel).await {
                Ok(TurnOutcome::Completed) => {
                    info!(conversation_id = %conversation_id, "turn completed");
                }
                Ok(TurnOutcome::Failed(err)) => {
                    info!(conversation_id = %conversation_id, kind = %err.kind, "turn failed");
                }
                Err(err) => {
                    warn!(conversation_id = %conversation_id, error = %err, "could not drive turn");
                }
            }
            state.finish(&conversation_id, generation);
        });
        true
    }

    fn finish(&self, conversation_id: &str, generation: u64) {
        {
            let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
            if !turns
                .running
                .get(conversation_id)
                .is_some_and(|turn| turn.generation == generation)
            {
                return;
            }
            turns.running.remove(conversation_id);
            turns.finished.insert(conversation_id.to_string(), generation);
        }

        let state = self.clone();
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(state.retention).await;
            state.release_events(&conversation_id, generation);
        });
    }

    /// Drop the bus state of a conversation whose last turn is `generation`
    /// and which has not started another turn since.
    fn release_events(&self, conversation_id: &str, generation: u64) {
        let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
        if turns.running.contains_key(conversation_id)
            || turns.finished.get(conversation_id) != Some(&generation)
        {
            return;
        }
        turns.finished.remove(conversation_id);
        if self.engine.bus().forget(conversation_id) {
            debug!(conversation_id, "released events of finished conversation");
        }
    }

    pub fn is_running(&self, conversation_id: &str) -> bool {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
            .contains_key(conversation_id)
    }

    /// Cancel the running turn. Returns `false` if none is running.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
        match turns.running.get(conversation_id) {
            Some(turn) => {
                turn.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Re-enter every conversation left active or waiting for input.
    ///
    /// Suspended runs re-raise their pending input request on the fresh bus.
    pub fn resume_suspended(&self) -> anyhow::Result<usize> {
        let mut resumed = 0;
        for conversation_id in self.engine.conversation_ids()? {
            match self.engine.record(&conversation_id) {
                Ok(Some(record)) if record.is_resumable() => {
                    if self.spawn_turn(&conversation_id) {
                        resumed += 1;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        conversation_id = %conversation_id,
                        error = %err,
                        "skipping unreadable run record"
                    );
                }
            }
        }
        Ok(resumed)
    }
}
