//! Per-conversation ordered event channel and human-input rendezvous.
//!
//! One broadcast channel carries every conversation's events. Each event is
//! tagged with its conversation id and a per-conversation sequence number.
//! A backlog per conversation lets late subscribers replay from the start.
//!
//! Human answers travel through the same channel as `inputAnswered` events.
//! A waiter in [`EventBus::request_input`] ignores answers for other
//! conversations and other request ids.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::path::FramePath;
use crate::core::types::{
    ContextBundle, Evaluation, ExecutionStep, FilePlan, InterruptKind, InterruptRequest,
    OperationType, ProjectPlan, Route,
};
use crate::error::ErrorKind;

/// Live events buffered per receiver before it lags.
pub const CHANNEL_CAPACITY: usize = 1024;
const BACKLOG_LIMIT: usize = 2048;

/// Everything the engine reports while a turn runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Event {
    TurnStarted {
        turn: u32,
        request: String,
    },
    Classified {
        route: Route,
        reasoning: String,
    },
    ContextCollected {
        round: u32,
        bundle: ContextBundle,
    },
    ChatReply {
        text: String,
    },
    PlanProposed {
        plan: ProjectPlan,
        revision: u32,
    },
    StepStarted {
        step: ExecutionStep,
        index: usize,
        total: usize,
    },
    TaskStarted {
        frame: FramePath,
        description: String,
    },
    ProposalGenerated {
        frame: FramePath,
        attempt: u32,
        plan: FilePlan,
    },
    Evaluated {
        frame: FramePath,
        attempt: u32,
        evaluation: Evaluation,
    },
    InputRequested {
        request_id: String,
        frame: FramePath,
        request: InterruptRequest,
    },
    InputAnswered {
        request_id: String,
        kind: InterruptKind,
        value: String,
    },
    OperationApplied {
        frame: FramePath,
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        operation_type: OperationType,
    },
    TaskCompleted {
        frame: FramePath,
        summary: String,
    },
    TurnCompleted {
        turn: u32,
    },
    TurnFailed {
        kind: ErrorKind,
        message: String,
    },
}

impl Event {
    /// Terminal events end a turn's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::TurnCompleted { .. } | Event::TurnFailed { .. })
    }
}

/// An event tagged with its conversation and position in that conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub conversation_id: String,
    pub seq: u64,
    #[serde(flatten)]
    pub event: Event,
}

/// The input a conversation is currently blocked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInput {
    pub request_id: String,
    pub kind: InterruptKind,
    #[serde(skip)]
    answer: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("input request cancelled")]
    Cancelled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnswerError {
    #[error("conversation {0} is not waiting for input")]
    NoPendingInput(String),
    #[error("expected a {expected:?} answer, got {got:?}")]
    KindMismatch {
        expected: InterruptKind,
        got: InterruptKind,
    },
    #[error("request {0} was already answered")]
    AlreadyAnswered(String),
    #[error("request {0} is not pending")]
    NotPending(String),
}

#[derive(Default)]
struct BusState {
    seq: HashMap<String, u64>,
    backlog: HashMap<String, VecDeque<Envelope>>,
    pending: HashMap<String, PendingInput>,
    /// Highest sequence number of any forgotten conversation. Counters start
    /// above it so a forgotten conversation never reuses a number.
    retired_seq: u64,
}

struct Inner {
    sender: broadcast::Sender<Envelope>,
    state: Mutex<BusState>,
}

/// Shared, cloneable handle to the event channel.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                sender,
                state: Mutex::new(BusState::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        // Poisoning leaves the maps valid.
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Append `event` to the conversation's stream. Never blocks.
    pub fn publish(&self, conversation_id: &str, event: Event) -> Envelope {
        let mut state = self.lock();
        self.publish_locked(&mut state, conversation_id, event)
    }

    fn publish_locked(
        &self,
        state: &mut BusState,
        conversation_id: &str,
        event: Event,
    ) -> Envelope {
        let floor = state.retired_seq;
        let seq = state.seq.entry(conversation_id.to_string()).or_insert(floor);
        *seq += 1;
        let envelope = Envelope {
            conversation_id: conversation_id.to_string(),
            seq: *seq,
            event,
        };
        let backlog = state.backlog.entry(conversation_id.to_string()).or_default();
        if backlog.len() >= BACKLOG_LIMIT {
            backlog.pop_front();
        }
        backlog.push_back(envelope.clone());
        debug!(conversation_id, seq = envelope.seq, "event published");
        // No receivers is fine: the backlog still has the event.
        let _ = self.inner.sender.send(envelope.clone());
        envelope
    }

    /// Live receiver for all conversations.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inner.sender.subscribe()
    }

    /// Backlog of one conversation plus a receiver positioned right after it.
    ///
    /// Taken under the bus lock, so no event is missed or seen twice as long as
    /// the caller skips live events with `seq <=` the last backlog entry.
    pub fn subscribe_with_backlog(
        &self,
        conversation_id: &str,
    ) -> (Vec<Envelope>, broadcast::Receiver<Envelope>) {
        let state = self.lock();
        let backlog = state
            .backlog
            .get(conversation_id)
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default();
        (backlog, self.inner.sender.subscribe())
    }

    pub fn backlog(&self, conversation_id: &str) -> Vec<Envelope> {
        self.subscribe_with_backlog(conversation_id).0
    }

    pub fn pending_input(&self, conversation_id: &str) -> Option<PendingInput> {
        self.lock().pending.get(conversation_id).cloned()
    }

    /// Publish an `inputRequested` event and wait for the matching answer.
    ///
    /// `timeout` of `None` waits until answered or cancelled.
    pub async fn request_input(
        &self,
        conversation_id: &str,
        request_id: &str,
        frame: &FramePath,
        request: InterruptRequest,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<String, InputError> {
        let kind = request.kind();
        let mut receiver = {
            let mut state = self.lock();
            let receiver = self.inner.sender.subscribe();
            state.pending.insert(
                conversation_id.to_string(),
                PendingInput {
                    request_id: request_id.to_string(),
                    kind,
                    answer: None,
                },
            );
            self.publish_locked(
                &mut state,
                conversation_id,
                Event::InputRequested {
                    request_id: request_id.to_string(),
                    frame: frame.clone(),
                    request,
                },
            );
            receiver
        };
        info!(conversation_id, request_id, ?kind, "waiting for human input");

        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let outcome = loop {
            if let Some(answer) = self.stored_answer(conversation_id, request_id) {
                break Ok(answer);
            }
            let sleep = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break Err(InputError::Cancelled),
                _ = sleep => break Err(InputError::Timeout(timeout.unwrap_or_default())),
                received = receiver.recv() => match received {
                    Ok(envelope) => {
                        if envelope.conversation_id != conversation_id {
                            continue;
                        }
                        if let Event::InputAnswered {
                            request_id: answered,
                            value,
                            ..
                        } = envelope.event
                            && answered == request_id
                        {
                            break Ok(value);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "input waiter lagged, checking stored answer");
                    }
                    Err(broadcast::error::RecvError::Closed) => break Err(InputError::Cancelled),
                },
            }
        };

        let mut state = self.lock();
        if state
            .pending
            .get(conversation_id)
            .is_some_and(|p| p.request_id == request_id)
        {
            state.pending.remove(conversation_id);
        }
        outcome
    }

    fn stored_answer(&self, conversation_id: &str, request_id: &str) -> Option<String> {
        let state = self.lock();
        state
            .pending
            .get(conversation_id)
            .filter(|p| p.request_id == request_id)
            .and_then(|p| p.answer.clone())
    }

    /// Satisfy the conversation's pending input. Returns the answered request id.
    pub fn answer(
        &self,
        conversation_id: &str,
        kind: InterruptKind,
        value: impl Into<String>,
    ) -> Result<String, AnswerError> {
        self.answer_checked(conversation_id, None, kind, value.into())
    }

    /// Like [`EventBus::answer`], but only if `request_id` is the pending request.
    pub fn answer_request(
        &self,
        conversation_id: &str,
        request_id: &str,
        kind: InterruptKind,
        value: impl Into<String>,
    ) -> Result<String, AnswerError> {
        self.answer_checked(conversation_id, Some(request_id), kind, value.into())
    }

    fn answer_checked(
        &self,
        conversation_id: &str,
        expected: Option<&str>,
        kind: InterruptKind,
        value: String,
    ) -> Result<String, AnswerError> {
        let mut state = self.lock();
        let pending = match (state.pending.get_mut(conversation_id), expected) {
            (Some(pending), Some(expected)) if pending.request_id != expected => {
                return Err(AnswerError::NotPending(expected.to_string()));
            }
            (Some(pending), _) => pending,
            (None, Some(expected)) => return Err(AnswerError::NotPending(expected.to_string())),
            (None, None) => {
                return Err(AnswerError::NoPendingInput(conversation_id.to_string()));
            }
        };
        if pending.kind != kind {
            return Err(AnswerError::KindMismatch {
                expected: pending.kind,
                got: kind,
            });
        }
        if pending.answer.is_some() {
            return Err(AnswerError::AlreadyAnswered(pending.request_id.clone()));
        }
        pending.answer = Some(value.clone());
        let request_id = pending.request_id.clone();
        self.publish_locked(
            &mut state,
            conversation_id,
            Event::InputAnswered {
                request_id: request_id.clone(),
                kind,
                value,
            },
        );
        info!(conversation_id = %conversation_id, request_id = %request_id, "input answered");
        Ok(request_id)
    }

    /// Drop the conversation's sequence counter and backlog.
    ///
    /// A conversation still waiting for input is kept. Returns whether anything
    /// was dropped. Later events continue above every number already handed out.
    pub fn forget(&self, conversation_id: &str) -> bool {
        let mut state = self.lock();
        if state.pending.contains_key(conversation_id) {
            return false;
        }
        let last_seq = state.seq.remove(conversation_id);
        if let Some(last) = last_seq {
            state.retired_seq = state.retired_seq.max(last);
        }
        let had_seq = last_seq.is_some();
        let had_backlog = state.backlog.remove(conversation_id).is_some();
        if had_seq || had_backlog {
            debug!(conversation_id, "conversation events forgotten");
        }
        had_seq || had_backlog
    }

    /// Number of conversations the bus holds any state for.
    pub fn tracked_conversations(&self) -> usize {
        let state = self.lock();
        let mut ids: Vec<&String> = state
            .seq
            .keys()
            .chain(state.backlog.keys())
            .chain(state.pending.keys())
            .collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }
}
