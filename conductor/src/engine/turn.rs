//! Top-level stage loop of one turn and the shared frame plumbing.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::core::classifier::enforce_route_cap;
use crate::core::path::FramePath;
use crate::core::record::{PendingInterrupt, PlannerFrame, RunRecord, RunStatus, Stage, TaskFrame};
use crate::core::types::{
    Classification, InterruptRequest, InterruptResume, Message, Role, Route, TaskRunState,
};
use crate::error::{ErrorKind, TurnError};
use crate::events::{Event, InputError};
use crate::io::prompt::TurnInputs;

use super::RunContext;

/// Files listed in the static project outline.
pub(super) const OUTLINE_LIMIT: usize = 500;

/// A turn being driven. Owns the record until the turn stops.
pub(super) struct Turn<'a> {
    pub(super) ctx: &'a RunContext,
    pub(super) record: RunRecord,
    pub(super) cancel: &'a CancellationToken,
}

impl<'a> Turn<'a> {
    pub(super) fn new(
        ctx: &'a RunContext,
        record: RunRecord,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self { ctx, record, cancel }
    }

    /// Run until the turn completes or fails. Failures are recorded, never returned.
    pub(super) async fn drive(mut self) -> RunRecord {
        if let Err(err) = self.drive_stages().await {
            self.fail(err);
        }
        self.record
    }

    async fn drive_stages(&mut self) -> Result<(), TurnError> {
        self.record.status = RunStatus::Active;
        loop {
            match self.record.stage {
                Stage::Classify => self.classify().await?,
                Stage::Collect => self.collect().await?,
                Stage::Chat => self.chat().await?,
                Stage::Plan => self.plan().await?,
                Stage::Code => self.code().await?,
                Stage::Done => return self.finish(),
            }
        }
    }

    pub(super) fn conversation_id(&self) -> String {
        self.record.conversation_id.clone()
    }

    pub(super) fn publish(&self, event: Event) {
        self.ctx.bus.publish(&self.record.conversation_id, event);
    }

    pub(super) fn checkpoint(&self) -> Result<(), TurnError> {
        self.ctx
            .store
            .save(&self.record)
            .map_err(|err| TurnError::checkpoint(&err))
    }

    pub(super) fn store_task(&mut self, frame: &TaskFrame) -> Result<(), TurnError> {
        self.record.tasks.insert(frame.path.clone(), frame.clone());
        self.checkpoint()
    }

    pub(super) fn store_planner(&mut self, frame: &PlannerFrame) -> Result<(), TurnError> {
        self.record.planner = Some(frame.clone());
        self.checkpoint()
    }

    /// Inputs shared by the conversation-level agents.
    pub(super) fn turn_inputs(&self) -> TurnInputs {
        let state = &self.record.state;
        let mut history = state.message_history.clone();
        if history.last().is_some_and(|m| m.role == Role::User) {
            history.pop();
        }
        TurnInputs {
            request: state.latest_request().unwrap_or_default().to_string(),
            history,
            context: state.rendered_context(),
            outline: self.ctx.files.outline(OUTLINE_LIMIT),
            context_rounds: (state.context_retry_count, self.ctx.config.max_context_rounds),
        }
    }

    pub(super) fn static_context(&self) -> String {
        self.ctx.files.outline(OUTLINE_LIMIT).join("\n")
    }

    /// Suspend on human input, routed back to `frame` on resume.
    ///
    /// If the record already holds a pending interrupt of the same kind for
    /// this frame (a resumed run), it is re-raised with the same request id.
    #[instrument(skip_all, fields(frame = %frame, kind = ?request.kind()))]
    pub(super) async fn interrupt(
        &mut self,
        frame: &FramePath,
        request: InterruptRequest,
    ) -> Result<InterruptResume, TurnError> {
        let pending = match self.record.pending.take() {
            Some(existing)
                if existing.frame == *frame && existing.request.kind() == request.kind() =>
            {
                info!(request_id = %existing.request_id, "re-raising pending input request");
                existing
            }
            _ => PendingInterrupt {
                frame: frame.clone(),
                request_id: self.record.allocate_request_id(),
                request,
            },
        };
        self.record.pending = Some(pending.clone());
        self.record.status = RunStatus::AwaitingInput;
        self.checkpoint()?;

        let value = self
            .ctx
            .bus
            .request_input(
                &self.record.conversation_id,
                &pending.request_id,
                &pending.frame,
                pending.request,
                self.ctx.config.input_timeout(),
                self.cancel,
            )
            .await
            .map_err(|err| match err {
                InputError::Timeout(_) => TurnError::new(ErrorKind::InputTimeout, err.to_string()),
                InputError::Cancelled => TurnError::new(ErrorKind::Cancelled, "turn cancelled"),
            })?;

        self.record.pending = None;
        self.record.status = RunStatus::Active;
        Ok(InterruptResume(value))
    }

    async fn classify(&mut self) -> Result<(), TurnError> {
        let inputs = self.turn_inputs();
        let classification = self
            .ctx
            .agents
            .classifier
            .run(&inputs, self.cancel)
            .await
            .map_err(|err| TurnError::from_agent(ErrorKind::ClassificationFailure, &err))?;

        let count = self.record.state.context_retry_count;
        let route = enforce_route_cap(
            classification.route,
            count,
            self.ctx.config.max_context_rounds,
        );
        if route != classification.route {
            warn!(context_rounds = count, "context cap reached, routing to plan");
        }
        self.publish(Event::Classified {
            route,
            reasoning: classification.reasoning.clone(),
        });
        self.record.classification = Some(Classification {
            route,
            reasoning: classification.reasoning,
        });
        self.record.stage = match route {
            Route::Chat => Stage::Chat,
            Route::Context => Stage::Collect,
            Route::Plan => Stage::Plan,
            Route::Code => Stage::Code,
        };
        self.checkpoint()
    }

    async fn collect(&mut self) -> Result<(), TurnError> {
        let inputs = self.turn_inputs();
        let bundle = self
            .ctx
            .agents
            .collector
            .run(&inputs, self.cancel)
            .await
            .map_err(|err| TurnError::from_agent(ErrorKind::ContextFailure, &err))?;
        let state = &mut self.record.state;
        state.accumulated_context.push(bundle.clone());
        state.context_retry_count += 1;
        let round = state.context_retry_count;
        self.publish(Event::ContextCollected { round, bundle });
        self.record.stage = Stage::Classify;
        self.checkpoint()
    }

    async fn chat(&mut self) -> Result<(), TurnError> {
        let inputs = self.turn_inputs();
        let reply = self
            .ctx
            .agents
            .chat
            .run(&inputs, self.cancel)
            .await
            .map_err(|err| TurnError::from_agent(ErrorKind::ChatFailure, &err))?;
        self.record
            .state
            .message_history
            .push(Message::assistant(reply.clone()));
        self.publish(Event::ChatReply { text: reply });
        self.record.stage = Stage::Done;
        self.checkpoint()
    }

    /// Single task against the raw request.
    async fn code(&mut self) -> Result<(), TurnError> {
        let path = FramePath::code(&self.record.conversation_id);
        if !self.record.tasks.contains_key(&path) {
            let description = self
                .record
                .state
                .latest_request()
                .unwrap_or_default()
                .to_string();
            let state = TaskRunState {
                static_context: self.static_context(),
                dynamic_context: self.record.state.rendered_context(),
                ..TaskRunState::default()
            };
            let frame = TaskFrame::new(path.clone(), None, description.clone(), state);
            self.publish(Event::TaskStarted {
                frame: path.clone(),
                description,
            });
            self.store_task(&frame)?;
        }

        let summary = self.run_task(&path).await?;
        self.record.tasks.remove(&path);
        self.record
            .state
            .message_history
            .push(Message::assistant(format!("Applied changes: {summary}")));
        self.record.stage = Stage::Done;
        self.checkpoint()
    }

    fn finish(&mut self) -> Result<(), TurnError> {
        self.record.status = RunStatus::Completed;
        self.record.error = None;
        self.checkpoint()?;
        info!(turn = self.record.turn, "turn completed");
        self.publish(Event::TurnCompleted {
            turn: self.record.turn,
        });
        Ok(())
    }

    /// Terminal failure: record it, publish exactly one `turnFailed`.
    fn fail(&mut self, err: TurnError) {
        error!(kind = %err.kind, message = %err.message, "turn failed");
        self.record.status = RunStatus::Failed;
        self.record.pending = None;
        self.record.error = Some(err.clone());
        if let Err(save_err) = self.ctx.store.save(&self.record) {
            warn!(err = %save_err, "could not checkpoint failed turn");
        }
        self.publish(Event::TurnFailed {
            kind: err.kind,
            message: err.message,
        });
    }
}
