//! HTTP route handlers for the conversation API.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use conductor::core::record::RunRecord;
use conductor::core::types::InterruptKind;
use conductor::events::{AnswerError, PendingInput};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::sse;
use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/start", post(start_conversation))
        .route("/stream/{id}", get(sse::events_handler))
        .route("/answer/{id}", post(answer))
        .route("/send/{id}", post(send_message))
        .route("/cancel/{id}", post(cancel))
        .route("/pending/{id}", get(get_pending))
        .route("/conversations/{id}", get(get_conversation))
}

/// Error response: status plus `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(err: &anyhow::Error) -> Self {
        warn!(error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<AnswerError> for ApiError {
    fn from(err: AnswerError) -> Self {
        let status = match err {
            AnswerError::NoPendingInput(_)
            | AnswerError::AlreadyAnswered(_)
            | AnswerError::NotPending(_) => StatusCode::CONFLICT,
            AnswerError::KindMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self::new(status, err.to_string())
    }
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct PromptBody {
    pub prompt: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Started {
    pub conversation_id: String,
}

/// POST /start - start a conversation and drive its first turn.
pub async fn start_conversation(
    State(state): State<AppState>,
    Json(body): Json<PromptBody>,
) -> Result<(StatusCode, Json<Started>), ApiError> {
    if body.prompt.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "prompt must not be empty"));
    }
    let conversation_id = state
        .engine
        .start(&body.prompt)
        .map_err(|err| ApiError::internal(&err))?;
    state.spawn_turn(&conversation_id);
    Ok((StatusCode::CREATED, Json(Started { conversation_id })))
}

/// POST /send/:id - begin the next turn.
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PromptBody>,
) -> Result<StatusCode, ApiError> {
    let record = load_record(&state, &id)?;
    if record.is_resumable() || state.is_running(&id) {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("conversation {id} has a turn in progress"),
        ));
    }
    state
        .engine
        .send(&id, &body.prompt)
        .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, format!("{err:#}")))?;
    state.spawn_turn(&id);
    Ok(StatusCode::ACCEPTED)
}

/// GET /conversations/:id - the persisted run record.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunRecord>, ApiError> {
    load_record(&state, &id).map(Json)
}

/// GET /pending/:id - the input the turn is blocked on.
pub async fn get_pending(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PendingInput>, ApiError> {
    state
        .engine
        .bus()
        .pending_input(&id)
        .map(Json)
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                format!("conversation {id} is not waiting for input"),
            )
        })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerBody {
    pub kind: InterruptKind,
    pub value: String,
    /// When given, the answer is rejected unless this request is the pending one.
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Answered {
    pub request_id: String,
}

/// POST /answer/:id - resume the pending input request.
pub async fn answer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AnswerBody>,
) -> Result<Json<Answered>, ApiError> {
    let bus = state.engine.bus();
    let request_id = match &body.request_id {
        Some(expected) => bus.answer_request(&id, expected, body.kind, body.value)?,
        None => bus.answer(&id, body.kind, body.value)?,
    };
    Ok(Json(Answered { request_id }))
}

/// POST /cancel/:id - cancel the running turn.
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.cancel(&id) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("conversation {id} has no running turn"),
        ))
    }
}

fn load_record(state: &AppState, id: &str) -> Result<RunRecord, ApiError> {
    state
        .engine
        .record(id)
        .map_err(|err| ApiError::internal(&err))?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("unknown conversation {id}")))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conductor::agents::AgentRole;
    use conductor::core::record::RunStatus;
    use conductor::core::types::{FileOperation, Grade, InterruptResume, Route};
    use conductor::test_support::{MemoryFiles, ScriptedReply, TestHarness, evaluation, file_plan};
    use serde_json::json;

    use super::*;

    fn app(harness: &TestHarness) -> AppState {
        AppState::new(harness.engine.clone())
    }

    async fn wait_for_status(state: &AppState, id: &str, status: RunStatus) -> RunRecord {
        for _ in 0..500 {
            if let Some(record) = state.engine.record(id).expect("load")
                && record.status == status
                && !state.is_running(id)
            {
                return record;
            }
            if status == RunStatus::AwaitingInput
                && state.engine.bus().pending_input(id).is_some()
            {
                return state.engine.record(id).expect("load").expect("record");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("conversation {id} never reached {status:?}");
    }

    #[tokio::test]
    async fn chat_turn_completes_in_background() {
        let harness = TestHarness::new(MemoryFiles::default());
        harness
            .agent
            .push_json(AgentRole::Classifier, json!({ "route": "chat", "reasoning": "greeting" }));
        harness
            .agent
            .push(AgentRole::Chat, ScriptedReply::Text("Hello!".to_string()));
        let state = app(&harness);

        let (status, Json(started)) = start_conversation(
            State(state.clone()),
            Json(PromptBody {
                prompt: "hi".to_string(),
            }),
        )
        .await
        .expect("start");
        assert_eq!(status, StatusCode::CREATED);

        let record = wait_for_status(&state, &started.conversation_id, RunStatus::Completed).await;
        assert_eq!(record.turn, 1);
        let Json(fetched) = get_conversation(State(state), Path(started.conversation_id))
            .await
            .expect("get");
        assert_eq!(fetched.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn answer_resumes_pending_approval() {
        let harness = TestHarness::new(MemoryFiles::with_files(&[("a.txt", "old\n")]));
        harness.agent.push_json(
            AgentRole::Classifier,
            json!({ "route": Route::Code.as_str(), "reasoning": "small edit" }),
        );
        harness.agent.push_json(
            AgentRole::Coder,
            file_plan(vec![FileOperation::Replace {
                path: "a.txt".to_string(),
                content: "new\n".to_string(),
            }]),
        );
        harness
            .agent
            .push_json(AgentRole::Evaluator, evaluation(Grade::Pass));
        let state = app(&harness);

        let (_, Json(started)) = start_conversation(
            State(state.clone()),
            Json(PromptBody {
                prompt: "update a.txt".to_string(),
            }),
        )
        .await
        .expect("start");
        let id = started.conversation_id;
        wait_for_status(&state, &id, RunStatus::AwaitingInput).await;

        let Json(pending) = get_pending(State(state.clone()), Path(id.clone()))
            .await
            .expect("pending");
        assert_eq!(pending.kind, InterruptKind::Approval);

        let wrong_kind = answer(
            State(state.clone()),
            Path(id.clone()),
            Json(AnswerBody {
                kind: InterruptKind::FreeTextFeedback,
                value: "x".to_string(),
                request_id: None,
            }),
        )
        .await
        .expect_err("kind mismatch");
        assert_eq!(wrong_kind.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let stale = answer(
            State(state.clone()),
            Path(id.clone()),
            Json(AnswerBody {
                kind: InterruptKind::Approval,
                value: InterruptResume::APPROVED.to_string(),
                request_id: Some("stale".to_string()),
            }),
        )
        .await
        .expect_err("stale request id");
        assert_eq!(stale.status(), StatusCode::CONFLICT);

        let Json(answered) = answer(
            State(state.clone()),
            Path(id.clone()),
            Json(AnswerBody {
                kind: InterruptKind::Approval,
                value: InterruptResume::APPROVED.to_string(),
                request_id: Some(pending.request_id.clone()),
            }),
        )
        .await
        .expect("answer");
        assert_eq!(answered.request_id, pending.request_id);

        wait_for_status(&state, &id, RunStatus::Completed).await;
        assert_eq!(harness.files.content("a.txt").as_deref(), Some("new\n"));
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let harness = TestHarness::new(MemoryFiles::default());
        let state = app(&harness);

        let err = get_conversation(State(state.clone()), Path("nope".to_string()))
            .await
            .expect_err("missing");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = cancel(State(state), Path("nope".to_string()))
            .await
            .expect_err("not running");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_stops_running_turn() {
        let harness = TestHarness::new(MemoryFiles::default());
        harness.agent.push(AgentRole::Classifier, ScriptedReply::Hang);
        let state = app(&harness);

        let (_, Json(started)) = start_conversation(
            State(state.clone()),
            Json(PromptBody {
                prompt: "slow".to_string(),
            }),
        )
        .await
        .expect("start");
        let id = started.conversation_id;

        let status = cancel(State(state.clone()), Path(id.clone()))
            .await
            .expect("cancel");
        assert_eq!(status, StatusCode::ACCEPTED);

        let record = wait_for_status(&state, &id, RunStatus::Failed).await;
        assert_eq!(
            record.error.map(|e| e.kind),
            Some(conductor::error::ErrorKind::Cancelled)
        );
    }
}
