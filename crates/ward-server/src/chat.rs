use std::convert::Infallible;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};

use ward_core::ids::{ConversationId, PatientId};
use ward_core::messages::{Message, TurnMessage};
use ward_engine::{Turn, TurnOutcome};

use crate::auth::Principal;
use crate::error::ApiError;
use crate::server::AppState;

const KEEP_ALIVE: Duration = Duration::from_secs(15);
const DEFAULT_CHAT_MODEL: &str = "chat-model";
static TURN_ID_HEADER: HeaderName = HeaderName::from_static("x-turn-id");

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub id: ConversationId,
    pub messages: Vec<TurnMessage>,
    #[serde(default = "default_chat_model")]
    pub selected_chat_model: String,
    #[serde(default)]
    pub patient_id: Option<PatientId>,
    #[serde(default)]
    pub title: Option<String>,
}

fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: Option<String>,
}

/// `POST /api/chat`: run one turn and stream its events as SSE.
///
/// Each SSE event is named after the stream event's type and carries the
/// full outbound record (source, seq, payload) as JSON data.
pub async fn post_chat(
    State(state): State<AppState>,
    Principal(caller): Principal,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let turn = Turn {
        conversation_id: request.id,
        caller,
        messages: request.messages,
        model: request.selected_chat_model,
        patient_id: request.patient_id.filter(|id| !id.is_blank()),
        title: request.title,
    };
    let handle = state.engine.start_turn(turn).await?;

    let turn_id = handle.turn_id.clone();
    let completion = handle.completion;
    let log_turn_id = turn_id.clone();
    tokio::spawn(async move {
        match completion.await {
            Ok(TurnOutcome::Completed(message_id)) => {
                info!(turn_id = %log_turn_id, message_id = %message_id, "turn completed")
            }
            Ok(outcome) => info!(turn_id = %log_turn_id, ?outcome, "turn ended"),
            Err(e) => warn!(turn_id = %log_turn_id, error = %e, "turn task failed"),
        }
    });

    let header = HeaderValue::from_str(turn_id.as_str())
        .map_err(|e| ApiError::Internal(format!("turn id header: {e}")))?;
    let sse = Sse::new(sse_events(handle.events)).keep_alive(KeepAlive::new().interval(KEEP_ALIVE));
    Ok(([(TURN_ID_HEADER.clone(), header)], sse))
}

fn sse_events(
    events: impl Stream<Item = ward_core::events::OutboundEvent> + Send + 'static,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    events.filter_map(|ev| async move {
        match Event::default().event(ev.event.kind()).json_data(&ev) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!(kind = ev.event.kind(), error = %e, "dropping unserializable event");
                None
            }
        }
    })
}

/// `DELETE /api/chat?id=`: owner-only removal.
pub async fn delete_chat(
    State(state): State<AppState>,
    Principal(caller): Principal,
    Query(query): Query<IdQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or(ApiError::NotFound("Not Found"))?;
    state
        .engine
        .delete_conversation(&caller, &ConversationId::from_raw(id))
        .await?;
    Ok((StatusCode::OK, "Chat deleted"))
}

/// `GET /api/chat/{id}/messages`: persisted history, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Principal(caller): Principal,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state
        .engine
        .history(&caller, &ConversationId::from_raw(id))
        .await?;
    Ok(Json(messages))
}
