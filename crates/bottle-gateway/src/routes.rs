//! API route handlers for the gateway.

use axum::{
    Extension, Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use bottle_core::error::BottleError;
use bottle_core::types::{MessageId, UserId};

use super::server::{AppState, Caller};

/// A `BottleError` rendered as `{"ok": false, "error": ...}`.
pub struct ApiError(pub BottleError);

impl From<BottleError> for ApiError {
    fn from(e: BottleError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BottleError::Validation(_) => StatusCode::BAD_REQUEST,
            BottleError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            BottleError::NotFound(_) => StatusCode::NOT_FOUND,
            BottleError::Scheduling(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("❌ Request failed: {}", self.0);
        }
        (status, Json(json!({"ok": false, "error": self.0.to_string()}))).into_response()
    }
}

// Malformed bodies and path segments are client input errors like any other.
impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self(BottleError::validation(e.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(e: PathRejection) -> Self {
        Self(BottleError::validation(e.body_text()))
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

/// Health check endpoint, with queue and notification counters when the
/// scheduler runs in this process.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut body = json!({
        "status": "ok",
        "service": "bottle-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "notifications": state.mailbox.context().notification_tally(),
    });
    if let Some(scheduler) = &state.scheduler {
        let (pending, accepting, next_wakeup, jobs) = {
            let engine = scheduler.engine.lock().await;
            (
                engine.task_count(),
                !engine.is_closed(),
                engine.next_wakeup(),
                engine.stats().clone(),
            )
        };
        if !accepting {
            body["status"] = json!("degraded");
        }
        body["scheduler"] = json!({
            "accepting": accepting,
            "pending_tasks": pending,
            "next_wakeup": next_wakeup,
            "in_flight": scheduler.lanes.total_pending().await,
            "lanes": scheduler.lanes.stats().await,
            "jobs": jobs,
        });
    }
    Json(body)
}

#[derive(Debug, Deserialize)]
pub struct DraftRequest {
    pub text: String,
    #[serde(default)]
    pub recipient: Option<UserId>,
    #[serde(default)]
    pub draft_id: Option<MessageId>,
    #[serde(default)]
    pub attachment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub recipients: Vec<UserId>,
    pub text: String,
    /// RFC 3339; offsets are converted to UTC.
    pub delivery_date: DateTime<Utc>,
    #[serde(default)]
    pub draft_id: Option<MessageId>,
    #[serde(default)]
    pub attachment: Option<String>,
}

pub async fn save_draft(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    body: Result<Json<DraftRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let id = state.mailbox.create_or_update_draft(
        caller.id,
        &body.text,
        body.recipient,
        body.draft_id,
        body.attachment.as_deref(),
    )?;
    Ok(Json(json!({"ok": true, "message_id": id})))
}

pub async fn delete_draft(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<MessageId>, PathRejection>,
) -> ApiResult {
    let Path(id) = id?;
    state.mailbox.delete_draft(caller.id, id)?;
    Ok(Json(json!({"ok": true})))
}

pub async fn list_drafts(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult {
    let drafts = state.mailbox.list_drafts(caller.id)?;
    Ok(Json(json!({"ok": true, "drafts": drafts})))
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let ids = state
        .mailbox
        .send(
            caller.id,
            &body.recipients,
            &body.text,
            body.delivery_date,
            body.draft_id,
            body.attachment.as_deref(),
        )
        .await?;
    Ok(Json(json!({"ok": true, "message_ids": ids})))
}

pub async fn list_received(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult {
    let messages = state.mailbox.get_received_metadata(caller.id)?;
    Ok(Json(json!({"ok": true, "messages": messages})))
}

pub async fn list_sent(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult {
    let messages = state.mailbox.get_sent_metadata(caller.id)?;
    Ok(Json(json!({"ok": true, "messages": messages})))
}

pub async fn get_received(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<MessageId>, PathRejection>,
) -> ApiResult {
    let Path(id) = id?;
    let message = state.mailbox.get_received(caller.id, id)?;
    Ok(Json(json!({"ok": true, "message": message})))
}

pub async fn get_sent(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<MessageId>, PathRejection>,
) -> ApiResult {
    let Path(id) = id?;
    let message = state.mailbox.get_sent(caller.id, id)?;
    Ok(Json(json!({"ok": true, "message": message})))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<MessageId>, PathRejection>,
) -> ApiResult {
    let Path(id) = id?;
    state.mailbox.mark_read(caller.id, id).await?;
    Ok(Json(json!({"ok": true})))
}

pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<MessageId>, PathRejection>,
) -> ApiResult {
    let Path(id) = id?;
    state.mailbox.delete(caller.id, id)?;
    Ok(Json(json!({"ok": true})))
}

pub async fn cancel_scheduled(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<MessageId>, PathRejection>,
) -> ApiResult {
    let Path(id) = id?;
    if !state.mailbox.cancel_scheduled(caller.id, id) {
        return Err(BottleError::not_found(format!(
            "Message {id} cannot be cancelled"
        ))
        .into());
    }
    Ok(Json(json!({"ok": true})))
}

pub async fn calendar_day(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    date: Result<Path<(u32, u32, i32)>, PathRejection>,
) -> ApiResult {
    let Path((day, month, year)) = date?;
    let messages = state.mailbox.list_by_day(caller.id, day, month, year)?;
    Ok(Json(json!({"ok": true, "messages": messages})))
}

pub async fn list_recipients(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult {
    let recipients = state.mailbox.list_recipients(caller.id)?;
    Ok(Json(json!({"ok": true, "recipients": recipients})))
}
