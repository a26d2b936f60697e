use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use farmhand_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use farmhand_core::domain::message::{MessagePayload, QueuedMessage, SenderKey};
use farmhand_core::errors::{ApplicationError, DomainError, ValidationError};
use farmhand_db::repositories::MessageQueue;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::http::{repository_failure, ApiError};

#[derive(Clone)]
pub struct IntakeState {
    pub queue: Arc<dyn MessageQueue>,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EnqueueRequest {
    pub sender_key: String,
    pub payload: MessagePayload,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub message_id: String,
    pub correlation_id: String,
}

pub fn router(state: IntakeState) -> Router {
    Router::new().route("/messages", post(enqueue)).with_state(state)
}

/// Accepts one inbound chat message. Processing happens later on the worker; a 202
/// only means the message is durably queued.
pub async fn enqueue(
    State(state): State<IntakeState>,
    request: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let correlation_id = Uuid::new_v4().to_string();

    let Json(request) = request.map_err(|rejection| {
        rejected(&state, None, &correlation_id, ValidationError::malformed(rejection.body_text()))
    })?;
    let sender_key = SenderKey::new(request.sender_key.trim());
    if let Err(error) = validate(&sender_key, &request.payload) {
        return Err(rejected(&state, Some(sender_key), &correlation_id, error));
    }

    let message = QueuedMessage::new(sender_key.clone(), request.payload);
    let message_id = message.id.to_string();
    let kind = message.kind;
    state.queue.push(message).await.map_err(|error| repository_failure(error, &correlation_id))?;

    info!(
        event_name = "intake.message_enqueued",
        correlation_id = %correlation_id,
        sender_key = %sender_key,
        message_id = %message_id,
        kind = kind.as_str(),
        "inbound message queued"
    );
    let context = AuditContext::new(Some(sender_key), correlation_id.clone(), "http");
    state.audit.emit(
        AuditEvent::from_context(
            &context,
            "intake.message_enqueued",
            AuditCategory::Intake,
            AuditOutcome::Success,
        )
        .with_metadata("message_id", message_id.clone())
        .with_metadata("kind", kind.as_str()),
    );

    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse { message_id, correlation_id })))
}

fn validate(sender_key: &SenderKey, payload: &MessagePayload) -> Result<(), ValidationError> {
    if sender_key.as_str().is_empty() {
        return Err(ValidationError::malformed("sender_key is required"));
    }
    let blank = match payload {
        MessagePayload::Text { body } => body.trim().is_empty(),
        MessagePayload::Choice { option_id } => option_id.trim().is_empty(),
        MessagePayload::Intent(intent) => intent.kind.trim().is_empty(),
    };
    if blank {
        return Err(ValidationError::malformed("payload is empty"));
    }
    Ok(())
}

fn rejected(
    state: &IntakeState,
    sender_key: Option<SenderKey>,
    correlation_id: &str,
    error: ValidationError,
) -> ApiError {
    let context = AuditContext::new(sender_key, correlation_id, "http");
    state.audit.emit(
        AuditEvent::from_context(
            &context,
            "intake.message_rejected",
            AuditCategory::Intake,
            AuditOutcome::Rejected,
        )
        .with_metadata("reason", error.to_string()),
    );
    ApiError(ApplicationError::from(DomainError::from(error)).into_interface(correlation_id))
}
