use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::signature::check_shared_secret;
use super::{ErrorResponse, WebhookResponse};
use crate::outcome::{CallOutcome, WatchedCall};
use crate::AppState;

const SECRET_HEADER: &str = "x-vapi-secret";

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    message: ServerMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    ended_reason: Option<String>,
    #[serde(default)]
    call: Option<CallInfo>,
}

#[derive(Debug, Deserialize)]
struct CallInfo {
    #[serde(default)]
    id: String,
    #[serde(default)]
    customer: Option<Customer>,
    #[serde(default)]
    metadata: Option<CallMetadata>,
}

#[derive(Debug, Deserialize)]
struct Customer {
    #[serde(default)]
    number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallMetadata {
    #[serde(rename = "contactId", default)]
    contact_id: Option<String>,
}

impl ServerMessage {
    /// Status to classify, or `None` if this message does not report a
    /// finished call.
    fn final_status(&self) -> Option<&str> {
        match self.kind.as_str() {
            "end-of-call-report" => Some(self.status.as_deref().unwrap_or("ended")),
            "status-update" if self.status.as_deref() == Some("ended") => Some("ended"),
            _ => None,
        }
    }
}

/// POST /webhooks/vapi: voice API server messages. End-of-call reports feed
/// the fallback watcher directly so it does not have to wait for its poll.
pub async fn handle_vapi(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = check_shared_secret(&headers, SECRET_HEADER, &state.config.vapi.server_secret)
    {
        return resp;
    }

    let envelope: ServerEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!("Rejecting call webhook: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "Invalid server message".to_string(),
                }),
            )
                .into_response();
        }
    };
    let message = envelope.message;

    let Some(status) = message.final_status() else {
        tracing::debug!(kind = %message.kind, "Ignoring call message");
        return Json(WebhookResponse::ignored(message.kind.clone(), "unhandled_message"))
            .into_response();
    };
    let outcome = CallOutcome::classify(status, message.ended_reason.as_deref());

    let Some(call) = message.call.as_ref().filter(|c| !c.id.is_empty()) else {
        return Json(WebhookResponse::ignored(message.kind, "missing_call_id")).into_response();
    };
    let contact_id = call
        .metadata
        .as_ref()
        .and_then(|m| m.contact_id.clone())
        .filter(|id| !id.trim().is_empty());
    let Some(contact_id) = contact_id else {
        tracing::warn!(call_id = %call.id, "Call report has no contact id");
        return Json(WebhookResponse::ignored(message.kind, "missing_contact_id")).into_response();
    };

    let watched = WatchedCall {
        call_id: call.id.clone(),
        contact_id,
        phone: call.customer.as_ref().and_then(|c| c.number.clone()),
    };
    tracing::info!(
        call_id = %watched.call_id,
        contact_id = %watched.contact_id,
        outcome = %outcome,
        "Call report received"
    );

    let result = state.watcher.handle_outcome(&watched, outcome).await;
    Json(WebhookResponse::handled(message.kind, result.label()).with_call_id(watched.call_id))
        .into_response()
}
