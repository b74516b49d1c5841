use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use super::signature::check_signature;
use super::{ErrorResponse, WebhookResponse};
use crate::dispatch::DispatchResult;
use crate::lead::WebhookEvent;
use crate::outcome::WatchedCall;
use crate::AppState;

/// POST /webhooks/ghl: CRM lead events.
///
/// Every business outcome, including skips and upstream failures, is
/// acknowledged with 200 so the CRM does not redeliver. Only a bad
/// signature (401) or a body that is not JSON (400) is rejected.
pub async fn handle_ghl(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = check_signature(&headers, &body, &state.config.webhook.secret) {
        return resp;
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Rejecting webhook with invalid JSON: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "Invalid JSON body".to_string(),
                }),
            )
                .into_response();
        }
    };

    let event_type = WebhookEvent::event_type_of(&payload);
    if !event_type.is_lead_event() {
        tracing::debug!(event = %event_type, "Ignoring unhandled event");
        return Json(WebhookResponse::ignored(event_type.as_str(), "unhandled_event"))
            .into_response();
    }

    let event = match WebhookEvent::from_payload(payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(event = %event_type, "Ignoring webhook: {e}");
            return Json(WebhookResponse::ignored(event_type.as_str(), "missing_contact_id"))
                .into_response();
        }
    };

    let expected_location = state.config.crm.location_id.as_str();
    if let Some(location) = event.location_id() {
        if !expected_location.is_empty() && location != expected_location {
            tracing::warn!(
                contact_id = %event.contact_id,
                location,
                "Ignoring event from another location"
            );
            return Json(WebhookResponse::ignored(event_type.as_str(), "location_mismatch"))
                .into_response();
        }
    }

    tracing::info!(
        contact_id = %event.contact_id,
        event = %event.event_type,
        "Lead event received"
    );

    let result = state.dispatcher.handle_new_lead(&event).await;
    let mut response = WebhookResponse::handled(event_type.as_str(), result.label());

    if let DispatchResult::Called { call_id, phone } = result {
        response = response.with_call_id(call_id.clone());
        state.watcher.schedule(WatchedCall {
            call_id,
            contact_id: event.contact_id,
            phone: Some(phone.to_string()),
        });
    }

    Json(response).into_response()
}
