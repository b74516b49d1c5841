//! Inbound HTTP webhooks: CRM lead events and voice-call status reports.

pub mod ghl;
pub mod signature;
pub mod vapi;

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body returned for every acknowledged delivery.
#[derive(Debug, Serialize, PartialEq)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl WebhookResponse {
    pub fn handled(event: impl Into<String>, result: &'static str) -> Self {
        Self {
            status: "ok",
            event: Some(event.into()),
            result: Some(result),
            reason: None,
            call_id: None,
        }
    }

    pub fn ignored(event: impl Into<String>, reason: &'static str) -> Self {
        Self {
            status: "ignored",
            event: Some(event.into()),
            result: None,
            reason: Some(reason),
            call_id: None,
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::response::Response;
    use serde_json::Value;

    use crate::config::Config;
    use crate::dispatch::Dispatcher;
    use crate::lead_source::LeadSourceResolver;
    use crate::outcome::CallOutcomeWatcher;
    use crate::phone::PhoneValidator;
    use crate::testing::{FakeCalls, FakeCrm, FakeSms};
    use crate::AppState;

    pub const CONFIG: &str = r#"
        [server]

        [crm]
        api_key = "pit-123"
        location_id = "loc-1"

        [vapi]
        api_key = "vapi-key"
        assistant_id = "asst-1"
        phone_number_id = "pn-1"

        [twilio]
        account_sid = "AC1"
        auth_token = "tok"
        phone_number = "+15035550100"

        [fallback]
        delay_secs = 3600
    "#;

    pub fn state(
        config: Config,
        crm: &Arc<FakeCrm>,
        calls: &Arc<FakeCalls>,
        sms: &Arc<FakeSms>,
    ) -> AppState {
        let dispatcher = Dispatcher::new(
            crm.clone(),
            calls.clone(),
            LeadSourceResolver::default(),
            PhoneValidator::default(),
        );
        let watcher = CallOutcomeWatcher::new(
            crm.clone(),
            calls.clone(),
            sms.clone(),
            PhoneValidator::default(),
            config.fallback.clone(),
        );
        AppState {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            watcher: Arc::new(watcher),
        }
    }

    pub async fn json_body(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
