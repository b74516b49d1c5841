//! Voice-AI calling collaborator (Vapi).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::config::VapiConfig;
use crate::phone::PhoneNumber;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything needed to place one outbound lead call.
#[derive(Debug, Clone)]
pub struct CallRequest<'a> {
    pub phone: &'a PhoneNumber,
    pub contact_id: &'a str,
    pub customer_name: Option<&'a str>,
    pub lead_source: Option<&'a str>,
}

/// Raw call state as reported by the voice API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallStatus {
    pub status: String,
    pub ended_reason: Option<String>,
    pub duration_secs: Option<f64>,
}

#[async_trait]
pub trait CallApi: Send + Sync {
    /// Place an outbound call, returning the call id.
    async fn place_call(&self, request: &CallRequest<'_>) -> Result<String, VapiError>;

    async fn call_status(&self, call_id: &str) -> Result<CallStatus, VapiError>;
}

/// Vapi REST client for outbound calls.
pub struct VapiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    assistant_id: String,
    phone_number_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    ended_reason: Option<String>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    ended_at: Option<DateTime<Utc>>,
}

impl CallResponse {
    fn duration_secs(&self) -> Option<f64> {
        let (start, end) = (self.started_at?, self.ended_at?);
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }
}

impl VapiClient {
    pub fn new(vapi_config: &VapiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: vapi_config.base_url.trim_end_matches('/').to_string(),
            api_key: vapi_config.api_key.clone(),
            assistant_id: vapi_config.assistant_id.clone(),
            phone_number_id: vapi_config.phone_number_id.clone(),
        }
    }

    async fn parse(resp: reqwest::Response) -> Result<CallResponse, VapiError> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                tracing::error!("Vapi rejected the API key; server-side calls need the private key");
            }
            return Err(VapiError::Api(format!("{status}: {body}")));
        }

        resp.json()
            .await
            .map_err(|e| VapiError::Parse(e.to_string()))
    }
}

#[async_trait]
impl CallApi for VapiClient {
    async fn place_call(&self, request: &CallRequest<'_>) -> Result<String, VapiError> {
        let mut customer = json!({ "number": request.phone.as_str() });
        if let Some(name) = request.customer_name {
            customer["name"] = json!(name);
        }

        let body = json!({
            "assistantId": self.assistant_id,
            "phoneNumberId": self.phone_number_id,
            "customer": customer,
            "metadata": {
                "contactId": request.contact_id,
                "leadSource": request.lead_source,
            },
        });

        let resp = self
            .client
            .post(format!("{}/call", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VapiError::Request(e.to_string()))?;

        let call = Self::parse(resp).await?;
        if call.id.is_empty() {
            return Err(VapiError::Parse("call response has no id".into()));
        }

        tracing::info!(
            to = %request.phone,
            contact_id = request.contact_id,
            call_id = %call.id,
            "Outbound call initiated"
        );
        Ok(call.id)
    }

    async fn call_status(&self, call_id: &str) -> Result<CallStatus, VapiError> {
        let resp = self
            .client
            .get(format!("{}/call/{call_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| VapiError::Request(e.to_string()))?;

        let call = Self::parse(resp).await?;
        Ok(CallStatus {
            duration_secs: call.duration_secs(),
            status: call.status,
            ended_reason: call.ended_reason,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VapiError {
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Vapi API error: {0}")]
    Api(String),
    #[error("Failed to parse Vapi response: {0}")]
    Parse(String),
}
