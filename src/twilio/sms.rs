use std::time::Duration;

use async_trait::async_trait;

use crate::config::TwilioConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Send `body` to `to`, returning the message id.
    async fn send_sms(&self, to: &str, body: &str) -> Result<String, SmsError>;
}

/// Twilio REST API client for outbound text messages.
pub struct TwilioClient {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioClient {
    pub fn new(twilio_config: &TwilioConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            account_sid: twilio_config.account_sid.clone(),
            auth_token: twilio_config.auth_token.clone(),
            from_number: twilio_config.phone_number.clone(),
        }
    }

    fn ensure_configured(&self) -> Result<(), SmsError> {
        if self.account_sid.is_empty() || self.auth_token.is_empty() {
            return Err(SmsError::NotConfigured("account SID or auth token"));
        }
        if self.from_number.is_empty() {
            return Err(SmsError::NotConfigured("sending phone number"));
        }
        Ok(())
    }
}

#[async_trait]
impl SmsSender for TwilioClient {
    async fn send_sms(&self, to: &str, body: &str) -> Result<String, SmsError> {
        self.ensure_configured()?;

        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );

        let params = [("To", to), ("From", self.from_number.as_str()), ("Body", body)];

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| SmsError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SmsError::Api(format!("{status}: {body}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SmsError::Request(e.to_string()))?;

        let message_sid = body["sid"].as_str().unwrap_or("unknown").to_string();

        tracing::info!(to, message_sid = %message_sid, "SMS sent");
        Ok(message_sid)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SmsError {
    #[error("Twilio not configured: missing {0}")]
    NotConfigured(&'static str),
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Twilio API error: {0}")]
    Api(String),
}
