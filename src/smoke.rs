//! `--smoke-test`: create a tagged test contact and text it, to confirm the
//! CRM and SMS credentials work end to end.

use crate::config::FallbackConfig;
use crate::crm::{CrmClient, CrmError, NewContact};
use crate::message::smoke_test_message;
use crate::phone::{PhoneCheck, PhoneValidator};
use crate::twilio::{SmsError, SmsSender};

const SMOKE_TAG: &str = "smoke-test";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeReport {
    pub contact_id: String,
    pub phone: String,
    pub message_sid: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SmokeError {
    #[error("not a dialable phone number: {0}")]
    InvalidPhone(String),
    #[error("creating test contact failed: {0}")]
    Crm(#[from] CrmError),
    #[error("sending test SMS failed: {0}")]
    Sms(#[from] SmsError),
}

pub async fn run(
    crm: &dyn CrmClient,
    sms: &dyn SmsSender,
    validator: &PhoneValidator,
    fallback: &FallbackConfig,
    phone: &str,
    first_name: &str,
) -> Result<SmokeReport, SmokeError> {
    let PhoneCheck::Valid(phone) = validator.validate(Some(phone)) else {
        return Err(SmokeError::InvalidPhone(phone.to_string()));
    };

    let contact_id = crm
        .create_contact(&NewContact {
            first_name: first_name.to_string(),
            phone: phone.to_string(),
            tags: vec![SMOKE_TAG.to_string()],
            source: Some(SMOKE_TAG.to_string()),
        })
        .await?;
    tracing::info!(contact_id = %contact_id, to = %phone, "Test contact created");

    let message_sid = sms
        .send_sms(phone.as_str(), &smoke_test_message(fallback, first_name))
        .await?;

    Ok(SmokeReport {
        contact_id,
        phone: phone.to_string(),
        message_sid,
    })
}
