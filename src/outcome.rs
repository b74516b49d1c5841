//! Call-outcome watcher: after an outbound call, checks whether it was
//! answered and sends one fallback SMS when it was not.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::sync::Mutex;

use crate::config::FallbackConfig;
use crate::crm::CrmClient;
use crate::lead::{fields, Contact, CustomFields, FieldValue, LeadSource};
use crate::message::render_fallback_message;
use crate::phone::{PhoneCheck, PhoneValidator};
use crate::twilio::SmsSender;
use crate::vapi::{CallApi, CallStatus};

const NO_CONSENT: &str = "no_consent";

/// How a placed call ended, or that it has not ended yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Pending,
    Answered,
    NoAnswer,
    Busy,
    Failed,
    Voicemail,
}

impl CallOutcome {
    /// Classify a call from its status and ended reason. The reason wins when
    /// both are present.
    pub fn classify(status: &str, ended_reason: Option<&str>) -> Self {
        let reason = ended_reason
            .map(|r| r.trim().to_ascii_lowercase())
            .unwrap_or_default();
        match reason.as_str() {
            "customer-did-not-answer" | "no-answer" => return Self::NoAnswer,
            "customer-busy" | "busy" => return Self::Busy,
            "voicemail" | "machine-detected" => return Self::Voicemail,
            "twilio-failed-to-connect-call"
            | "customer-did-not-give-microphone-permission"
            | "failed"
            | "canceled" => return Self::Failed,
            r if r.contains("voicemail") => return Self::Voicemail,
            r if r.starts_with("pipeline-error-") => return Self::Failed,
            "" => {}
            _ => return Self::Answered,
        }

        match status.trim().to_ascii_lowercase().as_str() {
            "no-answer" => Self::NoAnswer,
            "busy" => Self::Busy,
            "failed" | "canceled" => Self::Failed,
            "ended" | "completed" => Self::Answered,
            s if s.contains("voicemail") => Self::Voicemail,
            _ => Self::Pending,
        }
    }

    pub fn from_status(status: &CallStatus) -> Self {
        Self::classify(&status.status, status.ended_reason.as_deref())
    }

    pub fn is_unanswered(&self) -> bool {
        matches!(
            self,
            Self::NoAnswer | Self::Busy | Self::Failed | Self::Voicemail
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Answered => "answered",
            Self::NoAnswer => "no_answer",
            Self::Busy => "busy",
            Self::Failed => "failed",
            Self::Voicemail => "voicemail",
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call the watcher follows up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedCall {
    pub call_id: String,
    pub contact_id: String,
    /// Number that was dialed. When absent the contact's phone is used.
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStep {
    CallStatus,
    FetchContact,
    ResolvePhone,
    MarkSent,
    SendSms,
}

impl FallbackStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallStatus => "call_status",
            Self::FetchContact => "fetch_contact",
            Self::ResolvePhone => "resolve_phone",
            Self::MarkSent => "mark_sent",
            Self::SendSms => "send_sms",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackResult {
    Sent { message_sid: String },
    AlreadyHandled,
    NotNeeded(CallOutcome),
    SkippedInbound,
    AlreadySent,
    SkippedNoConsent,
    Failed { step: FallbackStep, reason: String },
}

impl FallbackResult {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "sms_sent",
            Self::AlreadyHandled => "already_handled",
            Self::NotNeeded(_) => "not_needed",
            Self::SkippedInbound => "skipped_inbound",
            Self::AlreadySent => "already_sent",
            Self::SkippedNoConsent => "skipped_no_consent",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Call ids the watcher has claimed, so a poll and a status webhook for the
/// same call never both send.
#[derive(Clone, Default)]
pub struct FallbackLedger {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl FallbackLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `call_id`. Returns false if it was already claimed.
    pub async fn claim(&self, call_id: &str) -> bool {
        self.inner.lock().await.insert(call_id.to_string())
    }

    pub async fn release(&self, call_id: &str) {
        self.inner.lock().await.remove(call_id);
    }

    #[cfg(test)]
    pub async fn is_claimed(&self, call_id: &str) -> bool {
        self.inner.lock().await.contains(call_id)
    }
}

pub struct CallOutcomeWatcher {
    crm: Arc<dyn CrmClient>,
    calls: Arc<dyn CallApi>,
    sms: Arc<dyn SmsSender>,
    validator: PhoneValidator,
    config: FallbackConfig,
    ledger: FallbackLedger,
}

impl CallOutcomeWatcher {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        calls: Arc<dyn CallApi>,
        sms: Arc<dyn SmsSender>,
        validator: PhoneValidator,
        config: FallbackConfig,
    ) -> Self {
        Self {
            crm,
            calls,
            sms,
            validator,
            config,
            ledger: FallbackLedger::new(),
        }
    }

    /// Check `call` once the configured delay has passed.
    pub fn schedule(self: &Arc<Self>, call: WatchedCall) {
        let watcher = Arc::clone(self);
        let delay = Duration::from_secs(self.config.delay_secs);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = watcher.check_call(&call).await;
            tracing::info!(
                call_id = %call.call_id,
                contact_id = %call.contact_id,
                result = result.label(),
                "Call outcome checked"
            );
        });
    }

    pub async fn check_call(&self, call: &WatchedCall) -> FallbackResult {
        let status = match self.calls.call_status(&call.call_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(call_id = %call.call_id, "Could not fetch call status: {e}");
                return FallbackResult::Failed {
                    step: FallbackStep::CallStatus,
                    reason: e.to_string(),
                };
            }
        };

        let outcome = CallOutcome::from_status(&status);
        tracing::info!(
            call_id = %call.call_id,
            status = %status.status,
            ended_reason = status.ended_reason.as_deref().unwrap_or(""),
            duration_secs = status.duration_secs,
            outcome = %outcome,
            "Call status"
        );
        self.handle_outcome(call, outcome).await
    }

    pub async fn handle_outcome(&self, call: &WatchedCall, outcome: CallOutcome) -> FallbackResult {
        if !self.ledger.claim(&call.call_id).await {
            tracing::debug!(call_id = %call.call_id, "Outcome already handled");
            return FallbackResult::AlreadyHandled;
        }

        if !outcome.is_unanswered() {
            if outcome == CallOutcome::Pending {
                self.ledger.release(&call.call_id).await;
            }
            return FallbackResult::NotNeeded(outcome);
        }

        let result = self.send_fallback(call, outcome).await;
        if let FallbackResult::Failed { step, reason } = &result {
            tracing::error!(
                call_id = %call.call_id,
                contact_id = %call.contact_id,
                step = step.as_str(),
                reason = %reason,
                "SMS fallback failed"
            );
            if *step != FallbackStep::SendSms {
                self.ledger.release(&call.call_id).await;
            }
        }
        result
    }

    async fn send_fallback(&self, call: &WatchedCall, outcome: CallOutcome) -> FallbackResult {
        let contact_id = call.contact_id.as_str();
        let contact = match self.crm.get_contact(contact_id).await {
            Ok(contact) => contact,
            Err(e) => return failed(FallbackStep::FetchContact, e),
        };

        if contact.custom_fields.text(fields::LEAD_SOURCE) == Some(LeadSource::Inbound.as_str()) {
            tracing::info!(contact_id, "Inbound contact, no SMS fallback");
            return FallbackResult::SkippedInbound;
        }

        let window = self.config.resend_window();
        let now = Utc::now();
        if contact.custom_fields.is_truthy(fields::SMS_FALLBACK_SENT)
            || sent_within(&contact.custom_fields, now, window)
        {
            tracing::info!(contact_id, "SMS fallback already sent");
            return FallbackResult::AlreadySent;
        }

        let Some(phone) = self.fallback_phone(call, &contact) else {
            return failed(FallbackStep::ResolvePhone, "no dialable phone number");
        };

        if self.sent_to_same_phone(&phone, contact_id, now, window).await {
            tracing::info!(contact_id, "SMS fallback recently sent to this number");
            return FallbackResult::AlreadySent;
        }

        if !self.has_consent(&contact) {
            let skip = [
                (fields::SMS_FALLBACK_SKIPPED, FieldValue::Text(NO_CONSENT.into())),
                (fields::SMS_FALLBACK_REASON, FieldValue::Text(outcome.to_string())),
            ];
            if let Err(e) = self.crm.update_fields(contact_id, &skip).await {
                tracing::warn!(contact_id, "Could not record consent skip: {e}");
            }
            tracing::info!(contact_id, "No SMS consent, fallback skipped");
            return FallbackResult::SkippedNoConsent;
        }

        let mark = [
            (fields::SMS_FALLBACK_SENT, FieldValue::Bool(true)),
            (fields::SMS_FALLBACK_SENT_AT, FieldValue::Text(now.to_rfc3339())),
            (fields::SMS_FALLBACK_REASON, FieldValue::Text(outcome.to_string())),
        ];
        if let Err(e) = self.crm.update_fields(contact_id, &mark).await {
            return failed(FallbackStep::MarkSent, e);
        }

        let body = render_fallback_message(&self.config, contact.first_name.as_deref());
        match self.sms.send_sms(&phone, &body).await {
            Ok(message_sid) => {
                tracing::info!(
                    contact_id,
                    call_id = %call.call_id,
                    outcome = %outcome,
                    message_sid = %message_sid,
                    "SMS fallback sent"
                );
                FallbackResult::Sent { message_sid }
            }
            Err(e) => failed(FallbackStep::SendSms, e),
        }
    }

    fn has_consent(&self, contact: &Contact) -> bool {
        match contact.custom_fields.get(fields::SMS_CONSENT) {
            Some(value) => value.is_truthy(),
            None => self.config.assume_consent_when_unset,
        }
    }

    fn fallback_phone(&self, call: &WatchedCall, contact: &Contact) -> Option<String> {
        let raw = call.phone.as_deref().or(contact.phone.as_deref());
        match self.validator.validate(raw) {
            PhoneCheck::Valid(phone) => Some(phone.to_string()),
            PhoneCheck::Invalid | PhoneCheck::Missing => None,
        }
    }

    /// Another contact with the same number is flagged as texted, or got a
    /// fallback inside the window.
    async fn sent_to_same_phone(
        &self,
        phone: &str,
        contact_id: &str,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> bool {
        match self.crm.search_by_phone(phone).await {
            Ok(contacts) => contacts
                .iter()
                .filter(|c| c.id != contact_id)
                .any(|c| {
                    c.custom_fields.is_truthy(fields::SMS_FALLBACK_SENT)
                        || sent_within(&c.custom_fields, now, window)
                }),
            Err(e) => {
                tracing::warn!(contact_id, "Phone search failed, skipping cross-contact check: {e}");
                false
            }
        }
    }
}

fn failed(step: FallbackStep, err: impl fmt::Display) -> FallbackResult {
    FallbackResult::Failed {
        step,
        reason: err.to_string(),
    }
}

/// Whether `sms_fallback_sent_at` falls within `window` before `now`.
fn sent_within(custom_fields: &CustomFields, now: DateTime<Utc>, window: chrono::Duration) -> bool {
    custom_fields
        .text(fields::SMS_FALLBACK_SENT_AT)
        .and_then(parse_timestamp)
        .is_some_and(|sent_at| now - sent_at < window)
}

/// RFC 3339, or a naive ISO timestamp taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|ts| ts.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCalls, FakeCrm, FakeSms};

    fn watcher(
        crm: &Arc<FakeCrm>,
        calls: &Arc<FakeCalls>,
        sms: &Arc<FakeSms>,
        config: FallbackConfig,
    ) -> CallOutcomeWatcher {
        CallOutcomeWatcher::new(
            crm.clone(),
            calls.clone(),
            sms.clone(),
            PhoneValidator::default(),
            config,
        )
    }

    fn consenting(id: &str) -> Contact {
        Contact::new(id)
            .with_phone("+15035550101")
            .with_field("sms_consent", FieldValue::Bool(true))
            .with_field("lead_source", FieldValue::Text("form".into()))
    }

    fn call(id: &str, contact_id: &str) -> WatchedCall {
        WatchedCall {
            call_id: id.into(),
            contact_id: contact_id.into(),
            phone: Some("+15035550101".into()),
        }
    }

    #[test]
    fn classify_by_reason() {
        assert_eq!(
            CallOutcome::classify("ended", Some("customer-did-not-answer")),
            CallOutcome::NoAnswer
        );
        assert_eq!(CallOutcome::classify("ended", Some("customer-busy")), CallOutcome::Busy);
        assert_eq!(
            CallOutcome::classify("ended", Some("machine-detected")),
            CallOutcome::Voicemail
        );
        assert_eq!(
            CallOutcome::classify("ended", Some("pipeline-error-openai-llm-failed")),
            CallOutcome::Failed
        );
        assert_eq!(
            CallOutcome::classify("ended", Some("customer-ended-call")),
            CallOutcome::Answered
        );
    }

    #[test]
    fn classify_by_status() {
        assert_eq!(CallOutcome::classify("in-progress", None), CallOutcome::Pending);
        assert_eq!(CallOutcome::classify("queued", Some("")), CallOutcome::Pending);
        assert_eq!(CallOutcome::classify("no-answer", None), CallOutcome::NoAnswer);
        assert_eq!(CallOutcome::classify("ended", None), CallOutcome::Answered);
        assert!(!CallOutcome::Pending.is_unanswered());
        assert!(CallOutcome::Voicemail.is_unanswered());
    }

    #[test]
    fn timestamps_parse() {
        assert!(parse_timestamp("2026-03-01T10:00:00+00:00").is_some());
        assert!(parse_timestamp("2026-03-01T10:00:00.123456").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn resend_window() {
        let now = Utc::now();
        let window = chrono::Duration::minutes(10);
        let at = |ts: DateTime<Utc>| -> CustomFields {
            [("sms_fallback_sent_at", FieldValue::Text(ts.to_rfc3339()))]
                .into_iter()
                .collect()
        };
        assert!(sent_within(&at(now - chrono::Duration::minutes(3)), now, window));
        assert!(!sent_within(&at(now - chrono::Duration::minutes(30)), now, window));
        assert!(!sent_within(&CustomFields::new(), now, window));
    }

    #[tokio::test]
    async fn ledger_claims_once() {
        let ledger = FallbackLedger::new();
        assert!(ledger.claim("call-1").await);
        assert!(!ledger.claim("call-1").await);
        ledger.release("call-1").await;
        assert!(!ledger.is_claimed("call-1").await);
        assert!(ledger.claim("call-1").await);
    }

    #[tokio::test]
    async fn unanswered_call_sends_one_sms() {
        let crm = FakeCrm::with_contacts([consenting("c-1")]);
        let calls = FakeCalls::new();
        calls.set_status("call-1", "ended", Some("customer-did-not-answer")).await;
        let sms = FakeSms::new();
        let watcher = watcher(&crm, &calls, &sms, FallbackConfig::default());

        let result = watcher.check_call(&call("call-1", "c-1")).await;

        assert_eq!(result, FallbackResult::Sent { message_sid: "SM1".into() });
        let sent = sms.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "+15035550101");
        assert!(sent[0].1.contains("Valley View HVAC"));

        let contact = crm.contact("c-1").await;
        assert!(contact.custom_fields.is_truthy("sms_fallback_sent"));
        assert_eq!(contact.custom_fields.text("sms_fallback_reason"), Some("no_answer"));
        assert!(contact.custom_fields.text("sms_fallback_sent_at").is_some());
    }

    #[tokio::test]
    async fn repeated_outcomes_send_at_most_once() {
        let crm = FakeCrm::with_contacts([consenting("c-1")]);
        let calls = FakeCalls::new();
        let sms = FakeSms::new();
        let watcher = watcher(&crm, &calls, &sms, FallbackConfig::default());
        let call = call("call-1", "c-1");

        let first = watcher.handle_outcome(&call, CallOutcome::Busy).await;
        let second = watcher.handle_outcome(&call, CallOutcome::Busy).await;

        assert_eq!(first.label(), "sms_sent");
        assert_eq!(second, FallbackResult::AlreadyHandled);
        assert_eq!(sms.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn new_call_for_contact_already_texted_is_not_resent() {
        let crm = FakeCrm::with_contacts([consenting("c-1")]);
        let calls = FakeCalls::new();
        let sms = FakeSms::new();
        let watcher = watcher(&crm, &calls, &sms, FallbackConfig::default());

        watcher.handle_outcome(&call("call-1", "c-1"), CallOutcome::NoAnswer).await;
        let result = watcher
            .handle_outcome(&call("call-2", "c-1"), CallOutcome::NoAnswer)
            .await;

        assert_eq!(result, FallbackResult::AlreadySent);
        assert_eq!(sms.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn recent_sms_to_same_number_blocks_resend() {
        let recent = (Utc::now() - chrono::Duration::minutes(2)).to_rfc3339();
        let crm = FakeCrm::with_contacts([
            consenting("c-1"),
            Contact::new("c-old")
                .with_phone("+1 503 555 0101")
                .with_field("sms_fallback_sent_at", FieldValue::Text(recent)),
        ]);
        let calls = FakeCalls::new();
        let sms = FakeSms::new();
        let watcher = watcher(&crm, &calls, &sms, FallbackConfig::default());

        let result = watcher
            .handle_outcome(&call("call-1", "c-1"), CallOutcome::NoAnswer)
            .await;

        assert_eq!(result, FallbackResult::AlreadySent);
        assert!(sms.sent().await.is_empty());
    }

    #[tokio::test]
    async fn sent_flag_on_same_number_blocks_resend() {
        let crm = FakeCrm::with_contacts([
            consenting("c-1"),
            Contact::new("c-old")
                .with_phone("+15035550101")
                .with_field("sms_fallback_sent", FieldValue::Bool(true)),
        ]);
        let calls = FakeCalls::new();
        let sms = FakeSms::new();
        let watcher = watcher(&crm, &calls, &sms, FallbackConfig::default());

        let result = watcher
            .handle_outcome(&call("call-1", "c-1"), CallOutcome::NoAnswer)
            .await;

        assert_eq!(result, FallbackResult::AlreadySent);
        assert!(sms.sent().await.is_empty());
    }

    #[tokio::test]
    async fn oversized_resend_window_does_not_panic() {
        let crm = FakeCrm::with_contacts([consenting("c-1")]);
        let calls = FakeCalls::new();
        let sms = FakeSms::new();
        let config = FallbackConfig {
            resend_window_secs: u64::MAX,
            ..FallbackConfig::default()
        };
        let watcher = watcher(&crm, &calls, &sms, config);

        let result = watcher
            .handle_outcome(&call("call-1", "c-1"), CallOutcome::NoAnswer)
            .await;

        assert_eq!(result, FallbackResult::Sent { message_sid: "SM1".into() });
    }

    #[tokio::test]
    async fn no_consent_records_skip() {
        let crm = FakeCrm::with_contacts([Contact::new("c-1").with_phone("+15035550101")]);
        let calls = FakeCalls::new();
        let sms = FakeSms::new();
        let watcher = watcher(&crm, &calls, &sms, FallbackConfig::default());

        let result = watcher
            .handle_outcome(&call("call-1", "c-1"), CallOutcome::Voicemail)
            .await;

        assert_eq!(result, FallbackResult::SkippedNoConsent);
        assert!(sms.sent().await.is_empty());
        let contact = crm.contact("c-1").await;
        assert_eq!(contact.custom_fields.text("sms_fallback_skipped"), Some("no_consent"));
        assert!(!contact.custom_fields.is_truthy("sms_fallback_sent"));
    }

    #[tokio::test]
    async fn unset_consent_can_be_assumed() {
        let crm = FakeCrm::with_contacts([Contact::new("c-1").with_phone("+15035550101")]);
        let calls = FakeCalls::new();
        let sms = FakeSms::new();
        let config = FallbackConfig {
            assume_consent_when_unset: true,
            ..FallbackConfig::default()
        };
        let watcher = watcher(&crm, &calls, &sms, config);

        let result = watcher
            .handle_outcome(&call("call-1", "c-1"), CallOutcome::NoAnswer)
            .await;

        assert_eq!(result.label(), "sms_sent");
    }

    #[tokio::test]
    async fn explicit_refusal_beats_assumed_consent() {
        let crm = FakeCrm::with_contacts([Contact::new("c-1")
            .with_phone("+15035550101")
            .with_field("sms_consent", FieldValue::Text("false".into()))]);
        let calls = FakeCalls::new();
        let sms = FakeSms::new();
        let config = FallbackConfig {
            assume_consent_when_unset: true,
            ..FallbackConfig::default()
        };
        let watcher = watcher(&crm, &calls, &sms, config);

        let result = watcher
            .handle_outcome(&call("call-1", "c-1"), CallOutcome::NoAnswer)
            .await;

        assert_eq!(result, FallbackResult::SkippedNoConsent);
    }

    #[tokio::test]
    async fn answered_call_needs_nothing() {
        let crm = FakeCrm::with_contacts([consenting("c-1")]);
        let calls = FakeCalls::new();
        calls.set_status("call-1", "ended", Some("customer-ended-call")).await;
        let sms = FakeSms::new();
        let watcher = watcher(&crm, &calls, &sms, FallbackConfig::default());

        let result = watcher.check_call(&call("call-1", "c-1")).await;

        assert_eq!(result, FallbackResult::NotNeeded(CallOutcome::Answered));
        assert!(sms.sent().await.is_empty());
        assert!(crm.updated_keys("c-1").await.is_empty());
    }

    #[tokio::test]
    async fn inbound_contact_gets_no_sms() {
        let crm = FakeCrm::with_contacts([Contact::new("c-1")
            .with_phone("+15035550101")
            .with_field("sms_consent", FieldValue::Bool(true))
            .with_field("lead_source", FieldValue::Text("inbound".into()))]);
        let calls = FakeCalls::new();
        let sms = FakeSms::new();
        let watcher = watcher(&crm, &calls, &sms, FallbackConfig::default());

        let result = watcher
            .handle_outcome(&call("call-1", "c-1"), CallOutcome::NoAnswer)
            .await;

        assert_eq!(result, FallbackResult::SkippedInbound);
        assert!(sms.sent().await.is_empty());
    }

    #[tokio::test]
    async fn pending_call_releases_claim() {
        let crm = FakeCrm::with_contacts([consenting("c-1")]);
        let calls = FakeCalls::new();
        let sms = FakeSms::new();
        let watcher = watcher(&crm, &calls, &sms, FallbackConfig::default());
        let call = call("call-1", "c-1");

        let first = watcher.handle_outcome(&call, CallOutcome::Pending).await;
        let later = watcher.handle_outcome(&call, CallOutcome::NoAnswer).await;

        assert_eq!(first, FallbackResult::NotNeeded(CallOutcome::Pending));
        assert_eq!(later.label(), "sms_sent");
    }

    #[tokio::test]
    async fn mark_failure_releases_claim_and_sends_nothing() {
        let crm = FakeCrm::with_contacts([consenting("c-1")]);
        crm.fail_updates_of("sms_fallback_sent").await;
        let calls = FakeCalls::new();
        let sms = FakeSms::new();
        let watcher = watcher(&crm, &calls, &sms, FallbackConfig::default());

        let result = watcher
            .handle_outcome(&call("call-1", "c-1"), CallOutcome::NoAnswer)
            .await;

        assert!(matches!(
            result,
            FallbackResult::Failed { step: FallbackStep::MarkSent, .. }
        ));
        assert!(sms.sent().await.is_empty());
        assert!(!watcher.ledger.is_claimed("call-1").await);
    }

    #[tokio::test]
    async fn send_failure_keeps_claim() {
        let crm = FakeCrm::with_contacts([consenting("c-1")]);
        let calls = FakeCalls::new();
        let sms = FakeSms::failing();
        let watcher = watcher(&crm, &calls, &sms, FallbackConfig::default());

        let result = watcher
            .handle_outcome(&call("call-1", "c-1"), CallOutcome::NoAnswer)
            .await;

        assert!(matches!(
            result,
            FallbackResult::Failed { step: FallbackStep::SendSms, .. }
        ));
        assert!(watcher.ledger.is_claimed("call-1").await);
    }

    #[tokio::test]
    async fn missing_call_phone_uses_contact_phone() {
        let crm = FakeCrm::with_contacts([consenting("c-1")]);
        let calls = FakeCalls::new();
        let sms = FakeSms::new();
        let watcher = watcher(&crm, &calls, &sms, FallbackConfig::default());
        let call = WatchedCall {
            phone: None,
            ..call("call-1", "c-1")
        };

        watcher.handle_outcome(&call, CallOutcome::NoAnswer).await;

        assert_eq!(sms.sent().await[0].0, "+15035550101");
    }

    #[tokio::test]
    async fn status_lookup_failure_is_reported() {
        let crm = FakeCrm::with_contacts([consenting("c-1")]);
        let calls = FakeCalls::new();
        let sms = FakeSms::new();
        let watcher = watcher(&crm, &calls, &sms, FallbackConfig::default());

        let result = watcher.check_call(&call("missing", "c-1")).await;

        assert!(matches!(
            result,
            FallbackResult::Failed { step: FallbackStep::CallStatus, .. }
        ));
    }
}
