//! Lead data model: CRM contacts, inbound webhook events and lead sources.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

/// A custom-field value as stored on a CRM contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Bool(bool),
    Text(String),
}

impl FieldValue {
    /// Convert a raw JSON value. Nulls and empty containers carry no value.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Number(n) => Some(Self::Text(n.to_string())),
            Value::Array(items) => {
                let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                (!parts.is_empty()).then(|| Self::Text(parts.join(",")))
            }
            Value::Null | Value::Object(_) => None,
        }
    }

    /// Flag semantics used by the CRM: `true`, `"true"`, `"1"`, `"yes"`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Text(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes"
            ),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            Self::Bool(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Normalize a custom-field key: lowercase, no `contact.` prefix, snake case.
pub fn normalize_field_key(key: &str) -> String {
    let lowered = key.trim().to_ascii_lowercase();
    let stripped = lowered.strip_prefix("contact.").unwrap_or(&lowered);
    let mut key = stripped.replace([' ', '-', '/'], "_");
    while key.contains("__") {
        key = key.replace("__", "_");
    }
    key
}

/// Contact custom fields keyed by normalized field key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomFields(HashMap<String, FieldValue>);

impl CustomFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value. The first value stored under a key wins so that
    /// explicit keys are not overwritten by later aliases.
    pub fn insert(&mut self, key: &str, value: FieldValue) {
        let key = normalize_field_key(key);
        if key.is_empty() {
            return;
        }
        self.0.entry(key).or_insert(value);
    }

    /// Overwrite a value, as a CRM update does.
    #[cfg(test)]
    pub fn set(&mut self, key: &str, value: FieldValue) {
        self.0.insert(normalize_field_key(key), value);
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(&normalize_field_key(key))
    }

    /// Non-blank text value for `key`.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(FieldValue::as_text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn is_truthy(&self, key: &str) -> bool {
        self.get(key).is_some_and(FieldValue::is_truthy)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>> FromIterator<(K, FieldValue)> for CustomFields {
    fn from_iter<I: IntoIterator<Item = (K, FieldValue)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (k, v) in iter {
            fields.insert(k.as_ref(), v);
        }
        fields
    }
}

/// Field keys this service reads and writes.
pub mod fields {
    pub const VAPI_CALLED: &str = "vapi_called";
    pub const VAPI_CALL_ID: &str = "vapi_call_id";
    pub const LEAD_SOURCE: &str = "lead_source";
    pub const LEAD_SOURCE_CAMEL: &str = "leadSource";
    pub const SMS_CONSENT: &str = "sms_consent";
    pub const SMS_FALLBACK_SENT: &str = "sms_fallback_sent";
    pub const SMS_FALLBACK_SENT_AT: &str = "sms_fallback_sent_at";
    pub const SMS_FALLBACK_REASON: &str = "sms_fallback_reason";
    pub const SMS_FALLBACK_SKIPPED: &str = "sms_fallback_skipped";
}

/// A CRM lead record as fetched live from the CRM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub tags: Vec<String>,
    pub custom_fields: CustomFields,
}

impl Contact {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_field(mut self, key: &str, value: FieldValue) -> Self {
        self.custom_fields.insert(key, value);
        self
    }
}

/// Inbound CRM webhook event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    ContactCreated,
    ContactUpdated,
    FormSubmitted,
    WebchatConverted,
    AdLead(AdPlatform),
    Other(String),
}

/// Which ad platform an ad-lead event came from, when the type says so.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdPlatform {
    Unknown,
    Google,
    Meta,
    Facebook,
}

impl EventType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "contact.created" => Self::ContactCreated,
            "contact.updated" => Self::ContactUpdated,
            "form.submitted" => Self::FormSubmitted,
            "webchat.converted" | "chat.converted" | "conversation.created" => {
                Self::WebchatConverted
            }
            "lead.created" | "ad.submission" => Self::AdLead(AdPlatform::Unknown),
            "google.lead" => Self::AdLead(AdPlatform::Google),
            "meta.lead" => Self::AdLead(AdPlatform::Meta),
            "facebook.lead" => Self::AdLead(AdPlatform::Facebook),
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ContactCreated => "contact.created",
            Self::ContactUpdated => "contact.updated",
            Self::FormSubmitted => "form.submitted",
            Self::WebchatConverted => "webchat.converted",
            Self::AdLead(AdPlatform::Unknown) => "lead.created",
            Self::AdLead(AdPlatform::Google) => "google.lead",
            Self::AdLead(AdPlatform::Meta) => "meta.lead",
            Self::AdLead(AdPlatform::Facebook) => "facebook.lead",
            Self::Other(s) => s,
        }
    }

    /// Events that may lead to an outbound call.
    pub fn is_lead_event(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Form, chat and ad leads are tagged `outbound` on arrival.
    pub fn tags_outbound(&self) -> bool {
        matches!(
            self,
            Self::FormSubmitted | Self::WebchatConverted | Self::AdLead(_)
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound CRM notification.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_type: EventType,
    pub contact_id: String,
    pub payload: Value,
}

/// Nested locations the CRM uses for the contact id, in lookup order.
const CONTACT_ID_PATHS: &[&[&str]] = &[
    &["contactId"],
    &["contact_id"],
    &["contact", "id"],
    &["customData", "contactId"],
    &["customData", "contact_id"],
    &["data", "contactId"],
    &["data", "contact_id"],
    &["data", "contact", "id"],
    &["data", "conversation", "contactId"],
    &["data", "chat", "contactId"],
    &["data", "lead", "contactId"],
    &["data", "ad", "contactId"],
];

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(*key))
}

fn lookup_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    lookup(value, path)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl WebhookEvent {
    pub fn new(event_type: EventType, contact_id: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type,
            contact_id: contact_id.into(),
            payload,
        }
    }

    /// Read the event type from `type`, `event` or `customData.type`.
    pub fn event_type_of(payload: &Value) -> EventType {
        let paths: [&[&str]; 3] = [&["type"], &["event"], &["customData", "type"]];
        let raw = paths
            .iter()
            .find_map(|path| lookup_str(payload, path))
            .unwrap_or("");
        EventType::parse(raw)
    }

    /// Parse a raw webhook body. A body without a contact id is malformed.
    pub fn from_payload(payload: Value) -> Result<Self, LeadError> {
        let event_type = Self::event_type_of(&payload);
        let contact_id = CONTACT_ID_PATHS
            .iter()
            .find_map(|path| lookup_str(&payload, path))
            .map(str::to_string)
            .ok_or(LeadError::MalformedWebhookPayload("missing contact id"))?;

        Ok(Self {
            event_type,
            contact_id,
            payload,
        })
    }

    /// A string field from the body, `customData` or `data`, in that order.
    pub fn payload_field(&self, key: &str) -> Option<&str> {
        let paths: [&[&str]; 3] = [&[key], &["customData", key], &["data", key]];
        paths
            .iter()
            .find_map(|path| lookup_str(&self.payload, path))
    }

    /// Ad platform named in the body of an ad-lead event.
    pub fn ad_platform(&self) -> Option<&str> {
        lookup_str(&self.payload, &["data", "ad", "platform"])
            .or_else(|| lookup_str(&self.payload, &["ad", "platform"]))
    }

    pub fn location_id(&self) -> Option<&str> {
        let paths: [&[&str]; 4] = [
            &["locationId"],
            &["location", "id"],
            &["customData", "locationId"],
            &["data", "locationId"],
        ];
        paths
            .iter()
            .find_map(|path| lookup_str(&self.payload, path))
    }
}

/// Canonical lead sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LeadSource {
    Inbound,
    Form,
    Webchat,
    GoogleAds,
    MetaAds,
    FacebookAds,
    Yelp,
    Website,
    Thumbtack,
    /// A non-empty value with no mapping, passed through lowercased.
    Other(String),
}

impl LeadSource {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inbound => "inbound",
            Self::Form => "form",
            Self::Webchat => "webchat",
            Self::GoogleAds => "google_ads",
            Self::MetaAds => "meta_ads",
            Self::FacebookAds => "facebook_ads",
            Self::Yelp => "yelp",
            Self::Website => "website",
            Self::Thumbtack => "thumbtack",
            Self::Other(s) => s,
        }
    }

    /// Parse a canonical value. Anything else is `None`.
    pub fn canonical(raw: &str) -> Option<Self> {
        let source = match raw.trim().to_ascii_lowercase().as_str() {
            "inbound" => Self::Inbound,
            "form" => Self::Form,
            "webchat" => Self::Webchat,
            "google_ads" => Self::GoogleAds,
            "meta_ads" => Self::MetaAds,
            "facebook_ads" => Self::FacebookAds,
            "yelp" => Self::Yelp,
            "website" => Self::Website,
            "thumbtack" => Self::Thumbtack,
            _ => return None,
        };
        Some(source)
    }

    pub fn is_inbound(&self) -> bool {
        matches!(self, Self::Inbound)
    }
}

impl fmt::Display for LeadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business-level reasons a lead does not turn into a call.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LeadError {
    #[error("contact has no phone number")]
    MissingPhone,
    #[error("phone number is not dialable: {0}")]
    InvalidPhone(String),
    #[error("contact was already called")]
    DuplicateCall,
    #[error("lead source could not be resolved")]
    LeadSourceUnresolved,
    #[error("upstream API failure during {step}: {reason}")]
    UpstreamApiFailure { step: &'static str, reason: String },
    #[error("malformed webhook payload: {0}")]
    MalformedWebhookPayload(&'static str),
}
