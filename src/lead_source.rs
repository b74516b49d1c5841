//! Lead-source resolution.
//!
//! A lead's source can arrive in several places at once: webhook payload
//! fields, contact custom fields, contact tags, or only implied by the event
//! type. The resolver walks an ordered chain of extractors and normalizes the
//! first raw value found against an injected [`NormalizationTable`].

use std::collections::HashMap;

use crate::lead::{fields, AdPlatform, Contact, EventType, LeadSource, WebhookEvent};

/// Patterns shorter than this only match a whole value, never a substring.
const MIN_SUBSTRING_PATTERN: usize = 4;

/// Maps raw lead-source text onto canonical values.
///
/// Matching is case-insensitive. The longest pattern contained in the value
/// wins, so `"google ads"` beats `"google"` and `"webchat"` beats `"chat"`.
#[derive(Debug, Clone)]
pub struct NormalizationTable {
    entries: Vec<(String, LeadSource)>,
}

impl Default for NormalizationTable {
    fn default() -> Self {
        Self::new([
            ("google", LeadSource::GoogleAds),
            ("google ads", LeadSource::GoogleAds),
            ("facebook", LeadSource::FacebookAds),
            ("fb", LeadSource::FacebookAds),
            ("meta", LeadSource::MetaAds),
            ("web chat", LeadSource::Webchat),
            ("webchat", LeadSource::Webchat),
            ("chat", LeadSource::Webchat),
            ("form", LeadSource::Form),
            ("yelp", LeadSource::Yelp),
            ("website", LeadSource::Website),
            ("thumbtack", LeadSource::Thumbtack),
            ("inbound", LeadSource::Inbound),
        ])
    }
}

impl NormalizationTable {
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, LeadSource)>) -> Self {
        let mut table = Self {
            entries: Vec::new(),
        };
        for (pattern, source) in entries {
            table.push(pattern, source);
        }
        table
    }

    /// Default table plus operator aliases from configuration. Aliases whose
    /// target is not a canonical lead source are ignored with a warning.
    pub fn with_aliases(aliases: &HashMap<String, String>) -> Self {
        let mut table = Self::default();
        for (pattern, target) in aliases {
            match LeadSource::canonical(target) {
                Some(source) => table.push(pattern, source),
                None => tracing::warn!(
                    pattern = %pattern,
                    target = %target,
                    "Ignoring lead source alias with non-canonical target"
                ),
            }
        }
        table
    }

    fn push(&mut self, pattern: &str, source: LeadSource) {
        let pattern = pattern.trim().to_ascii_lowercase();
        if pattern.is_empty() {
            return;
        }
        self.entries.retain(|(p, _)| *p != pattern);
        self.entries.push((pattern, source));
        self.entries
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    }

    /// Normalize a raw value. Blank input has no lead source; anything
    /// non-blank always yields one, unmapped values passing through lowercased.
    pub fn normalize(&self, raw: &str) -> Option<LeadSource> {
        let value = raw.trim().to_ascii_lowercase();
        if value.is_empty() {
            return None;
        }
        if let Some(source) = LeadSource::canonical(&value) {
            return Some(source);
        }

        let matched = self.entries.iter().find(|(pattern, _)| {
            *pattern == value
                || (pattern.len() >= MIN_SUBSTRING_PATTERN && value.contains(pattern.as_str()))
        });

        match matched {
            Some((_, source)) => Some(source.clone()),
            None => {
                tracing::warn!(raw = %raw, "Unmapped lead source, passing through");
                Some(LeadSource::Other(value))
            }
        }
    }
}

/// Tag fragments that identify an acquisition channel.
const TAG_SIGNALS: &[&str] = &[
    "yelp",
    "website",
    "thumbtack",
    "google",
    "facebook",
    "meta",
    "form",
    "webchat",
];

/// One link in the fallback chain: returns a raw, not yet normalized value.
struct Extractor {
    name: &'static str,
    extract: fn(&WebhookEvent, &Contact) -> Option<String>,
}

const CHAIN: &[Extractor] = &[
    Extractor {
        name: "payload.leadSource",
        extract: |event, _| event.payload_field("leadSource").map(str::to_string),
    },
    Extractor {
        name: "payload.lead_source",
        extract: |event, _| event.payload_field("lead_source").map(str::to_string),
    },
    Extractor {
        name: "payload.source",
        extract: |event, _| event.payload_field("source").map(str::to_string),
    },
    Extractor {
        name: "custom_field.leadSource",
        extract: |_, contact| {
            contact
                .custom_fields
                .text(fields::LEAD_SOURCE_CAMEL)
                .map(str::to_string)
        },
    },
    Extractor {
        name: "custom_field.lead_source",
        extract: |_, contact| {
            contact
                .custom_fields
                .text(fields::LEAD_SOURCE)
                .map(str::to_string)
        },
    },
    Extractor {
        name: "tags",
        extract: |_, contact| source_tag(&contact.tags).map(str::to_string),
    },
    Extractor {
        name: "event_hint",
        extract: |event, _| event_hint(event),
    },
    Extractor {
        name: "contact_created_default",
        extract: |event, _| {
            (event.event_type == EventType::ContactCreated).then(|| "inbound".to_string())
        },
    },
];

/// First tag that names an acquisition channel.
fn source_tag(tags: &[String]) -> Option<&str> {
    tags.iter().map(String::as_str).find(|tag| {
        let tag = tag.to_ascii_lowercase();
        TAG_SIGNALS.iter().any(|signal| tag.contains(signal))
    })
}

/// Lead source implied by the event itself.
fn event_hint(event: &WebhookEvent) -> Option<String> {
    let hint = match &event.event_type {
        EventType::AdLead(platform) => {
            if let Some(named) = event.ad_platform() {
                return Some(named.to_string());
            }
            match platform {
                AdPlatform::Google => "google",
                AdPlatform::Meta => "meta",
                AdPlatform::Facebook => "facebook",
                AdPlatform::Unknown => return None,
            }
        }
        EventType::WebchatConverted => "webchat",
        EventType::FormSubmitted => "form",
        EventType::ContactCreated | EventType::ContactUpdated | EventType::Other(_) => {
            return None
        }
    };
    Some(hint.to_string())
}

/// Resolves the lead source of a webhook event. Pure over its inputs.
#[derive(Debug, Clone, Default)]
pub struct LeadSourceResolver {
    table: NormalizationTable,
}

impl LeadSourceResolver {
    pub fn new(table: NormalizationTable) -> Self {
        Self { table }
    }

    /// Walk the chain; the first extractor yielding a non-blank value wins.
    /// `None` means no signal exists at all.
    pub fn resolve(&self, event: &WebhookEvent, contact: &Contact) -> Option<LeadSource> {
        CHAIN.iter().find_map(|extractor| {
            let raw = (extractor.extract)(event, contact)?;
            let source = self.table.normalize(&raw)?;
            tracing::debug!(
                contact_id = %contact.id,
                via = extractor.name,
                raw = %raw,
                lead_source = %source,
                "Lead source resolved"
            );
            Some(source)
        })
    }
}
