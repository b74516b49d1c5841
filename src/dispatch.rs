//! Outbound dispatch: decides whether a new lead gets a call and does the
//! CRM bookkeeping around placing it.

use std::fmt;
use std::sync::Arc;

use crate::crm::{CrmClient, CrmError};
use crate::dedupe::DedupeGate;
use crate::lead::{fields, Contact, FieldValue, LeadError, LeadSource, WebhookEvent};
use crate::lead_source::LeadSourceResolver;
use crate::phone::{PhoneCheck, PhoneNumber, PhoneValidator};
use crate::vapi::{CallApi, CallRequest};

/// Tag marking a contact as an outbound lead.
const OUTBOUND_TAG: &str = "outbound";

/// Dispatch steps that talk to an upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStep {
    FetchContact,
    PersistLeadSource,
    MarkCalled,
    PlaceCall,
}

impl DispatchStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchContact => "fetch_contact",
            Self::PersistLeadSource => "persist_lead_source",
            Self::MarkCalled => "mark_called",
            Self::PlaceCall => "place_call",
        }
    }
}

impl fmt::Display for DispatchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Called { call_id: String, phone: PhoneNumber },
    SkippedDuplicate,
    SkippedNoPhone,
    SkippedInvalidPhone,
    SkippedInboundSource,
    Failed { step: DispatchStep, reason: String },
}

impl DispatchResult {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Called { .. } => "called",
            Self::SkippedDuplicate => "skipped_duplicate",
            Self::SkippedNoPhone => "skipped_no_phone",
            Self::SkippedInvalidPhone => "skipped_invalid_phone",
            Self::SkippedInboundSource => "skipped_inbound_source",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Composes resolver, dedupe gate and phone validator into the call decision.
pub struct Dispatcher {
    crm: Arc<dyn CrmClient>,
    calls: Arc<dyn CallApi>,
    resolver: LeadSourceResolver,
    validator: PhoneValidator,
    gate: DedupeGate,
}

impl Dispatcher {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        calls: Arc<dyn CallApi>,
        resolver: LeadSourceResolver,
        validator: PhoneValidator,
    ) -> Self {
        Self {
            crm,
            calls,
            resolver,
            validator,
            gate: DedupeGate,
        }
    }

    /// Run one lead event through the dispatch sequence. Upstream failures
    /// come back as [`DispatchResult::Failed`]; nothing here panics or
    /// propagates an error.
    pub async fn handle_new_lead(&self, event: &WebhookEvent) -> DispatchResult {
        let contact_id = event.contact_id.as_str();

        let contact = match self.crm.get_contact(contact_id).await {
            Ok(contact) => contact,
            Err(e) => return failed(contact_id, DispatchStep::FetchContact, e),
        };

        let lead_source = self.resolver.resolve(event, &contact);
        match &lead_source {
            Some(source) if source.is_inbound() => {
                if let Err(e) = self.persist_lead_source(&contact, source).await {
                    return failed(contact_id, DispatchStep::PersistLeadSource, e);
                }
                tracing::info!(contact_id, "Inbound lead, not placing an outbound call");
                return DispatchResult::SkippedInboundSource;
            }
            Some(source) => {
                tracing::info!(contact_id, lead_source = %source, "Lead source identified");
            }
            None => {
                tracing::warn!(
                    contact_id,
                    event = %event.event_type,
                    reason = %LeadError::LeadSourceUnresolved,
                    "Continuing without a lead source"
                );
            }
        }

        if self.gate.should_skip(&contact) {
            tracing::info!(
                contact_id,
                reason = %LeadError::DuplicateCall,
                "Skipping duplicate call"
            );
            return DispatchResult::SkippedDuplicate;
        }

        let phone = match self.validator.validate(contact.phone.as_deref()) {
            PhoneCheck::Valid(phone) => phone,
            PhoneCheck::Missing => {
                tracing::warn!(contact_id, reason = %LeadError::MissingPhone, "Skipping call");
                return DispatchResult::SkippedNoPhone;
            }
            PhoneCheck::Invalid => {
                let raw = contact.phone.clone().unwrap_or_default();
                tracing::warn!(
                    contact_id,
                    reason = %LeadError::InvalidPhone(raw),
                    "Skipping call"
                );
                return DispatchResult::SkippedInvalidPhone;
            }
        };

        if self.called_under_another_contact(&contact, &phone).await {
            tracing::info!(
                contact_id,
                reason = %LeadError::DuplicateCall,
                "Number already called from another contact"
            );
            return DispatchResult::SkippedDuplicate;
        }

        if event.event_type.tags_outbound() {
            if let Err(e) = self.crm.add_tags(contact_id, &[OUTBOUND_TAG]).await {
                tracing::warn!(contact_id, "Could not tag contact as outbound: {e}");
            }
        }

        if let Some(source) = &lead_source {
            if let Err(e) = self.persist_lead_source(&contact, source).await {
                return failed(contact_id, DispatchStep::PersistLeadSource, e);
            }
        }

        // Written before dialing so a concurrent delivery sees it as early as possible.
        if let Err(e) = self
            .crm
            .update_fields(contact_id, &[(fields::VAPI_CALLED, FieldValue::Bool(true))])
            .await
        {
            return failed(contact_id, DispatchStep::MarkCalled, e);
        }

        let request = CallRequest {
            phone: &phone,
            contact_id,
            customer_name: contact.first_name.as_deref(),
            lead_source: lead_source.as_ref().map(LeadSource::as_str),
        };
        let call_id = match self.calls.place_call(&request).await {
            Ok(call_id) => call_id,
            Err(e) => {
                tracing::error!(
                    contact_id,
                    "Call failed after marking contact as called; it will not be retried"
                );
                return failed(contact_id, DispatchStep::PlaceCall, e);
            }
        };

        if let Err(e) = self
            .crm
            .update_fields(
                contact_id,
                &[(fields::VAPI_CALL_ID, FieldValue::Text(call_id.clone()))],
            )
            .await
        {
            tracing::warn!(contact_id, call_id = %call_id, "Could not record call id: {e}");
        }

        tracing::info!(contact_id, call_id = %call_id, to = %phone, "Lead called");
        DispatchResult::Called { call_id, phone }
    }

    /// A lead who submits twice can end up as two contacts with one number.
    /// A failed search is logged and does not block the call.
    async fn called_under_another_contact(&self, contact: &Contact, phone: &PhoneNumber) -> bool {
        match self.crm.search_by_phone(phone.as_str()).await {
            Ok(others) => others
                .iter()
                .filter(|other| other.id != contact.id)
                .any(|other| self.gate.should_skip(other)),
            Err(e) => {
                tracing::warn!(
                    contact_id = %contact.id,
                    "Phone search failed, skipping cross-contact dedupe: {e}"
                );
                false
            }
        }
    }

    /// Write the lead source unless the contact already carries that value.
    async fn persist_lead_source(
        &self,
        contact: &Contact,
        source: &LeadSource,
    ) -> Result<(), CrmError> {
        if contact.custom_fields.text(fields::LEAD_SOURCE) == Some(source.as_str()) {
            return Ok(());
        }
        self.crm
            .update_fields(
                &contact.id,
                &[(fields::LEAD_SOURCE, FieldValue::Text(source.to_string()))],
            )
            .await
    }
}

fn failed(contact_id: &str, step: DispatchStep, err: impl fmt::Display) -> DispatchResult {
    let reason = err.to_string();
    tracing::error!(
        contact_id,
        step = step.as_str(),
        error = %LeadError::UpstreamApiFailure { step: step.as_str(), reason: reason.clone() },
        "Dispatch failed"
    );
    DispatchResult::Failed { step, reason }
}
