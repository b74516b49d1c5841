use crate::lead::{fields, Contact, FieldValue};

/// Marker written while a call is being placed by an older deployment.
const IN_FLIGHT: &str = "calling";

/// Decides whether a contact has already been called.
///
/// This reads the `vapi_called` flag from the live contact record. The CRM
/// offers no compare-and-set, so two deliveries that both read the flag
/// before either writes it will both pass. The dispatcher narrows that gap by
/// writing the flag before placing the call; closing it entirely needs an
/// idempotency cache keyed by contact id in front of this check.
#[derive(Debug, Clone, Copy, Default)]
pub struct DedupeGate;

impl DedupeGate {
    pub fn should_skip(&self, contact: &Contact) -> bool {
        match contact.custom_fields.get(fields::VAPI_CALLED) {
            Some(FieldValue::Text(s)) if s.trim().eq_ignore_ascii_case(IN_FLIGHT) => true,
            Some(value) => value.is_truthy(),
            None => false,
        }
    }
}
