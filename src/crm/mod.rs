//! CRM collaborator: the live source of truth for contact state.

pub mod fields;
pub mod ghl;

use async_trait::async_trait;

use crate::lead::{Contact, FieldValue};

/// A contact to create, used by the smoke test.
#[derive(Debug, Clone)]
pub struct NewContact {
    pub first_name: String,
    pub phone: String,
    pub tags: Vec<String>,
    pub source: Option<String>,
}

/// Operations this service needs from the CRM. Every call is a live round
/// trip; there is no read-modify-write transaction.
#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn get_contact(&self, contact_id: &str) -> Result<Contact, CrmError>;

    /// Write custom fields by key. Other fields are left untouched.
    async fn update_fields(
        &self,
        contact_id: &str,
        fields: &[(&str, FieldValue)],
    ) -> Result<(), CrmError>;

    /// Add tags without removing existing ones.
    async fn add_tags(&self, contact_id: &str, tags: &[&str]) -> Result<(), CrmError>;

    /// All contacts whose phone matches `phone` after normalization.
    async fn search_by_phone(&self, phone: &str) -> Result<Vec<Contact>, CrmError>;

    /// Create a contact, returning its id.
    async fn create_contact(&self, contact: &NewContact) -> Result<String, CrmError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CrmError {
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("CRM API error: {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Contact not found: {0}")]
    NotFound(String),
    #[error("Unexpected CRM response: {0}")]
    Parse(String),
}
