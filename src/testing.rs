//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Barrier, Mutex};

use crate::crm::{CrmClient, CrmError, NewContact};
use crate::lead::{Contact, FieldValue};
use crate::phone::phones_match;
use crate::twilio::{SmsError, SmsSender};
use crate::vapi::{CallApi, CallRequest, CallStatus, VapiError};

#[derive(Default)]
pub struct FakeCrm {
    contacts: Mutex<HashMap<String, Contact>>,
    updates: Mutex<Vec<(String, String)>>,
    failing_keys: Mutex<HashSet<String>>,
    tags_added: Mutex<Vec<(String, String)>>,
    fail_tags: AtomicBool,
    fail_search: AtomicBool,
    read_barrier: Mutex<Option<Arc<Barrier>>>,
    created: Mutex<Vec<NewContact>>,
}

impl FakeCrm {
    pub fn with_contacts(contacts: impl IntoIterator<Item = Contact>) -> Arc<Self> {
        let crm = Self::default();
        crm.contacts
            .try_lock()
            .unwrap()
            .extend(contacts.into_iter().map(|c| (c.id.clone(), c)));
        Arc::new(crm)
    }

    pub async fn contact(&self, id: &str) -> Contact {
        self.contacts.lock().await.get(id).cloned().unwrap()
    }

    /// Field keys written for `id`, in write order.
    pub async fn updated_keys(&self, id: &str) -> Vec<String> {
        self.updates
            .lock()
            .await
            .iter()
            .filter(|(contact_id, _)| contact_id == id)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Tags written for `id`, in write order.
    pub async fn tag_writes(&self, id: &str) -> Vec<String> {
        self.tags_added
            .lock()
            .await
            .iter()
            .filter(|(contact_id, _)| contact_id == id)
            .map(|(_, tag)| tag.clone())
            .collect()
    }

    pub async fn fail_updates_of(&self, key: &str) {
        self.failing_keys.lock().await.insert(key.to_string());
    }

    pub async fn fail_tagging(&self) {
        self.fail_tags.store(true, Ordering::SeqCst);
    }

    pub async fn fail_searches(&self) {
        self.fail_search.store(true, Ordering::SeqCst);
    }

    /// Make `get_contact` return only once `n` reads have taken a snapshot.
    pub async fn hold_reads_until(&self, n: usize) {
        *self.read_barrier.lock().await = Some(Arc::new(Barrier::new(n)));
    }

    pub async fn created(&self) -> Vec<NewContact> {
        self.created.lock().await.clone()
    }
}

fn not_found(id: &str) -> CrmError {
    CrmError::NotFound(id.to_string())
}

#[async_trait]
impl CrmClient for FakeCrm {
    async fn get_contact(&self, contact_id: &str) -> Result<Contact, CrmError> {
        let snapshot = self.contacts.lock().await.get(contact_id).cloned();
        let barrier = self.read_barrier.lock().await.clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        snapshot.ok_or_else(|| not_found(contact_id))
    }

    async fn update_fields(
        &self,
        contact_id: &str,
        fields: &[(&str, FieldValue)],
    ) -> Result<(), CrmError> {
        let failing = self.failing_keys.lock().await;
        if fields.iter().any(|(key, _)| failing.contains(*key)) {
            return Err(CrmError::Api {
                status: 500,
                body: "update rejected".into(),
            });
        }
        drop(failing);

        let mut contacts = self.contacts.lock().await;
        let contact = contacts
            .get_mut(contact_id)
            .ok_or_else(|| not_found(contact_id))?;
        let mut updates = self.updates.lock().await;
        for (key, value) in fields {
            contact.custom_fields.set(key, value.clone());
            updates.push((contact_id.to_string(), key.to_string()));
        }
        Ok(())
    }

    async fn add_tags(&self, contact_id: &str, tags: &[&str]) -> Result<(), CrmError> {
        if self.fail_tags.load(Ordering::SeqCst) {
            return Err(CrmError::Request("connection reset".into()));
        }
        let mut contacts = self.contacts.lock().await;
        let contact = contacts
            .get_mut(contact_id)
            .ok_or_else(|| not_found(contact_id))?;
        let mut tags_added = self.tags_added.lock().await;
        for tag in tags {
            tags_added.push((contact_id.to_string(), tag.to_string()));
            if !contact.tags.iter().any(|t| t == tag) {
                contact.tags.push(tag.to_string());
            }
        }
        Ok(())
    }

    async fn search_by_phone(&self, phone: &str) -> Result<Vec<Contact>, CrmError> {
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(CrmError::Api {
                status: 503,
                body: "search unavailable".into(),
            });
        }
        Ok(self
            .contacts
            .lock()
            .await
            .values()
            .filter(|c| c.phone.as_deref().is_some_and(|p| phones_match(p, phone)))
            .cloned()
            .collect())
    }

    async fn create_contact(&self, contact: &NewContact) -> Result<String, CrmError> {
        let mut created = self.created.lock().await;
        created.push(contact.clone());
        let id = format!("new-{}", created.len());
        self.contacts
            .lock()
            .await
            .insert(id.clone(), Contact::new(&id).with_phone(&contact.phone));
        Ok(id)
    }
}

#[derive(Default)]
pub struct FakeCalls {
    placed: Mutex<Vec<String>>,
    statuses: Mutex<HashMap<String, CallStatus>>,
    fail: bool,
}

impl FakeCalls {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub async fn set_status(&self, call_id: &str, status: &str, ended_reason: Option<&str>) {
        self.statuses.lock().await.insert(
            call_id.to_string(),
            CallStatus {
                status: status.to_string(),
                ended_reason: ended_reason.map(str::to_string),
                duration_secs: None,
            },
        );
    }

    /// Numbers dialed so far.
    pub async fn placed(&self) -> Vec<String> {
        self.placed.lock().await.clone()
    }
}

#[async_trait]
impl CallApi for FakeCalls {
    async fn place_call(&self, request: &CallRequest<'_>) -> Result<String, VapiError> {
        if self.fail {
            return Err(VapiError::Api("500 Internal Server Error: boom".into()));
        }
        let mut placed = self.placed.lock().await;
        placed.push(request.phone.to_string());
        Ok(format!("call-{}", placed.len()))
    }

    async fn call_status(&self, call_id: &str) -> Result<CallStatus, VapiError> {
        self.statuses
            .lock()
            .await
            .get(call_id)
            .cloned()
            .ok_or_else(|| VapiError::Api(format!("404 Not Found: {call_id}")))
    }
}

#[derive(Default)]
pub struct FakeSms {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl FakeSms {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    /// `(to, body)` pairs sent so far.
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl SmsSender for FakeSms {
    async fn send_sms(&self, to: &str, body: &str) -> Result<String, SmsError> {
        if self.fail {
            return Err(SmsError::Api("400 Bad Request: unreachable".into()));
        }
        let mut sent = self.sent.lock().await;
        sent.push((to.to_string(), body.to_string()));
        Ok(format!("SM{}", sent.len()))
    }
}
