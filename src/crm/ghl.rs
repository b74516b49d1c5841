use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::fields::{build_field_updates, needs_directory, parse_contact, FieldDirectory};
use super::{CrmClient, CrmError, NewContact};
use crate::config::CrmConfig;
use crate::lead::{Contact, FieldValue};
use crate::phone::{digits_only, phones_match};

/// The search endpoint rejects longer query strings.
const MAX_QUERY_CHARS: usize = 75;

/// The search endpoint caps page size at 100.
const MAX_PAGE_LIMIT: u32 = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// LeadConnector (GoHighLevel) REST client scoped to one location.
pub struct GhlClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_version: String,
    location_id: String,
    /// Loaded on first use; stays empty until a load succeeds.
    directory: RwLock<Option<FieldDirectory>>,
}

impl GhlClient {
    pub fn new(crm_config: &CrmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: crm_config.base_url.trim_end_matches('/').to_string(),
            api_key: crm_config.api_key.clone(),
            api_version: crm_config.api_version.clone(),
            location_id: crm_config.location_id.clone(),
            directory: RwLock::new(None),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("Version", &self.api_version)
            .header("Accept", "application/json")
    }

    async fn send(&self, req: RequestBuilder) -> Result<Value, CrmError> {
        let resp = req
            .send()
            .await
            .map_err(|e| CrmError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(CrmError::Api { status, body });
        }

        resp.json()
            .await
            .map_err(|e| CrmError::Parse(e.to_string()))
    }

    /// Custom-field directory for the location, fetched once and cached.
    /// A failed fetch is not cached and is retried on the next call.
    async fn directory(&self) -> Result<FieldDirectory, CrmError> {
        if let Some(directory) = self.directory.read().await.as_ref() {
            return Ok(directory.clone());
        }

        let path = format!("locations/{}/customFields", self.location_id);
        let definitions = match self.send(self.request(Method::GET, &path)).await {
            Ok(body) => field_definitions(&body),
            Err(CrmError::Api { status: 404, .. }) => Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to load custom field directory: {e}");
                return Err(e);
            }
        };

        let directory = FieldDirectory::from_definitions(&definitions);
        if directory.is_empty() {
            tracing::info!("Location has no custom fields");
        } else {
            tracing::info!(fields = directory.len(), "Cached custom field directory");
        }
        *self.directory.write().await = Some(directory.clone());
        Ok(directory)
    }
}

/// The definitions list may be bare or nested under one of several keys.
fn field_definitions(body: &Value) -> Vec<Value> {
    if let Some(list) = body.as_array() {
        return list.clone();
    }
    ["customFields", "fields", "data"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_array))
        .cloned()
        .unwrap_or_default()
}

/// Parse a fetched record. Without a directory, a record whose custom fields
/// carry only ids cannot be read safely: dropping them would hide
/// `vapi_called` from the dedupe gate.
fn contact_from_record(
    record: &Value,
    directory: Result<FieldDirectory, CrmError>,
) -> Result<Option<Contact>, CrmError> {
    let directory = match directory {
        Ok(directory) => directory,
        Err(e) if needs_directory(record) => return Err(e),
        Err(_) => FieldDirectory::default(),
    };
    Ok(parse_contact(record, &directory))
}

/// Search results may be bare or nested under `contacts` or `data`.
fn search_results(body: &Value) -> &[Value] {
    if let Some(list) = body.as_array() {
        return list;
    }
    ["contacts", "data"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn phone_query(phone: &str) -> String {
    digits_only(phone).chars().take(MAX_QUERY_CHARS).collect()
}

#[async_trait]
impl CrmClient for GhlClient {
    async fn get_contact(&self, contact_id: &str) -> Result<Contact, CrmError> {
        let req = self
            .request(Method::GET, &format!("contacts/{contact_id}"))
            .query(&[("locationId", &self.location_id)]);

        let body = match self.send(req).await {
            Err(CrmError::Api { status: 404, .. }) => {
                return Err(CrmError::NotFound(contact_id.to_string()))
            }
            other => other?,
        };

        contact_from_record(&body, self.directory().await)?
            .ok_or_else(|| CrmError::Parse(format!("contact {contact_id} has no id")))
    }

    async fn update_fields(
        &self,
        contact_id: &str,
        fields: &[(&str, FieldValue)],
    ) -> Result<(), CrmError> {
        // Keys still work without ids, so a missing directory only costs precision.
        let directory = self.directory().await.unwrap_or_default();
        let body = json!({ "customFields": build_field_updates(fields, &directory) });

        self.send(
            self.request(Method::PUT, &format!("contacts/{contact_id}"))
                .json(&body),
        )
        .await?;

        tracing::debug!(contact_id, fields = fields.len(), "Updated custom fields");
        Ok(())
    }

    async fn add_tags(&self, contact_id: &str, tags: &[&str]) -> Result<(), CrmError> {
        if tags.is_empty() {
            return Ok(());
        }

        self.send(
            self.request(Method::POST, &format!("contacts/{contact_id}/tags"))
                .json(&json!({ "tags": tags })),
        )
        .await?;

        tracing::info!(contact_id, ?tags, "Added tags");
        Ok(())
    }

    async fn search_by_phone(&self, phone: &str) -> Result<Vec<Contact>, CrmError> {
        let query = phone_query(phone);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({
            "locationId": self.location_id,
            "pageLimit": MAX_PAGE_LIMIT,
            "query": query,
        });
        let resp = self
            .send(self.request(Method::POST, "contacts/search").json(&body))
            .await?;

        let directory = self.directory().await;
        let mut matches = Vec::new();
        for record in search_results(&resp) {
            let Some(contact) = contact_from_record(record, directory.clone())? else {
                continue;
            };
            if contact.phone.as_deref().is_some_and(|p| phones_match(phone, p)) {
                matches.push(contact);
            }
        }

        tracing::debug!(matches = matches.len(), "Searched contacts by phone");
        Ok(matches)
    }

    async fn create_contact(&self, contact: &NewContact) -> Result<String, CrmError> {
        let body = json!({
            "locationId": self.location_id,
            "firstName": contact.first_name,
            "phone": contact.phone,
            "tags": contact.tags,
            "source": contact.source,
        });
        let resp = self
            .send(self.request(Method::POST, "contacts/").json(&body))
            .await?;

        resp.get("contact")
            .and_then(|c| c.get("id"))
            .or_else(|| resp.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CrmError::Parse("created contact has no id".into()))
    }
}
