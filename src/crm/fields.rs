//! Translation between CRM JSON shapes and the [`Contact`] model.
//!
//! The CRM is inconsistent about custom fields: contact reads may return a
//! map of key → value, or a list of objects that carry only a field id. Writes
//! must reference fields by id where possible, so a directory of key ↔ id
//! mappings fetched from the location is kept alongside.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::lead::{normalize_field_key, Contact, CustomFields, FieldValue};

/// Custom-field key ↔ id mapping for one CRM location.
#[derive(Debug, Clone, Default)]
pub struct FieldDirectory {
    ids_by_key: HashMap<String, String>,
    keys_by_id: HashMap<String, String>,
}

impl FieldDirectory {
    /// Build from the location's custom-field definitions.
    pub fn from_definitions(definitions: &[Value]) -> Self {
        let mut directory = Self::default();
        for def in definitions {
            let key = ["fieldKey", "key"]
                .iter()
                .find_map(|k| def.get(*k).and_then(Value::as_str))
                .filter(|k| !k.is_empty());
            let id = def.get("id").and_then(Value::as_str).filter(|id| !id.is_empty());
            if let (Some(key), Some(id)) = (key, id) {
                let key = normalize_field_key(key);
                directory.ids_by_key.insert(key.clone(), id.to_string());
                directory.keys_by_id.insert(id.to_string(), key);
            }
        }
        directory
    }

    pub fn id_for(&self, key: &str) -> Option<&str> {
        self.ids_by_key
            .get(&normalize_field_key(key))
            .map(String::as_str)
    }

    pub fn key_for(&self, id: &str) -> Option<&str> {
        self.keys_by_id.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids_by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids_by_key.is_empty()
    }
}

const PHONE_KEYS: &[&str] = &["phone", "phoneNumber", "phone_number", "Phone", "PhoneNumber"];
const VALUE_KEYS: &[&str] = &[
    "value",
    "field_value",
    "fieldValue",
    "valueText",
    "fieldValueText",
];
const NAME_KEYS: &[&str] = &["key", "fieldKey", "name", "label"];

fn non_blank<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Parse a contact response. The record may be wrapped in a `contact` key.
pub fn parse_contact(body: &Value, directory: &FieldDirectory) -> Option<Contact> {
    let record = body.get("contact").filter(|c| c.is_object()).unwrap_or(body);
    let id = non_blank(record, "id")?.to_string();

    let phone = PHONE_KEYS
        .iter()
        .find_map(|k| non_blank(record, k))
        .or_else(|| {
            record
                .get("phoneNumbers")
                .and_then(Value::as_array)
                .and_then(|numbers| numbers.first())
                .and_then(|first| non_blank(first, "number"))
        })
        .map(str::to_string);

    let first_name = ["firstName", "first_name"]
        .iter()
        .find_map(|k| non_blank(record, k))
        .map(str::to_string);

    Some(Contact {
        id,
        phone,
        first_name,
        tags: parse_tags(record.get("tags")),
        custom_fields: parse_custom_fields(record.get("customFields"), directory),
    })
}

/// Tags come as a list or as a comma-separated string.
pub fn parse_tags(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Custom fields come as a key → value map or a list of field objects.
/// List entries are stored under every name they carry, including the key
/// the directory knows for their id.
pub fn parse_custom_fields(raw: Option<&Value>, directory: &FieldDirectory) -> CustomFields {
    let mut fields = CustomFields::new();
    match raw {
        Some(Value::Object(map)) => {
            for (key, value) in map {
                if let Some(value) = FieldValue::from_json(value) {
                    fields.insert(key, value);
                }
            }
        }
        Some(Value::Array(entries)) => {
            for entry in entries {
                let Some(value) = VALUE_KEYS
                    .iter()
                    .filter_map(|k| entry.get(*k))
                    .find_map(FieldValue::from_json)
                else {
                    continue;
                };

                let by_id = ["id", "customFieldId"]
                    .iter()
                    .filter_map(|k| non_blank(entry, k))
                    .find_map(|id| directory.key_for(id));

                let names = NAME_KEYS
                    .iter()
                    .filter_map(|k| non_blank(entry, k))
                    .chain(by_id);
                for name in names {
                    fields.insert(name, value.clone());
                }
            }
        }
        _ => {}
    }
    fields
}

/// Whether the record's custom-field list has entries that only the
/// directory can name.
pub fn needs_directory(body: &Value) -> bool {
    let record = body.get("contact").filter(|c| c.is_object()).unwrap_or(body);
    let Some(entries) = record.get("customFields").and_then(Value::as_array) else {
        return false;
    };
    entries.iter().any(|entry| {
        let has_id = ["id", "customFieldId"]
            .iter()
            .any(|k| non_blank(entry, k).is_some());
        let has_name = NAME_KEYS.iter().any(|k| non_blank(entry, k).is_some());
        has_id && !has_name
    })
}

/// Build the `customFields` update array. Fields the directory knows are
/// referenced by id, others by their `contact.` key.
pub fn build_field_updates(updates: &[(&str, FieldValue)], directory: &FieldDirectory) -> Value {
    let entries: Vec<Value> = updates
        .iter()
        .map(|(key, value)| {
            let value = value.to_string();
            match directory.id_for(key) {
                Some(id) => json!({ "id": id, "field_value": value }),
                None => json!({
                    "key": format!("contact.{}", normalize_field_key(key)),
                    "field_value": value,
                }),
            }
        })
        .collect();
    Value::Array(entries)
}
