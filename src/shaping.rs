//! Top-level reshaping: key allow/deny lists and enclosing keys.

use crate::config::Enclosure;
use crate::document::Document;
use crate::error::{StrataError, StrataResult};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Keep only the listed top-level keys. An empty list keeps everything.
///
/// Surviving keys keep their document order; listed keys that are absent are
/// ignored.
pub fn filter_keys(document: Document, keys: &[String]) -> Document {
    if keys.is_empty() {
        return document;
    }
    match document {
        Value::Object(mut map) => {
            map.retain(|key, _| keys.iter().any(|k| k == key));
            Value::Object(map)
        }
        other => other,
    }
}

/// Remove the listed top-level keys.
pub fn exclude_keys(mut document: Document, keys: &[String]) -> Document {
    let Some(map) = document.as_object_mut() else {
        return document;
    };
    for key in keys {
        if map.shift_remove(key).is_some() {
            info!(key = %key, "Excluding key");
        } else {
            warn!(key = %key, "Excluded key not found or already removed");
        }
    }
    document
}

/// Wrap the document under `key`.
pub fn enclose(document: Document, key: &str) -> Document {
    info!(key, "Adding enclosing key");
    let mut map = Map::new();
    map.insert(key.to_string(), document);
    Value::Object(map)
}

/// Replace the document with the value under `key`.
pub fn unenclose(mut document: Document, key: &str) -> StrataResult<Document> {
    info!(key, "Removing enclosing key");
    document
        .as_object_mut()
        .and_then(|map| map.shift_remove(key))
        .ok_or_else(|| StrataError::enclosing_key_not_found(key))
}

pub fn apply_enclosure(document: Document, enclosure: &Enclosure) -> StrataResult<Document> {
    match enclosure {
        Enclosure::Add(key) => Ok(enclose(document, key)),
        Enclosure::Remove(key) => unenclose(document, key),
    }
}
