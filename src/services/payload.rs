//! Helpers over raw JSON payloads returned by the remote workspace.

use crate::models::{Alias, DocumentId, ObjectKind};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;

/// Field names whose string values are document identifiers.
pub const ID_FIELDS: &[&str] = &["id", "page_id", "database_id", "block_id", "next_cursor"];

/// Field carrying the last modification time.
pub const FRESHNESS_FIELD: &str = "last_edited_time";

/// Every identifier found under [`ID_FIELDS`], deduplicated, in document order.
#[must_use]
pub fn collect_ids(payload: &Value) -> Vec<DocumentId> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    let mut stack = vec![payload];

    while let Some(value) = stack.pop() {
        match value {
            Value::Object(map) => {
                let mut nested = Vec::new();
                for (field, child) in map {
                    match id_field(field, child) {
                        Some(id) => {
                            if seen.insert(id) {
                                ids.push(id);
                            }
                        },
                        None => nested.push(child),
                    }
                }
                stack.extend(nested.into_iter().rev());
            },
            Value::Array(items) => stack.extend(items.iter().rev()),
            _ => {},
        }
    }
    ids
}

/// Replaces identifier strings under [`ID_FIELDS`] with alias numbers.
///
/// Identifiers `lookup` cannot map are left as they are.
pub fn rewrite_ids<F>(payload: &mut Value, lookup: F)
where
    F: Fn(DocumentId) -> Option<Alias>,
{
    let mut stack = vec![payload];

    while let Some(value) = stack.pop() {
        match value {
            Value::Object(map) => {
                for (field, child) in map.iter_mut() {
                    if let Some(alias) = id_field(field, child).and_then(&lookup) {
                        *child = Value::from(alias.value());
                    } else {
                        stack.push(child);
                    }
                }
            },
            Value::Array(items) => stack.extend(items.iter_mut()),
            _ => {},
        }
    }
}

fn id_field(field: &str, value: &Value) -> Option<DocumentId> {
    if !ID_FIELDS.contains(&field) {
        return None;
    }
    value.as_str().and_then(|raw| DocumentId::parse(raw).ok())
}

/// The top-level `id` of a payload.
#[must_use]
pub fn document_id(payload: &Value) -> Option<DocumentId> {
    payload
        .get("id")
        .and_then(Value::as_str)
        .and_then(|raw| DocumentId::parse(raw).ok())
}

/// The modification timestamp of a payload, if it carries a valid one.
#[must_use]
pub fn freshness(payload: &Value) -> Option<DateTime<Utc>> {
    payload
        .get(FRESHNESS_FIELD)
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

/// The kind named by the payload's `object` field.
#[must_use]
pub fn object_kind(payload: &Value) -> Option<ObjectKind> {
    match payload.get("object").and_then(Value::as_str)? {
        "page" => Some(ObjectKind::Page),
        "database" | "data_source" => Some(ObjectKind::Database),
        "block" => Some(ObjectKind::Block),
        _ => None,
    }
}

/// Items of a list response.
#[must_use]
pub fn results(payload: &Value) -> &[Value] {
    payload
        .get("results")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Cursor of the next page of a list response, if there is one.
#[must_use]
pub fn next_cursor(payload: &Value) -> Option<DocumentId> {
    let has_more = payload
        .get("has_more")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !has_more {
        return None;
    }
    payload
        .get("next_cursor")
        .and_then(Value::as_str)
        .and_then(|raw| DocumentId::parse(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const A: &str = "0123456789abcdef0123456789abcdef";
    const B_HYPHENATED: &str = "fedcba98-7654-3210-fedc-ba9876543210";

    #[test]
    fn test_collect_ids_known_fields_only() {
        let payload = json!({
            "id": A,
            "parent": { "type": "page_id", "page_id": B_HYPHENATED },
            "title": A,
            "results": [{ "id": A }, { "block_id": "not-an-id" }],
        });

        let ids = collect_ids(&payload);
        assert_eq!(
            ids,
            vec![
                DocumentId::parse(A).unwrap(),
                DocumentId::parse(B_HYPHENATED).unwrap()
            ]
        );
    }

    #[test]
    fn test_rewrite_ids() {
        let mut payload = json!({
            "id": A,
            "parent": { "page_id": B_HYPHENATED },
            "title": A,
            "unknown": { "id": "ffffffffffffffffffffffffffffffff" },
        });
        let a = DocumentId::parse(A).unwrap();
        let b = DocumentId::parse(B_HYPHENATED).unwrap();

        rewrite_ids(&mut payload, |id| {
            if id == a {
                Some(Alias::new(1))
            } else if id == b {
                Some(Alias::new(2))
            } else {
                None
            }
        });

        assert_eq!(payload["id"], json!(1));
        assert_eq!(payload["parent"]["page_id"], json!(2));
        assert_eq!(payload["title"], json!(A));
        assert_eq!(payload["unknown"]["id"], json!("ffffffffffffffffffffffffffffffff"));
    }

    #[test]
    fn test_freshness() {
        let payload = json!({ "last_edited_time": "2024-05-01T12:30:00.000Z" });
        let ts = freshness(&payload).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T12:30:00+00:00");

        assert!(freshness(&json!({ "last_edited_time": "yesterday" })).is_none());
        assert!(freshness(&json!({})).is_none());
    }

    #[test]
    fn test_list_fields() {
        let payload = json!({
            "object": "list",
            "results": [{ "object": "page" }, { "object": "database" }],
            "has_more": true,
            "next_cursor": B_HYPHENATED,
        });
        assert_eq!(results(&payload).len(), 2);
        assert_eq!(object_kind(&results(&payload)[0]), Some(ObjectKind::Page));
        assert_eq!(object_kind(&results(&payload)[1]), Some(ObjectKind::Database));
        assert_eq!(next_cursor(&payload), DocumentId::parse(B_HYPHENATED).ok());

        let last = json!({ "results": [], "has_more": false, "next_cursor": B_HYPHENATED });
        assert!(next_cursor(&last).is_none());
        assert!(results(&json!({})).is_empty());
    }
}
