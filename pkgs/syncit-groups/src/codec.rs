//! Conversion between typed groups and backend documents
//!
//! The document id carries the group id as a decimal string; the body holds
//! every other field. Reading is lenient: missing or null fields fall back to
//! the defaults of [`Group`] and [`Member`](crate::models::Member).

use serde::Serialize;
use serde_json::Value;
use syncit_store::{Document, Fields};

use crate::error::{GroupError, Result};
use crate::models::{Group, GroupId};

/// Document body for a group. The id is carried by the document key.
pub fn serialize_group(group: &Group) -> Result<Fields> {
    let Value::Object(mut fields) = to_field(group)? else {
        return Err(GroupError::Storage(
            "group did not serialize to an object".to_string(),
        ));
    };
    fields.remove("id");
    Ok(fields)
}

/// Build a group from a document id and body
pub fn format_group_data(doc_id: &str, data: &Fields) -> Result<Group> {
    let id: GroupId = doc_id
        .parse()
        .map_err(|_| malformed(doc_id, "document id is not an integer"))?;

    let body = strip_nulls(Value::Object(data.clone()));
    let mut group: Group = serde_json::from_value(body).map_err(|e| malformed(doc_id, e))?;
    group.id = id;
    Ok(group)
}

pub fn group_from_document(document: &Document) -> Result<Group> {
    format_group_data(&document.id, &document.data)
}

pub fn document_id(group_id: GroupId) -> String {
    group_id.to_string()
}

/// Encode a single field value for a partial update
pub fn to_field<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| GroupError::Storage(e.to_string()))
}

/// Drop null object entries at every depth so they read as missing
fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

fn malformed(doc_id: &str, reason: impl ToString) -> GroupError {
    GroupError::MalformedDocument {
        doc_id: doc_id.to_string(),
        reason: reason.to_string(),
    }
}
