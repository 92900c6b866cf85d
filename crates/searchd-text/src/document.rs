//! Projection of raw entity payloads onto indexable values.

use searchd_core::{CollectionFields, FieldDescriptor, FieldKind, FieldType};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Number(i64),
    NumberArray(Vec<i64>),
    Opaque(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedField<'a> {
    pub name: &'a str,
    pub kind: FieldKind,
    pub value: FieldValue,
}

/// Converts one attribute; `None` when the field is not searchable, its type
/// is unsupported or the value has the wrong shape.
pub fn project(descriptor: &FieldDescriptor, value: &Value) -> Option<FieldValue> {
    if !descriptor.searchable {
        return None;
    }
    match descriptor.field_type {
        FieldType::String | FieldType::Text | FieldType::HtmlStrict | FieldType::HtmlPermissive => {
            value.as_str().map(|s| FieldValue::Text(s.to_string()))
        }
        FieldType::GenericRelation => value.as_str().map(|s| FieldValue::Opaque(s.to_string())),
        FieldType::Relation | FieldType::Number => value.as_i64().map(FieldValue::Number),
        FieldType::NumberArray => value
            .as_array()
            .map(|items| FieldValue::NumberArray(items.iter().filter_map(Value::as_i64).collect())),
        FieldType::Other(_) => None,
    }
}

/// Projects every searchable field present in `payload`. A payload that is not
/// a JSON object yields no fields.
pub fn project_payload<'a>(fields: &'a CollectionFields, payload: &[u8], fqid: &str) -> Vec<ProjectedField<'a>> {
    let entity: Value = match serde_json::from_slice(payload) {
        Ok(v @ Value::Object(_)) => v,
        Ok(_) => {
            warn!(%fqid, "payload is not an object, indexing without fields");
            return Vec::new();
        }
        Err(e) => {
            warn!(%fqid, error = %e, "malformed payload, indexing without fields");
            return Vec::new();
        }
    };
    fields
        .iter()
        .filter_map(|(name, descriptor)| {
            let kind = descriptor.field_type.kind()?;
            let value = project(descriptor, entity.get(name)?)?;
            Some(ProjectedField { name, kind, value })
        })
        .collect()
}
