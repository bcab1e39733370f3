//! Universal accessor: picks the capability-agnostic primary value of a payload.

use serde_json::Value as JsonValue;

/// Fields tried first, in priority order.
pub const PRIMARY_FIELDS: &[&str] = &["result", "value", "values"];

/// Fields never treated as the primary value.
const METADATA_FIELDS: &[&str] = &["context", "label", "metadata"];

/// Returns the key and value of the primary field of an object payload.
///
/// The first present entry of [`PRIMARY_FIELDS`] wins. Otherwise, if exactly
/// one non-metadata field holds a scalar, that field is used.
pub fn primary_field(payload: &JsonValue) -> Option<(&str, &JsonValue)> {
    let object = payload.as_object()?;

    for field in PRIMARY_FIELDS {
        if let Some(value) = object.get(*field) {
            return Some((*field, value));
        }
    }

    let mut scalars = object
        .iter()
        .filter(|(key, _)| !METADATA_FIELDS.contains(&key.as_str()))
        .filter(|(_, value)| is_scalar(value));

    match (scalars.next(), scalars.next()) {
        (Some((key, value)), None) => Some((key.as_str(), value)),
        _ => None,
    }
}

/// Returns the primary value of a payload.
///
/// A scalar payload is its own primary value. Objects go through
/// [`primary_field`]. Arrays and ambiguous objects have none.
pub fn primary_value(payload: &JsonValue) -> Option<&JsonValue> {
    if is_scalar(payload) {
        return Some(payload);
    }
    primary_field(payload).map(|(_, value)| value)
}

fn is_scalar(value: &JsonValue) -> bool {
    matches!(
        value,
        JsonValue::Bool(_) | JsonValue::Number(_) | JsonValue::String(_)
    )
}
