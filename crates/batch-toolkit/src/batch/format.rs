//! Output shaping for batch and single-operation results.
//!
//! The output mode is always passed in explicitly; nothing here reads global
//! state.

use super::dependency_graph::is_linear_chain;
use super::primary::{primary_field, primary_value};
use super::request::OutputMode;
use super::result_store::{BatchResult, OperationOutcome};
use log::debug;
use serde_json::{Map, Value as JsonValue, json};
use std::collections::HashSet;

/// Shapes results according to an [`OutputMode`].
///
/// # Examples
///
/// ```ignore
/// let formatter = OutputFormatter::new(OutputMode::Value).with_extract(["calc3"]);
/// let response = formatter.format_batch(&result);
/// println!("{}", formatter.render(&response)?);
/// ```
#[derive(Debug, Clone, Default)]
pub struct OutputFormatter {
    mode: OutputMode,
    extract: Option<HashSet<String>>,
}

impl OutputFormatter {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            extract: None,
        }
    }

    /// Restricts batch output to the given operation ids.
    ///
    /// Applies to `full`, `compact`, `minimal` and the value map of `value`.
    /// Errors in `value` mode are always reported for every failed operation.
    pub fn with_extract<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extract = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    fn is_selected(&self, id: &str) -> bool {
        self.extract.as_ref().is_none_or(|ids| ids.contains(id))
    }

    fn selected<'a>(&'a self, result: &'a BatchResult) -> impl Iterator<Item = &'a OperationOutcome> {
        result.outcomes.iter().filter(|o| self.is_selected(&o.id))
    }

    /// Shapes a finished batch.
    pub fn format_batch(&self, result: &BatchResult) -> JsonValue {
        match self.mode {
            OutputMode::Full => self.full(result),
            OutputMode::Compact => strip_nulls(self.full(result)),
            OutputMode::Minimal => self.minimal(result),
            OutputMode::Value => self.value(result),
            OutputMode::Final => self.final_value(result),
        }
    }

    /// Shapes the payload of a single capability invocation.
    pub fn format_single(&self, payload: &JsonValue, context: Option<&str>) -> JsonValue {
        match self.mode {
            OutputMode::Full => with_context(payload.clone(), context, true),
            OutputMode::Compact => strip_nulls(with_context(payload.clone(), context, false)),
            OutputMode::Minimal => {
                let shaped = match primary_field(payload) {
                    Some((key, value)) => {
                        let mut object = Map::new();
                        object.insert(key.to_string(), value.clone());
                        JsonValue::Object(object)
                    }
                    None => payload.clone(),
                };
                with_context(shaped, context, false)
            }
            OutputMode::Value | OutputMode::Final => {
                with_context(json!({ "value": value_of(payload) }), context, false)
            }
        }
    }

    /// Serializes a shaped response: compact mode without whitespace, every
    /// other mode pretty-printed.
    pub fn render(&self, response: &JsonValue) -> Result<String, serde_json::Error> {
        match self.mode {
            OutputMode::Compact => serde_json::to_string(response),
            _ => serde_json::to_string_pretty(response),
        }
    }

    fn full(&self, result: &BatchResult) -> JsonValue {
        let outcomes: Vec<&OperationOutcome> = self.selected(result).collect();
        json!({
            "results": outcomes,
            "summary": result.summary,
            "waves": result.waves,
            "execution_mode": result.execution_mode,
            "context": result.context,
        })
    }

    fn minimal(&self, result: &BatchResult) -> JsonValue {
        let operations: Vec<JsonValue> = self
            .selected(result)
            .map(|outcome| {
                let mut entry = Map::new();
                entry.insert("id".into(), json!(outcome.id));
                entry.insert("status".into(), json!(outcome.status));
                entry.insert("wave".into(), json!(outcome.wave));
                if let Some(payload) = &outcome.payload {
                    entry.insert("value".into(), value_of(payload));
                }
                if let Some(context) = &outcome.context {
                    entry.insert("context".into(), json!(context));
                }
                if let Some(message) = outcome.error_message() {
                    entry.insert("error".into(), json!(message));
                }
                JsonValue::Object(entry)
            })
            .collect();

        let mut response = Map::new();
        response.insert("results".into(), JsonValue::Array(operations));
        response.insert("summary".into(), json!(result.summary));
        insert_context(&mut response, result.context.as_deref());
        JsonValue::Object(response)
    }

    fn value(&self, result: &BatchResult) -> JsonValue {
        let mut response = Map::new();
        let mut errors = Map::new();

        for outcome in &result.outcomes {
            match &outcome.payload {
                Some(payload) if outcome.is_succeeded() => {
                    if self.is_selected(&outcome.id) {
                        response.insert(outcome.id.clone(), value_of(payload));
                    }
                }
                _ => {
                    if let Some(message) = outcome.error_message() {
                        errors.insert(outcome.id.clone(), json!(message));
                    }
                }
            }
        }

        response.insert("summary".into(), json!(result.summary));
        if !errors.is_empty() {
            response.insert("errors".into(), JsonValue::Object(errors));
        }
        insert_context(&mut response, result.context.as_deref());
        JsonValue::Object(response)
    }

    fn final_value(&self, result: &BatchResult) -> JsonValue {
        if result.has_failures() {
            debug!("Final output requested for a batch with failures, using minimal");
            return self.minimal(result);
        }
        if !is_linear_chain(&result.dependency_levels) {
            debug!("Final output requested for a non-linear batch, using value");
            return self.value(result);
        }

        let terminal = result
            .dependency_levels
            .last()
            .and_then(|level| level.first())
            .and_then(|id| result.get(id))
            .and_then(|outcome| outcome.payload.as_ref());

        match terminal {
            Some(payload) => {
                let mut response = Map::new();
                response.insert("result".into(), value_of(payload));
                response.insert("summary".into(), json!(result.summary));
                insert_context(&mut response, result.context.as_deref());
                JsonValue::Object(response)
            }
            None => self.value(result),
        }
    }
}

/// The universal-accessor value of a payload, or the whole payload if it has none.
fn value_of(payload: &JsonValue) -> JsonValue {
    primary_value(payload).unwrap_or(payload).clone()
}

fn insert_context(object: &mut Map<String, JsonValue>, context: Option<&str>) {
    if let Some(context) = context {
        object.insert("context".into(), json!(context));
    }
}

/// Adds `context` to an object payload. Non-object payloads are wrapped as
/// `{"result": payload}` first. With `keep_null`, a missing context is
/// written as `null`.
fn with_context(payload: JsonValue, context: Option<&str>, keep_null: bool) -> JsonValue {
    let mut object = match payload {
        JsonValue::Object(object) => object,
        other => {
            let mut object = Map::new();
            object.insert("result".into(), other);
            object
        }
    };
    match context {
        Some(context) => {
            object.insert("context".into(), json!(context));
        }
        None if keep_null => {
            object.entry("context").or_insert(JsonValue::Null);
        }
        None => {}
    }
    JsonValue::Object(object)
}

/// Removes `null` object fields, recursively. Nulls inside arrays are kept.
pub fn strip_nulls(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(object) => JsonValue::Object(
            object
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}
