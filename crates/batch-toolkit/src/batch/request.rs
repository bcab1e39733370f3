//! Batch request surface: operation descriptors and execution/output modes.

use crate::error::BatchError;
#[cfg(feature = "schema")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use strum_macros::{Display, EnumString};

/// One requested step of a batch.
///
/// # Examples
///
/// ```ignore
/// use batch_toolkit::batch::OperationDescriptor;
/// use serde_json::json;
///
/// let op = OperationDescriptor::new("calc2", "calculate")
///     .with_arguments(json!({ "expression": "x * 2", "variables": { "x": "$calc1.result" } }))
///     .depends_on(["calc1"])
///     .with_context("doubling");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct OperationDescriptor {
    /// Unique id within the batch. Generated when omitted.
    #[serde(default = "generate_operation_id")]
    pub id: String,

    /// Name of the registered capability to invoke.
    #[serde(alias = "tool")]
    pub capability: String,

    /// Argument object; string leaves may be reference expressions.
    #[serde(default = "empty_object")]
    pub arguments: JsonValue,

    /// Opaque label passed through to the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Human-readable label passed through to the outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Explicit dependencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Object deep-merged over `arguments` before references are resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_mapping: Option<JsonValue>,

    /// Per-operation timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Map::new())
}

/// Generates a random operation id of the form `op_<8 hex digits>`.
pub fn generate_operation_id() -> String {
    format!("op_{:08x}", rand::random::<u32>())
}

impl OperationDescriptor {
    /// Creates an operation with empty arguments and no dependencies.
    pub fn new(id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            arguments: empty_object(),
            context: None,
            label: None,
            depends_on: Vec::new(),
            result_mapping: None,
            timeout_ms: None,
        }
    }

    /// Sets the argument object.
    pub fn with_arguments(mut self, arguments: JsonValue) -> Self {
        self.arguments = arguments;
        self
    }

    /// Sets the pass-through context label.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Sets the human-readable label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Adds explicit dependencies.
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Sets the result mapping merged over the arguments.
    pub fn with_result_mapping(mut self, mapping: JsonValue) -> Self {
        self.result_mapping = Some(mapping);
        self
    }

    /// Sets the per-operation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Returns the per-operation timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Arguments with `result_mapping` deep-merged on top.
    pub fn effective_arguments(&self) -> JsonValue {
        let mut arguments = self.arguments.clone();
        if let Some(mapping) = &self.result_mapping {
            deep_merge(&mut arguments, mapping);
        }
        arguments
    }
}

/// Merges `overlay` into `base`; objects merge key by key, anything else replaces.
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// How the operations of a batch are scheduled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionMode {
    /// One at a time, in request order.
    Sequential,
    /// Everything at once, dependencies ignored.
    Parallel,
    /// Dependency waves, each wave concurrent.
    #[default]
    Auto,
}

/// Response shape produced by the output formatter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutputMode {
    /// Every outcome field, nulls included.
    #[default]
    Full,
    /// Nulls removed, rendered without whitespace.
    Compact,
    /// Primary values only, metadata stripped.
    Minimal,
    /// Flat id → value mapping plus the summary.
    Value,
    /// Terminal value of a linear chain plus the summary.
    Final,
}

/// A complete batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct BatchRequest {
    /// Operations in request order.
    pub operations: Vec<OperationDescriptor>,

    #[serde(default)]
    pub execution_mode: ExecutionMode,

    #[serde(default)]
    pub output_mode: OutputMode,

    /// Batch-level context echoed in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Restricts which operation ids appear in the formatted output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<Vec<String>>,

    /// Overrides the configured concurrency limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,

    /// Overrides the configured stop-on-error behavior.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_error: Option<bool>,
}

impl BatchRequest {
    /// Creates an `auto`/`full` request for the given operations.
    pub fn new(operations: Vec<OperationDescriptor>) -> Self {
        Self {
            operations,
            execution_mode: ExecutionMode::default(),
            output_mode: OutputMode::default(),
            context: None,
            extract: None,
            max_concurrent: None,
            stop_on_error: None,
        }
    }

    /// Parses a request from JSON.
    pub fn from_json(input: &str) -> Result<Self, BatchError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_extract<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extract = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max);
        self
    }

    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = Some(stop);
        self
    }
}
