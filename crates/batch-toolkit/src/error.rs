//! Error types for batch operations.
//!
//! Only [`ValidationError`] (wrapped in [`BatchError`]) aborts a whole batch.
//! [`ReferenceError`] and [`CapabilityError`] are scoped to the single operation
//! that raised them and end up inline in that operation's outcome.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a batch before any capability is dispatched.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The batch failed structural validation.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The batch request could not be parsed.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl BatchError {
    /// Returns the validation error if this is one.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            BatchError::Validation(err) => Some(err),
            _ => None,
        }
    }
}

/// Structural problems detected while building the dependency graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The batch has no operations.
    #[error("Batch contains no operations")]
    EmptyBatch,

    /// The batch exceeds the configured operation limit.
    #[error("Batch contains {count} operations, the limit is {limit}")]
    TooManyOperations { count: usize, limit: usize },

    /// An operation has an empty id.
    #[error("Operation id must not be empty")]
    EmptyId,

    /// An operation id contains characters outside `[A-Za-z0-9_-]`.
    #[error("Operation id '{0}' contains invalid characters (allowed: letters, digits, '_' and '-')")]
    InvalidId(String),

    /// An operation id collides with a key of the `value` output shape.
    #[error("Operation id '{0}' is reserved")]
    ReservedId(String),

    /// Two operations share the same id.
    #[error("Duplicate operation id: {0}")]
    DuplicateId(String),

    /// A `depends_on` list names the same operation twice.
    #[error("Duplicate dependencies in operation '{operation}': '{dependency}'")]
    DuplicateDependency {
        operation: String,
        dependency: String,
    },

    /// Arguments (or the result mapping) of an operation are not a JSON object.
    #[error("Arguments of operation '{0}' must be a JSON object")]
    InvalidArguments(String),

    /// A string argument starts with `$` but is not a valid reference expression.
    #[error("Operation '{operation}' contains malformed reference '{expression}'")]
    MalformedReference {
        operation: String,
        expression: String,
    },

    /// An explicit or implicit dependency names an id absent from the batch.
    #[error("Operation '{operation}' depends on non-existent operation '{target}'")]
    UnknownReference { operation: String, target: String },

    /// An operation names a capability the registry does not know.
    #[error("Unknown capability '{capability}' in operation '{operation}'. Available capabilities: {available}")]
    UnknownCapability {
        operation: String,
        capability: String,
        available: String,
    },

    /// The dependency graph contains a cycle; the listed ids could not be ordered.
    #[error("Circular dependency detected among operations: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),
}

/// Failure to substitute a reference expression with a prior operation's output.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReferenceError {
    /// The referenced operation has no successful outcome in the result store.
    #[error("Reference to unknown operation '{id}' could not be resolved")]
    Unresolved { id: String },

    /// Navigating the referenced payload hit a missing field or index.
    #[error("Path '{path}' not found in result of operation '{id}'")]
    PathNotFound { id: String, path: String },

    /// The universal accessor found no unambiguous primary value.
    #[error("Result of operation '{id}' has no primary value")]
    NoPrimaryValue { id: String },

    /// Sequential mode: the referenced operation is listed later in the batch.
    #[error("Operation '{id}' is referenced before it has run")]
    ForwardReference { id: String },

    /// The expression does not follow the reference grammar.
    #[error("Invalid reference syntax: '{expression}'")]
    InvalidSyntax { expression: String },
}

impl ReferenceError {
    /// Returns the referenced operation id, if the error names one.
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            ReferenceError::Unresolved { id }
            | ReferenceError::PathNotFound { id, .. }
            | ReferenceError::NoPrimaryValue { id }
            | ReferenceError::ForwardReference { id } => Some(id),
            ReferenceError::InvalidSyntax { .. } => None,
        }
    }
}

/// Errors raised by a capability implementation.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// No capability with the given name is registered.
    #[error("No capability found with name: {0}")]
    NotFound(String),

    /// The capability rejected its arguments.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The capability ran but could not produce a result.
    #[error("Capability execution failed: {0}")]
    ExecutionFailed(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Any other error reported by the capability.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CapabilityError {
    /// Short, stable name of the error variant, reported in failure details.
    pub fn error_type(&self) -> &'static str {
        match self {
            CapabilityError::NotFound(_) => "NotFound",
            CapabilityError::InvalidArguments(_) => "InvalidArguments",
            CapabilityError::ExecutionFailed(_) => "ExecutionFailed",
            CapabilityError::JsonError(_) => "JsonError",
            CapabilityError::Other(_) => "Other",
        }
    }

    /// Returns true if the caller supplied bad input rather than the capability failing.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            CapabilityError::InvalidArguments(_) | CapabilityError::NotFound(_)
        )
    }
}
