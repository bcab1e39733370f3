//! 'batch-toolkit' - Dependency-aware batch execution of named capabilities.
//!
//! A caller registers capabilities (opaque async or blocking functions taking
//! and returning JSON) in a [`CapabilityRegistry`] and submits a
//! [`BatchRequest`]: a list of operations that may depend on each other
//! explicitly (`depends_on`) or implicitly, by referencing an earlier
//! operation's output with expressions such as `$calc1.result`,
//! `$stats.values[0]` or the universal accessor `$calc1.value`.
//!
//! The [`BatchExecutor`] validates the batch, groups the operations into
//! dependency waves, runs every wave concurrently on tokio and shapes the
//! outcomes with an [`OutputFormatter`].
//!
//! ```ignore
//! use batch_toolkit::{BatchExecutor, BatchRequest, CapabilityRegistry, OperationDescriptor};
//! use serde_json::json;
//!
//! let mut registry = CapabilityRegistry::new();
//! registry.register_fn("add", |args| async move {
//!     let a = args["a"].as_f64().unwrap_or(0.0);
//!     let b = args["b"].as_f64().unwrap_or(0.0);
//!     Ok(json!({ "result": a + b }))
//! });
//!
//! let request = BatchRequest::new(vec![
//!     OperationDescriptor::new("sum", "add").with_arguments(json!({ "a": 1, "b": 2 })),
//!     OperationDescriptor::new("total", "add").with_arguments(json!({ "a": "$sum.value", "b": 10 })),
//! ]);
//! let response = BatchExecutor::new(registry).run(&request).await?;
//! ```

pub mod batch;
pub mod capability;
pub mod error;
pub mod observability;

pub use batch::{
    BatchConfig, BatchExecutor, BatchRequest, BatchResult, BatchSummary, ExecutionMode,
    OperationDescriptor, OperationOutcome, OperationStatus, OutputFormatter, OutputMode,
};
pub use capability::{BlockingCapability, Capability, CapabilityRegistry, FnCapability};
pub use error::{BatchError, CapabilityError, ReferenceError, ValidationError};
