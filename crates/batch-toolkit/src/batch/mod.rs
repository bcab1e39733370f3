//! Batch execution of capabilities with dependency waves.
//!
//! This module validates a batch of operation descriptors, levels the
//! dependency graph into waves and executes each wave concurrently, resolving
//! `$id.path` references against the outcomes of earlier waves.

pub mod config;
pub mod dependency_analysis;
pub mod dependency_graph;
pub mod executor;
pub mod format;
pub mod primary;
pub mod reference;
pub mod request;
pub mod result_store;

pub use config::{BatchConfig, DEFAULT_MAX_OPERATIONS};
pub use dependency_analysis::{
    ExecutionPlan, RESERVED_IDS, build_execution_plan, validate_capabilities,
};
pub use dependency_graph::{DependencyGraph, is_linear_chain};
pub use executor::BatchExecutor;
pub use format::{OutputFormatter, strip_nulls};
pub use primary::{primary_field, primary_value};
pub use reference::{
    MissingReference, PathSegment, ReferenceExpr, ReferenceResolver, collect_references,
};
pub use request::{
    BatchRequest, ExecutionMode, OperationDescriptor, OutputMode, generate_operation_id,
};
pub use result_store::{
    BatchResult, BatchSummary, FailureKind, OperationFailure, OperationOutcome, OperationStatus,
    ResultStore,
};
