//! Dependency analysis for batch execution.
//!
//! Validates a list of operation descriptors and builds the execution plan:
//! the dependency graph (explicit `depends_on` edges plus edges implied by
//! reference expressions) and its leveling into waves.

use super::dependency_graph::DependencyGraph;
use super::reference::collect_references;
use super::request::OperationDescriptor;
use crate::capability::CapabilityRegistry;
use crate::error::ValidationError;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

/// Ids that collide with keys of the `value` output shape.
pub const RESERVED_IDS: &[&str] = &["summary", "errors", "context"];

/// A validated batch, ready for scheduling.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub graph: DependencyGraph,
    /// Dependency levels; wave `k` holds every id whose deepest dependency is in wave `k - 1`.
    pub waves: Vec<Vec<String>>,
    wave_of: HashMap<String, usize>,
}

impl ExecutionPlan {
    /// Wave index of `id` in the dependency leveling.
    pub fn wave_of(&self, id: &str) -> Option<usize> {
        self.wave_of.get(id).copied()
    }

    /// Dependencies of `id`, in request order.
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.graph.sorted_dependencies(id)
    }

    pub fn num_waves(&self) -> usize {
        self.waves.len()
    }
}

fn is_valid_id(id: &str) -> bool {
    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Returns the first violation of a validation phase, logging every one found.
fn first_violation(violations: Vec<ValidationError>) -> Result<(), ValidationError> {
    for violation in &violations {
        warn!("Batch validation: {}", violation);
    }
    match violations.into_iter().next() {
        Some(first) => Err(first),
        None => Ok(()),
    }
}

/// Checks batch size and operation ids.
fn validate_ids(
    operations: &[OperationDescriptor],
    max_operations: usize,
) -> Result<(), ValidationError> {
    if operations.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    if operations.len() > max_operations {
        return Err(ValidationError::TooManyOperations {
            count: operations.len(),
            limit: max_operations,
        });
    }

    let mut seen = HashSet::new();
    let mut violations = Vec::new();
    for op in operations {
        if op.id.is_empty() {
            violations.push(ValidationError::EmptyId);
        } else if !is_valid_id(&op.id) {
            violations.push(ValidationError::InvalidId(op.id.clone()));
        } else if RESERVED_IDS.contains(&op.id.as_str()) {
            violations.push(ValidationError::ReservedId(op.id.clone()));
        } else if !seen.insert(op.id.as_str()) {
            violations.push(ValidationError::DuplicateId(op.id.clone()));
        }
    }
    first_violation(violations)
}

/// Checks argument shapes, `depends_on` lists and reference syntax.
fn validate_operation_shapes(operations: &[OperationDescriptor]) -> Result<(), ValidationError> {
    let mut violations = Vec::new();

    for op in operations {
        let mapping_is_object = op.result_mapping.as_ref().is_none_or(|m| m.is_object());
        if !op.arguments.is_object() || !mapping_is_object {
            violations.push(ValidationError::InvalidArguments(op.id.clone()));
            continue;
        }

        let mut listed = HashSet::new();
        for dependency in &op.depends_on {
            if !listed.insert(dependency.as_str()) {
                violations.push(ValidationError::DuplicateDependency {
                    operation: op.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        if let Err(expression) = collect_references(&op.effective_arguments()) {
            violations.push(ValidationError::MalformedReference {
                operation: op.id.clone(),
                expression,
            });
        }
    }

    first_violation(violations)
}

/// Builds the execution plan for a batch.
///
/// Validation runs in phases and the first violation of the earliest failing
/// phase is returned:
///
/// 1. batch size, ids (empty, charset, reserved, duplicates)
/// 2. argument shapes, duplicate `depends_on` entries, malformed references
/// 3. dependency targets that are not in the batch
/// 4. cycles (Kahn's algorithm)
///
/// # Examples
///
/// ```ignore
/// let plan = build_execution_plan(&operations, DEFAULT_MAX_OPERATIONS)?;
/// for (index, wave) in plan.waves.iter().enumerate() {
///     println!("wave {}: {:?}", index, wave);
/// }
/// ```
pub fn build_execution_plan(
    operations: &[OperationDescriptor],
    max_operations: usize,
) -> Result<ExecutionPlan, ValidationError> {
    validate_ids(operations, max_operations)?;
    validate_operation_shapes(operations)?;

    let mut graph = DependencyGraph::new();
    for op in operations {
        graph.add_node(&op.id);
    }

    let mut violations = Vec::new();
    for op in operations {
        // Shapes were validated above, so every expression parses here.
        let implicit = collect_references(&op.effective_arguments()).unwrap_or_default();
        let targets = op
            .depends_on
            .iter()
            .cloned()
            .chain(implicit.into_iter().map(|expr| expr.id));

        for target in targets {
            if !graph.contains(&target) {
                violations.push(ValidationError::UnknownReference {
                    operation: op.id.clone(),
                    target,
                });
                continue;
            }
            graph.add_dependency(&op.id, &target);
        }
    }
    first_violation(violations)?;

    let waves = graph.topological_waves().map_err(|unordered| {
        warn!("Batch validation: cyclic dependency among {:?}", unordered);
        ValidationError::CyclicDependency(unordered)
    })?;

    let wave_of = waves
        .iter()
        .enumerate()
        .flat_map(|(index, wave)| wave.iter().map(move |id| (id.clone(), index)))
        .collect();

    debug!(
        "Built execution plan: {} operations in {} waves",
        graph.node_count(),
        waves.len()
    );

    Ok(ExecutionPlan {
        graph,
        waves,
        wave_of,
    })
}

/// Rejects operations naming a capability the registry does not know.
pub fn validate_capabilities(
    operations: &[OperationDescriptor],
    registry: &CapabilityRegistry,
) -> Result<(), ValidationError> {
    let violations = operations
        .iter()
        .filter(|op| !registry.contains(&op.capability))
        .map(|op| ValidationError::UnknownCapability {
            operation: op.id.clone(),
            capability: op.capability.clone(),
            available: registry.names().join(", "),
        })
        .collect();
    first_violation(violations)
}
