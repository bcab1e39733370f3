//! Per-operation outcomes, the append-only result store and the batch summary.

use super::request::{ExecutionMode, OperationDescriptor};
use crate::error::{CapabilityError, ReferenceError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Terminal status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Why an operation failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    /// A reference expression in the arguments could not be resolved.
    Reference { error: ReferenceError },
    /// The capability returned an error.
    Capability { error_type: String },
    /// The effective deadline elapsed before the capability returned.
    Timeout { timeout_ms: u64 },
    /// The batch was cancelled while the operation was outstanding.
    Cancelled,
    /// The task running the capability panicked.
    Panicked,
}

/// A serializable failure record with the error kind preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub kind: FailureKind,
    /// Human readable error message.
    pub message: String,
}

impl OperationFailure {
    pub fn from_reference_error(error: ReferenceError) -> Self {
        Self {
            message: error.to_string(),
            kind: FailureKind::Reference { error },
        }
    }

    pub fn from_capability_error(error: &CapabilityError) -> Self {
        Self {
            kind: FailureKind::Capability {
                error_type: error.error_type().to_string(),
            },
            message: error.to_string(),
        }
    }

    pub fn timeout(budget: Duration) -> Self {
        let timeout_ms = budget.as_millis() as u64;
        Self {
            kind: FailureKind::Timeout { timeout_ms },
            message: format!("Operation timed out after {} ms", timeout_ms),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: "Operation was cancelled".to_string(),
        }
    }

    pub fn panicked(detail: impl fmt::Display) -> Self {
        Self {
            kind: FailureKind::Panicked,
            message: format!("Operation task panicked: {}", detail),
        }
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, FailureKind::Timeout { .. })
    }

    /// Returns true if this is a cancellation error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, FailureKind::Cancelled)
    }

    /// Returns true if the operation never reached its capability.
    pub fn is_reference_error(&self) -> bool {
        matches!(self.kind, FailureKind::Reference { .. })
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Serializes a [`Duration`] as fractional milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(millis.max(0.0) / 1000.0))
    }
}

/// Terminal record of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub id: String,
    pub capability: String,
    pub label: Option<String>,
    pub context: Option<String>,
    pub status: OperationStatus,
    /// Capability output, present only when succeeded.
    pub payload: Option<serde_json::Value>,
    /// Present only when failed.
    pub failure: Option<OperationFailure>,
    pub wave: usize,
    #[serde(rename = "elapsed_ms", with = "duration_ms")]
    pub elapsed: Duration,
    /// Dependency ids, in request order.
    pub dependencies: Vec<String>,
    /// The failed operation that caused this one to be skipped.
    pub skipped_due_to: Option<String>,
}

impl OperationOutcome {
    fn base(
        op: &OperationDescriptor,
        status: OperationStatus,
        wave: usize,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            id: op.id.clone(),
            capability: op.capability.clone(),
            label: op.label.clone(),
            context: op.context.clone(),
            status,
            payload: None,
            failure: None,
            wave,
            elapsed: Duration::ZERO,
            dependencies,
            skipped_due_to: None,
        }
    }

    pub fn succeeded(
        op: &OperationDescriptor,
        wave: usize,
        dependencies: Vec<String>,
        payload: serde_json::Value,
        elapsed: Duration,
    ) -> Self {
        Self {
            payload: Some(payload),
            elapsed,
            ..Self::base(op, OperationStatus::Succeeded, wave, dependencies)
        }
    }

    pub fn failed(
        op: &OperationDescriptor,
        wave: usize,
        dependencies: Vec<String>,
        failure: OperationFailure,
        elapsed: Duration,
    ) -> Self {
        Self {
            failure: Some(failure),
            elapsed,
            ..Self::base(op, OperationStatus::Failed, wave, dependencies)
        }
    }

    pub fn skipped(
        op: &OperationDescriptor,
        wave: usize,
        dependencies: Vec<String>,
        skipped_due_to: impl Into<String>,
    ) -> Self {
        Self {
            skipped_due_to: Some(skipped_due_to.into()),
            ..Self::base(op, OperationStatus::Skipped, wave, dependencies)
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == OperationStatus::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        self.status == OperationStatus::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.status == OperationStatus::Skipped
    }

    /// Error message for failed operations, or a short reason for skipped ones.
    pub fn error_message(&self) -> Option<String> {
        match self.status {
            OperationStatus::Succeeded => None,
            OperationStatus::Failed => self.failure.as_ref().map(|f| f.message.clone()),
            OperationStatus::Skipped => Some(match &self.skipped_due_to {
                Some(cause) => format!("Skipped because operation '{}' failed", cause),
                None => "Skipped".to_string(),
            }),
        }
    }
}

/// Outcomes recorded during one batch, keyed by operation id.
///
/// Append-only: once an id has an outcome it is never replaced.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    outcomes: HashMap<String, OperationOutcome>,
    order: Vec<String>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome. Returns false, leaving the store unchanged, if the
    /// id already has one.
    pub fn record(&mut self, outcome: OperationOutcome) -> bool {
        if self.outcomes.contains_key(&outcome.id) {
            log::warn!(
                "Refusing to overwrite recorded outcome of operation '{}'",
                outcome.id
            );
            return false;
        }
        self.order.push(outcome.id.clone());
        self.outcomes.insert(outcome.id.clone(), outcome);
        true
    }

    pub fn get(&self, id: &str) -> Option<&OperationOutcome> {
        self.outcomes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.outcomes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Returns true if any recorded operation failed.
    pub fn has_failures(&self) -> bool {
        self.outcomes.values().any(OperationOutcome::is_failed)
    }

    /// Outcomes in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.order.iter().filter_map(|id| self.outcomes.get(id))
    }

    /// Consumes the store and returns the outcomes ordered like `ids`.
    ///
    /// Ids without an outcome are left out.
    pub fn into_ordered(mut self, ids: &[String]) -> Vec<OperationOutcome> {
        ids.iter()
            .filter_map(|id| self.outcomes.remove(id))
            .collect()
    }
}

/// Counts and timing of a finished batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub num_waves: usize,
    pub elapsed_ms: f64,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[OperationOutcome], num_waves: usize, elapsed: Duration) -> Self {
        let count = |status: OperationStatus| outcomes.iter().filter(|o| o.status == status).count();
        Self {
            total: outcomes.len(),
            succeeded: count(OperationStatus::Succeeded),
            failed: count(OperationStatus::Failed),
            skipped: count(OperationStatus::Skipped),
            num_waves,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        }
    }
}

/// Everything a finished batch produced, before output shaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Outcomes in request order.
    pub outcomes: Vec<OperationOutcome>,
    pub summary: BatchSummary,
    /// Ids grouped by the wave they were reported in.
    pub waves: Vec<Vec<String>>,
    /// Ids grouped by dependency-graph level, independent of execution mode.
    pub dependency_levels: Vec<Vec<String>>,
    pub context: Option<String>,
    pub execution_mode: ExecutionMode,
}

impl BatchResult {
    pub fn get(&self, id: &str) -> Option<&OperationOutcome> {
        self.outcomes.iter().find(|outcome| outcome.id == id)
    }

    /// Returns true if no operation failed or was skipped.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(OperationOutcome::is_succeeded)
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(OperationOutcome::is_failed)
    }

    /// Failed operations with their failures.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &OperationFailure)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.failure.as_ref().map(|f| (o.id.as_str(), f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(id: &str) -> OperationDescriptor {
        OperationDescriptor::new(id, "calculate").with_context("ctx")
    }

    #[test]
    fn test_record_is_append_only() {
        let mut store = ResultStore::new();
        assert!(store.record(OperationOutcome::succeeded(
            &op("a"),
            0,
            vec![],
            json!({"result": 1}),
            Duration::ZERO
        )));
        assert!(!store.record(OperationOutcome::failed(
            &op("a"),
            0,
            vec![],
            OperationFailure::cancelled(),
            Duration::ZERO
        )));

        assert_eq!(store.len(), 1);
        assert!(store.get("a").unwrap().is_succeeded());
        assert!(!store.has_failures());
    }

    #[test]
    fn test_into_ordered_follows_request_order() {
        let mut store = ResultStore::new();
        for id in ["c", "a", "b"] {
            store.record(OperationOutcome::succeeded(
                &op(id),
                0,
                vec![],
                json!(1),
                Duration::ZERO,
            ));
        }
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let ordered: Vec<String> = store.into_ordered(&ids).into_iter().map(|o| o.id).collect();
        assert_eq!(ordered, ids);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = OperationOutcome::succeeded(
            &op("a"),
            2,
            vec!["x".into()],
            json!({"result": 5}),
            Duration::from_micros(1500),
        );
        let value = serde_json::to_value(&outcome).unwrap();

        assert_eq!(value["status"], "succeeded");
        assert_eq!(value["wave"], 2);
        assert_eq!(value["elapsed_ms"], 1.5);
        assert_eq!(value["context"], "ctx");
        assert!(value["failure"].is_null());
    }

    #[test]
    fn test_failure_kinds() {
        let failure = OperationFailure::timeout(Duration::from_millis(100));
        assert!(failure.is_timeout());
        assert_eq!(failure.to_string(), "Operation timed out after 100 ms");

        let failure = OperationFailure::from_capability_error(&CapabilityError::InvalidArguments(
            "division by zero".into(),
        ));
        assert_eq!(
            failure.kind,
            FailureKind::Capability {
                error_type: "InvalidArguments".into()
            }
        );
        assert!(failure.message.contains("division by zero"));

        let failure = OperationFailure::from_reference_error(ReferenceError::Unresolved {
            id: "a".into(),
        });
        assert!(failure.is_reference_error());
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["kind"]["type"], "reference");
        assert_eq!(value["kind"]["error"]["reason"], "unresolved");
    }

    #[test]
    fn test_skipped_error_message() {
        let outcome = OperationOutcome::skipped(&op("b"), 1, vec!["a".into()], "a");
        assert!(outcome.is_skipped());
        assert_eq!(
            outcome.error_message().unwrap(),
            "Skipped because operation 'a' failed"
        );
    }

    #[test]
    fn test_summary_counts() {
        let outcomes = vec![
            OperationOutcome::succeeded(&op("a"), 0, vec![], json!(1), Duration::ZERO),
            OperationOutcome::failed(
                &op("b"),
                0,
                vec![],
                OperationFailure::cancelled(),
                Duration::ZERO,
            ),
            OperationOutcome::skipped(&op("c"), 1, vec!["b".into()], "b"),
        ];
        let summary = BatchSummary::from_outcomes(&outcomes, 2, Duration::from_millis(3));

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.num_waves, 2);
        assert_eq!(summary.elapsed_ms, 3.0);
    }
}
