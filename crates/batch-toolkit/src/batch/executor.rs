//! Wave-based batch execution.
//!
//! The executor validates a request, levels it into waves and runs each wave
//! as a fan-out of tokio tasks followed by a full barrier. Outcomes are merged
//! into the result store by the coordinating task only, so concurrently
//! running operations never write shared state.

use super::config::BatchConfig;
use super::dependency_analysis::{ExecutionPlan, build_execution_plan, validate_capabilities};
use super::format::OutputFormatter;
use super::reference::{MissingReference, ReferenceResolver};
use super::request::{BatchRequest, ExecutionMode, OperationDescriptor, OutputMode};
use super::result_store::{
    BatchResult, BatchSummary, OperationFailure, OperationOutcome, ResultStore,
};
use crate::capability::{Capability, CapabilityRegistry};
use crate::error::{BatchError, CapabilityError};
use futures::future::join_all;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// A point in time together with the budget that produced it.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn after(start: Instant, budget: Duration) -> Self {
        Self {
            at: start + budget,
            budget,
        }
    }

    fn earliest<I>(deadlines: I) -> Option<Self>
    where
        I: IntoIterator<Item = Option<Self>>,
    {
        deadlines.into_iter().flatten().min_by_key(|d| d.at)
    }

    fn has_passed(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Remembers the first failure of a batch when stop-on-error is enabled.
#[derive(Debug)]
struct StopSignal {
    enabled: bool,
    cause: OnceLock<String>,
}

impl StopSignal {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            cause: OnceLock::new(),
        }
    }

    fn trip(&self, id: &str) {
        if self.enabled {
            let _ = self.cause.set(id.to_string());
        }
    }

    fn cause(&self) -> Option<&str> {
        self.cause.get().map(String::as_str)
    }
}

/// Order in which ids are run, per execution mode.
struct Schedule {
    waves: Vec<Vec<String>>,
    wave_of: HashMap<String, usize>,
    missing: MissingReference,
}

impl Schedule {
    fn new(mode: ExecutionMode, plan: &ExecutionPlan, operations: &[OperationDescriptor]) -> Self {
        let ids = operations.iter().map(|op| op.id.clone());
        let (waves, missing) = match mode {
            ExecutionMode::Auto => (plan.waves.clone(), MissingReference::Unresolved),
            ExecutionMode::Parallel => (vec![ids.collect()], MissingReference::Unresolved),
            ExecutionMode::Sequential => (ids.map(|id| vec![id]).collect(), MissingReference::Forward),
        };

        let wave_of = waves
            .iter()
            .enumerate()
            .flat_map(|(index, wave): (usize, &Vec<String>)| {
                wave.iter().map(move |id| (id.clone(), index))
            })
            .collect();

        Self {
            waves,
            wave_of,
            missing,
        }
    }
}

/// State private to one running batch.
struct BatchRun<'a> {
    plan: &'a ExecutionPlan,
    operations: HashMap<&'a str, &'a OperationDescriptor>,
    store: Arc<ResultStore>,
    semaphore: Option<Arc<Semaphore>>,
    stop: Arc<StopSignal>,
    cancellation: CancellationToken,
    batch_deadline: Option<Deadline>,
}

enum TaskOutcome {
    Succeeded(JsonValue),
    Failed(OperationFailure),
    Skipped(String),
}

/// Everything a spawned operation needs, owned.
struct OperationTask {
    id: String,
    capability_name: String,
    capability: Option<Arc<dyn Capability>>,
    arguments: JsonValue,
    snapshot: Arc<ResultStore>,
    missing: MissingReference,
    semaphore: Option<Arc<Semaphore>>,
    stop: Arc<StopSignal>,
    cancellation: CancellationToken,
    /// Batch and wave deadlines; they also bound the wait for a permit.
    deadline: Option<Deadline>,
    /// The operation's own budget, started once it holds a permit.
    timeout: Option<Duration>,
}

impl OperationTask {
    async fn run(self) -> (TaskOutcome, Duration) {
        let started = Instant::now();
        let outcome = self.settle().await;
        (outcome, started.elapsed())
    }

    async fn settle(self) -> TaskOutcome {
        let resolver = ReferenceResolver::with_missing(&self.snapshot, self.missing);
        let arguments = match resolver.resolve(&self.arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                warn!(
                    operation_id = %self.id,
                    referenced = e.operation_id().unwrap_or_default(),
                    error = %e,
                    "Reference resolution failed"
                );
                self.stop.trip(&self.id);
                return TaskOutcome::Failed(OperationFailure::from_reference_error(e));
            }
        };

        let Some(capability) = self.capability.clone() else {
            self.stop.trip(&self.id);
            return TaskOutcome::Failed(OperationFailure::from_capability_error(
                &CapabilityError::NotFound(self.capability_name.clone()),
            ));
        };

        let invocation = async {
            let _permit = match &self.semaphore {
                Some(semaphore) => semaphore.acquire().await.ok(),
                None => None,
            };
            if let Some(cause) = self.stop.cause() {
                debug!(operation_id = %self.id, "Not dispatching after earlier failure");
                return TaskOutcome::Skipped(cause.to_string());
            }

            debug!(operation_id = %self.id, "Dispatching operation");
            let deadline = Deadline::earliest([
                self.deadline,
                self.timeout
                    .map(|timeout| Deadline::after(Instant::now(), timeout)),
            ]);
            let result = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline.at, capability.invoke(arguments)).await {
                        Ok(result) => result,
                        Err(_) => return self.timed_out(deadline),
                    }
                }
                None => capability.invoke(arguments).await,
            };

            match result {
                Ok(payload) => TaskOutcome::Succeeded(payload),
                Err(e) => {
                    warn!(
                        operation_id = %self.id,
                        input_error = e.is_input_error(),
                        error = %e,
                        "Capability failed"
                    );
                    TaskOutcome::Failed(OperationFailure::from_capability_error(&e))
                }
            }
        };

        let outcome = match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => self.cancelled(),
                result = tokio::time::timeout_at(deadline.at, invocation) => {
                    result.unwrap_or_else(|_| self.timed_out(deadline))
                }
            },
            None => tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => self.cancelled(),
                outcome = invocation => outcome,
            },
        };

        if matches!(outcome, TaskOutcome::Failed(_)) {
            self.stop.trip(&self.id);
        }
        outcome
    }

    fn timed_out(&self, deadline: Deadline) -> TaskOutcome {
        warn!(
            operation_id = %self.id,
            timeout = ?deadline.budget,
            "Operation timed out"
        );
        TaskOutcome::Failed(OperationFailure::timeout(deadline.budget))
    }

    fn cancelled(&self) -> TaskOutcome {
        warn!(operation_id = %self.id, "Operation cancelled");
        TaskOutcome::Failed(OperationFailure::cancelled())
    }
}

/// Runs batches of capability invocations.
///
/// # Examples
///
/// ```ignore
/// use batch_toolkit::batch::{BatchExecutor, BatchRequest, OperationDescriptor};
/// use batch_toolkit::capability::CapabilityRegistry;
/// use serde_json::json;
///
/// let mut registry = CapabilityRegistry::new();
/// registry.register_fn("double", |args| async move {
///     Ok(json!({ "result": args["x"].as_f64().unwrap_or(0.0) * 2.0 }))
/// });
///
/// let executor = BatchExecutor::new(registry);
/// let request = BatchRequest::new(vec![
///     OperationDescriptor::new("a", "double").with_arguments(json!({ "x": 2 })),
///     OperationDescriptor::new("b", "double").with_arguments(json!({ "x": "$a.value" })),
/// ]);
/// let result = executor.execute(&request).await?;
/// assert_eq!(result.summary.num_waves, 2);
/// ```
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    registry: Arc<CapabilityRegistry>,
    config: BatchConfig,
}

impl BatchExecutor {
    /// Creates an executor with the default configuration.
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self::with_config(registry, BatchConfig::default())
    }

    /// Creates an executor with an explicit configuration.
    pub fn with_config(registry: CapabilityRegistry, config: BatchConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
        }
    }

    /// The capabilities this executor dispatches to.
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// The execution configuration in effect.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Executes a batch.
    ///
    /// Only validation problems produce `Err`; once the batch is valid every
    /// operation ends up in the returned result with a terminal status.
    pub async fn execute(&self, request: &BatchRequest) -> Result<BatchResult, BatchError> {
        self.execute_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Executes a batch and shapes the result according to the request's
    /// output mode and extract filter.
    pub async fn run(&self, request: &BatchRequest) -> Result<JsonValue, BatchError> {
        let result = self.execute(request).await?;
        let mut formatter = OutputFormatter::new(request.output_mode);
        if let Some(ids) = &request.extract {
            formatter = formatter.with_extract(ids.iter().cloned());
        }
        Ok(formatter.format_batch(&result))
    }

    /// Invokes one capability directly, without references or scheduling,
    /// and shapes its payload with `output_mode`.
    pub async fn invoke_single(
        &self,
        capability: &str,
        arguments: JsonValue,
        context: Option<&str>,
        output_mode: OutputMode,
    ) -> Result<JsonValue, CapabilityError> {
        let payload = self
            .registry
            .invoke(capability, arguments)
            .instrument(info_span!("invoke_single", capability = %capability))
            .await?;
        Ok(OutputFormatter::new(output_mode).format_single(&payload, context))
    }

    /// Executes a batch, stopping outstanding operations when `cancellation`
    /// is triggered.
    ///
    /// Cancelled operations are recorded as failed with a cancellation detail;
    /// outcomes recorded before the cancellation are kept.
    pub async fn execute_with_cancellation(
        &self,
        request: &BatchRequest,
        cancellation: CancellationToken,
    ) -> Result<BatchResult, BatchError> {
        let operations = &request.operations;
        let mode = request.execution_mode;

        async move {
            let plan = build_execution_plan(operations, self.config.max_operations)?;
            validate_capabilities(operations, &self.registry)?;

            let started = Instant::now();
            let schedule = Schedule::new(mode, &plan, operations);
            let max_concurrent = request.max_concurrent.or(self.config.max_concurrent);
            let stop_on_error = request.stop_on_error.unwrap_or(self.config.stop_on_error);

            info!(
                "Starting batch: {} operations in {} waves",
                operations.len(),
                schedule.waves.len()
            );

            let mut run = BatchRun {
                plan: &plan,
                operations: operations.iter().map(|op| (op.id.as_str(), op)).collect(),
                store: Arc::new(ResultStore::new()),
                semaphore: max_concurrent.map(|max| Arc::new(Semaphore::new(max.max(1)))),
                stop: Arc::new(StopSignal::new(stop_on_error)),
                cancellation,
                batch_deadline: self
                    .config
                    .batch_timeout
                    .map(|timeout| Deadline::after(started, timeout)),
            };

            for (index, wave) in schedule.waves.iter().enumerate() {
                let wave_span = info_span!("wave", wave = index, operations = wave.len());
                self.execute_wave(&mut run, &schedule, index, wave)
                    .instrument(wave_span)
                    .await;
            }

            let ids: Vec<String> = operations.iter().map(|op| op.id.clone()).collect();
            let store = Arc::try_unwrap(run.store).unwrap_or_else(|shared| (*shared).clone());
            let outcomes = store.into_ordered(&ids);
            let summary = BatchSummary::from_outcomes(&outcomes, schedule.waves.len(), started.elapsed());

            info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                "Batch finished"
            );

            Ok::<_, BatchError>(BatchResult {
                outcomes,
                summary,
                waves: schedule.waves,
                dependency_levels: plan.waves.clone(),
                context: request.context.clone(),
                execution_mode: mode,
            })
        }
        .instrument(info_span!(
            "batch_execute",
            mode = %mode,
            operations = operations.len(),
        ))
        .await
    }

    /// Runs one wave: fan-out, barrier, merge, cascade.
    async fn execute_wave(
        &self,
        run: &mut BatchRun<'_>,
        schedule: &Schedule,
        index: usize,
        ids: &[String],
    ) {
        let wave_deadline = self
            .config
            .wave_timeout
            .map(|timeout| Deadline::after(Instant::now(), timeout));

        let mut settled = Vec::new();
        let mut pending = Vec::new();
        let mut handles = Vec::new();

        for id in ids {
            if run.store.contains(id) {
                continue;
            }
            let Some(op) = run.operations.get(id.as_str()).copied() else {
                continue;
            };
            let dependencies = run.plan.dependencies_of(id);

            if let Some(outcome) = Self::settle_before_dispatch(run, op, index, &dependencies) {
                settled.push(outcome);
                continue;
            }

            let task = OperationTask {
                id: op.id.clone(),
                capability_name: op.capability.clone(),
                capability: self.registry.get(&op.capability),
                arguments: op.effective_arguments(),
                snapshot: Arc::clone(&run.store),
                missing: schedule.missing,
                semaphore: run.semaphore.clone(),
                stop: Arc::clone(&run.stop),
                cancellation: run.cancellation.clone(),
                deadline: Deadline::earliest([run.batch_deadline, wave_deadline]),
                timeout: op.timeout(),
            };
            let span = info_span!(
                "operation",
                operation_id = %op.id,
                capability = %op.capability,
            );
            handles.push(tokio::spawn(task.run().instrument(span)));
            pending.push((op, dependencies));
        }

        info!(
            "Executing wave {} with {} operations",
            index,
            handles.len()
        );

        let results = join_all(handles).await;
        let store = Arc::make_mut(&mut run.store);
        let mut failed = Vec::new();

        for outcome in settled {
            if outcome.is_failed() {
                failed.push(outcome.id.clone());
            }
            store.record(outcome);
        }

        for ((op, dependencies), joined) in pending.into_iter().zip(results) {
            let outcome = match joined {
                Ok((TaskOutcome::Succeeded(payload), elapsed)) => {
                    debug!(operation_id = %op.id, "Operation succeeded");
                    OperationOutcome::succeeded(op, index, dependencies, payload, elapsed)
                }
                Ok((TaskOutcome::Failed(failure), elapsed)) => {
                    failed.push(op.id.clone());
                    OperationOutcome::failed(op, index, dependencies, failure, elapsed)
                }
                Ok((TaskOutcome::Skipped(cause), _)) => {
                    OperationOutcome::skipped(op, index, dependencies, cause)
                }
                Err(join_error) => {
                    warn!(operation_id = %op.id, error = %join_error, "Operation task panicked");
                    run.stop.trip(&op.id);
                    failed.push(op.id.clone());
                    OperationOutcome::failed(
                        op,
                        index,
                        dependencies,
                        OperationFailure::panicked(join_error),
                        Duration::ZERO,
                    )
                }
            };
            store.record(outcome);
        }

        for root in &failed {
            Self::cascade_skipped(store, run.plan, &run.operations, schedule, root);
        }

        info!("Wave {} finished ({} failed)", index, failed.len());
    }

    /// Outcome for an operation that must not be dispatched at all.
    fn settle_before_dispatch(
        run: &BatchRun<'_>,
        op: &OperationDescriptor,
        wave: usize,
        dependencies: &[String],
    ) -> Option<OperationOutcome> {
        let failure = if run.cancellation.is_cancelled() {
            Some(OperationFailure::cancelled())
        } else {
            run.batch_deadline
                .filter(Deadline::has_passed)
                .map(|deadline| OperationFailure::timeout(deadline.budget))
        };

        if let Some(failure) = failure {
            warn!(operation_id = %op.id, error = %failure, "Operation not started");
            run.stop.trip(&op.id);
            return Some(OperationOutcome::failed(
                op,
                wave,
                dependencies.to_vec(),
                failure,
                Duration::ZERO,
            ));
        }

        run.stop.cause().map(|cause| {
            debug!(operation_id = %op.id, cause = %cause, "Skipping after earlier failure");
            OperationOutcome::skipped(op, wave, dependencies.to_vec(), cause)
        })
    }

    /// Records every not-yet-settled transitive dependent of `root` as skipped.
    fn cascade_skipped(
        store: &mut ResultStore,
        plan: &ExecutionPlan,
        operations: &HashMap<&str, &OperationDescriptor>,
        schedule: &Schedule,
        root: &str,
    ) {
        for dependent in plan.graph.transitive_dependents(root) {
            if store.contains(&dependent) {
                continue;
            }
            let Some(op) = operations.get(dependent.as_str()).copied() else {
                continue;
            };
            let wave = schedule.wave_of.get(&dependent).copied().unwrap_or_default();

            warn!(
                operation_id = %dependent,
                failed_dependency = %root,
                "Operation skipped because a dependency failed"
            );
            store.record(OperationOutcome::skipped(
                op,
                wave,
                plan.dependencies_of(&dependent),
                root,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ops(ids: &[&str]) -> Vec<OperationDescriptor> {
        ids.iter()
            .map(|id| OperationDescriptor::new(*id, "calc"))
            .collect()
    }

    #[test]
    fn test_earliest_deadline_wins() {
        let now = Instant::now();
        let long = Deadline::after(now, Duration::from_secs(10));
        let short = Deadline::after(now, Duration::from_millis(50));

        let earliest = Deadline::earliest([Some(long), None, Some(short)]).unwrap();
        assert_eq!(earliest.budget, Duration::from_millis(50));
        assert!(Deadline::earliest([None, None]).is_none());
    }

    #[test]
    fn test_stop_signal_keeps_first_cause() {
        let signal = StopSignal::new(true);
        assert!(signal.cause().is_none());
        signal.trip("a");
        signal.trip("b");
        assert_eq!(signal.cause(), Some("a"));

        let disabled = StopSignal::new(false);
        disabled.trip("a");
        assert!(disabled.cause().is_none());
    }

    #[test]
    fn test_schedule_per_mode() {
        let operations = vec![
            OperationDescriptor::new("a", "calc"),
            OperationDescriptor::new("b", "calc").with_arguments(json!({"x": "$a.value"})),
            OperationDescriptor::new("c", "calc"),
        ];
        let plan = build_execution_plan(&operations, 100).unwrap();

        let auto = Schedule::new(ExecutionMode::Auto, &plan, &operations);
        assert_eq!(auto.waves, vec![vec!["a", "c"], vec!["b"]]);
        assert_eq!(auto.wave_of["b"], 1);
        assert_eq!(auto.missing, MissingReference::Unresolved);

        let parallel = Schedule::new(ExecutionMode::Parallel, &plan, &operations);
        assert_eq!(parallel.waves, vec![vec!["a", "b", "c"]]);

        let sequential = Schedule::new(ExecutionMode::Sequential, &plan, &operations);
        assert_eq!(sequential.waves, vec![vec!["a"], vec!["b"], vec!["c"]]);
        assert_eq!(sequential.wave_of["c"], 2);
        assert_eq!(sequential.missing, MissingReference::Forward);
    }

    #[tokio::test]
    async fn test_unknown_capability_is_rejected() {
        let executor = BatchExecutor::new(CapabilityRegistry::new());
        let err = executor
            .execute(&BatchRequest::new(ops(&["a"])))
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_validation(),
            Some(crate::error::ValidationError::UnknownCapability { .. })
        ));
    }

    #[tokio::test]
    async fn test_invoke_single_formats_payload() {
        let mut registry = CapabilityRegistry::new();
        registry.register_fn("calc", |_| async {
            Ok(json!({"result": 105.0, "expression": "100 * 1.05"}))
        });
        let executor = BatchExecutor::new(registry);

        let output = executor
            .invoke_single("calc", json!({}), Some("growth"), OutputMode::Minimal)
            .await
            .unwrap();
        assert_eq!(output, json!({"result": 105.0, "context": "growth"}));

        let err = executor
            .invoke_single("missing", json!({}), None, OutputMode::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::NotFound(_)));
    }
}
