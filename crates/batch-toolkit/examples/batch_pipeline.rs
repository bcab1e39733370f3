//! Batch pipeline example: a small pricing model run as one batch.
//!
//! This example shows how to:
//! - Register async and blocking capabilities
//! - Chain operations with `$id.path` references
//! - Pick an output mode for the response
//!
//! Run with: cargo run --example batch_pipeline
//! Set RUST_LOG=batch_toolkit=debug for per-operation logs.

use batch_toolkit::observability::{self, ObservabilityConfig};
use batch_toolkit::{
    BatchExecutor, BatchRequest, CapabilityError, CapabilityRegistry, OperationDescriptor,
    OutputFormatter, OutputMode,
};
use serde_json::{Value as JsonValue, json};

fn number(arguments: &JsonValue, key: &str) -> Result<f64, CapabilityError> {
    arguments[key]
        .as_f64()
        .ok_or_else(|| CapabilityError::InvalidArguments(format!("'{}' must be a number", key)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    observability::init(ObservabilityConfig::default())?;

    let mut registry = CapabilityRegistry::new();
    registry.register_fn("multiply", |args| async move {
        let product = number(&args, "a")? * number(&args, "b")?;
        Ok(json!({ "result": product, "operation": "multiply" }))
    });
    registry.register_blocking("compound", |args| {
        let principal = number(&args, "principal")?;
        let rate = number(&args, "rate")?;
        let years = number(&args, "years")?;
        let schedule: Vec<f64> = (1..=years as u32)
            .map(|year| principal * (1.0 + rate).powi(year as i32))
            .collect();
        Ok(json!({ "values": schedule, "metadata": { "rate": rate } }))
    });

    let executor = BatchExecutor::new(registry);
    let request = BatchRequest::new(vec![
        OperationDescriptor::new("revenue", "multiply")
            .with_arguments(json!({ "a": 1200, "b": 49.5 }))
            .with_context("units x price"),
        OperationDescriptor::new("margin", "multiply")
            .with_arguments(json!({ "a": "$revenue.value", "b": 0.35 })),
        OperationDescriptor::new("projection", "compound").with_arguments(json!({
            "principal": "$margin.result",
            "rate": 0.08,
            "years": 3
        })),
    ])
    .with_context("pricing model")
    .with_output_mode(OutputMode::Value);

    let response = executor.run(&request).await?;
    println!("{}", OutputFormatter::new(OutputMode::Value).render(&response)?);

    Ok(())
}
