//! Output mode tests
//!
//! These tests run real batches and check the response shapes produced for
//! each output mode.

use batch_toolkit::{
    BatchExecutor, BatchRequest, CapabilityRegistry, OperationDescriptor, OutputFormatter,
    OutputMode,
};
use serde_json::{Value as JsonValue, json};

fn executor() -> BatchExecutor {
    let mut registry = CapabilityRegistry::new();
    registry.register_fn("scale", |args: JsonValue| async move {
        let x = args["x"].as_f64().unwrap_or(0.0);
        Ok(json!({ "result": x * 2.0, "expression": "x * 2", "variables": null }))
    });
    registry.register_fn("describe", |_| async {
        Ok(json!({ "describe": { "mean": 2.5, "std": 1.29 }, "quartiles": { "Q1": 1.75 } }))
    });
    registry.register_fn("fail", |_| async {
        Err(batch_toolkit::CapabilityError::InvalidArguments(
            "division by zero".into(),
        ))
    });
    BatchExecutor::new(registry)
}

fn chain() -> Vec<OperationDescriptor> {
    vec![
        OperationDescriptor::new("a", "scale").with_arguments(json!({ "x": 1 })),
        OperationDescriptor::new("b", "scale").with_arguments(json!({ "x": "$a.value" })),
        OperationDescriptor::new("c", "scale").with_arguments(json!({ "x": "$b.value" })),
    ]
}

// ============================================================================
// Batch Output Modes
// ============================================================================

#[tokio::test]
async fn test_full_mode() {
    let response = executor()
        .run(&BatchRequest::new(chain()))
        .await
        .unwrap();

    let results = response["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[2]["payload"]["result"], 8.0);
    assert!(results[2]["payload"]["variables"].is_null());
    assert!(response["context"].is_null());
    assert_eq!(response["execution_mode"], "auto");
    assert_eq!(response["waves"], json!([["a"], ["b"], ["c"]]));
}

#[tokio::test]
async fn test_compact_mode_strips_nulls_and_whitespace() {
    let request = BatchRequest::new(chain()).with_output_mode(OutputMode::Compact);
    let response = executor().run(&request).await.unwrap();

    let first = response["results"][0].as_object().unwrap();
    assert!(!first.contains_key("failure"));
    assert!(!first.contains_key("skipped_due_to"));
    assert!(!response["results"][0]["payload"]
        .as_object()
        .unwrap()
        .contains_key("variables"));

    let rendered = OutputFormatter::new(OutputMode::Compact)
        .render(&response)
        .unwrap();
    assert!(!rendered.contains('\n'));

    let pretty = OutputFormatter::new(OutputMode::Full).render(&response).unwrap();
    assert!(pretty.contains('\n'));
    assert!(pretty.len() > rendered.len());
}

#[tokio::test]
async fn test_minimal_mode_reports_errors() {
    let request = BatchRequest::new(vec![
        OperationDescriptor::new("ok", "scale").with_arguments(json!({ "x": 3 })),
        OperationDescriptor::new("bad", "fail"),
        OperationDescriptor::new("after", "scale")
            .with_arguments(json!({ "x": "$bad.value" })),
    ])
    .with_output_mode(OutputMode::Minimal);

    let response = executor().run(&request).await.unwrap();
    let results = response["results"].as_array().unwrap();

    assert_eq!(
        results[0],
        json!({ "id": "ok", "status": "succeeded", "wave": 0, "value": 6.0 })
    );
    assert_eq!(results[1]["status"], "failed");
    assert!(results[1]["error"].as_str().unwrap().contains("division by zero"));
    assert_eq!(results[2]["status"], "skipped");
    assert_eq!(results[2]["wave"], 1);
    assert_eq!(response["summary"]["failed"], 1);
}

#[tokio::test]
async fn test_value_mode_uses_whole_payload_without_primary_value() {
    let request = BatchRequest::new(vec![
        OperationDescriptor::new("stats", "describe"),
        OperationDescriptor::new("double", "scale").with_arguments(json!({ "x": 4 })),
    ])
    .with_output_mode(OutputMode::Value);

    let response = executor().run(&request).await.unwrap();

    assert_eq!(response["stats"]["describe"]["mean"], 2.5);
    assert_eq!(response["double"], 8.0);
    assert_eq!(response.as_object().unwrap().len(), 3);
}

#[tokio::test]
async fn test_value_mode_errors_key() {
    let request = BatchRequest::new(vec![
        OperationDescriptor::new("ok", "scale").with_arguments(json!({ "x": 1 })),
        OperationDescriptor::new("bad", "fail"),
    ])
    .with_output_mode(OutputMode::Value)
    .with_context("run 7");

    let response = executor().run(&request).await.unwrap();

    assert_eq!(response["ok"], 2.0);
    assert!(response["errors"]["bad"].as_str().unwrap().contains("division by zero"));
    assert_eq!(response["context"], "run 7");
    assert!(response.get("bad").is_none());
}

#[tokio::test]
async fn test_final_mode_on_chain() {
    let request = BatchRequest::new(chain()).with_output_mode(OutputMode::Final);
    let response = executor().run(&request).await.unwrap();

    assert_eq!(response["result"], 8.0);
    assert_eq!(response["summary"]["num_waves"], 3);
    assert!(response.get("a").is_none());
}

#[tokio::test]
async fn test_final_mode_with_failure_uses_minimal() {
    let request = BatchRequest::new(vec![
        OperationDescriptor::new("bad", "fail"),
        OperationDescriptor::new("next", "scale").with_arguments(json!({ "x": "$bad.value" })),
    ])
    .with_output_mode(OutputMode::Final);

    let response = executor().run(&request).await.unwrap();
    assert!(response["results"].is_array());
    assert!(response.get("result").is_none());
}

#[tokio::test]
async fn test_extract_restricts_output() {
    let request = BatchRequest::new(chain())
        .with_output_mode(OutputMode::Value)
        .with_extract(["c"]);

    let response = executor().run(&request).await.unwrap();
    assert_eq!(response, json!({ "c": 8.0, "summary": response["summary"].clone() }));
}

// ============================================================================
// Single Invocation
// ============================================================================

#[tokio::test]
async fn test_invoke_single_output_modes() {
    let executor = executor();

    let full = executor
        .invoke_single("scale", json!({ "x": 5 }), Some("ten"), OutputMode::Full)
        .await
        .unwrap();
    assert_eq!(full["result"], 10.0);
    assert_eq!(full["context"], "ten");
    assert!(full["variables"].is_null());

    let value = executor
        .invoke_single("scale", json!({ "x": 5 }), None, OutputMode::Value)
        .await
        .unwrap();
    assert_eq!(value, json!({ "value": 10.0 }));

    let minimal = executor
        .invoke_single("describe", json!({}), None, OutputMode::Minimal)
        .await
        .unwrap();
    assert_eq!(minimal["quartiles"]["Q1"], 1.75);
}
