//! Reference expressions and their resolution against the result store.
//!
//! Grammar: `$<id>` optionally followed by any mix of `.field` and `[index]`
//! segments, e.g. `$calc1.result`, `$stats.metadata.count`, `$arr.values[1][0]`.
//! A string argument is a reference only when the whole string matches.

use super::primary::primary_value;
use super::result_store::{OperationStatus, ResultStore};
use crate::error::ReferenceError;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::sync::LazyLock;

/// The reserved universal accessor segment.
pub const UNIVERSAL_ACCESSOR: &str = "value";

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$([A-Za-z0-9_-]+)((?:\.[A-Za-z0-9_-]+|\[[0-9]+\])*)$")
        .expect("reference pattern is valid")
});

static SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.([A-Za-z0-9_-]+)|\[([0-9]+)\]").expect("segment pattern is valid")
});

/// One navigation step inside a referenced payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// A parsed reference expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceExpr {
    /// Referenced operation id.
    pub id: String,
    /// Navigation path, empty for a whole-payload reference.
    pub path: Vec<PathSegment>,
}

impl ReferenceExpr {
    /// Parses a string argument.
    ///
    /// Returns `Ok(None)` for strings that do not start with `$`, and
    /// `Err(InvalidSyntax)` for strings that start with `$` but do not follow
    /// the grammar.
    pub fn parse(input: &str) -> Result<Option<Self>, ReferenceError> {
        if !input.starts_with('$') {
            return Ok(None);
        }

        let invalid = || ReferenceError::InvalidSyntax {
            expression: input.to_string(),
        };
        let captures = REFERENCE_RE.captures(input).ok_or_else(invalid)?;
        let id = captures[1].to_string();
        let mut path = Vec::new();

        if let Some(raw_path) = captures.get(2) {
            for segment in SEGMENT_RE.captures_iter(raw_path.as_str()) {
                if let Some(field) = segment.get(1) {
                    path.push(PathSegment::Field(field.as_str().to_string()));
                } else if let Some(index) = segment.get(2) {
                    let index = index.as_str().parse::<usize>().map_err(|_| invalid())?;
                    path.push(PathSegment::Index(index));
                }
            }
        }

        Ok(Some(Self { id, path }))
    }

    /// Renders the path part (without the id), as used in error messages.
    pub fn path_string(&self) -> String {
        render_path(&self.path)
    }
}

impl fmt::Display for ReferenceExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.id)?;
        for segment in &self.path {
            match segment {
                PathSegment::Field(name) => write!(f, ".{}", name)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

fn render_path(path: &[PathSegment]) -> String {
    let mut rendered = String::new();
    for segment in path {
        match segment {
            PathSegment::Field(name) => {
                if !rendered.is_empty() {
                    rendered.push('.');
                }
                rendered.push_str(name);
            }
            PathSegment::Index(index) => rendered.push_str(&format!("[{}]", index)),
        }
    }
    rendered
}

/// Collects every reference expression found in `value`, recursively.
///
/// Malformed expressions are returned in the error position together with the
/// offending string.
pub fn collect_references(value: &JsonValue) -> Result<Vec<ReferenceExpr>, String> {
    let mut found = Vec::new();
    let mut stack = vec![value];

    while let Some(current) = stack.pop() {
        match current {
            JsonValue::String(text) => match ReferenceExpr::parse(text) {
                Ok(Some(expr)) => found.push(expr),
                Ok(None) => {}
                Err(_) => return Err(text.clone()),
            },
            JsonValue::Array(items) => stack.extend(items.iter().rev()),
            JsonValue::Object(map) => stack.extend(map.values().rev()),
            _ => {}
        }
    }

    Ok(found)
}

/// What an id missing from the store means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReference {
    /// The referenced operation has not produced a result: `Unresolved`.
    Unresolved,
    /// Sequential mode: the referenced operation runs later: `ForwardReference`.
    Forward,
}

/// Substitutes reference expressions with values from a result store.
///
/// # Examples
///
/// ```ignore
/// let resolver = ReferenceResolver::new(&store);
/// let args = resolver.resolve(&json!({"x": "$op1.result", "y": 3}))?;
/// ```
pub struct ReferenceResolver<'a> {
    store: &'a ResultStore,
    missing: MissingReference,
}

impl<'a> ReferenceResolver<'a> {
    /// Resolver treating absent ids as unresolved.
    pub fn new(store: &'a ResultStore) -> Self {
        Self {
            store,
            missing: MissingReference::Unresolved,
        }
    }

    /// Resolver with an explicit policy for absent ids.
    pub fn with_missing(store: &'a ResultStore, missing: MissingReference) -> Self {
        Self { store, missing }
    }

    /// Resolves every string leaf of `arguments`; other leaves pass through.
    pub fn resolve(&self, arguments: &JsonValue) -> Result<JsonValue, ReferenceError> {
        match arguments {
            JsonValue::String(text) => match ReferenceExpr::parse(text)? {
                Some(expr) => self.resolve_expression(&expr),
                None => Ok(arguments.clone()),
            },
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            JsonValue::Object(map) => {
                let mut resolved = Map::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(key.clone(), self.resolve(value)?);
                }
                Ok(JsonValue::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// Resolves a single parsed expression.
    pub fn resolve_expression(&self, expr: &ReferenceExpr) -> Result<JsonValue, ReferenceError> {
        let Some(outcome) = self.store.get(&expr.id) else {
            return Err(match self.missing {
                MissingReference::Unresolved => ReferenceError::Unresolved {
                    id: expr.id.clone(),
                },
                MissingReference::Forward => ReferenceError::ForwardReference {
                    id: expr.id.clone(),
                },
            });
        };

        let payload = match (&outcome.status, &outcome.payload) {
            (OperationStatus::Succeeded, Some(payload)) => payload,
            _ => {
                return Err(ReferenceError::Unresolved {
                    id: expr.id.clone(),
                });
            }
        };

        let mut current = payload;
        for (depth, segment) in expr.path.iter().enumerate() {
            let not_found = || ReferenceError::PathNotFound {
                id: expr.id.clone(),
                path: render_path(&expr.path[..=depth]),
            };

            current = match segment {
                PathSegment::Field(name) if name == UNIVERSAL_ACCESSOR => primary_value(current)
                    .ok_or_else(|| ReferenceError::NoPrimaryValue {
                        id: expr.id.clone(),
                    })?,
                PathSegment::Field(name) => current.get(name.as_str()).ok_or_else(not_found)?,
                PathSegment::Index(index) => current
                    .as_array()
                    .and_then(|items| items.get(*index))
                    .ok_or_else(not_found)?,
            };
        }

        Ok(current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::request::OperationDescriptor;
    use crate::batch::result_store::{OperationFailure, OperationOutcome};
    use serde_json::json;
    use std::time::Duration;

    fn store_with(entries: &[(&str, JsonValue)]) -> ResultStore {
        let mut store = ResultStore::new();
        for (id, payload) in entries {
            let op = OperationDescriptor::new(*id, "calc");
            store.record(OperationOutcome::succeeded(
                &op,
                0,
                Vec::new(),
                payload.clone(),
                Duration::ZERO,
            ));
        }
        store
    }

    #[test]
    fn test_parse_plain_string_is_not_a_reference() {
        assert_eq!(ReferenceExpr::parse("10 + 5").unwrap(), None);
        assert_eq!(ReferenceExpr::parse("").unwrap(), None);
    }

    #[test]
    fn test_parse_whole_payload_reference() {
        let expr = ReferenceExpr::parse("$op1").unwrap().unwrap();
        assert_eq!(expr.id, "op1");
        assert!(expr.path.is_empty());
    }

    #[test]
    fn test_parse_mixed_path() {
        let expr = ReferenceExpr::parse("$op1.values[1][0]").unwrap().unwrap();
        assert_eq!(
            expr.path,
            vec![
                PathSegment::Field("values".into()),
                PathSegment::Index(1),
                PathSegment::Index(0)
            ]
        );
        assert_eq!(expr.to_string(), "$op1.values[1][0]");
        assert_eq!(expr.path_string(), "values[1][0]");
    }

    #[test]
    fn test_parse_invalid_syntax() {
        for input in ["$", "$ op1.result", "$op1.", "$op1[x]", "$op1..a"] {
            let err = ReferenceExpr::parse(input).unwrap_err();
            assert!(
                matches!(err, ReferenceError::InvalidSyntax { .. }),
                "expected invalid syntax for {input}"
            );
        }
    }

    #[test]
    fn test_collect_references_recursively() {
        let args = json!({
            "expression": "x + y",
            "variables": {"x": "$a.result", "y": ["$b", 3, {"z": "$c.values[0]"}]}
        });
        let ids: Vec<String> = collect_references(&args)
            .unwrap()
            .into_iter()
            .map(|expr| expr.id)
            .collect();
        assert_eq!(ids.len(), 3);
        for id in ["a", "b", "c"] {
            assert!(ids.contains(&id.to_string()));
        }
    }

    #[test]
    fn test_collect_references_reports_malformed() {
        let args = json!({"x": ["$ bad"]});
        assert_eq!(collect_references(&args).unwrap_err(), "$ bad");
    }

    #[test]
    fn test_resolve_whole_payload() {
        let store = store_with(&[("op1", json!({"result": 42, "metadata": {"rate": 0.05}}))]);
        let resolver = ReferenceResolver::new(&store);

        assert_eq!(
            resolver.resolve(&json!("$op1")).unwrap(),
            json!({"result": 42, "metadata": {"rate": 0.05}})
        );
    }

    #[test]
    fn test_resolve_path_navigation() {
        let store = store_with(&[("op1", json!({"result": 42, "metadata": {"rate": 0.05}}))]);
        let resolver = ReferenceResolver::new(&store);

        assert_eq!(resolver.resolve(&json!("$op1.result")).unwrap(), json!(42));
        assert_eq!(
            resolver.resolve(&json!("$op1.metadata.rate")).unwrap(),
            json!(0.05)
        );
    }

    #[test]
    fn test_resolve_array_indexing() {
        let store = store_with(&[("op1", json!({"values": [[1, 2], [3, 4]]}))]);
        let resolver = ReferenceResolver::new(&store);

        assert_eq!(resolver.resolve(&json!("$op1.values[0]")).unwrap(), json!([1, 2]));
        assert_eq!(resolver.resolve(&json!("$op1.values[1][0]")).unwrap(), json!(3));
    }

    #[test]
    fn test_resolve_nested_arguments() {
        let store = store_with(&[
            ("op1", json!({"result": 10})),
            ("op2", json!({"result": {"nested": {"value": 42}}})),
        ]);
        let resolver = ReferenceResolver::new(&store);

        let resolved = resolver
            .resolve(&json!({
                "variables": {"x": "$op1.result", "y": "$op2.result.nested.value"},
                "list": ["$op1.result", 30, true, null]
            }))
            .unwrap();
        assert_eq!(
            resolved,
            json!({"variables": {"x": 10, "y": 42}, "list": [10, 30, true, null]})
        );
    }

    #[test]
    fn test_universal_accessor_matches_result_field() {
        let store = store_with(&[("x", json!({"result": 5}))]);
        let resolver = ReferenceResolver::new(&store);

        assert_eq!(resolver.resolve(&json!("$x.result")).unwrap(), json!(5));
        assert_eq!(resolver.resolve(&json!("$x.value")).unwrap(), json!(5));
    }

    #[test]
    fn test_universal_accessor_without_primary_value() {
        let store = store_with(&[("stats", json!({"describe": {"mean": 1}, "quartiles": {}}))]);
        let resolver = ReferenceResolver::new(&store);

        assert_eq!(
            resolver.resolve(&json!("$stats.value")).unwrap_err(),
            ReferenceError::NoPrimaryValue {
                id: "stats".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_operation_is_unresolved() {
        let store = store_with(&[("op1", json!({"result": 42}))]);
        let resolver = ReferenceResolver::new(&store);

        let err = resolver.resolve(&json!("$op2.result")).unwrap_err();
        assert_eq!(
            err,
            ReferenceError::Unresolved {
                id: "op2".to_string()
            }
        );
        assert!(err.to_string().contains("unknown operation 'op2'"));
    }

    #[test]
    fn test_unknown_operation_in_sequential_mode_is_forward_reference() {
        let store = ResultStore::new();
        let resolver = ReferenceResolver::with_missing(&store, MissingReference::Forward);

        assert_eq!(
            resolver.resolve(&json!("$later")).unwrap_err(),
            ReferenceError::ForwardReference {
                id: "later".to_string()
            }
        );
    }

    #[test]
    fn test_failed_operation_is_unresolved() {
        let mut store = ResultStore::new();
        let op = OperationDescriptor::new("bad", "calc");
        store.record(OperationOutcome::failed(
            &op,
            0,
            Vec::new(),
            OperationFailure::cancelled(),
            Duration::ZERO,
        ));
        let resolver = ReferenceResolver::new(&store);

        assert!(matches!(
            resolver.resolve(&json!("$bad.value")).unwrap_err(),
            ReferenceError::Unresolved { id } if id == "bad"
        ));
    }

    #[test]
    fn test_path_not_found() {
        let store = store_with(&[("op1", json!({"result": 42, "values": [1]}))]);
        let resolver = ReferenceResolver::new(&store);

        let err = resolver.resolve(&json!("$op1.nonexistent")).unwrap_err();
        assert_eq!(
            err,
            ReferenceError::PathNotFound {
                id: "op1".to_string(),
                path: "nonexistent".to_string()
            }
        );
        assert!(err.to_string().contains("not found"));

        let err = resolver.resolve(&json!("$op1.values[3]")).unwrap_err();
        assert_eq!(
            err,
            ReferenceError::PathNotFound {
                id: "op1".to_string(),
                path: "values[3]".to_string()
            }
        );
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let store = store_with(&[("op1", json!({"values": [4, 5, 6]}))]);
        let resolver = ReferenceResolver::new(&store);
        let args = json!({"x": "$op1.values[2]", "y": "$op1.value"});

        let first = resolver.resolve(&args).unwrap();
        let second = resolver.resolve(&args).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, json!({"x": 6, "y": [4, 5, 6]}));
    }

    #[test]
    fn test_non_reference_strings_pass_through() {
        let store = ResultStore::new();
        let resolver = ReferenceResolver::new(&store);

        assert_eq!(
            resolver.resolve(&json!({"expression": "2 + 2"})).unwrap(),
            json!({"expression": "2 + 2"})
        );
    }
}
