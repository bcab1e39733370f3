//! Capability definitions and the name-keyed registry.
//!
//! A capability is an opaque computational unit invoked by name with a JSON
//! argument object. The batch engine never looks inside a capability: it only
//! dispatches resolved arguments and records the JSON result or the error.

use crate::error::CapabilityError;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A single invocable unit of work.
///
/// Implementations must be `Send + Sync` because one instance is shared by
/// every concurrently running operation that names it.
///
/// # Examples
///
/// ```ignore
/// use batch_toolkit::{Capability, CapabilityError};
/// use serde_json::{json, Value};
///
/// struct Double;
///
/// #[async_trait::async_trait]
/// impl Capability for Double {
///     async fn invoke(&self, arguments: Value) -> Result<Value, CapabilityError> {
///         let x = arguments["x"]
///             .as_f64()
///             .ok_or_else(|| CapabilityError::InvalidArguments("x must be a number".into()))?;
///         Ok(json!({ "result": x * 2.0 }))
///     }
/// }
/// ```
#[async_trait]
pub trait Capability: Send + Sync {
    /// Runs the capability with fully resolved arguments.
    async fn invoke(&self, arguments: JsonValue) -> Result<JsonValue, CapabilityError>;

    /// Returns a natural language description of what this capability does.
    fn description(&self) -> &str {
        ""
    }
}

/// Adapter turning an async closure into a [`Capability`].
pub struct FnCapability<F> {
    func: F,
    description: String,
}

impl<F, Fut> FnCapability<F>
where
    F: Fn(JsonValue) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonValue, CapabilityError>> + Send + 'static,
{
    /// Wraps the given closure.
    pub fn new(func: F) -> Self {
        Self {
            func,
            description: String::new(),
        }
    }

    /// Sets the description reported by [`Capability::description`].
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl<F, Fut> Capability for FnCapability<F>
where
    F: Fn(JsonValue) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonValue, CapabilityError>> + Send + 'static,
{
    async fn invoke(&self, arguments: JsonValue) -> Result<JsonValue, CapabilityError> {
        (self.func)(arguments).await
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Adapter for CPU-heavy synchronous capabilities.
///
/// The closure runs on tokio's blocking thread pool so that dense numeric work
/// never stalls the runtime threads driving sibling operations.
pub struct BlockingCapability<F> {
    func: Arc<F>,
    description: String,
}

impl<F> BlockingCapability<F>
where
    F: Fn(JsonValue) -> Result<JsonValue, CapabilityError> + Send + Sync + 'static,
{
    /// Wraps the given synchronous closure.
    pub fn new(func: F) -> Self {
        Self {
            func: Arc::new(func),
            description: String::new(),
        }
    }

    /// Sets the description reported by [`Capability::description`].
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl<F> Capability for BlockingCapability<F>
where
    F: Fn(JsonValue) -> Result<JsonValue, CapabilityError> + Send + Sync + 'static,
{
    async fn invoke(&self, arguments: JsonValue) -> Result<JsonValue, CapabilityError> {
        let func = Arc::clone(&self.func);
        tokio::task::spawn_blocking(move || func(arguments))
            .await
            .map_err(|e| CapabilityError::ExecutionFailed(format!("blocking task failed: {}", e)))?
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Name-keyed lookup of capabilities.
///
/// # Examples
///
/// ```ignore
/// use batch_toolkit::capability::CapabilityRegistry;
/// use serde_json::json;
///
/// let mut registry = CapabilityRegistry::new();
/// registry.register_fn("echo", |args| async move { Ok(json!({ "result": args })) });
/// assert!(registry.contains("echo"));
/// ```
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    /// Registers a capability under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, capability: Arc<dyn Capability>) {
        self.capabilities.insert(name.into(), capability);
    }

    /// Registers an async closure as a capability.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(JsonValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JsonValue, CapabilityError>> + Send + 'static,
    {
        self.register(name, Arc::new(FnCapability::new(func)));
    }

    /// Registers a synchronous closure that runs on the blocking pool.
    pub fn register_blocking<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(JsonValue) -> Result<JsonValue, CapabilityError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(BlockingCapability::new(func)));
    }

    /// Returns the capability registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Returns all registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered capabilities.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Invokes the capability registered under `name`.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: JsonValue,
    ) -> Result<JsonValue, CapabilityError> {
        let capability = self
            .get(name)
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))?;
        capability.invoke(arguments).await
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.names())
            .finish()
    }
}
