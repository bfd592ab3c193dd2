//! Node executor protocol
//!
//! One executor exists per node kind. The engine resolves executors through
//! an [`ExecutorRegistry`](crate::ExecutorRegistry) built once at engine
//! construction and hands each invocation an owned [`NodeContext`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use panel_core::{ContextStore, Definition, Node, NodeKind, Result, ValidationIssue};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Read-only facts about the execution a node runs in
#[derive(Debug, Clone)]
pub struct ExecutionMeta {
    pub execution_id: String,
    pub definition_id: String,
    pub definition_version: u32,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
}

/// Everything a node invocation may read
///
/// The context is a snapshot taken when the node was scheduled; outputs flow
/// back through [`NodeExecutionResult`] and are merged by the engine.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub definition: Arc<Definition>,
    pub execution: ExecutionMeta,
    pub node: Node,
    pub context: Arc<ContextStore>,
}

impl NodeContext {
    /// Execution metadata as a JSON object
    pub fn meta_value(&self) -> Value {
        serde_json::json!({
            "id": self.execution.execution_id,
            "definition_id": self.execution.definition_id,
            "definition_version": self.execution.definition_version,
            "retry_count": self.execution.retry_count,
            "started_at": self.execution.started_at.map(|t| t.to_rfc3339()),
        })
    }

    /// Context entries plus an `execution` object, for template rendering
    pub fn template_vars(&self) -> Map<String, Value> {
        let mut vars = self.context.snapshot();
        vars.insert("execution".to_string(), self.meta_value());
        vars
    }

    /// Resolve a dotted path against the context, then `execution.*` metadata
    pub fn resolve(&self, path: &str) -> Option<Value> {
        if let Some(value) = self.context.lookup(path) {
            return Some(value.clone());
        }
        let field = path.strip_prefix("execution.")?;
        self.meta_value().get(field).filter(|v| !v.is_null()).cloned()
    }
}

/// Outcome of one node invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeExecutionResult {
    pub success: bool,
    /// Entries merged into the context store
    pub output: Map<String, Value>,
    pub error: Option<String>,
    /// Boolean output selecting guarded connections (condition nodes)
    pub branch: Option<bool>,
}

impl NodeExecutionResult {
    pub fn success(output: Map<String, Value>) -> Self {
        Self {
            success: true,
            output,
            error: None,
            branch: None,
        }
    }

    /// Successful result with a single output entry
    pub fn single(key: impl Into<String>, value: Value) -> Self {
        let mut output = Map::new();
        output.insert(key.into(), value);
        Self::success(output)
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Map::new(),
            error: Some(error.into()),
            branch: None,
        }
    }

    pub fn with_branch(mut self, branch: bool) -> Self {
        self.branch = Some(branch);
        self
    }
}

/// Executor for one node kind
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Kind this executor handles
    fn supported_kind(&self) -> NodeKind;

    /// Kind-specific configuration checks, run at activation time
    fn validate(&self, _node: &Node) -> Vec<ValidationIssue> {
        Vec::new()
    }

    /// Run the node
    ///
    /// Returning `Err` and returning a result with `success == false` are
    /// both node failures.
    async fn execute(&self, ctx: &NodeContext) -> Result<NodeExecutionResult>;

    /// Whether an invocation occupies a worker pool slot
    fn uses_worker(&self) -> bool {
        true
    }
}
