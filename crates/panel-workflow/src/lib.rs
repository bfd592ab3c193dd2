//! Workflow execution engine for analyst panels
//!
//! Definitions are directed graphs of typed nodes. The [`WorkflowEngine`]
//! admits executions up to a concurrency ceiling, walks the graph with
//! fan-out and fan-in, and drives each execution through a strict state
//! machine with cooperative pause, resume and cancellation plus a wall-clock
//! timeout.
//!
//! # Architecture
//!
//! - [`WorkflowEngine`]: admission, scheduling and lifecycle
//! - [`ExecutorRegistry`]: node kind to [`NodeExecutor`]
//! - [`nodes`]: the eight built-in executors
//! - [`DefinitionCatalog`]: draft, active and archived definitions
//! - [`ExecutionListener`], [`ExecutionStore`], [`NotificationTransport`]:
//!   collaborators injected at construction

pub mod catalog;
pub mod config;
pub mod engine;
pub mod executor;
pub mod expression;
pub mod listener;
pub mod nodes;
pub mod notify;
pub mod registry;
pub mod script;
pub mod store;
pub mod validation;

pub use catalog::DefinitionCatalog;
pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::{WorkflowEngine, WorkflowEngineBuilder};
pub use executor::{ExecutionMeta, NodeContext, NodeExecutionResult, NodeExecutor};
pub use listener::{ExecutionListener, NoOpListener, TracingListener};
pub use notify::{
    Channel, Notification, NotificationDispatcher, NotificationTransport, TracingTransport,
    WebhookTransport,
};
pub use registry::ExecutorRegistry;
pub use script::ScriptEngine;
pub use store::{ExecutionStore, InMemoryStore};

#[cfg(test)]
pub(crate) mod test_support {
    use panel_core::{ContextStore, Definition, Node};
    use serde_json::Value;
    use std::sync::Arc;

    use crate::executor::{ExecutionMeta, NodeContext};

    /// Context for invoking `node` directly, seeded with `entries`
    pub fn node_context(node: Node, entries: Value) -> NodeContext {
        NodeContext {
            definition: Arc::new(Definition::new("wf", "Workflow")),
            execution: ExecutionMeta {
                execution_id: "exec-1".to_string(),
                definition_id: "wf".to_string(),
                definition_version: 1,
                retry_count: 0,
                started_at: None,
            },
            node,
            context: Arc::new(ContextStore::from_map(
                entries.as_object().cloned().unwrap_or_default(),
            )),
        }
    }
}
