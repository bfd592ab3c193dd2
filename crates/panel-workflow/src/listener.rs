//! Execution listeners
//!
//! Listeners are injected into the engine at construction. Each execution
//! transition fires the matching callback exactly once.

use async_trait::async_trait;
use panel_core::{Execution, Node, NodeRecord};
use tracing::{info, warn};

/// Observer of execution lifecycle events
///
/// Every method has a no-op default so implementors pick what they need.
#[async_trait]
pub trait ExecutionListener: Send + Sync {
    async fn on_started(&self, _execution: &Execution) {}

    async fn on_completed(&self, _execution: &Execution) {}

    async fn on_failed(&self, _execution: &Execution) {}

    async fn on_cancelled(&self, _execution: &Execution) {}

    async fn on_paused(&self, _execution: &Execution) {}

    async fn on_resumed(&self, _execution: &Execution) {}

    async fn on_timeout(&self, _execution: &Execution) {}

    /// Called before a node invocation starts
    async fn on_node_started(&self, _execution_id: &str, _node: &Node) {}

    /// Called once a node invocation has a final record
    async fn on_node_finished(&self, _execution_id: &str, _record: &NodeRecord) {}
}

/// No-op listener for when events are not needed
pub struct NoOpListener;

#[async_trait]
impl ExecutionListener for NoOpListener {}

/// Listener that writes lifecycle events to the tracing subscriber
pub struct TracingListener;

#[async_trait]
impl ExecutionListener for TracingListener {
    async fn on_started(&self, execution: &Execution) {
        info!(execution_id = %execution.id, definition_id = %execution.definition_id, "Execution started");
    }

    async fn on_completed(&self, execution: &Execution) {
        info!(
            execution_id = %execution.id,
            duration_ms = execution.duration_ms.unwrap_or_default(),
            "Execution completed"
        );
    }

    async fn on_failed(&self, execution: &Execution) {
        let error = execution
            .error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        warn!(execution_id = %execution.id, error = %error, "Execution failed");
    }

    async fn on_cancelled(&self, execution: &Execution) {
        info!(execution_id = %execution.id, "Execution cancelled");
    }

    async fn on_paused(&self, execution: &Execution) {
        info!(execution_id = %execution.id, "Execution paused");
    }

    async fn on_resumed(&self, execution: &Execution) {
        info!(execution_id = %execution.id, "Execution resumed");
    }

    async fn on_timeout(&self, execution: &Execution) {
        warn!(execution_id = %execution.id, budget_ms = execution.timeout_ms, "Execution timed out");
    }
}
