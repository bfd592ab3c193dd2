use async_trait::async_trait;
use chrono::Utc;
use panel_core::context::keys;
use panel_core::{NodeKind, Result};
use serde_json::{Map, Value};

use crate::executor::{NodeContext, NodeExecutionResult, NodeExecutor};

/// Progress reported once the start node has run
pub const START_PROGRESS: f64 = 0.05;

/// Records run metadata; no side effects
pub struct StartExecutor;

#[async_trait]
impl NodeExecutor for StartExecutor {
    fn supported_kind(&self) -> NodeKind {
        NodeKind::Start
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<NodeExecutionResult> {
        let started_at = ctx
            .execution
            .started_at
            .unwrap_or_else(Utc::now)
            .to_rfc3339();

        let mut output = Map::new();
        output.insert(keys::STARTED_AT.to_string(), Value::from(started_at));
        output.insert(keys::PROGRESS.to_string(), Value::from(START_PROGRESS));
        Ok(NodeExecutionResult::success(output))
    }
}
