use async_trait::async_trait;
use panel_core::{Error, Node, NodeKind, Result, ToolRegistry, ValidationIssue};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::{require_str, resolve_value};
use crate::executor::{NodeContext, NodeExecutionResult, NodeExecutor};

/// Calls a registered tool with placeholder-resolved `params`
pub struct ToolExecutor {
    tools: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl NodeExecutor for ToolExecutor {
    fn supported_kind(&self) -> NodeKind {
        NodeKind::ToolInvocation
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        require_str(node, "tool", &mut issues);
        if let Some(name) = node.config_str("tool") {
            if !name.trim().is_empty() && self.tools.get(name).is_none() {
                issues.push(ValidationIssue::node(
                    &node.id,
                    format!("tool '{name}' is not registered"),
                ));
            }
        }
        if node.config.get("params").is_some_and(|p| !p.is_object()) {
            issues.push(ValidationIssue::node(&node.id, "'params' must be an object"));
        }
        issues
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<NodeExecutionResult> {
        let name = ctx.node.config_str("tool").unwrap_or_default();
        let tool = self.tools.get(name).ok_or_else(|| Error::Tool {
            tool_id: name.to_string(),
            message: "tool is not registered".to_string(),
        })?;

        let params = ctx
            .node
            .config
            .get("params")
            .map_or(Value::Object(serde_json::Map::new()), |p| resolve_value(ctx, p));
        debug!(node_id = %ctx.node.id, tool = %name, "Invoking tool");

        let output = tool.execute(params).await.map_err(|e| match e {
            err @ Error::Tool { .. } => err,
            other => Error::Tool {
                tool_id: name.to_string(),
                message: other.to_string(),
            },
        })?;
        Ok(NodeExecutionResult::single(ctx.node.output_key(), output))
    }
}
