use async_trait::async_trait;
use panel_core::{Node, NodeKind, Result, ValidationIssue};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

use super::{require_str, resolve_text};
use crate::executor::{NodeContext, NodeExecutionResult, NodeExecutor};
use crate::notify::{Channel, Notification, NotificationDispatcher};

/// Resolves and dispatches a notification
///
/// Delivery failures are written to the node output and never fail the run.
pub struct NotificationExecutor {
    dispatcher: Arc<NotificationDispatcher>,
}

impl NotificationExecutor {
    pub fn new(dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { dispatcher }
    }

    fn channel(node: &Node) -> Result<Channel> {
        node.config_str("channel")
            .map_or(Ok(Channel::default()), str::parse)
    }

    fn recipients(node: &Node) -> Vec<&str> {
        match node.config.get("recipients") {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(list)) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl NodeExecutor for NotificationExecutor {
    fn supported_kind(&self) -> NodeKind {
        NodeKind::Notification
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        require_str(node, "message", &mut issues);
        match Self::channel(node) {
            Ok(channel) => {
                if channel.needs_recipients() && Self::recipients(node).is_empty() {
                    issues.push(ValidationIssue::node(
                        &node.id,
                        format!("channel '{channel}' needs at least one recipient"),
                    ));
                }
                if !self.dispatcher.has_transport(channel) {
                    issues.push(ValidationIssue::node(
                        &node.id,
                        format!("no transport registered for channel '{channel}'"),
                    ));
                }
            }
            Err(e) => issues.push(ValidationIssue::node(&node.id, e.to_string())),
        }
        issues
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<NodeExecutionResult> {
        let node = &ctx.node;
        let channel = Self::channel(node)?;
        let notification = Notification {
            channel,
            recipients: Self::recipients(node)
                .into_iter()
                .map(|r| resolve_text(ctx, r))
                .collect(),
            title: resolve_text(ctx, node.config_str("title").unwrap_or(&node.name)),
            message: resolve_text(ctx, node.config_str("message").unwrap_or_default()),
        };

        let error = match self.dispatcher.dispatch(&notification).await {
            Ok(()) => None,
            Err(e) => {
                warn!(node_id = %node.id, channel = %channel, error = %e, "Notification not delivered");
                Some(e.to_string())
            }
        };

        Ok(NodeExecutionResult::single(
            node.output_key(),
            json!({
                "delivered": error.is_none(),
                "channel": channel,
                "title": notification.title,
                "error": error,
            }),
        ))
    }
}
