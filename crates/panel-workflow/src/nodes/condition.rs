use async_trait::async_trait;
use panel_core::{Node, NodeKind, Result, ValidationIssue};
use serde_json::Value;
use tracing::debug;

use super::require_str;
use crate::executor::{NodeContext, NodeExecutionResult, NodeExecutor};
use crate::expression::{evaluate_condition, parens_balanced};

/// Evaluates `expression` and selects guarded connections with the result
pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    fn supported_kind(&self) -> NodeKind {
        NodeKind::Condition
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        require_str(node, "expression", &mut issues);
        if let Some(expression) = node.config_str("expression") {
            if !parens_balanced(expression) {
                issues.push(ValidationIssue::node(
                    &node.id,
                    "expression has unbalanced parentheses",
                ));
            }
        }
        issues
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<NodeExecutionResult> {
        let expression = ctx.node.config_str("expression").unwrap_or_default();
        let outcome = evaluate_condition(expression, |path| ctx.resolve(path));
        debug!(node_id = %ctx.node.id, expression = %expression, outcome, "Condition evaluated");

        Ok(NodeExecutionResult::single(ctx.node.output_key(), Value::Bool(outcome))
            .with_branch(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::node_context;
    use serde_json::json;

    #[tokio::test]
    async fn test_condition_sets_branch() {
        let node = Node::new("check", NodeKind::Condition)
            .with_config("expression", json!("${panel.confidence} >= 0.6"));
        let ctx = node_context(node, json!({ "panel": { "confidence": 0.72 } }));

        let result = ConditionExecutor.execute(&ctx).await.unwrap();
        assert_eq!(result.branch, Some(true));
        assert_eq!(result.output["check"], json!(true));
    }

    #[tokio::test]
    async fn test_unresolved_condition_is_false() {
        let node = Node::new("check", NodeKind::Condition)
            .with_config("expression", json!("${foo}.contains(${bar})"));
        let ctx = node_context(node, json!({}));

        let result = ConditionExecutor.execute(&ctx).await.unwrap();
        assert_eq!(result.branch, Some(false));
    }

    #[test]
    fn test_validation() {
        let missing = Node::new("c", NodeKind::Condition);
        assert_eq!(ConditionExecutor.validate(&missing).len(), 1);

        let unbalanced =
            Node::new("c", NodeKind::Condition).with_config("expression", json!("(a > 1"));
        assert_eq!(ConditionExecutor.validate(&unbalanced).len(), 1);

        let ok = Node::new("c", NodeKind::Condition).with_config("expression", json!("1 < 2"));
        assert!(ConditionExecutor.validate(&ok).is_empty());
    }
}
