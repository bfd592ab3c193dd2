//! Built-in executors, one per node kind

mod condition;
mod delay;
mod end;
mod notification;
mod role;
mod script;
mod start;
mod tool;

pub use condition::ConditionExecutor;
pub use delay::{DelayExecutor, parse_delay};
pub use end::EndExecutor;
pub use notification::NotificationExecutor;
pub use role::RoleExecutor;
pub use script::ScriptExecutor;
pub use start::StartExecutor;
pub use tool::ToolExecutor;

use panel_core::{Node, ValidationIssue};
use serde_json::Value;

use crate::executor::NodeContext;
use crate::expression::resolve_placeholders;

/// Issue unless `key` holds a non-blank string
fn require_str(node: &Node, key: &str, issues: &mut Vec<ValidationIssue>) {
    if node.config_str(key).is_none_or(|s| s.trim().is_empty()) {
        issues.push(ValidationIssue::node(
            &node.id,
            format!("'{key}' must be a non-empty string"),
        ));
    }
}

/// Substitute `${...}` placeholders, leaving unknown ones in place
fn resolve_text(ctx: &NodeContext, template: &str) -> String {
    resolve_placeholders(template, |path| ctx.resolve(path)).text
}

/// Resolve placeholders inside a JSON value
///
/// A string that is exactly one placeholder takes the referenced value with
/// its JSON type; any other string is substituted as text.
fn resolve_value(ctx: &NodeContext, value: &Value) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            let whole = trimmed
                .strip_prefix("${")
                .and_then(|rest| rest.strip_suffix('}'))
                .filter(|path| !path.contains("${"));
            if let Some(resolved) = whole.and_then(|path| ctx.resolve(path.trim())) {
                return resolved;
            }
            Value::String(resolve_text(ctx, s))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(ctx, v)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(ctx, v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::node_context;
    use panel_core::NodeKind;
    use serde_json::json;

    #[test]
    fn test_resolve_value_keeps_types() {
        let ctx = node_context(
            Node::new("tool", NodeKind::ToolInvocation),
            json!({ "symbol": "AAPL", "limit": 5 }),
        );

        let params = json!({
            "symbol": "${symbol}",
            "limit": "${limit}",
            "label": "Top ${limit} for ${symbol}",
            "missing": "${nope}",
            "nested": ["${limit}"]
        });

        assert_eq!(
            resolve_value(&ctx, &params),
            json!({
                "symbol": "AAPL",
                "limit": 5,
                "label": "Top 5 for AAPL",
                "missing": "${nope}",
                "nested": [5]
            })
        );
    }
}
