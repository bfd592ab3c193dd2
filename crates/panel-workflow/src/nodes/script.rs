use async_trait::async_trait;
use panel_core::{Node, NodeKind, Result, ValidationIssue};
use serde_json::{Map, Value};

use super::require_str;
use crate::executor::{NodeContext, NodeExecutionResult, NodeExecutor};
use crate::script::{LANGUAGES, ScriptEngine, denied_operation};

/// Evaluates a sandboxed expression and merges its result
///
/// A map result is merged entry by entry under `"{namespace}.{key}"`, where
/// the namespace is the `namespace` config value or the output key. Keys named
/// in `output_mapping` are written under their mapped name instead. Any other
/// result is stored under the namespace itself.
pub struct ScriptExecutor {
    engine: ScriptEngine,
}

impl ScriptExecutor {
    pub fn new(engine: ScriptEngine) -> Self {
        Self { engine }
    }
}

fn merge_result(node: &Node, result: Value) -> Map<String, Value> {
    let namespace = node.config_str("namespace").unwrap_or(node.output_key());
    let mapping = node.config.get("output_mapping").and_then(Value::as_object);

    let Value::Object(entries) = result else {
        let mut output = Map::new();
        output.insert(namespace.to_string(), result);
        return output;
    };

    entries
        .into_iter()
        .map(|(key, value)| {
            let target = mapping
                .and_then(|m| m.get(&key))
                .and_then(Value::as_str)
                .map_or_else(|| format!("{namespace}.{key}"), str::to_string);
            (target, value)
        })
        .collect()
}

#[async_trait]
impl NodeExecutor for ScriptExecutor {
    fn supported_kind(&self) -> NodeKind {
        NodeKind::ScriptedExpression
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        require_str(node, "script", &mut issues);

        let language = node.config_str("language").unwrap_or(LANGUAGES[0]);
        if !LANGUAGES.contains(&language) {
            issues.push(ValidationIssue::node(
                &node.id,
                format!("unsupported script language '{language}'"),
            ));
        }
        if let Some(denied) = node.config_str("script").and_then(denied_operation) {
            issues.push(ValidationIssue::node(
                &node.id,
                format!("script contains forbidden operation '{denied}'"),
            ));
        }
        if node.config.get("output_mapping").is_some_and(|m| !m.is_object()) {
            issues.push(ValidationIssue::node(&node.id, "'output_mapping' must be an object"));
        }
        issues
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<NodeExecutionResult> {
        let script = ctx.node.config_str("script").unwrap_or_default();
        let result = self.engine.evaluate(script, ctx.template_vars()).await?;
        Ok(NodeExecutionResult::success(merge_result(&ctx.node, result)))
    }
}
