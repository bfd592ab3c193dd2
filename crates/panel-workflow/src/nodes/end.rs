use async_trait::async_trait;
use panel_core::{NodeKind, Result};
use serde_json::{Map, Value};

use crate::executor::{NodeContext, NodeExecutionResult, NodeExecutor};

/// Produces the final output snapshot
///
/// With declared output parameters the snapshot holds exactly those names
/// (resolved as context paths, `null` when absent); otherwise it is the whole
/// context store.
pub struct EndExecutor;

impl EndExecutor {
    pub fn final_output(ctx: &NodeContext) -> Map<String, Value> {
        if ctx.definition.outputs.is_empty() {
            return ctx.context.snapshot();
        }
        ctx.definition
            .outputs
            .iter()
            .map(|spec| (spec.name.clone(), ctx.resolve(&spec.name).unwrap_or(Value::Null)))
            .collect()
    }
}

#[async_trait]
impl NodeExecutor for EndExecutor {
    fn supported_kind(&self) -> NodeKind {
        NodeKind::End
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<NodeExecutionResult> {
        let snapshot = Self::final_output(ctx);
        Ok(NodeExecutionResult::single(
            ctx.node.output_key(),
            Value::Object(snapshot),
        ))
    }
}
