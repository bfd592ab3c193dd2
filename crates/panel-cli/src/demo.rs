//! Built-in analyst panel workflow

use panel_core::{Definition, Node, NodeKind, ParameterSpec};
use serde_json::json;

pub const DEFINITION_ID: &str = "analyst-panel";

/// Panel debate, confidence gate and notification
pub fn definition() -> Definition {
    Definition::new(DEFINITION_ID, "Analyst panel review")
        .with_author("panel-cli")
        .input(ParameterSpec::required("symbol", "string"))
        .input(ParameterSpec::optional("threshold", "number"))
        .node(Node::new("start", NodeKind::Start))
        .node(
            Node::new("panel", NodeKind::RoleInvocation)
                .with_name("Analyst panel")
                .with_config("roles", json!(["technical", "fundamental", "news"]))
                .with_config("subject", json!("{{ symbol }}"))
                .with_config(
                    "prompt",
                    json!("Assess {{ subject }} from your specialty. Give a recommendation, a confidence between 0 and 1 and a short rationale."),
                )
                .with_config("bull_role", json!("bull"))
                .with_config("bear_role", json!("bear"))
                .with_config("arbiter_role", json!("arbiter")),
        )
        .node(
            Node::new("score", NodeKind::ScriptedExpression)
                .with_config(
                    "script",
                    json!("{'confidence': round(panel.confidence, 3), 'threshold': threshold or 0.6}"),
                )
                .with_config("namespace", json!("gate")),
        )
        .node(
            Node::new("confident", NodeKind::Condition)
                .with_config("expression", json!("${gate.confidence} >= ${gate.threshold}")),
        )
        .node(
            Node::new("announce", NodeKind::Notification)
                .with_config("channel", json!("system"))
                .with_config("title", json!("${symbol}: ${panel.stance}"))
                .with_config(
                    "message",
                    json!("Panel reached ${panel.stance} with confidence ${gate.confidence}"),
                ),
        )
        .node(
            Node::new("cooldown", NodeKind::TimedDelay)
                .with_config("delay", json!("200ms")),
        )
        .node(Node::new("end", NodeKind::End))
        .connect("start", "panel")
        .connect("panel", "score")
        .connect("score", "confident")
        .connect_when("confident", "announce", true)
        .connect_when("confident", "cooldown", false)
        .connect("announce", "end")
        .connect("cooldown", "end")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_shape() {
        let definition = definition();
        assert_eq!(definition.nodes.len(), 7);
        assert_eq!(definition.nodes_of_kind(NodeKind::End).count(), 1);
        assert!(definition.connections.iter().any(|c| c.guard == Some(false)));
    }
}
