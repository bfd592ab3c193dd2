//! Publish-time definition validation
//!
//! Every check runs and every problem is collected, so authors see the whole
//! list at once.

use panel_core::{Definition, GraphIndex, NodeKind, ValidationErrors, ValidationIssue};
use std::collections::HashSet;

use crate::registry::ExecutorRegistry;

/// Validate the structure of `definition` and each node's configuration
pub fn validate(definition: &Definition, registry: &ExecutorRegistry) -> ValidationErrors {
    let mut issues = Vec::new();

    if definition.nodes.is_empty() {
        issues.push(ValidationIssue::definition("definition has no nodes"));
        return ValidationErrors(issues);
    }

    let mut seen = HashSet::new();
    for node in &definition.nodes {
        if node.id.trim().is_empty() {
            issues.push(ValidationIssue::definition("node id must not be empty"));
        } else if !seen.insert(node.id.as_str()) {
            issues.push(ValidationIssue::node(&node.id, "duplicate node id"));
        }
    }

    for conn in &definition.connections {
        for endpoint in [&conn.source, &conn.target] {
            if definition.find_node(endpoint).is_none() {
                issues.push(ValidationIssue::definition(format!(
                    "connection {} -> {} references unknown node '{endpoint}'",
                    conn.source, conn.target
                )));
            }
        }
        let from_condition = definition
            .find_node(&conn.source)
            .is_some_and(|n| n.kind == NodeKind::Condition);
        if conn.guard.is_some() && !from_condition {
            issues.push(ValidationIssue::node(
                &conn.source,
                format!(
                    "guarded connection to '{}' must leave a condition node",
                    conn.target
                ),
            ));
        }
    }

    let starts = definition.nodes_of_kind(NodeKind::Start).count();
    if starts != 1 {
        issues.push(ValidationIssue::definition(format!(
            "definition must have exactly one start node, found {starts}"
        )));
    }

    let graph = GraphIndex::build(definition);
    if starts == 1 {
        let reachable = graph
            .start()
            .map(|s| graph.reachable_from(s))
            .unwrap_or_default();
        let end_reachable = reachable
            .iter()
            .any(|&i| graph.kind(i) == NodeKind::End);
        if !end_reachable {
            issues.push(ValidationIssue::definition(
                "no end node is reachable from the start node",
            ));
        }
    }

    for node in &definition.nodes {
        match registry.get(node.kind) {
            Some(executor) => issues.extend(executor.validate(node)),
            None => issues.push(ValidationIssue::node(
                &node.id,
                format!("no executor registered for kind '{}'", node.kind),
            )),
        }
    }

    ValidationErrors(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{ConditionExecutor, EndExecutor, StartExecutor};
    use panel_core::Node;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> ExecutorRegistry {
        ExecutorRegistry::new()
            .with(Arc::new(StartExecutor))
            .with(Arc::new(EndExecutor))
            .with(Arc::new(ConditionExecutor))
    }

    fn messages(errors: &ValidationErrors) -> Vec<String> {
        errors.issues().iter().map(|i| i.message.clone()).collect()
    }

    #[test]
    fn test_empty_definition() {
        let errors = validate(&Definition::new("wf", "Empty"), &registry());
        assert_eq!(messages(&errors), vec!["definition has no nodes".to_string()]);
    }

    #[test]
    fn test_valid_definition() {
        let definition = Definition::new("wf", "Ok")
            .node(Node::new("start", NodeKind::Start))
            .node(Node::new("check", NodeKind::Condition).with_config("expression", json!("1 < 2")))
            .node(Node::new("end", NodeKind::End))
            .connect("start", "check")
            .connect_when("check", "end", true)
            .connect_when("check", "start", false);
        assert!(validate(&definition, &registry()).is_empty());
    }

    #[test]
    fn test_collects_every_problem() {
        let definition = Definition::new("wf", "Broken")
            .node(Node::new("a", NodeKind::Start))
            .node(Node::new("a", NodeKind::Start))
            .node(Node::new("check", NodeKind::Condition))
            .node(Node::new("end", NodeKind::End))
            .node(Node::new("ask", NodeKind::RoleInvocation))
            .connect("a", "ghost")
            .connect_when("a", "check", true);

        let errors = validate(&definition, &registry());
        let messages = messages(&errors);

        assert!(messages.iter().any(|m| m == "duplicate node id"));
        assert!(messages.iter().any(|m| m.contains("unknown node 'ghost'")));
        assert!(messages.iter().any(|m| m.contains("must leave a condition node")));
        assert!(messages.iter().any(|m| m.contains("exactly one start node, found 2")));
        assert!(messages.iter().any(|m| m.contains("'expression'")));
        assert!(messages.iter().any(|m| m.contains("no executor registered")));
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn test_unreachable_end() {
        let definition = Definition::new("wf", "Island")
            .node(Node::new("start", NodeKind::Start))
            .node(Node::new("end", NodeKind::End));
        let errors = validate(&definition, &registry());
        assert_eq!(
            messages(&errors),
            vec!["no end node is reachable from the start node".to_string()]
        );
    }
}
