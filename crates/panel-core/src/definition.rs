//! Workflow definition model
//!
//! A `Definition` is the reusable, immutable graph template: nodes, the
//! connections between them, and the declared input/output parameters.
//! Executions never mutate a definition; edits produce a new version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::ValidationIssue;

/// Kind of a node, used to pick its executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    End,
    RoleInvocation,
    ToolInvocation,
    Condition,
    ScriptedExpression,
    TimedDelay,
    Notification,
}

impl NodeKind {
    /// Every kind, in declaration order
    pub const ALL: [NodeKind; 8] = [
        Self::Start,
        Self::End,
        Self::RoleInvocation,
        Self::ToolInvocation,
        Self::Condition,
        Self::ScriptedExpression,
        Self::TimedDelay,
        Self::Notification,
    ];

    /// Stable tag used in serialized definitions and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::RoleInvocation => "role_invocation",
            Self::ToolInvocation => "tool_invocation",
            Self::Condition => "condition",
            Self::ScriptedExpression => "scripted_expression",
            Self::TimedDelay => "timed_delay",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One vertex of the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the definition
    pub id: String,
    pub kind: NodeKind,
    /// Display name, defaults to the id
    #[serde(default)]
    pub name: String,
    /// Kind-specific configuration
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            config: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set one configuration entry
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// String configuration entry
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Key under which this node's output is merged into the context store
    pub fn output_key(&self) -> &str {
        self.config_str("output_key").unwrap_or(&self.id)
    }
}

/// Directed edge between two nodes
///
/// A guard literal selects the connection based on the upstream condition
/// node's boolean output; unguarded connections are always followed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<bool>,
}

impl Connection {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            guard: None,
        }
    }

    pub fn guarded(source: impl Into<String>, target: impl Into<String>, guard: bool) -> Self {
        Self {
            guard: Some(guard),
            ..Self::new(source, target)
        }
    }

    /// Whether this connection is followed given the source's branch output
    pub fn is_taken(&self, branch: Option<bool>) -> bool {
        match (self.guard, branch) {
            (None, _) => true,
            (Some(guard), Some(branch)) => guard == branch,
            (Some(_), None) => false,
        }
    }
}

/// Declared input or output parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    /// Loose JSON type tag: string, number, boolean, object, array, any
    #[serde(default = "default_param_type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_param_type() -> String {
    "any".to_string()
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            required: true,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self.param_type.as_str() {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        }
    }
}

/// Lifecycle state of a definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionStatus {
    #[default]
    Draft,
    Active,
    Archived,
}

impl fmt::Display for DefinitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Archived => "archived",
        };
        f.write_str(name)
    }
}

/// Aggregate run statistics for a definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionStats {
    pub usage_count: u64,
    pub average_duration_ms: f64,
    pub success_rate: f64,
}

impl DefinitionStats {
    /// Fold one finished run into the running averages
    pub fn record(&mut self, duration_ms: u64, succeeded: bool) {
        let previous = self.usage_count as f64;
        self.usage_count += 1;
        let count = self.usage_count as f64;

        self.average_duration_ms =
            (self.average_duration_ms * previous + duration_ms as f64) / count;
        let success = if succeeded { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * previous + success) / count;
    }
}

/// Reusable graph template for a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub inputs: Vec<ParameterSpec>,
    #[serde(default)]
    pub outputs: Vec<ParameterSpec>,
    #[serde(default)]
    pub status: DefinitionStatus,
    #[serde(default)]
    pub stats: DefinitionStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl Definition {
    /// Create an empty draft definition
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: 1,
            nodes: Vec::new(),
            connections: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            status: DefinitionStatus::Draft,
            stats: DefinitionStats::default(),
            author: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Append a node
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Append an unguarded connection
    pub fn connect(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.connections.push(Connection::new(source, target));
        self
    }

    /// Append a guarded connection
    pub fn connect_when(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        guard: bool,
    ) -> Self {
        self.connections
            .push(Connection::guarded(source, target, guard));
        self
    }

    /// Declare an input parameter
    pub fn input(mut self, spec: ParameterSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    /// Declare an output parameter
    pub fn output(mut self, spec: ParameterSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All nodes of the given kind
    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    pub fn is_runnable(&self) -> bool {
        self.status == DefinitionStatus::Active
    }

    /// Record an edit: bump the version and return to draft
    pub fn bump_version(&mut self) {
        self.version += 1;
        self.status = DefinitionStatus::Draft;
        self.updated_at = Utc::now();
    }

    /// Check a submission's input map against the declared parameters
    pub fn check_inputs(&self, input: &Map<String, Value>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for spec in &self.inputs {
            match input.get(&spec.name) {
                None if spec.required => issues.push(ValidationIssue::definition(format!(
                    "missing required input '{}'",
                    spec.name
                ))),
                Some(value) if !spec.accepts(value) => {
                    issues.push(ValidationIssue::definition(format!(
                        "input '{}' should be of type {}",
                        spec.name, spec.param_type
                    )));
                }
                _ => {}
            }
        }
        issues
    }
}
