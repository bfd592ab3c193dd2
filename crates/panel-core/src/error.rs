//! Error types for panel-core

use std::fmt;
use thiserror::Error;

/// Result type alias for panel operations
pub type Result<T> = std::result::Result<T, Error>;

/// A single problem found while validating a definition
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationIssue {
    /// Offending node, when the issue is node-specific
    pub node_id: Option<String>,
    /// Human-readable description
    pub message: String,
}

impl ValidationIssue {
    /// Issue that concerns the definition as a whole
    pub fn definition(message: impl Into<String>) -> Self {
        Self {
            node_id: None,
            message: message.into(),
        }
    }

    /// Issue attached to a specific node
    pub fn node(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(node_id) => write!(f, "node '{node_id}': {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// The complete list of issues found in one validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationIssue>);

impl ValidationErrors {
    /// Issues in discovery order
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{} issue(s): {joined}", self.0.len())
    }
}

/// Error type for workflow and debate operations
#[derive(Error, Debug)]
pub enum Error {
    /// Definition is malformed; raised before any execution starts
    #[error("Definition validation failed: {0}")]
    Validation(ValidationErrors),

    /// A node's executor reported failure
    #[error("Node '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    /// Concurrency ceiling reached; the execution was never created
    #[error("Capacity exceeded: {running} executions running (ceiling {ceiling})")]
    Capacity { running: usize, ceiling: usize },

    /// Wall-clock budget exceeded
    #[error("Execution {execution_id} exceeded its {budget_ms} ms budget")]
    Timeout { execution_id: String, budget_ms: u64 },

    /// Explicit user cancellation
    #[error("Execution {execution_id} was cancelled")]
    Cancelled { execution_id: String },

    /// Unknown definition id
    #[error("Definition not found: {0}")]
    DefinitionNotFound(String),

    /// Definition exists but may not be run in its current lifecycle state
    #[error("Definition '{id}' is {status}, only active definitions can run")]
    DefinitionNotActive { id: String, status: String },

    /// Unknown execution id
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// Requested state change is not allowed by the execution state machine
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// The external role collaborator failed
    #[error("Role '{role_id}' failed: {message}")]
    Role { role_id: String, message: String },

    /// The external tool collaborator failed
    #[error("Tool '{tool_id}' failed: {message}")]
    Tool { tool_id: String, message: String },

    /// Script evaluation failed
    #[error("Script error: {0}")]
    Script(String),

    /// Template rendering failed
    #[error("Template error: {0}")]
    Template(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Execution-level retry budget used up
    #[error("Execution {execution_id} has used all {max_retries} retries")]
    RetryExhausted {
        execution_id: String,
        max_retries: u32,
    },

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error message
    #[error("{0}")]
    Generic(String),
}

impl Error {
    /// Shorthand for a node failure
    pub fn node(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeExecution {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// The failing node, where the error carries one
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeExecution { node_id, .. } => Some(node_id),
            Self::Validation(errors) => errors.0.iter().find_map(|i| i.node_id.as_deref()),
            _ => None,
        }
    }
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}
