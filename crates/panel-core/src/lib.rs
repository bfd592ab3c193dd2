//! Core model for analyst-panel workflows
//!
//! This crate defines the data model shared by the workflow engine and the
//! debate engine: graph definitions, run-time execution records, the context
//! store, the collaborator traits the engine calls out through, and the error
//! taxonomy.

pub mod context;
pub mod definition;
pub mod error;
pub mod execution;
pub mod graph;
pub mod role;
pub mod tool;

pub use context::ContextStore;
pub use definition::{
    Connection, Definition, DefinitionStats, DefinitionStatus, Node, NodeKind, ParameterSpec,
};
pub use error::{Error, Result, ValidationErrors, ValidationIssue};
pub use execution::{
    Execution, ExecutionError, ExecutionOptions, ExecutionStatus, LogEntry, LogLevel, NodeRecord,
    NodeStatus, Priority,
};
pub use graph::GraphIndex;
pub use role::{RoleAssessment, RoleInvoker, RoleRequest};
pub use tool::{Tool, ToolRegistry};
