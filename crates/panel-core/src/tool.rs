//! Tool-invocation collaborator and its registry

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::Result;

/// Trait for tools that tool-invocation nodes can call
///
/// Tools are request/response functions such as a quote lookup or an
/// indicator calculator. Each tool is addressed by its unique name.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Execute the tool with the node's resolved parameters
    async fn execute(&self, params: Value) -> Result<Value>;

    /// Unique name within a `ToolRegistry`
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }
}

/// Registry for managing tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        debug!(tool = tool.name(), "Tool registered");
        tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        tools.get(name).cloned()
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
