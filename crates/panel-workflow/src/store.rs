//! Persistence collaborator
//!
//! The engine holds no durable state; finished executions and updated
//! definition statistics are handed to an [`ExecutionStore`].

use async_trait::async_trait;
use panel_core::{DefinitionStats, Execution, Result};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Receives finished executions and definition statistics
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn save_execution(&self, execution: &Execution) -> Result<()>;

    async fn save_definition_stats(&self, definition_id: &str, stats: &DefinitionStats) -> Result<()>;
}

/// Process-memory store, useful for tests and the CLI
#[derive(Default)]
pub struct InMemoryStore {
    executions: RwLock<HashMap<String, Execution>>,
    stats: RwLock<HashMap<String, DefinitionStats>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execution(&self, id: &str) -> Option<Execution> {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All stored executions of one definition
    pub fn executions_for(&self, definition_id: &str) -> Vec<Execution> {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.definition_id == definition_id)
            .cloned()
            .collect()
    }

    pub fn stats(&self, definition_id: &str) -> Option<DefinitionStats> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(definition_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn save_execution(&self, execution: &Execution) -> Result<()> {
        self.executions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn save_definition_stats(&self, definition_id: &str, stats: &DefinitionStats) -> Result<()> {
        self.stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition_id.to_string(), stats.clone());
        Ok(())
    }
}
