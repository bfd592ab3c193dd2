//! Executor registry: node kind to executor

use panel_core::{NodeKind, RoleInvoker, ToolRegistry};
use panel_debate::DebateConfig;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::executor::NodeExecutor;
use crate::nodes::{
    ConditionExecutor, DelayExecutor, EndExecutor, NotificationExecutor, RoleExecutor,
    ScriptExecutor, StartExecutor, ToolExecutor,
};
use crate::notify::NotificationDispatcher;
use crate::script::ScriptEngine;

/// Maps each node kind to the executor that runs it
///
/// Built once and shared by the engine; lookups never allocate.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the eight built-in executors
    pub fn standard(
        roles: Arc<dyn RoleInvoker>,
        tools: Arc<ToolRegistry>,
        notifier: Arc<NotificationDispatcher>,
        config: &EngineConfig,
        debate: DebateConfig,
    ) -> Self {
        Self::new()
            .with(Arc::new(StartExecutor))
            .with(Arc::new(EndExecutor))
            .with(Arc::new(RoleExecutor::new(roles, debate)))
            .with(Arc::new(ToolExecutor::new(tools)))
            .with(Arc::new(ConditionExecutor))
            .with(Arc::new(ScriptExecutor::new(ScriptEngine::new(
                config.max_script_sleep,
            ))))
            .with(Arc::new(DelayExecutor))
            .with(Arc::new(NotificationExecutor::new(notifier)))
    }

    /// Register an executor under its supported kind, replacing any previous one
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(executor.supported_kind(), executor);
    }

    pub fn with(mut self, executor: Arc<dyn NodeExecutor>) -> Self {
        self.register(executor);
        self
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&kind).cloned()
    }

    /// Registered kinds in declaration order
    pub fn kinds(&self) -> Vec<NodeKind> {
        NodeKind::ALL
            .into_iter()
            .filter(|k| self.executors.contains_key(k))
            .collect()
    }
}
