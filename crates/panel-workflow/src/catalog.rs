//! Definition catalog and lifecycle
//!
//! Definitions enter as drafts. Activation runs the full validation pass and
//! is the only way to make a definition runnable; any edit bumps the version
//! and returns it to draft. Archived definitions reject new runs but stay
//! readable, so finished executions can still be traced back to them.

use panel_core::{Definition, DefinitionStats, DefinitionStatus, Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use crate::registry::ExecutorRegistry;
use crate::validation;

#[derive(Default)]
pub struct DefinitionCatalog {
    definitions: RwLock<HashMap<String, Arc<Definition>>>,
}

impl DefinitionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new definition as a draft
    pub fn register(&self, mut definition: Definition) -> Result<()> {
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if definitions.contains_key(&definition.id) {
            return Err(Error::Config(format!(
                "definition '{}' is already registered",
                definition.id
            )));
        }
        definition.status = DefinitionStatus::Draft;
        info!(definition_id = %definition.id, version = definition.version, "Definition registered");
        definitions.insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    /// Apply an edit; returns the new version
    pub fn edit(&self, id: &str, change: impl FnOnce(&mut Definition)) -> Result<u32> {
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = definitions
            .get_mut(id)
            .ok_or_else(|| Error::DefinitionNotFound(id.to_string()))?;

        let definition = Arc::make_mut(entry);
        change(definition);
        definition.id = id.to_string();
        definition.bump_version();
        Ok(definition.version)
    }

    /// Validate and activate; every issue found is returned at once
    pub fn activate(&self, id: &str, registry: &ExecutorRegistry) -> Result<()> {
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = definitions
            .get_mut(id)
            .ok_or_else(|| Error::DefinitionNotFound(id.to_string()))?;

        if entry.status == DefinitionStatus::Archived {
            return Err(Error::DefinitionNotActive {
                id: id.to_string(),
                status: entry.status.to_string(),
            });
        }

        let issues = validation::validate(entry, registry);
        if !issues.is_empty() {
            return Err(Error::Validation(issues));
        }

        Arc::make_mut(entry).status = DefinitionStatus::Active;
        info!(definition_id = %id, version = entry.version, "Definition activated");
        Ok(())
    }

    pub fn archive(&self, id: &str) -> Result<()> {
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = definitions
            .get_mut(id)
            .ok_or_else(|| Error::DefinitionNotFound(id.to_string()))?;
        Arc::make_mut(entry).status = DefinitionStatus::Archived;
        info!(definition_id = %id, "Definition archived");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Definition>> {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All definitions, sorted by id
    pub fn list(&self) -> Vec<Arc<Definition>> {
        let mut all: Vec<_> = self
            .definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Fold a finished run into the definition's statistics
    pub fn record_run(&self, id: &str, duration_ms: u64, succeeded: bool) -> Option<DefinitionStats> {
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let definition = Arc::make_mut(definitions.get_mut(id)?);
        definition.stats.record(duration_ms, succeeded);
        Some(definition.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{EndExecutor, StartExecutor};
    use panel_core::{Node, NodeKind};

    fn registry() -> ExecutorRegistry {
        ExecutorRegistry::new()
            .with(Arc::new(StartExecutor))
            .with(Arc::new(EndExecutor))
    }

    fn definition() -> Definition {
        Definition::new("wf", "Review")
            .node(Node::new("start", NodeKind::Start))
            .node(Node::new("end", NodeKind::End))
            .connect("start", "end")
    }

    #[test]
    fn test_lifecycle() {
        let catalog = DefinitionCatalog::new();
        catalog.register(definition()).unwrap();
        assert!(catalog.register(definition()).is_err());
        assert!(!catalog.get("wf").unwrap().is_runnable());

        catalog.activate("wf", &registry()).unwrap();
        assert!(catalog.get("wf").unwrap().is_runnable());

        let version = catalog
            .edit("wf", |d| d.name = "Review v2".to_string())
            .unwrap();
        assert_eq!(version, 2);
        let edited = catalog.get("wf").unwrap();
        assert_eq!(edited.status, DefinitionStatus::Draft);
        assert_eq!(edited.name, "Review v2");

        catalog.activate("wf", &registry()).unwrap();
        catalog.archive("wf").unwrap();
        assert!(matches!(
            catalog.activate("wf", &registry()),
            Err(Error::DefinitionNotActive { .. })
        ));
    }

    #[test]
    fn test_activation_reports_all_issues() {
        let catalog = DefinitionCatalog::new();
        catalog
            .register(
                Definition::new("broken", "Broken")
                    .node(Node::new("end", NodeKind::End))
                    .node(Node::new("end", NodeKind::End)),
            )
            .unwrap();

        match catalog.activate("broken", &registry()) {
            Err(Error::Validation(issues)) => assert_eq!(issues.len(), 2),
            other => panic!("Expected validation failure, got {other:?}"),
        }
        assert!(matches!(
            catalog.activate("missing", &registry()),
            Err(Error::DefinitionNotFound(_))
        ));
    }

    #[test]
    fn test_snapshots_survive_edits() {
        let catalog = DefinitionCatalog::new();
        catalog.register(definition()).unwrap();
        let before = catalog.get("wf").unwrap();

        catalog.edit("wf", |d| d.name = "Changed".to_string()).unwrap();
        assert_eq!(before.name, "Review");
        assert_eq!(before.version, 1);
    }

    #[test]
    fn test_record_run() {
        let catalog = DefinitionCatalog::new();
        catalog.register(definition()).unwrap();

        catalog.record_run("wf", 100, true);
        let stats = catalog.record_run("wf", 300, false).unwrap();

        assert_eq!(stats.usage_count, 2);
        assert!((stats.average_duration_ms - 200.0).abs() < f64::EPSILON);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
        assert!(catalog.record_run("missing", 1, true).is_none());
    }
}
