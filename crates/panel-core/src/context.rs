//! Context store carried through an execution
//!
//! The `ContextStore` accumulates every node's output plus execution metadata.
//! Only the scheduler writes to it; node executors receive a read-only snapshot.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known metadata keys written by the engine
pub mod keys {
    /// Id of the running execution
    pub const EXECUTION_ID: &str = "execution_id";
    /// Id of the definition being run
    pub const DEFINITION_ID: &str = "definition_id";
    /// Version of the definition being run
    pub const DEFINITION_VERSION: &str = "definition_version";
    /// Progress in [0, 1]
    pub const PROGRESS: &str = "progress";
    /// Execution-level retry counter
    pub const RETRY_COUNT: &str = "retry_count";
    /// RFC 3339 timestamp recorded by the start node
    pub const STARTED_AT: &str = "started_at";
    /// Caller-supplied input map
    pub const INPUT: &str = "input";
}

/// Key-value store for node outputs and execution metadata
///
/// Values are JSON so that outputs of arbitrary node kinds can be merged and
/// later addressed by `${dotted.path}` placeholders.
///
/// # Example
///
/// ```
/// use panel_core::ContextStore;
/// use serde_json::json;
///
/// let mut ctx = ContextStore::new();
/// ctx.insert("analyst", json!({ "confidence": 0.7 }));
///
/// assert_eq!(ctx.lookup("analyst.confidence"), Some(&json!(0.7)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextStore {
    data: Map<String, Value>,
}

impl ContextStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from an existing JSON map
    pub fn from_map(data: Map<String, Value>) -> Self {
        Self { data }
    }

    /// Insert a value
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Get a top-level value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Resolve a dotted path such as `panel.debate.consensus_level`
    ///
    /// A full-key match wins over path traversal so keys that themselves contain
    /// dots (namespaced script outputs) stay addressable. Array segments accept
    /// numeric indices.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.data.get(path) {
            return Some(value);
        }

        let mut segments = path.split('.');
        let mut current = self.data.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Insert a typed value, serializing it to JSON first
    pub fn insert_typed<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> crate::Result<()> {
        let json_value = serde_json::to_value(value)?;
        self.data.insert(key.into(), json_value);
        Ok(())
    }

    /// Get a typed value, deserializing it from JSON
    pub fn get_typed<T: for<'de> Deserialize<'de>>(&self, key: &str) -> crate::Result<Option<T>> {
        match self.lookup(key) {
            None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Merge a node output into the store (incoming values override)
    pub fn merge(&mut self, output: Map<String, Value>) {
        self.data.extend(output);
    }

    /// Current progress metadata, 0.0 when unset
    pub fn progress(&self) -> f64 {
        self.get(keys::PROGRESS)
            .and_then(Value::as_f64)
            .unwrap_or_default()
    }

    /// Copy of the underlying map
    pub fn snapshot(&self) -> Map<String, Value> {
        self.data.clone()
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }
}
