//! Execution model and its state machine
//!
//! An `Execution` is the mutable run-time record of one instantiation of a
//! definition. It is written by exactly one scheduler task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

use crate::context::{ContextStore, keys};
use crate::definition::Definition;
use crate::error::{Error, Result};

/// Execution status
///
/// `PENDING -> RUNNING -> {COMPLETED, FAILED, CANCELLED, TIMEOUT}`, with
/// `RUNNING <-> PAUSED` as a side channel. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    /// Whether the state machine allows `self -> next`
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::{Cancelled, Completed, Failed, Paused, Pending, Running, Timeout};
        matches!(
            (self, next),
            (Pending, Running | Cancelled | Failed)
                | (Running, Paused | Completed | Failed | Cancelled | Timeout)
                | (Paused, Running | Failed | Cancelled | Timeout)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority, recorded for downstream collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Per-submission options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOptions {
    pub priority: Priority,
    /// Wall-clock budget; the engine default applies when unset
    pub timeout: Option<Duration>,
    /// Execution-level retries; the engine default applies when unset
    pub max_retries: Option<u32>,
    pub cancellable: bool,
    pub pausable: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            timeout: None,
            max_retries: None,
            cancellable: true,
            pausable: true,
        }
    }
}

impl ExecutionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn non_cancellable(mut self) -> Self {
        self.cancellable = false;
        self
    }

    pub fn non_pausable(mut self) -> Self {
        self.pausable = false;
        self
    }
}

/// Status of one node invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Running,
    Completed,
    Failed,
    /// Never reached, or on a branch that was not taken
    Skipped,
    /// In flight when the execution timed out or failed elsewhere
    Abandoned,
}

/// Record of one node invocation (loops produce several per node)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub status: NodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeRecord {
    pub fn started(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Running,
            started_at: Some(Utc::now()),
            ended_at: None,
            output: None,
            error: None,
        }
    }

    pub fn skipped(node_id: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Skipped,
            started_at: None,
            ..Self::started(node_id)
        }
    }

    /// Close the record with a final status
    pub fn finish(&mut self, status: NodeStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let (start, end) = (self.started_at?, self.ended_at?);
        u64::try_from((end - start).num_milliseconds()).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One entry of the execution log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
}

/// Failure detail surfaced to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(node_id) => write!(f, "{} (node '{node_id}')", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Run-time record of one workflow instantiation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub definition_id: String,
    pub definition_version: u32,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub input: Map<String, Value>,
    pub output: Option<Map<String, Value>>,
    pub context: ContextStore,
    pub node_records: Vec<NodeRecord>,
    pub logs: Vec<LogEntry>,
    pub error: Option<ExecutionError>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: Priority,
    pub timeout_ms: u64,
    pub cancellable: bool,
    pub pausable: bool,
    /// Execution this one retries, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,
}

impl Execution {
    /// Create a PENDING execution for a definition
    ///
    /// The context store is seeded with the input map and run metadata.
    pub fn new(
        definition: &Definition,
        input: Map<String, Value>,
        options: &ExecutionOptions,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();

        let mut context = ContextStore::from_map(input.clone());
        context.insert(keys::INPUT, Value::Object(input.clone()));
        context.insert(keys::EXECUTION_ID, Value::from(id.clone()));
        context.insert(keys::DEFINITION_ID, Value::from(definition.id.clone()));
        context.insert(keys::DEFINITION_VERSION, Value::from(definition.version));
        context.insert(keys::PROGRESS, Value::from(0.0));
        context.insert(keys::RETRY_COUNT, Value::from(0));

        Self {
            id,
            definition_id: definition.id.clone(),
            definition_version: definition.version,
            status: ExecutionStatus::Pending,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            input,
            output: None,
            context,
            node_records: Vec::new(),
            logs: Vec::new(),
            error: None,
            retry_count: 0,
            max_retries: options.max_retries.unwrap_or(max_retries),
            priority: options.priority,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            cancellable: options.cancellable,
            pausable: options.pausable,
            retry_of: None,
        }
    }

    /// Mark this execution as a retry of an earlier one
    pub fn as_retry_of(mut self, previous: &Execution) -> Self {
        self.retry_count = previous.retry_count + 1;
        self.max_retries = previous.max_retries;
        self.retry_of = Some(previous.id.clone());
        self.context
            .insert(keys::RETRY_COUNT, Value::from(self.retry_count));
        self
    }

    /// Apply a state-machine transition, stamping timestamps
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        if next == ExecutionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
            self.duration_ms = self
                .started_at
                .and_then(|start| u64::try_from((now - start).num_milliseconds()).ok());
        }
        self.status = next;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn progress(&self) -> f64 {
        self.context.progress()
    }

    pub fn set_progress(&mut self, progress: f64) {
        self.context
            .insert(keys::PROGRESS, Value::from(progress.clamp(0.0, 1.0)));
    }

    pub fn log(&mut self, level: LogLevel, node_id: Option<&str>, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level,
            node_id: node_id.map(str::to_string),
            message: message.into(),
        });
    }

    /// Records for one node, in invocation order
    pub fn records_for<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a NodeRecord> {
        self.node_records.iter().filter(move |r| r.node_id == node_id)
    }

    /// Whether the node ran to completion at least once
    pub fn node_completed(&self, node_id: &str) -> bool {
        self.records_for(node_id)
            .any(|r| r.status == NodeStatus::Completed)
    }

    pub fn can_retry(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Failed | ExecutionStatus::Timeout
        ) && self.retry_count < self.max_retries
    }
}
