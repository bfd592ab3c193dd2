//! Workflow engine: admission, scheduling and the execution state machine
//!
//! Each admitted execution runs as one scheduler task. The task owns the
//! ready queue and the fan-in barriers; node invocations are spawned into a
//! `JoinSet` and bounded by the worker semaphore. Pause and cancel requests
//! arrive over a `watch` channel and are honoured between node invocations
//! only. The wall-clock budget is enforced with a deadline that aborts
//! in-flight invocations.

use panel_core::{
    Definition, Error, Execution, ExecutionError, ExecutionOptions, ExecutionStatus, GraphIndex,
    LogLevel, NodeKind, NodeRecord, NodeStatus, Result, RoleInvoker, ToolRegistry,
    ValidationErrors,
};
use panel_debate::DebateConfig;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::{Id as TaskId, JoinSet};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::catalog::DefinitionCatalog;
use crate::config::EngineConfig;
use crate::executor::{ExecutionMeta, NodeContext, NodeExecutionResult};
use crate::listener::ExecutionListener;
use crate::notify::NotificationDispatcher;
use crate::registry::ExecutorRegistry;
use crate::store::ExecutionStore;
use crate::validation;

/// Deadline used when a timeout budget does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Requested run state, set by the caller and read by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Cancel,
}

struct RunHandle {
    execution: Arc<Mutex<Execution>>,
    control: watch::Sender<Control>,
    status: watch::Receiver<ExecutionStatus>,
}

struct Inner {
    config: EngineConfig,
    registry: ExecutorRegistry,
    catalog: Arc<DefinitionCatalog>,
    listeners: Vec<Arc<dyn ExecutionListener>>,
    store: Option<Arc<dyn ExecutionStore>>,
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    runs: Mutex<HashMap<String, RunHandle>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs workflow definitions
///
/// Cheap to clone; clones share the same executions and capacity.
///
/// # Example
///
/// ```rust,ignore
/// let engine = WorkflowEngine::builder().roles(roles).build()?;
/// engine.register(definition)?;
/// engine.activate("review")?;
///
/// let id = engine.submit("review", input, ExecutionOptions::default())?;
/// let execution = engine.wait(&id).await?;
/// ```
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<Inner>,
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &Arc<DefinitionCatalog> {
        &self.inner.catalog
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.inner.registry
    }

    /// Register a draft definition
    pub fn register(&self, definition: Definition) -> Result<()> {
        self.inner.catalog.register(definition)
    }

    /// Validate against this engine's executors and activate
    pub fn activate(&self, definition_id: &str) -> Result<()> {
        self.inner
            .catalog
            .activate(definition_id, &self.inner.registry)
    }

    /// Validate a definition without registering it
    pub fn validate(&self, definition: &Definition) -> ValidationErrors {
        validation::validate(definition, &self.inner.registry)
    }

    /// Executions currently holding a capacity slot (running or paused)
    pub fn running_count(&self) -> usize {
        self.inner
            .config
            .max_concurrent_executions
            .saturating_sub(self.inner.admission.available_permits())
    }

    /// Admit and start an execution of an active definition
    ///
    /// Returns the execution id once the execution is RUNNING. Fails
    /// immediately with [`Error::Capacity`] when the concurrency ceiling is
    /// reached; nothing is queued.
    pub fn submit(
        &self,
        definition_id: &str,
        input: Map<String, Value>,
        options: ExecutionOptions,
    ) -> Result<String> {
        let definition = self.runnable_definition(definition_id)?;

        let issues = definition.check_inputs(&input);
        if !issues.is_empty() {
            return Err(Error::Validation(ValidationErrors(issues)));
        }

        let permit = self.admit()?;
        let timeout = options.timeout.unwrap_or(self.inner.config.default_timeout);
        let execution = Execution::new(
            &definition,
            input,
            &options,
            timeout,
            self.inner.config.default_max_retries,
        );
        self.launch(definition, execution, permit)
    }

    /// Re-submit a failed or timed-out execution with the same input
    ///
    /// Waits `retry_backoff(retry_count)` first. The new execution gets a
    /// fresh id and `retry_count + 1`.
    pub async fn retry(&self, execution_id: &str) -> Result<String> {
        let previous = self
            .get(execution_id)
            .ok_or_else(|| Error::ExecutionNotFound(execution_id.to_string()))?;

        if !matches!(
            previous.status,
            ExecutionStatus::Failed | ExecutionStatus::Timeout
        ) {
            return Err(Error::InvalidTransition {
                from: previous.status.to_string(),
                to: ExecutionStatus::Pending.to_string(),
            });
        }
        if !previous.can_retry() {
            return Err(Error::RetryExhausted {
                execution_id: previous.id.clone(),
                max_retries: previous.max_retries,
            });
        }

        let backoff = self.inner.config.retry_backoff(previous.retry_count);
        info!(
            execution_id = %previous.id,
            attempt = previous.retry_count + 1,
            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            "Retrying execution"
        );
        tokio::time::sleep(backoff).await;

        let definition = self.runnable_definition(&previous.definition_id)?;
        let permit = self.admit()?;
        let options = ExecutionOptions {
            priority: previous.priority,
            timeout: Some(previous.timeout()),
            max_retries: Some(previous.max_retries),
            cancellable: previous.cancellable,
            pausable: previous.pausable,
        };
        let execution = Execution::new(
            &definition,
            previous.input.clone(),
            &options,
            previous.timeout(),
            previous.max_retries,
        )
        .as_retry_of(&previous);
        self.launch(definition, execution, permit)
    }

    /// Request a pause; takes effect once in-flight nodes return
    pub fn pause(&self, execution_id: &str) -> Result<()> {
        self.request(execution_id, ExecutionStatus::Paused, |execution, control| {
            if !execution.pausable {
                return Err(Error::Generic(format!(
                    "execution {} is not pausable",
                    execution.id
                )));
            }
            match (execution.status, control) {
                (ExecutionStatus::Running, Control::Run) => Ok(Control::Pause),
                _ => Err(Error::InvalidTransition {
                    from: execution.status.to_string(),
                    to: ExecutionStatus::Paused.to_string(),
                }),
            }
        })
    }

    /// Resume a paused execution, or withdraw a pending pause request
    pub fn resume(&self, execution_id: &str) -> Result<()> {
        self.request(execution_id, ExecutionStatus::Running, |execution, control| {
            let paused = execution.status == ExecutionStatus::Paused;
            let pausing = execution.status == ExecutionStatus::Running && control == Control::Pause;
            if paused || pausing {
                Ok(Control::Run)
            } else {
                Err(Error::InvalidTransition {
                    from: execution.status.to_string(),
                    to: ExecutionStatus::Running.to_string(),
                })
            }
        })
    }

    /// Request cancellation; takes effect once in-flight nodes return
    pub fn cancel(&self, execution_id: &str) -> Result<()> {
        self.request(execution_id, ExecutionStatus::Cancelled, |execution, _| {
            if execution.status.is_terminal() {
                return Err(Error::InvalidTransition {
                    from: execution.status.to_string(),
                    to: ExecutionStatus::Cancelled.to_string(),
                });
            }
            if !execution.cancellable {
                return Err(Error::Generic(format!(
                    "execution {} is not cancellable",
                    execution.id
                )));
            }
            Ok(Control::Cancel)
        })
    }

    /// Snapshot of an execution
    pub fn get(&self, execution_id: &str) -> Option<Execution> {
        let runs = lock(&self.inner.runs);
        runs.get(execution_id)
            .map(|handle| lock(&handle.execution).clone())
    }

    /// Ids of all executions this engine has admitted
    pub fn execution_ids(&self) -> Vec<String> {
        lock(&self.inner.runs).keys().cloned().collect()
    }

    /// Wait until the execution reaches a terminal state
    pub async fn wait(&self, execution_id: &str) -> Result<Execution> {
        self.wait_until(execution_id, ExecutionStatus::is_terminal)
            .await
    }

    /// Wait until the execution reports `status`
    ///
    /// Fails if the execution ends in a different terminal state first.
    pub async fn wait_for_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
    ) -> Result<Execution> {
        let execution = self
            .wait_until(execution_id, |s| *s == status || s.is_terminal())
            .await?;
        if execution.status == status {
            Ok(execution)
        } else {
            Err(Error::InvalidTransition {
                from: execution.status.to_string(),
                to: status.to_string(),
            })
        }
    }

    async fn wait_until(
        &self,
        execution_id: &str,
        reached: impl FnMut(&ExecutionStatus) -> bool,
    ) -> Result<Execution> {
        let mut status = lock(&self.inner.runs)
            .get(execution_id)
            .map(|handle| handle.status.clone())
            .ok_or_else(|| Error::ExecutionNotFound(execution_id.to_string()))?;

        status
            .wait_for(reached)
            .await
            .map(|_| ())
            .map_err(|_| Error::Generic(format!("execution {execution_id} was dropped")))?;

        self.get(execution_id)
            .ok_or_else(|| Error::ExecutionNotFound(execution_id.to_string()))
    }

    fn request(
        &self,
        execution_id: &str,
        target: ExecutionStatus,
        decide: impl FnOnce(&Execution, Control) -> Result<Control>,
    ) -> Result<()> {
        let runs = lock(&self.inner.runs);
        let handle = runs
            .get(execution_id)
            .ok_or_else(|| Error::ExecutionNotFound(execution_id.to_string()))?;

        let control = *handle.control.borrow();
        let next = {
            let execution = lock(&handle.execution);
            decide(&execution, control)?
        };
        debug!(execution_id = %execution_id, target = %target, "Control request accepted");
        handle.control.send_replace(next);
        Ok(())
    }

    fn runnable_definition(&self, definition_id: &str) -> Result<Arc<Definition>> {
        let definition = self
            .inner
            .catalog
            .get(definition_id)
            .ok_or_else(|| Error::DefinitionNotFound(definition_id.to_string()))?;
        if !definition.is_runnable() {
            return Err(Error::DefinitionNotActive {
                id: definition.id.clone(),
                status: definition.status.to_string(),
            });
        }
        let issues = validation::validate(&definition, &self.inner.registry);
        if !issues.is_empty() {
            return Err(Error::Validation(issues));
        }
        Ok(definition)
    }

    fn admit(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.inner.admission)
            .try_acquire_owned()
            .map_err(|_| {
                let ceiling = self.inner.config.max_concurrent_executions;
                warn!(ceiling, "Execution rejected, capacity reached");
                Error::Capacity {
                    running: self.running_count(),
                    ceiling,
                }
            })
    }

    fn launch(
        &self,
        definition: Arc<Definition>,
        mut execution: Execution,
        permit: OwnedSemaphorePermit,
    ) -> Result<String> {
        execution.transition(ExecutionStatus::Running)?;
        execution.log(LogLevel::Info, None, "execution started");
        let execution_id = execution.id.clone();

        let execution = Arc::new(Mutex::new(execution));
        let (control_tx, control_rx) = watch::channel(Control::Run);
        let (status_tx, status_rx) = watch::channel(ExecutionStatus::Running);

        lock(&self.inner.runs).insert(
            execution_id.clone(),
            RunHandle {
                execution: Arc::clone(&execution),
                control: control_tx,
                status: status_rx,
            },
        );

        info!(
            execution_id = %execution_id,
            definition_id = %definition.id,
            version = definition.version,
            "Execution admitted"
        );

        let run = Run::new(
            Arc::clone(&self.inner),
            definition,
            execution,
            control_rx,
            status_tx,
            permit,
        );
        tokio::spawn(run.drive());
        Ok(execution_id)
    }
}

/// How a run ended
struct Ending {
    status: ExecutionStatus,
    error: Option<ExecutionError>,
}

impl Ending {
    fn completed() -> Self {
        Self {
            status: ExecutionStatus::Completed,
            error: None,
        }
    }

    fn with_error(status: ExecutionStatus, message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self {
            status,
            error: Some(ExecutionError {
                message: message.into(),
                node_id: node_id.map(str::to_string),
            }),
        }
    }
}

/// Scheduler state for one execution
struct Run {
    inner: Arc<Inner>,
    definition: Arc<Definition>,
    graph: GraphIndex,
    execution: Arc<Mutex<Execution>>,
    control: watch::Receiver<Control>,
    status: watch::Sender<ExecutionStatus>,
    deadline: Instant,
    ready: VecDeque<usize>,
    /// Forward arrivals per node since it last fired
    arrivals: Vec<usize>,
    /// Whether any arrival since the node last fired was a taken connection
    activated: Vec<bool>,
    in_flight: JoinSet<Result<NodeExecutionResult>>,
    /// Task id to (node index, record position)
    tasks: HashMap<TaskId, (usize, usize)>,
    completed_nodes: HashSet<usize>,
    end_reached: bool,
    output: Map<String, Value>,
    invocations: usize,
    /// Capacity slot, held until the run is terminal (also while paused)
    permit: Option<OwnedSemaphorePermit>,
}

impl Run {
    fn new(
        inner: Arc<Inner>,
        definition: Arc<Definition>,
        execution: Arc<Mutex<Execution>>,
        control: watch::Receiver<Control>,
        status: watch::Sender<ExecutionStatus>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        let graph = GraphIndex::build(&definition);
        let now = Instant::now();
        let deadline = now
            .checked_add(lock(&execution).timeout())
            .unwrap_or_else(|| now + FAR_FUTURE);
        let len = graph.len();
        Self {
            inner,
            definition,
            graph,
            execution,
            control,
            status,
            deadline,
            ready: VecDeque::new(),
            arrivals: vec![0; len],
            activated: vec![false; len],
            in_flight: JoinSet::new(),
            tasks: HashMap::new(),
            completed_nodes: HashSet::new(),
            end_reached: false,
            output: Map::new(),
            invocations: 0,
            permit: Some(permit),
        }
    }

    fn execution_id(&self) -> String {
        lock(&self.execution).id.clone()
    }

    fn snapshot(&self) -> Execution {
        lock(&self.execution).clone()
    }

    async fn drive(mut self) {
        let started = self.snapshot();
        for listener in &self.inner.listeners {
            listener.on_started(&started).await;
        }

        let ending = match self.graph.start() {
            Some(start) => {
                self.ready.push_back(start);
                self.schedule().await
            }
            None => Ending::with_error(ExecutionStatus::Failed, "definition has no start node", None),
        };
        self.finish(ending).await;
    }

    async fn schedule(&mut self) -> Ending {
        loop {
            let control = *self.control.borrow_and_update();

            if self.in_flight.is_empty() {
                match control {
                    Control::Cancel => {
                        return Ending::with_error(
                            ExecutionStatus::Cancelled,
                            Error::Cancelled {
                                execution_id: self.execution_id(),
                            }
                            .to_string(),
                            None,
                        );
                    }
                    Control::Pause => {
                        if let Some(ending) = self.hold().await {
                            return ending;
                        }
                        continue;
                    }
                    Control::Run => {}
                }
            }

            if control == Control::Run {
                while let Some(node) = self.ready.pop_front() {
                    if let Err(ending) = self.spawn(node).await {
                        return ending;
                    }
                }
            }

            if self.in_flight.is_empty() {
                if self.end_reached {
                    return Ending::completed();
                }
                return Ending::with_error(ExecutionStatus::Failed, "no end node was reached", None);
            }

            tokio::select! {
                () = sleep_until(self.deadline) => {
                    return self.time_out();
                }
                Some(joined) = self.in_flight.join_next_with_id() => {
                    let (task, outcome) = match joined {
                        Ok((task, outcome)) => (task, outcome),
                        Err(e) => (e.id(), Err(Error::Generic(format!("node task failed: {e}")))),
                    };
                    if let Some(ending) = self.complete(task, outcome).await {
                        return ending;
                    }
                }
                Ok(()) = self.control.changed() => {}
            }
        }
    }

    /// Sit in PAUSED until resumed, cancelled or out of time
    async fn hold(&mut self) -> Option<Ending> {
        let paused = {
            let mut execution = lock(&self.execution);
            if let Err(e) = execution.transition(ExecutionStatus::Paused) {
                warn!(error = %e, "Pause ignored");
                return None;
            }
            execution.log(LogLevel::Info, None, "execution paused");
            execution.clone()
        };
        self.status.send_replace(ExecutionStatus::Paused);
        info!(execution_id = %paused.id, "Execution paused");
        for listener in &self.inner.listeners {
            listener.on_paused(&paused).await;
        }

        loop {
            tokio::select! {
                () = sleep_until(self.deadline) => return Some(self.time_out()),
                changed = self.control.changed() => {
                    if changed.is_err() {
                        sleep_until(self.deadline).await;
                        return Some(self.time_out());
                    }
                    match *self.control.borrow_and_update() {
                        Control::Pause => {}
                        Control::Cancel => {
                            return Some(Ending::with_error(
                                ExecutionStatus::Cancelled,
                                Error::Cancelled { execution_id: paused.id.clone() }.to_string(),
                                None,
                            ));
                        }
                        Control::Run => break,
                    }
                }
            }
        }

        let resumed = {
            let mut execution = lock(&self.execution);
            if let Err(e) = execution.transition(ExecutionStatus::Running) {
                warn!(error = %e, "Resume ignored");
            }
            execution.log(LogLevel::Info, None, "execution resumed");
            execution.clone()
        };
        self.status.send_replace(ExecutionStatus::Running);
        info!(execution_id = %resumed.id, "Execution resumed");
        for listener in &self.inner.listeners {
            listener.on_resumed(&resumed).await;
        }
        None
    }

    async fn spawn(&mut self, index: usize) -> std::result::Result<(), Ending> {
        let node = self.definition.nodes[index].clone();

        self.invocations += 1;
        if self.invocations > self.inner.config.max_node_executions {
            return Err(Ending::with_error(
                ExecutionStatus::Failed,
                format!(
                    "node invocation limit of {} reached, the graph may loop forever",
                    self.inner.config.max_node_executions
                ),
                Some(&node.id),
            ));
        }

        let Some(executor) = self.inner.registry.get(node.kind) else {
            return Err(Ending::with_error(
                ExecutionStatus::Failed,
                format!("no executor registered for kind '{}'", node.kind),
                Some(&node.id),
            ));
        };

        let (ctx, record_position, execution_id) = {
            let mut execution = lock(&self.execution);
            let ctx = NodeContext {
                definition: Arc::clone(&self.definition),
                execution: ExecutionMeta {
                    execution_id: execution.id.clone(),
                    definition_id: execution.definition_id.clone(),
                    definition_version: execution.definition_version,
                    retry_count: execution.retry_count,
                    started_at: execution.started_at,
                },
                node: node.clone(),
                context: Arc::new(execution.context.clone()),
            };
            execution.node_records.push(NodeRecord::started(&node.id));
            execution.log(LogLevel::Debug, Some(&node.id), "node started");
            (ctx, execution.node_records.len() - 1, execution.id.clone())
        };

        debug!(execution_id = %execution_id, node_id = %node.id, kind = %node.kind, "Node started");
        for listener in &self.inner.listeners {
            listener.on_node_started(&execution_id, &node).await;
        }

        let workers = executor
            .uses_worker()
            .then(|| Arc::clone(&self.inner.workers));
        let task = self.in_flight.spawn(async move {
            let _slot = match workers {
                Some(workers) => Some(
                    workers
                        .acquire_owned()
                        .await
                        .map_err(|e| Error::Generic(format!("worker pool closed: {e}")))?,
                ),
                None => None,
            };
            executor.execute(&ctx).await
        });
        self.tasks.insert(task.id(), (index, record_position));
        Ok(())
    }

    async fn complete(
        &mut self,
        task: TaskId,
        outcome: Result<NodeExecutionResult>,
    ) -> Option<Ending> {
        let (index, record_position) = self.tasks.remove(&task)?;
        let node_id = self.definition.nodes[index].id.clone();

        let result = match outcome {
            Ok(result) if result.success => result,
            Ok(result) => {
                let message = result
                    .error
                    .unwrap_or_else(|| "node reported failure".to_string());
                return Some(self.fail_node(index, record_position, message).await);
            }
            Err(e) => return Some(self.fail_node(index, record_position, e.to_string()).await),
        };

        if self.graph.kind(index) == NodeKind::End {
            self.end_reached = true;
            let key = self.definition.nodes[index].output_key();
            if let Some(Value::Object(snapshot)) = result.output.get(key) {
                self.output.extend(snapshot.clone());
            }
        }

        self.completed_nodes.insert(index);
        let (record, execution_id) = {
            let mut execution = lock(&self.execution);
            execution.context.merge(result.output.clone());

            #[allow(clippy::cast_precision_loss)]
            let fraction = self.completed_nodes.len() as f64 / self.graph.len().max(1) as f64;
            let progress = execution.progress().max(fraction).min(0.99);
            execution.set_progress(progress);

            let record = &mut execution.node_records[record_position];
            record.finish(NodeStatus::Completed);
            record.output = Some(result.output.clone());
            let record = record.clone();
            execution.log(LogLevel::Debug, Some(&node_id), "node completed");
            (record, execution.id.clone())
        };

        debug!(
            execution_id = %execution_id,
            node_id = %node_id,
            duration_ms = record.duration_ms().unwrap_or_default(),
            "Node completed"
        );
        for listener in &self.inner.listeners {
            listener.on_node_finished(&execution_id, &record).await;
        }

        self.propagate(index, result.branch);
        None
    }

    /// Follow outgoing connections after `index` completed
    fn propagate(&mut self, index: usize, branch: Option<bool>) {
        let outgoing = self.graph.outgoing(index).to_vec();
        for conn in outgoing {
            let Some(target) = self.graph.target(conn) else {
                continue;
            };
            let taken = self.definition.connections[conn].is_taken(branch);
            if self.graph.is_back_edge(conn) {
                if taken {
                    self.arrivals[target] = 0;
                    self.activated[target] = false;
                    self.ready.push_back(target);
                }
                continue;
            }
            self.arrive(target, taken);
        }
    }

    /// Count one forward arrival at a fan-in barrier
    ///
    /// A node fires once every forward predecessor has either completed or
    /// been skipped. If none of the arrivals was a taken connection the node
    /// is skipped too, and the skip travels on along its forward edges.
    fn arrive(&mut self, target: usize, taken: bool) {
        let mut pending = vec![(target, taken)];
        while let Some((node, taken)) = pending.pop() {
            self.arrivals[node] += 1;
            self.activated[node] |= taken;
            if self.arrivals[node] < self.graph.forward_in_degree(node) {
                continue;
            }

            self.arrivals[node] = 0;
            if std::mem::take(&mut self.activated[node]) {
                self.ready.push_back(node);
                continue;
            }

            let node_id = &self.definition.nodes[node].id;
            lock(&self.execution)
                .node_records
                .push(NodeRecord::skipped(node_id));
            for &conn in self.graph.outgoing(node) {
                if self.graph.is_back_edge(conn) {
                    continue;
                }
                if let Some(next) = self.graph.target(conn) {
                    pending.push((next, false));
                }
            }
        }
    }

    async fn fail_node(&mut self, index: usize, record_position: usize, message: String) -> Ending {
        let node_id = self.definition.nodes[index].id.clone();
        let (record, execution_id) = {
            let mut execution = lock(&self.execution);
            let record = &mut execution.node_records[record_position];
            record.finish(NodeStatus::Failed);
            record.error = Some(message.clone());
            let record = record.clone();
            execution.log(LogLevel::Error, Some(&node_id), message.clone());
            (record, execution.id.clone())
        };

        error!(execution_id = %execution_id, node_id = %node_id, error = %message, "Node failed");
        for listener in &self.inner.listeners {
            listener.on_node_finished(&execution_id, &record).await;
        }

        self.abandon_in_flight();
        Ending::with_error(
            ExecutionStatus::Failed,
            Error::node(&node_id, &message).to_string(),
            Some(&node_id),
        )
    }

    fn time_out(&mut self) -> Ending {
        self.abandon_in_flight();
        let (execution_id, budget_ms) = {
            let execution = lock(&self.execution);
            (execution.id.clone(), execution.timeout_ms)
        };
        Ending::with_error(
            ExecutionStatus::Timeout,
            Error::Timeout {
                execution_id,
                budget_ms,
            }
            .to_string(),
            None,
        )
    }

    /// Abort in-flight invocations and mark their records abandoned
    fn abandon_in_flight(&mut self) {
        self.in_flight.abort_all();
        let mut execution = lock(&self.execution);
        for (_, (_, record_position)) in self.tasks.drain() {
            execution.node_records[record_position].finish(NodeStatus::Abandoned);
        }
    }

    async fn finish(mut self, ending: Ending) {
        self.abandon_in_flight();
        let status = ending.status;

        let finished = {
            let mut execution = lock(&self.execution);

            let reached: HashSet<String> = execution
                .node_records
                .iter()
                .map(|r| r.node_id.clone())
                .collect();
            for node in &self.definition.nodes {
                if !reached.contains(&node.id) {
                    execution.node_records.push(NodeRecord::skipped(&node.id));
                }
            }

            if status == ExecutionStatus::Completed {
                execution.output = Some(std::mem::take(&mut self.output));
                execution.set_progress(1.0);
            }
            if let Some(error) = ending.error {
                let level = if status == ExecutionStatus::Cancelled {
                    LogLevel::Info
                } else {
                    LogLevel::Error
                };
                execution.log(level, error.node_id.as_deref(), error.message.clone());
                execution.error = Some(error);
            }
            if let Err(e) = execution.transition(status) {
                warn!(execution_id = %execution.id, error = %e, "Final transition rejected");
            }
            execution.clone()
        };

        info!(
            execution_id = %finished.id,
            status = %finished.status,
            duration_ms = finished.duration_ms.unwrap_or_default(),
            "Execution finished"
        );

        for listener in &self.inner.listeners {
            match finished.status {
                ExecutionStatus::Completed => listener.on_completed(&finished).await,
                ExecutionStatus::Failed => listener.on_failed(&finished).await,
                ExecutionStatus::Cancelled => listener.on_cancelled(&finished).await,
                ExecutionStatus::Timeout => listener.on_timeout(&finished).await,
                _ => {}
            }
        }

        let stats = self.inner.catalog.record_run(
            &finished.definition_id,
            finished.duration_ms.unwrap_or_default(),
            finished.status == ExecutionStatus::Completed,
        );
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.save_execution(&finished).await {
                warn!(execution_id = %finished.id, error = %e, "Failed to persist execution");
            }
            if let Some(stats) = stats {
                if let Err(e) = store
                    .save_definition_stats(&finished.definition_id, &stats)
                    .await
                {
                    warn!(definition_id = %finished.definition_id, error = %e, "Failed to persist statistics");
                }
            }
        }

        self.permit.take();
        self.status.send_replace(finished.status);
    }
}

/// Builder for [`WorkflowEngine`]
///
/// Either a role invoker or a complete executor registry must be provided.
pub struct WorkflowEngineBuilder {
    config: EngineConfig,
    debate: DebateConfig,
    roles: Option<Arc<dyn RoleInvoker>>,
    tools: Arc<ToolRegistry>,
    notifier: Option<Arc<NotificationDispatcher>>,
    registry: Option<ExecutorRegistry>,
    catalog: Arc<DefinitionCatalog>,
    listeners: Vec<Arc<dyn ExecutionListener>>,
    store: Option<Arc<dyn ExecutionStore>>,
}

impl WorkflowEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            debate: DebateConfig::default(),
            roles: None,
            tools: Arc::new(ToolRegistry::new()),
            notifier: None,
            registry: None,
            catalog: Arc::new(DefinitionCatalog::new()),
            listeners: Vec::new(),
            store: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn debate_config(mut self, debate: DebateConfig) -> Self {
        self.debate = debate;
        self
    }

    /// Set the role collaborator
    pub fn roles(mut self, roles: Arc<dyn RoleInvoker>) -> Self {
        self.roles = Some(roles);
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    /// Replace the default dispatcher (system and webhook channels)
    pub fn notifier(mut self, notifier: Arc<NotificationDispatcher>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replace the standard executors entirely
    pub fn registry(mut self, registry: ExecutorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share a catalog between engines
    pub fn catalog(mut self, catalog: Arc<DefinitionCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<WorkflowEngine> {
        self.config.validate()?;
        self.debate.validate()?;

        let registry = match self.registry {
            Some(registry) => registry,
            None => {
                let roles = self
                    .roles
                    .ok_or_else(|| Error::Config("role invoker not set".to_string()))?;
                let notifier = match self.notifier {
                    Some(notifier) => notifier,
                    None => Arc::new(NotificationDispatcher::standard(
                        self.config.webhook_timeout,
                    )?),
                };
                ExecutorRegistry::standard(roles, self.tools, notifier, &self.config, self.debate)
            }
        };

        let inner = Inner {
            admission: Arc::new(Semaphore::new(self.config.max_concurrent_executions)),
            workers: Arc::new(Semaphore::new(self.config.worker_pool_size)),
            config: self.config,
            registry,
            catalog: self.catalog,
            listeners: self.listeners,
            store: self.store,
            runs: Mutex::new(HashMap::new()),
        };
        Ok(WorkflowEngine {
            inner: Arc::new(inner),
        })
    }
}

impl Default for WorkflowEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use mockall::mock;
    use panel_core::{Node, RoleAssessment, RoleRequest};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tokio_test::{assert_err, assert_ok};

    mock! {
        pub Roles {}

        #[async_trait]
        impl RoleInvoker for Roles {
            async fn invoke(&self, request: RoleRequest) -> panel_core::Result<RoleAssessment>;
        }
    }

    /// Role that blocks until released, for timing-sensitive tests
    struct Gate {
        release: Notify,
        calls: AtomicUsize,
    }

    impl Gate {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                release: Notify::new(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RoleInvoker for Gate {
        async fn invoke(&self, request: RoleRequest) -> panel_core::Result<RoleAssessment> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(RoleAssessment::new(request.role_id, "buy", 0.8, "Gate opened"))
        }
    }

    #[derive(Default)]
    struct Counting {
        started: AtomicUsize,
        completed: AtomicUsize,
        failed: AtomicUsize,
        cancelled: AtomicUsize,
        paused: AtomicUsize,
        resumed: AtomicUsize,
        timeout: AtomicUsize,
    }

    impl Counting {
        fn get(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExecutionListener for Counting {
        async fn on_started(&self, _execution: &Execution) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_completed(&self, _execution: &Execution) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_failed(&self, _execution: &Execution) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_cancelled(&self, _execution: &Execution) {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_paused(&self, _execution: &Execution) {
            self.paused.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_resumed(&self, _execution: &Execution) {
            self.resumed.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_timeout(&self, _execution: &Execution) {
            self.timeout.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn analyst_review() -> Definition {
        Definition::new("review", "Analyst review")
            .node(Node::new("start", NodeKind::Start))
            .node(Node::new("analysis", NodeKind::RoleInvocation).with_config("role", json!("technical")))
            .node(Node::new("end", NodeKind::End))
            .connect("start", "analysis")
            .connect("analysis", "end")
    }

    fn engine_with(
        roles: Arc<dyn RoleInvoker>,
        config: EngineConfig,
        listener: Arc<Counting>,
    ) -> WorkflowEngine {
        WorkflowEngine::builder()
            .config(config)
            .roles(roles)
            .listener(listener)
            .build()
            .unwrap()
    }

    fn deploy(engine: &WorkflowEngine, definition: Definition) {
        let id = definition.id.clone();
        engine.register(definition).unwrap();
        engine.activate(&id).unwrap();
    }

    fn succeeding_roles() -> Arc<MockRoles> {
        let mut roles = MockRoles::new();
        roles
            .expect_invoke()
            .returning(|r| Ok(RoleAssessment::new(r.role_id, "buy", 0.8, "Momentum")));
        Arc::new(roles)
    }

    #[tokio::test]
    async fn test_three_node_run_completes() {
        let listener = Arc::new(Counting::default());
        let store = Arc::new(InMemoryStore::new());
        let engine = WorkflowEngine::builder()
            .roles(succeeding_roles())
            .listener(listener.clone())
            .store(store.clone())
            .build()
            .unwrap();
        deploy(&engine, analyst_review());

        let id = engine
            .submit("review", Map::new(), ExecutionOptions::default())
            .unwrap();
        let execution = engine.wait(&id).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        let output = execution.output.as_ref().unwrap();
        assert_eq!(output["analysis"]["recommendation"], json!("buy"));
        assert!((execution.context.progress() - 1.0).abs() < f64::EPSILON);
        assert!(execution.node_completed("end"));

        assert_eq!(Counting::get(&listener.started), 1);
        assert_eq!(Counting::get(&listener.completed), 1);
        assert_eq!(store.execution(&id).map(|e| e.status), Some(ExecutionStatus::Completed));
        assert_eq!(store.stats("review").map(|s| s.usage_count), Some(1));
        assert_eq!(engine.running_count(), 0);
    }

    #[tokio::test]
    async fn test_role_failure_fails_execution() {
        let mut roles = MockRoles::new();
        roles.expect_invoke().returning(|r| {
            Err(Error::Role {
                role_id: r.role_id,
                message: "provider unavailable".to_string(),
            })
        });
        let listener = Arc::new(Counting::default());
        let engine = engine_with(Arc::new(roles), EngineConfig::default(), listener.clone());
        deploy(&engine, analyst_review());

        let id = engine
            .submit("review", Map::new(), ExecutionOptions::default())
            .unwrap();
        let execution = engine.wait(&id).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        let error = execution.error.clone().unwrap();
        assert_eq!(error.node_id.as_deref(), Some("analysis"));
        assert!(error.message.contains("provider unavailable"));
        assert!(!execution.node_completed("end"));
        assert!(execution.records_for("end").all(|r| r.status == NodeStatus::Skipped));
        assert_eq!(Counting::get(&listener.failed), 1);
        assert_eq!(Counting::get(&listener.completed), 0);
    }

    #[tokio::test]
    async fn test_empty_definition_never_runs() {
        let engine = engine_with(
            succeeding_roles(),
            EngineConfig::default(),
            Arc::new(Counting::default()),
        );
        engine.register(Definition::new("empty", "Empty")).unwrap();

        let err = engine.activate("empty").unwrap_err();
        assert!(matches!(err, Error::Validation(ref issues) if issues.len() == 1));

        let err = engine
            .submit("empty", Map::new(), ExecutionOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::DefinitionNotActive { .. }));
        assert!(engine.execution_ids().is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_input() {
        let engine = engine_with(
            succeeding_roles(),
            EngineConfig::default(),
            Arc::new(Counting::default()),
        );
        deploy(
            &engine,
            analyst_review().input(panel_core::ParameterSpec::required("symbol", "string")),
        );

        let err = engine
            .submit("review", Map::new(), ExecutionOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_capacity_ceiling_rejects_immediately() {
        let gate = Gate::new();
        let config = EngineConfig::builder()
            .max_concurrent_executions(2)
            .build()
            .unwrap();
        let engine = engine_with(gate.clone(), config, Arc::new(Counting::default()));
        deploy(&engine, analyst_review());

        let first = assert_ok!(engine.submit("review", Map::new(), ExecutionOptions::default()));
        let second = assert_ok!(engine.submit("review", Map::new(), ExecutionOptions::default()));
        let third = engine.submit("review", Map::new(), ExecutionOptions::default());

        assert!(matches!(third, Err(Error::Capacity { running: 2, ceiling: 2 })));
        assert_eq!(engine.running_count(), 2);
        for id in [&first, &second] {
            assert_eq!(engine.get(id).map(|e| e.status), Some(ExecutionStatus::Running));
        }

        while gate.calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        gate.release.notify_waiters();
        engine.wait(&first).await.unwrap();
        engine.wait(&second).await.unwrap();

        assert_eq!(engine.running_count(), 0);
        assert_ok!(engine.submit("review", Map::new(), ExecutionOptions::default()));
    }

    #[tokio::test]
    async fn test_cancel_fires_once() {
        let gate = Gate::new();
        let listener = Arc::new(Counting::default());
        let engine = engine_with(gate.clone(), EngineConfig::default(), listener.clone());
        deploy(&engine, analyst_review());

        let id = engine
            .submit("review", Map::new(), ExecutionOptions::default())
            .unwrap();
        while gate.calls.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }

        engine.cancel(&id).unwrap();
        gate.release.notify_waiters();
        let execution = engine.wait(&id).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert!(!execution.node_completed("end"));
        assert_eq!(Counting::get(&listener.cancelled), 1);
        assert_eq!(Counting::get(&listener.completed), 0);
        assert_err!(engine.cancel(&id));
    }

    #[tokio::test]
    async fn test_non_cancellable_execution() {
        let gate = Gate::new();
        let engine = engine_with(gate.clone(), EngineConfig::default(), Arc::new(Counting::default()));
        deploy(&engine, analyst_review());

        let id = engine
            .submit("review", Map::new(), ExecutionOptions::default().non_cancellable())
            .unwrap();
        assert!(matches!(engine.cancel(&id), Err(Error::Generic(_))));

        while gate.calls.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }
        gate.release.notify_waiters();
        let execution = engine.wait(&id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let gate = Gate::new();
        let listener = Arc::new(Counting::default());
        let engine = engine_with(gate.clone(), EngineConfig::default(), listener.clone());
        deploy(&engine, analyst_review());

        let id = engine
            .submit("review", Map::new(), ExecutionOptions::default())
            .unwrap();
        while gate.calls.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }

        engine.pause(&id).unwrap();
        gate.release.notify_waiters();
        let paused = engine
            .wait_for_status(&id, ExecutionStatus::Paused)
            .await
            .unwrap();
        assert!(paused.node_completed("analysis"));
        assert!(!paused.node_completed("end"));
        assert_eq!(engine.running_count(), 1);

        engine.resume(&id).unwrap();
        let execution = engine.wait(&id).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(Counting::get(&listener.paused), 1);
        assert_eq!(Counting::get(&listener.resumed), 1);
        assert_eq!(Counting::get(&listener.completed), 1);
        assert_err!(engine.resume(&id));
    }

    #[tokio::test]
    async fn test_cancel_while_paused() {
        let gate = Gate::new();
        let listener = Arc::new(Counting::default());
        let engine = engine_with(gate.clone(), EngineConfig::default(), listener.clone());
        deploy(&engine, analyst_review());

        let id = engine
            .submit("review", Map::new(), ExecutionOptions::default())
            .unwrap();
        while gate.calls.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }
        engine.pause(&id).unwrap();
        gate.release.notify_waiters();
        engine
            .wait_for_status(&id, ExecutionStatus::Paused)
            .await
            .unwrap();

        engine.cancel(&id).unwrap();
        let execution = engine.wait(&id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert_eq!(Counting::get(&listener.cancelled), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let gate = Gate::new();
        let listener = Arc::new(Counting::default());
        let engine = engine_with(gate, EngineConfig::default(), listener.clone());
        deploy(&engine, analyst_review());

        let id = engine
            .submit(
                "review",
                Map::new(),
                ExecutionOptions::default().with_timeout(Duration::from_millis(50)),
            )
            .unwrap();
        let execution = engine.wait(&id).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Timeout);
        assert!(
            execution
                .records_for("analysis")
                .any(|r| r.status == NodeStatus::Abandoned)
        );
        assert_eq!(Counting::get(&listener.timeout), 1);
        assert_eq!(Counting::get(&listener.completed), 0);
    }

    #[tokio::test]
    async fn test_condition_selects_branch() {
        let engine = engine_with(
            succeeding_roles(),
            EngineConfig::default(),
            Arc::new(Counting::default()),
        );
        deploy(
            &engine,
            Definition::new("gate", "Confidence gate")
                .node(Node::new("start", NodeKind::Start))
                .node(Node::new("analysis", NodeKind::RoleInvocation).with_config("role", json!("technical")))
                .node(
                    Node::new("confident", NodeKind::Condition)
                        .with_config("expression", json!("${analysis.confidence} >= 0.7")),
                )
                .node(
                    Node::new("approve", NodeKind::ScriptedExpression)
                        .with_config("script", json!("'approved'"))
                        .with_config("namespace", json!("decision")),
                )
                .node(
                    Node::new("reject", NodeKind::ScriptedExpression)
                        .with_config("script", json!("'rejected'"))
                        .with_config("namespace", json!("decision")),
                )
                .node(Node::new("end", NodeKind::End))
                .connect("start", "analysis")
                .connect("analysis", "confident")
                .connect_when("confident", "approve", true)
                .connect_when("confident", "reject", false)
                .connect("approve", "end")
                .connect("reject", "end"),
        );

        let id = engine
            .submit("gate", Map::new(), ExecutionOptions::default())
            .unwrap();
        let execution = engine.wait(&id).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.output.as_ref().unwrap()["decision"], json!("approved"));
        assert!(execution.records_for("reject").all(|r| r.status == NodeStatus::Skipped));
    }

    #[tokio::test]
    async fn test_fan_out_and_fan_in() {
        let engine = engine_with(
            succeeding_roles(),
            EngineConfig::default(),
            Arc::new(Counting::default()),
        );
        deploy(
            &engine,
            Definition::new("panel", "Parallel analysts")
                .node(Node::new("start", NodeKind::Start))
                .node(Node::new("technical", NodeKind::RoleInvocation).with_config("role", json!("technical")))
                .node(Node::new("news", NodeKind::RoleInvocation).with_config("role", json!("news")))
                .node(
                    Node::new("combine", NodeKind::ScriptedExpression)
                        .with_config("script", json!("round((technical.confidence + news.confidence) / 2, 2)"))
                        .with_config("namespace", json!("combined")),
                )
                .node(Node::new("end", NodeKind::End))
                .connect("start", "technical")
                .connect("start", "news")
                .connect("technical", "combine")
                .connect("news", "combine")
                .connect("combine", "end"),
        );

        let id = engine
            .submit("panel", Map::new(), ExecutionOptions::default())
            .unwrap();
        let execution = engine.wait(&id).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.records_for("combine").count(), 1);
        assert_eq!(execution.output.as_ref().unwrap()["combined"].as_f64(), Some(0.8));
    }

    #[tokio::test]
    async fn test_unreachable_predecessor_does_not_block_join() {
        let engine = engine_with(
            succeeding_roles(),
            EngineConfig::default(),
            Arc::new(Counting::default()),
        );
        let definition = Definition::new("orphan", "Orphaned branch")
            .node(Node::new("start", NodeKind::Start))
            .node(Node::new("draft", NodeKind::Condition).with_config("expression", json!("true")))
            .node(Node::new("end", NodeKind::End))
            .connect("start", "end")
            .connect("draft", "end");
        assert!(engine.validate(&definition).is_empty());
        deploy(&engine, definition);

        let id = engine
            .submit("orphan", Map::new(), ExecutionOptions::default())
            .unwrap();
        let execution = engine.wait(&id).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed, "{:?}", execution.error);
        assert!(execution.node_completed("end"));
        assert!(!execution.node_completed("draft"));
    }

    #[tokio::test]
    async fn test_guarded_loop_terminates() {
        let engine = engine_with(
            succeeding_roles(),
            EngineConfig::default(),
            Arc::new(Counting::default()),
        );
        let mut input = Map::new();
        input.insert("count".to_string(), json!(0));
        deploy(
            &engine,
            Definition::new("loop", "Counter")
                .node(Node::new("start", NodeKind::Start))
                .node(
                    Node::new("increment", NodeKind::ScriptedExpression)
                        .with_config("script", json!("count + 1"))
                        .with_config("namespace", json!("count")),
                )
                .node(
                    Node::new("done", NodeKind::Condition)
                        .with_config("expression", json!("${count} >= 3")),
                )
                .node(Node::new("end", NodeKind::End))
                .connect("start", "increment")
                .connect("increment", "done")
                .connect_when("done", "end", true)
                .connect_when("done", "increment", false),
        );

        let id = engine
            .submit("loop", input, ExecutionOptions::default())
            .unwrap();
        let execution = engine.wait(&id).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.records_for("increment").count(), 3);
        assert_eq!(execution.output.as_ref().unwrap()["count"].as_i64(), Some(3));
    }

    #[tokio::test]
    async fn test_loop_guard() {
        let config = EngineConfig::builder().max_node_executions(20).build().unwrap();
        let engine = engine_with(succeeding_roles(), config, Arc::new(Counting::default()));
        deploy(
            &engine,
            Definition::new("forever", "Endless")
                .node(Node::new("start", NodeKind::Start))
                .node(Node::new("again", NodeKind::Condition).with_config("expression", json!("false")))
                .node(Node::new("end", NodeKind::End))
                .connect("start", "again")
                .connect_when("again", "end", true)
                .connect_when("again", "again", false),
        );

        let id = engine
            .submit("forever", Map::new(), ExecutionOptions::default())
            .unwrap();
        let execution = engine.wait(&id).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error.unwrap().message.contains("invocation limit"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_execution() {
        let mut roles = MockRoles::new();
        let mut seq = mockall::Sequence::new();
        roles
            .expect_invoke()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| {
                Err(Error::Role {
                    role_id: r.role_id,
                    message: "rate limited".to_string(),
                })
            });
        roles
            .expect_invoke()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| Ok(RoleAssessment::new(r.role_id, "hold", 0.6, "Range bound")));

        let listener = Arc::new(Counting::default());
        let engine = engine_with(Arc::new(roles), EngineConfig::default(), listener);
        deploy(&engine, analyst_review());

        let first = engine
            .submit("review", Map::new(), ExecutionOptions::default().with_max_retries(1))
            .unwrap();
        assert_eq!(engine.wait(&first).await.unwrap().status, ExecutionStatus::Failed);

        let second = engine.retry(&first).await.unwrap();
        let execution = engine.wait(&second).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.retry_count, 1);
        assert_eq!(execution.retry_of.as_deref(), Some(first.as_str()));
        assert!(matches!(
            engine.retry(&second).await,
            Err(Error::InvalidTransition { .. })
        ));

        let stats = engine.catalog().get("review").unwrap().stats.clone();
        assert_eq!(stats.usage_count, 2);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_retry_budget() {
        let mut roles = MockRoles::new();
        roles.expect_invoke().returning(|r| {
            Err(Error::Role {
                role_id: r.role_id,
                message: "down".to_string(),
            })
        });
        let engine = engine_with(Arc::new(roles), EngineConfig::default(), Arc::new(Counting::default()));
        deploy(&engine, analyst_review());

        let id = engine
            .submit("review", Map::new(), ExecutionOptions::default())
            .unwrap();
        engine.wait(&id).await.unwrap();

        assert!(matches!(
            engine.retry(&id).await,
            Err(Error::RetryExhausted { max_retries: 0, .. })
        ));
    }

    #[test]
    fn test_default_notifier_accepts_webhook_nodes() {
        let engine = engine_with(
            succeeding_roles(),
            EngineConfig::default(),
            Arc::new(Counting::default()),
        );
        let definition = Definition::new("alert", "Alert")
            .node(Node::new("start", NodeKind::Start))
            .node(
                Node::new("notify", NodeKind::Notification)
                    .with_config("channel", json!("webhook"))
                    .with_config("recipients", json!(["http://127.0.0.1:9/hook"]))
                    .with_config("message", json!("Panel finished")),
            )
            .node(Node::new("end", NodeKind::End))
            .connect("start", "notify")
            .connect("notify", "end");

        assert!(engine.validate(&definition).is_empty());
    }

    #[test]
    fn test_builder_requires_roles() {
        let err = WorkflowEngine::builder().build().err().unwrap();
        assert!(matches!(err, Error::Config(_)));

        let engine = WorkflowEngine::builder()
            .registry(ExecutorRegistry::new())
            .build();
        assert!(engine.is_ok());
    }
}
