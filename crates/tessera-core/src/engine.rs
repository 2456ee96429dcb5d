//! # Engine
//!
//! Caller-facing facade. Owns every service explicitly: the global scope,
//! patch tracker, scheduler, evaluation log, evaluated tree, variable
//! state and resolved functions. Nothing is process-wide.
//!
//! ## Lifecycle
//!
//! ```text
//! load(document) ──► full pass (binding mode, untracked)
//!        │
//! execute_function ──► trigger session ──► patches ──► one apply task
//!        │
//! run_pending_tasks ──► replay into store ──► tree ──► scoped pass
//! ```
//!
//! User-code failures never surface as `Err` here: they are logged to the
//! [`EvalLog`] and reported in the returned outcome. Only caller mistakes
//! (unknown entity or function, invalid document or configuration) are
//! errors.

use crate::applier::{AppliedUpdate, IncrementalApplier, PendingReevaluation, TouchedPath};
use crate::config::EngineConfig;
use crate::dependency::{DependencyGraph, EvaluationOrder};
use crate::determiner::AsyncDeterminer;
use crate::evaluator::Evaluator;
use crate::logs::{EvalLog, LogCategory, LogEntry};
use crate::patch::{Patch, PatchPath, PatchTracker};
use crate::primitives::PATH_SEPARATOR;
use crate::sandbox::{EvalMode, GlobalScope, Sandbox, SandboxOptions, SandboxServices};
use crate::scheduler::{ScheduledTask, UpdateScheduler};
use crate::tree::EvaluatedTree;
use crate::types::{Document, TesseraError, is_valid_identifier};
use crate::value::{Settlement, Value};
use crate::variables::{ResolvedFunctions, VariableStateStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Result of [`Engine::execute_function`].
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    /// Return value, with a fulfilled promise unwrapped.
    pub value: Value,
    /// Rendered error when the function threw or its promise rejected.
    pub error: Option<String>,
    /// Patches recorded during this call, in order.
    pub patches: Vec<Patch>,
    /// Declared `async`, or returned a promise.
    pub is_async: bool,
}

/// The reactive evaluation engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    document: Document,
    graph: DependencyGraph,
    globals: GlobalScope,
    tracker: PatchTracker,
    scheduler: UpdateScheduler,
    logs: EvalLog,
    tree: EvaluatedTree,
    variables: VariableStateStore,
    functions: ResolvedFunctions,
}

/// Disjoint borrows of the services a sandbox session needs.
macro_rules! services {
    ($engine:expr) => {
        SandboxServices {
            globals: &mut $engine.globals,
            tracker: &mut $engine.tracker,
            scheduler: &mut $engine.scheduler,
            logs: &mut $engine.logs,
            limits: $engine.config.limits,
        }
    };
}

impl Engine {
    /// Create an empty engine.
    pub fn new(config: EngineConfig) -> Result<Self, TesseraError> {
        config.validate()?;
        let logs = EvalLog::new(config.log_capacity);
        Ok(Self {
            config,
            document: Document::new(),
            graph: DependencyGraph::default(),
            globals: GlobalScope::new(),
            tracker: PatchTracker::new(),
            scheduler: UpdateScheduler::new(),
            logs,
            tree: EvaluatedTree::new(),
            variables: VariableStateStore::new(),
            functions: ResolvedFunctions::new(),
        })
    }

    /// Replace the document and run a full pass.
    pub fn load(&mut self, document: Document) -> Result<EvaluationOrder, TesseraError> {
        document.validate()?;
        self.graph = DependencyGraph::build(&document);
        self.document = document;
        tracing::info!(
            entities = self.document.len(),
            nodes = self.graph.len(),
            "document loaded"
        );
        Ok(self.evaluate_full())
    }

    /// Rebuild tree, variable state and functions. Pending patches and
    /// scheduled tasks are discarded.
    pub fn evaluate_full(&mut self) -> EvaluationOrder {
        self.tracker.clear();
        self.scheduler.reset();
        Evaluator::evaluate_full(
            services!(self),
            &self.document,
            &self.graph,
            &mut self.tree,
            &mut self.variables,
            &mut self.functions,
        )
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    #[must_use]
    pub fn tree(&self) -> &EvaluatedTree {
        &self.tree
    }

    #[must_use]
    pub fn variables(&self) -> &VariableStateStore {
        &self.variables
    }

    #[must_use]
    pub fn functions(&self) -> &ResolvedFunctions {
        &self.functions
    }

    #[must_use]
    pub fn logs(&self) -> &EvalLog {
        &self.logs
    }

    pub fn drain_logs(&mut self) -> Vec<LogEntry> {
        self.logs.drain()
    }

    #[must_use]
    pub fn tracker(&self) -> &PatchTracker {
        &self.tracker
    }

    /// For callers suppressing incremental effects.
    pub fn tracker_mut(&mut self) -> &mut PatchTracker {
        &mut self.tracker
    }

    #[must_use]
    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut UpdateScheduler {
        &mut self.scheduler
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    /// Run `entity.function(args)` in trigger mode with tracking on.
    ///
    /// Tasks left from earlier calls are flushed first, so every call sees
    /// the variable state its predecessors produced.
    pub fn execute_function(
        &mut self,
        entity: &str,
        function: &str,
        args: Vec<Value>,
    ) -> Result<ExecutionOutcome, TesseraError> {
        if !self.tree.contains(entity) {
            return Err(TesseraError::EntityNotFound(entity.to_string()));
        }
        let handle = self
            .functions
            .get(entity, function)
            .map(Rc::clone)
            .ok_or_else(|| {
                TesseraError::FunctionNotFound(format!("{}{}{}", entity, PATH_SEPARATOR, function))
            })?;

        self.run_pending_tasks();
        let path = format!("{}{}{}", entity, PATH_SEPARATOR, function);
        let recorded_before = self.tracker.len();

        let result = {
            let mut session = Sandbox::prepare(
                services!(self),
                &self.tree,
                &self.variables,
                &self.functions,
                SandboxOptions::trigger(),
            );
            let args = args.iter().map(Value::deep_clone).collect();
            session.call(&handle, args)
        };

        let patches = self
            .tracker
            .get_all()
            .get(recorded_before..)
            .map(<[Patch]>::to_vec)
            .unwrap_or_default();
        let mut outcome = ExecutionOutcome {
            value: Value::Undefined,
            error: None,
            patches,
            is_async: handle.is_async(),
        };
        match result {
            Ok(Value::Promise(settlement)) => {
                outcome.is_async = true;
                match *settlement {
                    Settlement::Fulfilled(value) => outcome.value = value.deep_clone(),
                    Settlement::Rejected(reason) => {
                        let message = format!("Uncaught (in promise) {}", reason);
                        self.logs
                            .error(LogCategory::ExpressionEvaluation, Some(&path), message.clone());
                        outcome.error = Some(message);
                    }
                }
            }
            Ok(value) => outcome.value = value.deep_clone(),
            Err(e) => {
                self.logs
                    .error(LogCategory::ExpressionEvaluation, Some(&path), e.to_string());
                outcome.error = Some(e.to_string());
            }
        }
        tracing::debug!(
            function = %path,
            patches = outcome.patches.len(),
            failed = outcome.error.is_some(),
            "function executed"
        );
        Ok(outcome)
    }

    /// Drain the task queue: replay buffered patches, then re-evaluate
    /// what depends on the touched paths.
    pub fn run_pending_tasks(&mut self) -> Vec<AppliedUpdate> {
        let mut updates = Vec::new();
        while let Some(task) = self.scheduler.next_task() {
            match task {
                ScheduledTask::ApplyVariableUpdates => {
                    let mut pending = PendingReevaluation::new();
                    let mut update = IncrementalApplier::apply(
                        &mut self.tracker,
                        &mut self.tree,
                        &mut self.variables,
                        &mut self.logs,
                        &mut pending,
                    );
                    if let Some(touched) = pending.take() {
                        let paths: Vec<String> = touched.iter().map(TouchedPath::full_path).collect();
                        update.recomputed = self.evaluate_scoped(&paths);
                    }
                    updates.push(update);
                }
            }
        }
        updates
    }

    fn evaluate_scoped(&mut self, touched: &[String]) -> Vec<String> {
        Evaluator::evaluate_scoped(
            services!(self),
            &self.graph,
            &mut self.tree,
            &self.variables,
            &self.functions,
            touched,
        )
    }

    /// Async status of every resolved function, keyed `Entity.function`.
    ///
    /// Each probe gets its own muted, untracked session.
    pub fn classify_functions(&mut self) -> BTreeMap<String, bool> {
        let targets: Vec<(String, Value)> = self
            .functions
            .iter()
            .map(|(entity, name, function)| {
                (
                    format!("{}{}{}", entity, PATH_SEPARATOR, name),
                    Value::Function(Rc::clone(function)),
                )
            })
            .collect();

        let options = SandboxOptions {
            mode: EvalMode::Binding,
            track_mutations: false,
            mute_console: true,
        };
        let mut result = BTreeMap::new();
        for (path, callable) in targets {
            let mut session = Sandbox::prepare(
                services!(self),
                &self.tree,
                &self.variables,
                &self.functions,
                options,
            );
            let is_async = AsyncDeterminer::classify(&mut session, &callable, Some(&path));
            result.insert(path, is_async);
        }
        result
    }

    // =========================================================================
    // EDITS
    // =========================================================================

    /// Editor change to one property: rebuild the graph and recompute the
    /// property and everything depending on it. Returns recomputed paths.
    pub fn update_property(
        &mut self,
        entity: &str,
        property: &str,
        value: serde_json::Value,
    ) -> Result<Vec<String>, TesseraError> {
        if !is_valid_identifier(property) {
            return Err(TesseraError::InvalidDocument(format!(
                "{}.{} is not a valid property name",
                entity, property
            )));
        }
        let declaration = self
            .document
            .get_mut(entity)
            .ok_or_else(|| TesseraError::EntityNotFound(entity.to_string()))?;
        if declaration.variables.contains_key(property) || declaration.functions.contains_key(property) {
            return Err(TesseraError::InvalidDocument(format!(
                "{}.{} is declared more than once",
                entity, property
            )));
        }
        declaration.properties.insert(property.to_string(), value);

        self.graph = DependencyGraph::build(&self.document);
        self.run_pending_tasks();
        let path = format!("{}{}{}", entity, PATH_SEPARATOR, property);
        Ok(self.evaluate_scoped(&[path]))
    }

    /// Remove an entity everywhere, then run a full pass.
    pub fn remove_entity(&mut self, name: &str) -> Result<EvaluationOrder, TesseraError> {
        self.document
            .remove(name)
            .ok_or_else(|| TesseraError::EntityNotFound(name.to_string()))?;
        self.tree.remove(name);
        self.variables.remove_entity(name);
        self.functions.remove_entity(name);
        self.graph = DependencyGraph::build(&self.document);
        Ok(self.evaluate_full())
    }

    /// Remove a variable (`segments` = `[variable, sub...]`) from the store
    /// and the tree, and refresh its dependents. Missing paths are a no-op.
    pub fn clear_variable<S: AsRef<str>>(
        &mut self,
        entity: &str,
        segments: &[S],
    ) -> Result<Vec<String>, TesseraError> {
        if segments.is_empty() {
            return Err(TesseraError::MalformedPatchPath(entity.to_string()));
        }
        self.variables.remove(entity, segments)?;
        self.tree.delete_value(entity, segments)?;
        let path = PatchPath::new(std::iter::once(entity).chain(segments.iter().map(AsRef::as_ref)))
            .to_string();
        tracing::debug!(path = %path, "variable cleared");
        Ok(self.evaluate_scoped(&[path]))
    }

    /// Drop all state, keeping the configuration.
    pub fn reset(&mut self) {
        self.document = Document::new();
        self.graph = DependencyGraph::default();
        self.globals = GlobalScope::new();
        self.tracker = PatchTracker::new();
        self.scheduler.reset();
        self.logs.clear();
        self.tree.clear();
        self.variables.clear();
        self.functions.clear();
        tracing::debug!("engine reset");
    }
}

// =============================================================================
// TESTS
// =============================================================================
