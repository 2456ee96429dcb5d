//! # Sandboxed Execution Context
//!
//! Runs untrusted expressions against an explicit global scope.
//!
//! A [`SandboxSession`] installs one binding per entity plus the mode flag,
//! remembers exactly which keys it installed and which globals it
//! overrode, and puts the scope back the way it found it on
//! [`teardown`](SandboxSession::teardown). Teardown also runs on `Drop`, so
//! a session that exits through an error cannot leak entity bindings into
//! the next one.
//!
//! Entity references are private copies of the tree and store values,
//! stamped with their entity path, so script writes never reach engine
//! state except through recorded patches.

use crate::config::ExecutionLimits;
use crate::logs::{EvalLog, LogCategory, LogLevel};
use crate::patch::{Patch, PatchTracker};
use crate::primitives::TRIGGER_MODE_FLAG;
use crate::scheduler::UpdateScheduler;
use crate::script::ast::{Expr, Program};
use crate::script::builtins::{console_object, install_globals};
use crate::script::{BindingTemplate, Interpreter, ScriptHost, parse_expression, parse_program};
use crate::tree::EvaluatedTree;
use crate::types::TesseraError;
use crate::value::{Function, ObjectMap, Value};
use crate::variables::{ResolvedFunctions, VariableStateStore};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

// =============================================================================
// GLOBAL SCOPE
// =============================================================================

/// The long-lived global bindings shared by every session: builtins only,
/// between sessions.
#[derive(Debug, Clone)]
pub struct GlobalScope {
    bindings: BTreeMap<String, Value>,
}

impl Default for GlobalScope {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalScope {
    /// A scope holding the builtin globals.
    #[must_use]
    pub fn new() -> Self {
        let mut bindings = BTreeMap::new();
        install_globals(&mut bindings);
        Self { bindings }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Why code is being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Computing a data binding.
    Binding,
    /// Running a function in response to an event.
    Trigger,
}

/// How a session is prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxOptions {
    pub mode: EvalMode,
    /// Record mutations of entity references as patches.
    pub track_mutations: bool,
    /// Replace `console` with a sink that drops everything.
    pub mute_console: bool,
}

impl SandboxOptions {
    /// Data-binding evaluation: untracked.
    #[must_use]
    pub fn binding() -> Self {
        Self {
            mode: EvalMode::Binding,
            track_mutations: false,
            mute_console: false,
        }
    }

    /// Event-driven execution: tracked.
    #[must_use]
    pub fn trigger() -> Self {
        Self {
            mode: EvalMode::Trigger,
            track_mutations: true,
            mute_console: false,
        }
    }

    /// Builder: mute the console.
    #[must_use]
    pub fn muted(mut self) -> Self {
        self.mute_console = true;
        self
    }
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self::binding()
    }
}

/// Engine services a session borrows for its lifetime.
pub struct SandboxServices<'r> {
    pub globals: &'r mut GlobalScope,
    pub tracker: &'r mut PatchTracker,
    pub scheduler: &'r mut UpdateScheduler,
    pub logs: &'r mut EvalLog,
    pub limits: ExecutionLimits,
}

// =============================================================================
// SANDBOX
// =============================================================================

/// Entry point for preparing sessions.
pub struct Sandbox;

impl Sandbox {
    /// Install entity bindings and the mode flag into `services.globals`.
    ///
    /// Widgets and actions are bound to copies of their evaluated values.
    /// Script objects are bound to their tree values overlaid with the
    /// current variable state and resolved functions.
    pub fn prepare<'r>(
        services: SandboxServices<'r>,
        tree: &EvaluatedTree,
        variables: &VariableStateStore,
        functions: &ResolvedFunctions,
        options: SandboxOptions,
    ) -> SandboxSession<'r> {
        let mut session = SandboxSession {
            globals: services.globals,
            tracker: services.tracker,
            scheduler: services.scheduler,
            logs: services.logs,
            limits: services.limits,
            mode: options.mode,
            installed: BTreeSet::new(),
            entities: BTreeSet::new(),
            overridden: BTreeMap::new(),
            torn_down: false,
        };

        for (name, entity) in tree.iter() {
            let mut values: ObjectMap = entity
                .values
                .iter()
                .map(|(key, value)| (key.clone(), value.deep_clone()))
                .collect();
            if entity.is_script_object() {
                if let Some(state) = variables.entity_map(name) {
                    for (variable, value) in state.iter() {
                        values.insert(variable.clone(), value.deep_clone());
                    }
                }
                if let Some(bound) = functions.entity_functions(name) {
                    for (function, handle) in bound {
                        values.insert(function.clone(), Value::Function(Rc::clone(handle)));
                    }
                }
            }
            session.install_entity(name, Value::from(values));
        }

        session.install(
            TRIGGER_MODE_FLAG,
            Value::Bool(options.mode == EvalMode::Trigger),
        );
        if options.mute_console {
            session.install("console", console_object(true));
        }
        if options.track_mutations {
            session.tracker.enable_tracking();
        } else {
            session.tracker.disable_tracking();
        }
        tracing::trace!(
            entities = session.entities.len(),
            mode = ?options.mode,
            "sandbox prepared"
        );
        session
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// A prepared global scope. Dropping the session tears it down.
pub struct SandboxSession<'r> {
    globals: &'r mut GlobalScope,
    tracker: &'r mut PatchTracker,
    scheduler: &'r mut UpdateScheduler,
    logs: &'r mut EvalLog,
    limits: ExecutionLimits,
    mode: EvalMode,
    installed: BTreeSet<String>,
    entities: BTreeSet<String>,
    overridden: BTreeMap<String, Value>,
    torn_down: bool,
}

impl SandboxSession<'_> {
    fn install(&mut self, key: &str, value: Value) {
        let previous = self.globals.bindings.insert(key.to_string(), value);
        let first_install = self.installed.insert(key.to_string());
        if let (true, Some(previous)) = (first_install, previous) {
            self.overridden.insert(key.to_string(), previous);
        }
    }

    fn install_entity(&mut self, name: &str, value: Value) {
        value.track(&[name.to_string()]);
        self.install(name, value);
        self.entities.insert(name.to_string());
    }

    /// Evaluate a single expression.
    pub fn evaluate(&mut self, source: &str, context: Option<&str>) -> Result<Value, TesseraError> {
        let expr = parse_expression(source)?;
        self.evaluate_expr(&expr, context)
    }

    /// Evaluate a parsed expression.
    pub fn evaluate_expr(&mut self, expr: &Expr, context: Option<&str>) -> Result<Value, TesseraError> {
        Interpreter::new(self).evaluate(expr, context)
    }

    /// Run a statement list; yields the top-level `return` or the last
    /// expression statement.
    pub fn run(&mut self, source: &str, context: Option<&str>) -> Result<Value, TesseraError> {
        let program = parse_program(source)?;
        self.run_program(&program, context)
    }

    pub fn run_program(&mut self, program: &Program, context: Option<&str>) -> Result<Value, TesseraError> {
        Interpreter::new(self).run(program, context)
    }

    /// Evaluate a `{{ }}` template.
    pub fn evaluate_template(
        &mut self,
        template: &BindingTemplate,
        context: Option<&str>,
    ) -> Result<Value, TesseraError> {
        template.render(|expr| Interpreter::new(&mut *self).evaluate(expr, context))
    }

    /// Call a function value. Bound functions carry their own `this`.
    pub fn call(&mut self, function: &Rc<Function>, args: Vec<Value>) -> Result<Value, TesseraError> {
        Interpreter::new(self).call(function, args)
    }

    /// Publish a copy of a freshly computed property on an entity
    /// reference, installing an empty reference first if needed.
    pub fn set_entity_value(
        &mut self,
        entity: &str,
        property: &str,
        value: Value,
    ) -> Result<(), TesseraError> {
        if !self.entities.contains(entity) {
            self.install_entity(entity, Value::from(ObjectMap::new()));
        }
        let reference = self
            .globals
            .bindings
            .get(entity)
            .ok_or_else(|| TesseraError::EntityNotFound(entity.to_string()))?;
        let value = value.deep_clone();
        reference.set_child(property, value.clone())?;
        value.track(&[entity.to_string(), property.to_string()]);
        Ok(())
    }

    /// The installed reference of `entity`.
    #[must_use]
    pub fn entity_value(&self, entity: &str) -> Option<&Value> {
        if !self.entities.contains(entity) {
            return None;
        }
        self.globals.bindings.get(entity)
    }

    /// Install a boolean sentinel for the lifetime of the session.
    pub fn install_flag(&mut self, name: &str, value: bool) {
        self.install(name, Value::Bool(value));
    }

    /// Truthiness of a global sentinel.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.globals.get(name).is_some_and(Value::is_truthy)
    }

    /// Stop recording patches; returns the previous state for
    /// [`restore_tracking`](Self::restore_tracking).
    pub fn suspend_tracking(&mut self) -> bool {
        let was_tracking = self.tracker.is_tracking();
        self.tracker.disable_tracking();
        was_tracking
    }

    pub fn restore_tracking(&mut self, was_tracking: bool) {
        if was_tracking {
            self.tracker.enable_tracking();
        }
    }

    /// Append to the evaluation log.
    pub fn log(
        &mut self,
        level: LogLevel,
        category: LogCategory,
        entity: Option<&str>,
        message: impl Into<String>,
    ) {
        self.logs.push(level, category, entity, message);
    }

    #[must_use]
    pub fn mode(&self) -> EvalMode {
        self.mode
    }

    /// Keys this session installed into the global scope.
    pub fn installed_keys(&self) -> impl Iterator<Item = &str> {
        self.installed.iter().map(String::as_str)
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Remove every installed key, restore overridden globals and
    /// re-enable mutation tracking. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        for key in std::mem::take(&mut self.installed) {
            self.globals.bindings.remove(&key);
        }
        for (key, value) in std::mem::take(&mut self.overridden) {
            self.globals.bindings.insert(key, value);
        }
        self.entities.clear();
        self.tracker.enable_tracking();
        self.torn_down = true;
        tracing::trace!("sandbox torn down");
    }
}

impl Drop for SandboxSession<'_> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl ScriptHost for SandboxSession<'_> {
    fn global(&self, name: &str) -> Option<&Value> {
        self.globals.bindings.get(name)
    }

    fn record_patch(&mut self, patch: Patch) {
        self.scheduler.add(&mut *self.tracker, patch);
    }

    fn console(&mut self, level: LogLevel, entity: Option<&str>, message: String) {
        self.logs.push(level, LogCategory::UserConsole, entity, message);
    }

    fn limits(&self) -> ExecutionLimits {
        self.limits
    }
}

// =============================================================================
// TESTS
// =============================================================================
