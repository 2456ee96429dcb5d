//! # tessera-core
//!
//! The reactive evaluation engine for Tessera.
//!
//! This crate keeps an entity graph (widgets, actions and user-authored
//! script objects) consistent with the JavaScript-like expressions bound to
//! its properties. It resolves which entities depend on which, recomputes
//! only what changed after an edit, runs untrusted code in an isolated
//! global scope, classifies user functions as sync or async without side
//! effects, and tracks in-place mutations of script-object variables so
//! that dependents can be refreshed incrementally.
//!
//! ## Architectural Constraints
//!
//! - Single-threaded: services hold `Rc` handles and are not `Send`
//! - Deterministic: ordered maps everywhere, Kahn ordering ties break by path
//! - Explicit services: every piece of state is owned by an [`Engine`]
//! - No async runtime: promises are always settled, deferral is a task queue

// =============================================================================
// MODULES
// =============================================================================

pub mod applier;
pub mod config;
pub mod dependency;
pub mod determiner;
pub mod engine;
pub mod evaluator;
pub mod logs;
pub mod patch;
pub mod primitives;
pub mod sandbox;
pub mod scheduler;
pub mod script;
pub mod tree;
pub mod types;
pub mod value;
pub mod variables;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{Document, EntityDecl, EntityKind, TesseraError};
pub use value::{Function, ObjectMap, Provenance, Settlement, Shared, Value};

// =============================================================================
// RE-EXPORTS: Services
// =============================================================================

pub use applier::{
    AppliedUpdate, IncrementalApplier, PendingReevaluation, ReevaluationRequester, TouchedPath,
};
pub use config::{EngineConfig, ExecutionLimits};
pub use dependency::{DependencyGraph, EvaluationOrder, NodeSource};
pub use determiner::AsyncDeterminer;
pub use engine::{Engine, ExecutionOutcome};
pub use evaluator::Evaluator;
pub use logs::{EvalLog, LogCategory, LogEntry, LogLevel};
pub use patch::{MutatingMethod, Patch, PatchKind, PatchPath, PatchTracker};
pub use sandbox::{
    EvalMode, GlobalScope, Sandbox, SandboxOptions, SandboxServices, SandboxSession,
};
pub use scheduler::{ScheduledTask, UpdateScheduler};
pub use tree::{EvaluatedEntity, EvaluatedTree};
pub use variables::{ResolvedFunctions, VariableMap, VariableStateStore};
