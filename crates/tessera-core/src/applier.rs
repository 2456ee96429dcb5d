//! # Incremental Patch Applier
//!
//! Replays buffered patches into the Variable State Store, mirrors the
//! touched paths into the Evaluated Tree, and asks the dependency
//! evaluator to refresh what depends on them.
//!
//! ## Pipeline
//!
//! 1. Split each patch path into `[entity, ...rest]`
//! 2. Keep only patches on declared variables of script objects
//! 3. Replay the kept patches in recorded order
//! 4. Write each touched path from the store into the tree
//! 5. Request a scoped re-evaluation of the touched set
//! 6. Clear the tracker buffer

use crate::logs::{EvalLog, LogCategory, LogLevel};
use crate::patch::{Patch, PatchTracker};
use crate::primitives::PATH_SEPARATOR;
use crate::tree::EvaluatedTree;
use crate::types::TesseraError;
use crate::variables::VariableStateStore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// TOUCHED PATHS
// =============================================================================

/// A variable path written by replay: `entity` plus `[variable, sub...]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TouchedPath {
    pub entity: String,
    pub path: Vec<String>,
}

impl TouchedPath {
    /// Dot-joined `Entity.variable.sub...`, for display and dependency
    /// lookup.
    #[must_use]
    pub fn full_path(&self) -> String {
        let mut full = self.entity.clone();
        for segment in &self.path {
            full.push(PATH_SEPARATOR);
            full.push_str(segment);
        }
        full
    }

    #[must_use]
    pub fn variable(&self) -> &str {
        self.path.first().map(String::as_str).unwrap_or_default()
    }
}

impl fmt::Display for TouchedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_path())
    }
}

// =============================================================================
// REEVALUATION SEAM
// =============================================================================

/// Receives the touched set once replay is done.
pub trait ReevaluationRequester {
    fn request_scoped_evaluation(&mut self, touched: &BTreeSet<TouchedPath>) -> Result<(), TesseraError>;
}

/// Requester that holds the touched set for the caller to act on after
/// the applier has released the tree.
#[derive(Debug, Default)]
pub struct PendingReevaluation {
    requested: Option<BTreeSet<TouchedPath>>,
}

impl PendingReevaluation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the requested set, merged across requests.
    pub fn take(&mut self) -> Option<BTreeSet<TouchedPath>> {
        self.requested.take()
    }
}

impl ReevaluationRequester for PendingReevaluation {
    fn request_scoped_evaluation(&mut self, touched: &BTreeSet<TouchedPath>) -> Result<(), TesseraError> {
        self.requested
            .get_or_insert_with(BTreeSet::new)
            .extend(touched.iter().cloned());
        Ok(())
    }
}

// =============================================================================
// APPLIER
// =============================================================================

/// Summary of one apply run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppliedUpdate {
    /// Patches replayed into the store.
    pub applied: usize,
    /// Patches dropped (malformed, foreign entity, undeclared variable,
    /// failed replay, or var updates disabled).
    pub skipped: usize,
    pub touched: BTreeSet<TouchedPath>,
    pub reevaluation_requested: bool,
    /// Binding paths recomputed by the follow-up scoped evaluation.
    pub recomputed: Vec<String>,
}

/// Where a patch lands, if anywhere.
enum Target<'p> {
    Variable { entity: &'p str, rest: &'p [String] },
    Ignored,
    Malformed,
}

fn target_of<'p>(patch: &'p Patch, tree: &EvaluatedTree) -> Target<'p> {
    let [entity, rest @ ..] = patch.path().segments() else {
        return Target::Malformed;
    };
    let Some(variable) = rest.first() else {
        return Target::Malformed;
    };
    if !tree.declares_variable(entity, variable) {
        return Target::Ignored;
    }
    Target::Variable { entity, rest }
}

fn touched_path(entity: &str, rest: &[String]) -> TouchedPath {
    TouchedPath {
        entity: entity.to_string(),
        path: rest.to_vec(),
    }
}

/// Applies buffered patches.
pub struct IncrementalApplier;

impl IncrementalApplier {
    /// Run the full pipeline on the tracker's buffer.
    pub fn apply(
        tracker: &mut PatchTracker,
        tree: &mut EvaluatedTree,
        variables: &mut VariableStateStore,
        logs: &mut EvalLog,
        requester: &mut dyn ReevaluationRequester,
    ) -> AppliedUpdate {
        let patches = tracker.take_all();
        let mut update = AppliedUpdate::default();

        if !tracker.var_updates_enabled() {
            update.skipped = patches.len();
            tracing::debug!(discarded = patches.len(), "var updates disabled");
            return update;
        }

        for patch in &patches {
            match target_of(patch, tree) {
                Target::Malformed => {
                    logs.error(
                        LogCategory::MalformedPatchPath,
                        None,
                        TesseraError::MalformedPatchPath(patch.path().to_string()).to_string(),
                    );
                    update.skipped += 1;
                }
                Target::Ignored => update.skipped += 1,
                Target::Variable { entity, rest } => {
                    match variables.apply_patch(entity, rest, patch) {
                        Ok(()) => {
                            update.applied += 1;
                            update.touched.insert(touched_path(entity, rest));
                        }
                        Err(e) => {
                            let path = patch.path().to_string();
                            logs.push(
                                LogLevel::Warn,
                                LogCategory::ExpressionEvaluation,
                                Some(&path),
                                format!("Failed to apply {} patch: {}", patch.kind(), e),
                            );
                            update.skipped += 1;
                        }
                    }
                }
            }
        }

        for touched in &update.touched {
            Self::sync_tree(tree, variables, touched);
        }

        if !update.touched.is_empty() {
            update.reevaluation_requested = true;
            if let Err(e) = requester.request_scoped_evaluation(&update.touched) {
                logs.error(
                    LogCategory::ExpressionEvaluation,
                    None,
                    format!("Scoped re-evaluation request failed: {}", e),
                );
            }
        }

        tracing::debug!(
            applied = update.applied,
            skipped = update.skipped,
            touched = update.touched.len(),
            "patches applied"
        );
        update
    }

    /// Steps 1-3 of the pipeline without replaying or logging.
    #[must_use]
    pub fn touched_paths(patches: &[Patch], tree: &EvaluatedTree) -> BTreeSet<TouchedPath> {
        patches
            .iter()
            .filter_map(|patch| match target_of(patch, tree) {
                Target::Variable { entity, rest } => Some(touched_path(entity, rest)),
                Target::Ignored | Target::Malformed => None,
            })
            .collect()
    }

    /// Mirror the store's value at `touched` into the tree. A nested write
    /// whose parent the tree lacks falls back to the whole variable.
    fn sync_tree(tree: &mut EvaluatedTree, variables: &VariableStateStore, touched: &TouchedPath) {
        let result = match variables.value_at(&touched.entity, &touched.path) {
            Some(value) => tree.set_value(&touched.entity, &touched.path, value),
            None => tree.delete_value(&touched.entity, &touched.path).map(|_| ()),
        };
        if result.is_ok() {
            return;
        }
        let root = [touched.variable()];
        let fallback = match variables.value_at(&touched.entity, &root) {
            Some(value) => tree.set_value(&touched.entity, &root, value),
            None => tree.delete_value(&touched.entity, &root).map(|_| ()),
        };
        if let Err(e) = fallback {
            tracing::warn!(path = %touched, error = %e, "tree sync failed");
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
