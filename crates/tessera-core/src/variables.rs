//! # Variable State Store
//!
//! The authoritative current values of script-object variables, and the
//! resolved (entity-bound) function handles of each script object.
//!
//! Per-entity maps are shared through `Rc` and written copy-on-write: a
//! handle returned by [`VariableStateStore::entity_map`] keeps the contents
//! it had when it was handed out, so callers can diff by identity.
//! Containers never cross the store boundary by reference. Values are
//! deep-copied on the way in and on the way out, and nested writes replace
//! the variable root with an edited copy.

use crate::patch::Patch;
use crate::types::TesseraError;
use crate::value::{Function, ObjectMap, Value};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Variable name to value, for one entity.
pub type VariableMap = ObjectMap;

fn detached(map: &VariableMap) -> VariableMap {
    map.iter()
        .map(|(name, value)| (name.clone(), value.deep_clone()))
        .collect()
}

// =============================================================================
// VARIABLE STATE STORE
// =============================================================================

/// Entity name to its variable map.
#[derive(Debug, Clone, Default)]
pub struct VariableStateStore {
    entities: BTreeMap<String, Rc<VariableMap>>,
}

impl VariableStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn map_mut(&mut self, entity: &str) -> &mut VariableMap {
        Rc::make_mut(self.entities.entry(entity.to_string()).or_default())
    }

    /// Write a value at `entity` + `segments` (variable first). Nested
    /// writes require the parent to exist.
    pub fn set_value<S: AsRef<str>>(
        &mut self,
        entity: &str,
        segments: &[S],
        value: Value,
    ) -> Result<(), TesseraError> {
        let Some((variable, sub)) = segments.split_first() else {
            return Err(TesseraError::MalformedPatchPath(entity.to_string()));
        };
        let variable = variable.as_ref();
        if sub.is_empty() {
            self.set_variable(entity, variable, value);
            return Ok(());
        }
        let mut root = self
            .entities
            .get(entity)
            .and_then(|map| map.get(variable))
            .map(Value::deep_clone)
            .ok_or_else(|| {
                TesseraError::Type(format!(
                    "Cannot set '{}.{}': no such variable",
                    entity, variable
                ))
            })?;
        root.set_path(sub, value.deep_clone())?;
        self.map_mut(entity).insert(variable.to_string(), root);
        Ok(())
    }

    /// Write a whole variable.
    pub fn set_variable(&mut self, entity: &str, variable: &str, value: Value) {
        self.map_mut(entity)
            .insert(variable.to_string(), value.deep_clone());
    }

    /// Replace the whole state.
    pub fn replace_all(&mut self, state: BTreeMap<String, VariableMap>) {
        self.entities = state
            .iter()
            .map(|(entity, map)| (entity.clone(), Rc::new(detached(map))))
            .collect();
    }

    /// Deep, independent copy of the whole state.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, VariableMap> {
        self.entities
            .iter()
            .map(|(entity, map)| (entity.clone(), detached(map)))
            .collect()
    }

    /// Deep, independent copy of one entity's variables.
    #[must_use]
    pub fn entity_snapshot(&self, entity: &str) -> Option<VariableMap> {
        self.entities.get(entity).map(|map| detached(map))
    }

    /// Remove a whole entity (no segments), one variable, or a nested
    /// value. Missing paths are a no-op.
    pub fn remove<S: AsRef<str>>(&mut self, entity: &str, segments: &[S]) -> Result<(), TesseraError> {
        let Some((variable, sub)) = segments.split_first() else {
            self.entities.remove(entity);
            return Ok(());
        };
        let variable = variable.as_ref();
        let Some(root) = self.entities.get(entity).and_then(|map| map.get(variable)) else {
            return Ok(());
        };
        if sub.is_empty() {
            self.map_mut(entity).remove(variable);
            return Ok(());
        }
        let root = root.deep_clone();
        if root.delete_path(sub)? {
            self.map_mut(entity).insert(variable.to_string(), root);
        }
        Ok(())
    }

    /// Shared handle to one entity's variables.
    #[must_use]
    pub fn entity_map(&self, entity: &str) -> Option<Rc<VariableMap>> {
        self.entities.get(entity).cloned()
    }

    /// Independent copy of the value at `entity` + `segments` (variable
    /// first).
    #[must_use]
    pub fn value_at<S: AsRef<str>>(&self, entity: &str, segments: &[S]) -> Option<Value> {
        let (variable, sub) = segments.split_first()?;
        self.entities
            .get(entity)?
            .get(variable.as_ref())?
            .get_path(sub)
            .map(|value| value.deep_clone())
    }

    /// Replay a recorded patch. `rest` is the patch path without its entity.
    pub fn apply_patch(
        &mut self,
        entity: &str,
        rest: &[String],
        patch: &Patch,
    ) -> Result<(), TesseraError> {
        patch.replay(self.map_mut(entity), rest)
    }

    pub fn remove_entity(&mut self, entity: &str) {
        self.entities.remove(entity);
    }

    /// Keep only the listed variables of `entity`.
    pub fn retain_variables<F: Fn(&str) -> bool>(&mut self, entity: &str, keep: F) {
        if let Some(map) = self.entities.get(entity) {
            if map.keys().all(|name| keep(name)) {
                return;
            }
            self.map_mut(entity).retain(|name, _| keep(name));
        }
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    #[must_use]
    pub fn contains_entity(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }
}

// =============================================================================
// RESOLVED FUNCTIONS
// =============================================================================

/// Entity name to function name to bound function handle.
#[derive(Debug, Clone, Default)]
pub struct ResolvedFunctions {
    entities: BTreeMap<String, BTreeMap<String, Rc<Function>>>,
}

impl ResolvedFunctions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all(&mut self, functions: BTreeMap<String, BTreeMap<String, Rc<Function>>>) {
        self.entities = functions;
    }

    #[must_use]
    pub fn get(&self, entity: &str, name: &str) -> Option<&Rc<Function>> {
        self.entities.get(entity)?.get(name)
    }

    #[must_use]
    pub fn entity_functions(&self, entity: &str) -> Option<&BTreeMap<String, Rc<Function>>> {
        self.entities.get(entity)
    }

    pub fn remove_entity(&mut self, entity: &str) {
        self.entities.remove(entity);
    }

    /// `(entity, name, function)` in entity then name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Rc<Function>)> {
        self.entities.iter().flat_map(|(entity, functions)| {
            functions
                .iter()
                .map(move |(name, function)| (entity.as_str(), name.as_str(), function))
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================
