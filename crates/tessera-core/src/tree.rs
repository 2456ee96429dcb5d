//! # Evaluated Tree
//!
//! The current computed value of every entity property. Script objects
//! carry their variable values and bound function values alongside the
//! declared variable and function names.
//!
//! Like the variable store, the tree owns its containers: values are
//! deep-copied in and out, and nested edits replace the property with an
//! edited copy so clones of the tree never observe later writes.

use crate::types::{EntityKind, TesseraError};
use crate::value::{ObjectMap, Value};
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use std::collections::{BTreeMap, BTreeSet};

/// Computed state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatedEntity {
    pub kind: EntityKind,
    #[serde(serialize_with = "serialize_defined")]
    pub values: ObjectMap,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub variables: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub functions: BTreeSet<String>,
}

impl EvaluatedEntity {
    #[must_use]
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            values: ObjectMap::new(),
            variables: BTreeSet::new(),
            functions: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn is_script_object(&self) -> bool {
        self.kind == EntityKind::JsAction
    }

    /// A detached copy of the entity as a single object value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::object(
            self.values
                .iter()
                .map(|(key, value)| (key.clone(), value.deep_clone())),
        )
    }
}

fn serialize_defined<S: Serializer>(values: &ObjectMap, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(None)?;
    for (key, value) in values {
        if !matches!(value, Value::Undefined) {
            map.serialize_entry(key, value)?;
        }
    }
    map.end()
}

/// Entity name to computed state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EvaluatedTree {
    entities: BTreeMap<String, EvaluatedEntity>,
}

impl EvaluatedTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entity: EvaluatedEntity) {
        self.entities.insert(name.into(), entity);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EvaluatedEntity> {
        self.entities.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut EvaluatedEntity> {
        self.entities.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<EvaluatedEntity> {
        self.entities.remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Whether `entity` exists and is a script object.
    #[must_use]
    pub fn is_script_object(&self, entity: &str) -> bool {
        self.get(entity).is_some_and(EvaluatedEntity::is_script_object)
    }

    /// Whether `entity` is a script object declaring `variable`.
    #[must_use]
    pub fn declares_variable(&self, entity: &str, variable: &str) -> bool {
        self.get(entity)
            .is_some_and(|e| e.is_script_object() && e.variables.contains(variable))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EvaluatedEntity)> {
        self.entities.iter().map(|(name, entity)| (name.as_str(), entity))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    /// Independent copy of the value at `entity` + `segments` (property
    /// first).
    #[must_use]
    pub fn value_at<S: AsRef<str>>(&self, entity: &str, segments: &[S]) -> Option<Value> {
        let (property, sub) = segments.split_first()?;
        self.get(entity)?
            .values
            .get(property.as_ref())?
            .get_path(sub)
            .map(|value| value.deep_clone())
    }

    /// Write the value at `entity` + `segments`. Nested writes require the
    /// parent to exist.
    pub fn set_value<S: AsRef<str>>(
        &mut self,
        entity: &str,
        segments: &[S],
        value: Value,
    ) -> Result<(), TesseraError> {
        let target = self
            .get_mut(entity)
            .ok_or_else(|| TesseraError::EntityNotFound(entity.to_string()))?;
        let Some((property, sub)) = segments.split_first() else {
            return Err(TesseraError::MalformedPatchPath(entity.to_string()));
        };
        let property = property.as_ref();
        if sub.is_empty() {
            target.values.insert(property.to_string(), value.deep_clone());
            return Ok(());
        }
        let mut root = target
            .values
            .get(property)
            .map(Value::deep_clone)
            .ok_or_else(|| {
                TesseraError::Type(format!(
                    "Cannot set '{}.{}': no such property",
                    entity, property
                ))
            })?;
        root.set_path(sub, value.deep_clone())?;
        target.values.insert(property.to_string(), root);
        Ok(())
    }

    /// Delete the value at `entity` + `segments`. Missing paths are a
    /// no-op.
    pub fn delete_value<S: AsRef<str>>(
        &mut self,
        entity: &str,
        segments: &[S],
    ) -> Result<bool, TesseraError> {
        let Some(target) = self.get_mut(entity) else {
            return Ok(false);
        };
        let Some((property, sub)) = segments.split_first() else {
            return Ok(false);
        };
        if sub.is_empty() {
            return Ok(target.values.remove(property.as_ref()).is_some());
        }
        let Some(root) = target.values.get(property.as_ref()).map(Value::deep_clone) else {
            return Ok(false);
        };
        let removed = root.delete_path(sub)?;
        if removed {
            target.values.insert(property.as_ref().to_string(), root);
        }
        Ok(removed)
    }

    /// JSON rendering (functions as `"[Function name]"`).
    pub fn to_json(&self) -> Result<serde_json::Value, TesseraError> {
        serde_json::to_value(self).map_err(|e| TesseraError::SerializationError(e.to_string()))
    }
}
