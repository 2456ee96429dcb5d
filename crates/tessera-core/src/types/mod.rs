//! # Core Type Definitions
//!
//! This module contains the declarative inputs of the engine and its error
//! type:
//! - Entity declarations (`EntityKind`, `EntityDecl`, `Document`)
//! - Error types (`TesseraError`)
//!
//! ## Determinism Guarantees
//!
//! Property, variable and function declarations are held in `BTreeMap`s, so
//! every pass over a document visits them in the same order.

use crate::primitives::{MAX_ENTITY_NAME_LENGTH, RESERVED_NAMES};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

// =============================================================================
// ENTITY DECLARATIONS
// =============================================================================

/// The kind of a document entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityKind {
    /// A UI widget. Only properties.
    Widget,
    /// An API or query action. Only properties.
    Action,
    /// A user-authored script object with variables and functions.
    JsAction,
}

/// Declaration of a single entity, as supplied by the document editor.
///
/// Property values are JSON. A string property containing `{{ ... }}` is a
/// binding and is evaluated; everything else is static data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDecl {
    /// Unique, stable identity of the entity.
    pub name: String,
    /// Entity kind tag.
    pub kind: EntityKind,
    /// Declared properties.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Script-object variables: name -> initializer expression source.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    /// Script-object functions: name -> function expression source.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functions: BTreeMap<String, String>,
}

impl EntityDecl {
    /// Create a declaration with no properties.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            properties: BTreeMap::new(),
            variables: BTreeMap::new(),
            functions: BTreeMap::new(),
        }
    }

    /// Builder: add a property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Builder: add a script-object variable with its initializer source.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, initializer: impl Into<String>) -> Self {
        self.variables.insert(name.into(), initializer.into());
        self
    }

    /// Builder: add a script-object function with its source.
    #[must_use]
    pub fn with_function(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.functions.insert(name.into(), source.into());
        self
    }

    /// Whether this entity is a script object.
    #[must_use]
    pub fn is_script_object(&self) -> bool {
        self.kind == EntityKind::JsAction
    }

    /// Every declared property path of this entity, without the entity prefix.
    pub fn declared_paths(&self) -> impl Iterator<Item = &str> {
        self.properties
            .keys()
            .chain(self.variables.keys())
            .chain(self.functions.keys())
            .map(String::as_str)
    }

    fn validate(&self) -> Result<(), TesseraError> {
        if !is_valid_identifier(&self.name) || self.name.len() > MAX_ENTITY_NAME_LENGTH {
            return Err(TesseraError::InvalidDocument(format!(
                "'{}' is not a valid entity name",
                self.name
            )));
        }
        if RESERVED_NAMES.contains(&self.name.as_str()) {
            return Err(TesseraError::InvalidDocument(format!(
                "'{}' is a reserved name",
                self.name
            )));
        }
        if !self.is_script_object() && (!self.variables.is_empty() || !self.functions.is_empty()) {
            return Err(TesseraError::InvalidDocument(format!(
                "{}: only JSACTION entities declare variables or functions",
                self.name
            )));
        }

        let mut seen = BTreeSet::new();
        for path in self.declared_paths() {
            if !is_valid_identifier(path) {
                return Err(TesseraError::InvalidDocument(format!(
                    "{}.{} is not a valid property name",
                    self.name, path
                )));
            }
            if !seen.insert(path) {
                return Err(TesseraError::InvalidDocument(format!(
                    "{}.{} is declared more than once",
                    self.name, path
                )));
            }
        }
        Ok(())
    }
}

/// Check whether a string is a script identifier (`[A-Za-z_$][A-Za-z0-9_$]*`).
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

// =============================================================================
// DOCUMENT
// =============================================================================

/// A full document snapshot: the ordered list of entity declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Entity declarations in editor order.
    pub entities: Vec<EntityDecl>,
}

impl Document {
    /// Create an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validated document from declarations.
    pub fn from_entities(entities: Vec<EntityDecl>) -> Result<Self, TesseraError> {
        let document = Self { entities };
        document.validate()?;
        Ok(document)
    }

    /// Parse and validate a document from JSON text.
    pub fn from_json(json: &str) -> Result<Self, TesseraError> {
        let document: Self = serde_json::from_str(json)
            .map_err(|e| TesseraError::DeserializationError(e.to_string()))?;
        document.validate()?;
        Ok(document)
    }

    /// Validate entity names and declarations.
    pub fn validate(&self) -> Result<(), TesseraError> {
        let mut names = BTreeSet::new();
        for entity in &self.entities {
            entity.validate()?;
            if !names.insert(entity.name.as_str()) {
                return Err(TesseraError::InvalidDocument(format!(
                    "duplicate entity name '{}'",
                    entity.name
                )));
            }
        }
        Ok(())
    }

    /// Look up an entity declaration by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EntityDecl> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Look up an entity declaration by name, mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut EntityDecl> {
        self.entities.iter_mut().find(|e| e.name == name)
    }

    /// Remove an entity declaration. Returns the removed declaration.
    pub fn remove(&mut self, name: &str) -> Option<EntityDecl> {
        let index = self.entities.iter().position(|e| e.name == name)?;
        Some(self.entities.remove(index))
    }

    /// All entity names in deterministic order.
    #[must_use]
    pub fn names(&self) -> BTreeSet<&str> {
        self.entities.iter().map(|e| e.name.as_str()).collect()
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the document has no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Tessera engine.
///
/// - Use `Result<T, TesseraError>` for fallible operations
/// - User-code failures are caught at the engine boundary and logged; only
///   caller mistakes (unknown entity, invalid document) reach callers
#[derive(Debug, Error)]
pub enum TesseraError {
    /// Script source could not be parsed.
    #[error("SyntaxError: {message} (line {line}, column {column})")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    /// A script referenced an undeclared identifier.
    #[error("ReferenceError: {0} is not defined")]
    Reference(String),

    /// A script performed an operation on a value of the wrong type.
    #[error("TypeError: {0}")]
    Type(String),

    /// A script threw a value that was not caught.
    #[error("Uncaught {0}")]
    Thrown(Value),

    /// A script exceeded the configured call depth or step budget.
    #[error("Execution limit exceeded: {0}")]
    LimitExceeded(String),

    /// A patch path could not be decomposed into entity and variable.
    #[error("Malformed patch path: '{0}'")]
    MalformedPatchPath(String),

    /// The requested entity does not exist.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// The requested function does not exist on the entity.
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    /// The document failed validation.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Bindings form a dependency cycle.
    #[error("Cyclic dependency: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// The engine configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl TesseraError {
    /// Whether user code may intercept this error with `try/catch`.
    ///
    /// Execution limits are never catchable.
    #[must_use]
    pub fn is_catchable(&self) -> bool {
        !matches!(self, Self::LimitExceeded(_))
    }

    /// The script-visible value of this error, as bound by `catch (e)`.
    #[must_use]
    pub fn to_script_value(&self) -> Value {
        match self {
            Self::Thrown(value) => value.clone(),
            Self::Syntax { .. } => Value::error("SyntaxError", self.to_string()),
            Self::Reference(name) => {
                Value::error("ReferenceError", format!("{} is not defined", name))
            }
            Self::Type(message) => Value::error("TypeError", message.clone()),
            other => Value::error("Error", other.to_string()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
