//! # Script Values
//!
//! The dynamic value model shared by the interpreter, the Variable State
//! Store and the Evaluated Tree.
//!
//! Arrays, objects and sets are shared containers: `clone()` copies the
//! handle, so two bindings that hold the same container observe each
//! other's writes, as scripts expect. Anything that must not alias engine
//! state (store snapshots, tree publication, patch payloads) takes an
//! explicit [`Value::deep_clone`].
//!
//! Each container also carries a [`Provenance`]: the entity path it was
//! installed at, if any. The interpreter records a patch whenever it
//! mutates a tracked container, wherever the handle was reached from.

use crate::script::ast::FunctionExpr;
use crate::script::builtins::NativeFunction;
use crate::script::interpreter::Environment;
use crate::types::TesseraError;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Ordered object representation.
pub type ObjectMap = BTreeMap<String, Value>;

// =============================================================================
// SHARED CONTAINERS
// =============================================================================

/// Where a container lives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Provenance {
    /// Created by script code, or copied out of engine state.
    #[default]
    Detached,
    /// Reachable from an installed entity at this path (entity first).
    Tracked(Vec<String>),
    /// Engine-provided namespace such as `Math`; writes are rejected.
    Frozen,
}

/// Reference-counted, interior-mutable container handle.
pub struct Shared<T>(Rc<Slot<T>>);

struct Slot<T> {
    data: RefCell<T>,
    provenance: RefCell<Provenance>,
    visiting: Cell<bool>,
}

/// Marks a container as on the current traversal path until dropped.
struct Visit<'a>(&'a Cell<bool>);

impl Drop for Visit<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<T> Shared<T> {
    pub fn new(data: T) -> Self {
        Self(Rc::new(Slot {
            data: RefCell::new(data),
            provenance: RefCell::new(Provenance::Detached),
            visiting: Cell::new(false),
        }))
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.data.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.data.borrow_mut()
    }

    /// Whether both handles point at the same container.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn provenance(&self) -> Provenance {
        self.0.provenance.borrow().clone()
    }

    pub fn set_provenance(&self, provenance: Provenance) {
        *self.0.provenance.borrow_mut() = provenance;
    }

    /// Enter the container during a recursive walk. `None` on a cycle.
    fn visit(&self) -> Option<Visit<'_>> {
        if self.0.visiting.replace(true) {
            None
        } else {
            Some(Visit(&self.0.visiting))
        }
    }

    /// Stamp `path` unless the container is frozen, already being walked,
    /// or already tracked at a strict prefix of `path` (a cyclic placement).
    fn claim(&self, path: &[String]) -> Option<Visit<'_>> {
        {
            let mut slot = self.0.provenance.borrow_mut();
            match &*slot {
                Provenance::Frozen => return None,
                Provenance::Tracked(current)
                    if current.len() < path.len() && path.starts_with(current) =>
                {
                    return None;
                }
                _ => {}
            }
            if self.0.visiting.get() {
                return None;
            }
            *slot = Provenance::Tracked(path.to_vec());
        }
        self.visit()
    }
}

impl<T> Shared<T> {
    /// Detach the container if it is tracked at or under `prefix`.
    fn release(&self, prefix: &[String]) -> Option<Visit<'_>> {
        {
            let mut slot = self.0.provenance.borrow_mut();
            match &*slot {
                Provenance::Tracked(current) if current.starts_with(prefix) => {}
                _ => return None,
            }
            *slot = Provenance::Detached;
        }
        self.visit()
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: PartialEq> PartialEq for Shared<T> {
    /// Structural comparison; a cycle compares unequal unless identical.
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (self.visit(), other.visit()) {
            (Some(_left), Some(_right)) => *self.borrow() == *other.borrow(),
            _ => false,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.visit() {
            Some(_visit) => self.borrow().fmt(f),
            None => f.write_str("[Circular]"),
        }
    }
}

// =============================================================================
// VALUE
// =============================================================================

/// A script value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean.
    Bool(bool),
    /// IEEE-754 number.
    Number(f64),
    /// String.
    String(String),
    /// Array.
    Array(Shared<Vec<Value>>),
    /// Plain object with ordered keys.
    Object(Shared<ObjectMap>),
    /// Insertion-ordered set of unique values.
    Set(Shared<Vec<Value>>),
    /// Callable.
    Function(Rc<Function>),
    /// Settled pending-result.
    Promise(Box<Settlement>),
}

/// Outcome of a promise. Promises are always settled in a single-threaded,
/// synchronous engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Fulfilled(Value),
    Rejected(Value),
}

impl Settlement {
    fn deep_clone(&self) -> Self {
        match self {
            Self::Fulfilled(value) => Self::Fulfilled(value.deep_clone()),
            Self::Rejected(reason) => Self::Rejected(reason.deep_clone()),
        }
    }

    fn value(&self) -> &Value {
        match self {
            Self::Fulfilled(value) | Self::Rejected(value) => value,
        }
    }
}

impl Value {
    /// Build a fresh array.
    #[must_use]
    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Shared::new(items))
    }

    /// Build a fresh set. Callers dedupe.
    #[must_use]
    pub fn new_set(items: Vec<Value>) -> Self {
        Self::Set(Shared::new(items))
    }

    /// Build an object from key/value pairs.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::from(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect::<ObjectMap>(),
        )
    }

    /// Build an error object (`{ name, message }`).
    #[must_use]
    pub fn error(name: &str, message: impl Into<String>) -> Self {
        Self::object([
            ("name", Self::String(name.to_string())),
            ("message", Self::String(message.into())),
        ])
    }

    /// Build a fulfilled promise.
    #[must_use]
    pub fn fulfilled(value: Value) -> Self {
        Self::Promise(Box::new(Settlement::Fulfilled(value)))
    }

    /// Build a rejected promise.
    #[must_use]
    pub fn rejected(reason: Value) -> Self {
        Self::Promise(Box::new(Settlement::Rejected(reason)))
    }

    /// The `typeof` of this value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Function(_) => "function",
            Self::Null | Self::Array(_) | Self::Object(_) | Self::Set(_) | Self::Promise(_) => {
                "object"
            }
        }
    }

    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    #[must_use]
    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    #[must_use]
    pub fn is_promise(&self) -> bool {
        matches!(self, Self::Promise(_))
    }

    /// JavaScript truthiness.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// JavaScript `ToNumber`.
    #[must_use]
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Number(n) => *n,
            Self::String(s) => parse_number(s),
            Self::Array(_) => parse_number(&self.to_display_string()),
            _ => f64::NAN,
        }
    }

    /// JavaScript `ToString`, as used by string concatenation and templates.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.clone(),
            // A cyclic join renders the inner occurrence as empty.
            Self::Array(items) => match items.visit() {
                Some(_visit) => items
                    .borrow()
                    .iter()
                    .map(|item| {
                        if item.is_nullish() {
                            String::new()
                        } else {
                            item.to_display_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(","),
                None => String::new(),
            },
            Self::Object(_) => "[object Object]".to_string(),
            Self::Set(_) => "[object Set]".to_string(),
            Self::Function(f) => format!("[Function {}]", f.display_name()),
            Self::Promise(_) => "[object Promise]".to_string(),
        }
    }

    /// Strict equality (`===`). Containers compare by identity.
    #[must_use]
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) | (Self::Set(a), Self::Set(b)) => a.ptr_eq(b),
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Promise(a), Self::Promise(b)) => a == b,
            _ => false,
        }
    }

    /// Loose equality (`==`).
    #[must_use]
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Self::Number(_), Self::String(_))
            | (Self::String(_), Self::Number(_))
            | (Self::Bool(_), _)
            | (_, Self::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_equals(other),
        }
    }

    /// A copy that shares no container with `self`. Cyclic references are
    /// cut to `undefined`; the copy is detached.
    #[must_use]
    pub fn deep_clone(&self) -> Value {
        match self {
            Self::Array(items) => items.visit().map_or(Self::Undefined, |_visit| {
                Self::array(items.borrow().iter().map(Value::deep_clone).collect())
            }),
            Self::Set(items) => items.visit().map_or(Self::Undefined, |_visit| {
                Self::new_set(items.borrow().iter().map(Value::deep_clone).collect())
            }),
            Self::Object(map) => map.visit().map_or(Self::Undefined, |_visit| {
                Self::from(
                    map.borrow()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.deep_clone()))
                        .collect::<ObjectMap>(),
                )
            }),
            Self::Promise(settlement) => Self::Promise(Box::new(settlement.deep_clone())),
            other => other.clone(),
        }
    }

    /// Whether a container reaches itself.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        match self {
            Self::Array(items) | Self::Set(items) => match items.visit() {
                Some(_visit) => items.borrow().iter().any(Value::has_cycle),
                None => true,
            },
            Self::Object(map) => match map.visit() {
                Some(_visit) => map.borrow().values().any(Value::has_cycle),
                None => true,
            },
            Self::Promise(settlement) => settlement.value().has_cycle(),
            _ => false,
        }
    }

    // =========================================================================
    // PROVENANCE
    // =========================================================================

    /// Provenance of a container; primitives are always detached.
    #[must_use]
    pub fn provenance(&self) -> Provenance {
        match self {
            Self::Array(items) | Self::Set(items) => items.provenance(),
            Self::Object(map) => map.provenance(),
            _ => Provenance::Detached,
        }
    }

    /// Mark a container read-only for scripts.
    pub fn freeze(&self) {
        match self {
            Self::Array(items) | Self::Set(items) => items.set_provenance(Provenance::Frozen),
            Self::Object(map) => map.set_provenance(Provenance::Frozen),
            _ => {}
        }
    }

    /// Stamp `path` on this container and every container below it. Set
    /// members are not addressable by path and keep their own provenance.
    pub fn track(&self, path: &[String]) {
        self.track_into(&mut path.to_vec());
    }

    /// Re-stamp the elements of a tracked array from index `from` on, or
    /// every entry of a tracked object.
    pub fn track_children(&self, path: &[String], from: usize) {
        let mut path = path.to_vec();
        match self {
            Self::Array(items) => {
                for (i, item) in items.borrow().iter().enumerate().skip(from) {
                    path.push(i.to_string());
                    item.track_into(&mut path);
                    path.pop();
                }
            }
            Self::Object(map) => {
                for (key, value) in map.borrow().iter() {
                    path.push(key.clone());
                    value.track_into(&mut path);
                    path.pop();
                }
            }
            _ => {}
        }
    }

    /// Detach this container, and the containers below it, while they are
    /// still tracked at or under `prefix`. Containers that have since been
    /// placed elsewhere keep their provenance.
    pub fn untrack(&self, prefix: &[String]) {
        match self {
            Self::Array(items) | Self::Set(items) => {
                if let Some(_visit) = items.release(prefix) {
                    for item in items.borrow().iter() {
                        item.untrack(prefix);
                    }
                }
            }
            Self::Object(map) => {
                if let Some(_visit) = map.release(prefix) {
                    for value in map.borrow().values() {
                        value.untrack(prefix);
                    }
                }
            }
            _ => {}
        }
    }

    fn track_into(&self, path: &mut Vec<String>) {
        match self {
            Self::Array(items) => {
                if let Some(_visit) = items.claim(path) {
                    for (i, item) in items.borrow().iter().enumerate() {
                        path.push(i.to_string());
                        item.track_into(path);
                        path.pop();
                    }
                }
            }
            Self::Object(map) => {
                if let Some(_visit) = map.claim(path) {
                    for (key, value) in map.borrow().iter() {
                        path.push(key.clone());
                        value.track_into(path);
                        path.pop();
                    }
                }
            }
            Self::Set(items) => {
                items.claim(path);
            }
            _ => {}
        }
    }

    // =========================================================================
    // CHILD ACCESS
    // =========================================================================

    /// An own child by key (object key or array index). Containers come
    /// back as handles to the same container.
    #[must_use]
    pub fn child(&self, key: &str) -> Option<Value> {
        match self {
            Self::Object(map) => map.borrow().get(key).cloned(),
            Self::Array(items) => parse_index(key).and_then(|i| items.borrow().get(i).cloned()),
            _ => None,
        }
    }

    /// Assign an own child. Arrays grow with `undefined` holes when the index
    /// is past the end; `length` truncates or extends.
    pub fn set_child(&self, key: &str, value: Value) -> Result<(), TesseraError> {
        match self {
            Self::Object(map) => {
                map.borrow_mut().insert(key.to_string(), value);
                Ok(())
            }
            Self::Array(items) => {
                if key == "length" {
                    let n = value.to_number();
                    if n < 0.0 || n.fract() != 0.0 || !n.is_finite() {
                        return Err(TesseraError::Type("Invalid array length".into()));
                    }
                    items.borrow_mut().resize(n as usize, Value::Undefined);
                    return Ok(());
                }
                let index = parse_index(key).ok_or_else(|| {
                    TesseraError::Type(format!("Cannot set non-index property '{}' on array", key))
                })?;
                let mut items = items.borrow_mut();
                if index >= items.len() {
                    items.resize(index + 1, Value::Undefined);
                }
                items[index] = value;
                Ok(())
            }
            other => Err(TesseraError::Type(format!(
                "Cannot set properties of {} (setting '{}')",
                other.describe_kind(),
                key
            ))),
        }
    }

    /// Delete an own child. Array elements become holes. Returns whether
    /// something was removed.
    pub fn remove_child(&self, key: &str) -> Result<bool, TesseraError> {
        match self {
            Self::Object(map) => Ok(map.borrow_mut().remove(key).is_some()),
            Self::Array(items) => {
                let mut items = items.borrow_mut();
                match parse_index(key).and_then(|i| items.get_mut(i)) {
                    Some(slot) => {
                        *slot = Value::Undefined;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            Self::Undefined | Self::Null => Err(TesseraError::Type(format!(
                "Cannot convert {} to object (deleting '{}')",
                self.describe_kind(),
                key
            ))),
            _ => Ok(false),
        }
    }

    /// A descendant by path.
    #[must_use]
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<Value> {
        path.iter()
            .try_fold(self.clone(), |current, key| current.child(key.as_ref()))
    }

    /// Assign a descendant by path. The parent must exist; an empty path
    /// replaces the value itself.
    pub fn set_path<S: AsRef<str>>(&mut self, path: &[S], value: Value) -> Result<(), TesseraError> {
        let Some((last, parents)) = path.split_last() else {
            *self = value;
            return Ok(());
        };
        self.walk(parents, last.as_ref())?
            .set_child(last.as_ref(), value)
    }

    /// Delete a descendant by path. Missing parents are a no-op.
    pub fn delete_path<S: AsRef<str>>(&self, path: &[S]) -> Result<bool, TesseraError> {
        let Some((last, parents)) = path.split_last() else {
            return Ok(false);
        };
        match self.get_path(parents) {
            Some(parent) => parent.remove_child(last.as_ref()),
            None => Ok(false),
        }
    }

    fn walk<S: AsRef<str>>(&self, parents: &[S], setting: &str) -> Result<Value, TesseraError> {
        let mut current = self.clone();
        for key in parents {
            let key = key.as_ref();
            let kind = current.describe_kind();
            current = current.child(key).ok_or_else(|| {
                TesseraError::Type(format!(
                    "Cannot read properties of {} (reading '{}') while setting '{}'",
                    kind, key, setting
                ))
            })?;
        }
        Ok(current)
    }

    /// Short description used in error messages.
    #[must_use]
    pub fn describe_kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Array(_) => "array",
            Self::Set(_) => "set",
            Self::Promise(_) => "promise",
            other => other.type_name(),
        }
    }

    // =========================================================================
    // JSON
    // =========================================================================

    /// Convert to JSON. `undefined` becomes `null` in arrays and is omitted
    /// from objects; sets become arrays; functions become `"[Function name]"`;
    /// a cyclic reference becomes `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Undefined | Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::String(s) => Json::String(s.clone()),
            Self::Array(items) | Self::Set(items) => match items.visit() {
                Some(_visit) => Json::Array(items.borrow().iter().map(Value::to_json).collect()),
                None => Json::Null,
            },
            Self::Object(map) => match map.visit() {
                Some(_visit) => Json::Object(
                    map.borrow()
                        .iter()
                        .filter(|(_, v)| !matches!(v, Value::Undefined))
                        .map(|(k, v)| (k.clone(), v.to_json()))
                        .collect(),
                ),
                None => Json::Null,
            },
            Self::Function(_) | Self::Promise(_) => Json::String(self.to_display_string()),
        }
    }
}

impl PartialEq for Value {
    /// Structural equality, for assertions and snapshot comparison. Script
    /// `===` is [`Value::strict_equals`].
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Array(a), Self::Array(b)) | (Self::Set(a), Self::Set(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => self.strict_equals(other),
        }
    }
}

impl fmt::Display for Value {
    /// Error-aware rendering: `{ name, message }` objects render as
    /// `name: message`, everything else as `ToString`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Self::Object(map) = self {
            let map = map.borrow();
            if let (Some(Self::String(name)), Some(Self::String(message))) =
                (map.get("name"), map.get("message"))
            {
                return write!(f, "{}: {}", name, message);
            }
        }
        f.write_str(&self.to_display_string())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Undefined | Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => number_to_json(*n).serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) | Self::Set(items) => {
                let Some(_visit) = items.visit() else {
                    return serializer.serialize_unit();
                };
                let items = items.borrow();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(entries) => {
                let Some(_visit) = entries.visit() else {
                    return serializer.serialize_unit();
                };
                let entries = entries.borrow();
                let mut map = serializer.serialize_map(None)?;
                for (k, v) in entries.iter().filter(|(_, v)| !matches!(v, Value::Undefined)) {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Self::Function(_) | Self::Promise(_) => {
                serializer.serialize_str(&self.to_display_string())
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => Self::from(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<ObjectMap>(),
            ),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        Self::from(json.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::array(items)
    }
}

impl From<ObjectMap> for Value {
    fn from(map: ObjectMap) -> Self {
        Self::Object(Shared::new(map))
    }
}

// =============================================================================
// FUNCTIONS
// =============================================================================

/// A callable value.
pub struct Function {
    /// Declared or inferred name, used in diagnostics.
    pub name: Option<String>,
    /// Implementation.
    pub kind: FunctionKind,
}

/// Implementation of a callable.
pub enum FunctionKind {
    /// User-authored function.
    Script(ScriptFunction),
    /// Builtin provided by the engine.
    Native(NativeFunction),
}

/// A user-authored function together with its binding context.
pub struct ScriptFunction {
    /// Parsed definition.
    pub definition: Rc<FunctionExpr>,
    /// Entity that `this` resolves to inside the body.
    pub this_entity: Option<String>,
    /// Enclosing scopes, shared with the code that created the function.
    pub captured: Environment,
}

impl Function {
    /// A user function bound to an entity, with nothing captured.
    #[must_use]
    pub fn bound(definition: Rc<FunctionExpr>, entity: &str, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            kind: FunctionKind::Script(ScriptFunction {
                definition,
                this_entity: Some(entity.to_string()),
                captured: Environment::new(),
            }),
        }
    }

    /// A builtin.
    #[must_use]
    pub fn native(name: &str, native: NativeFunction) -> Self {
        Self {
            name: Some(name.to_string()),
            kind: FunctionKind::Native(native),
        }
    }

    /// Whether the function was declared with the `async` marker.
    #[must_use]
    pub fn is_async(&self) -> bool {
        match &self.kind {
            FunctionKind::Script(script) => script.definition.is_async,
            FunctionKind::Native(_) => false,
        }
    }

    /// Name for diagnostics (`anonymous` when unnamed).
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            FunctionKind::Script(_) => "script",
            FunctionKind::Native(_) => "native",
        };
        f.debug_struct("Function")
            .field("name", &self.display_name())
            .field("kind", &kind)
            .field("async", &self.is_async())
            .finish()
    }
}

// =============================================================================
// NUMBERS & INDICES
// =============================================================================

/// Parse a canonical array index (`0`, `1`, ... without leading zeros).
#[must_use]
pub fn parse_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// JavaScript number formatting.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == 0.0 {
        "0".to_string()
    } else {
        n.to_string()
    }
}

/// JavaScript `ToNumber` for strings.
#[must_use]
pub fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return i64::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => trimmed.parse().unwrap_or(f64::NAN),
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_follows_script_rules() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::from(f64::NAN).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn to_number_conversions() {
        assert_eq!(Value::from(" 42 ").to_number(), 42.0);
        assert_eq!(Value::from("").to_number(), 0.0);
        assert!(Value::from("abc").to_number().is_nan());
        assert_eq!(Value::Null.to_number(), 0.0);
        assert_eq!(Value::array(vec![Value::from(7)]).to_number(), 7.0);
        assert_eq!(Value::array(vec![]).to_number(), 0.0);
    }

    #[test]
    fn array_display_joins_with_commas() {
        let arr = Value::array(vec![Value::from(1), Value::Null, Value::from("x")]);
        assert_eq!(arr.to_display_string(), "1,,x");
    }

    #[test]
    fn loose_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(Value::from(1).loose_equals(&Value::from("1")));
        assert!(Value::from(true).loose_equals(&Value::from(1)));
        assert!(!Value::Null.loose_equals(&Value::from(0)));
    }

    #[test]
    fn set_path_creates_keys_and_grows_arrays() {
        let mut value = Value::from(json!({"a": {"list": [1]}}));
        value.set_path(&["a", "b"], Value::from(2)).expect("set");
        value.set_path(&["a", "list", "2"], Value::from(3)).expect("set");

        assert_eq!(value.get_path(&["a", "b"]), Some(Value::from(2)));
        assert_eq!(
            value.get_path(&["a", "list"]),
            Some(Value::array(vec![Value::from(1), Value::Undefined, Value::from(3)]))
        );
    }

    #[test]
    fn set_path_through_missing_parent_fails() {
        let mut value = Value::from(json!({}));
        let result = value.set_path(&["missing", "x"], Value::from(1));
        assert!(matches!(result, Err(TesseraError::Type(_))));
    }

    #[test]
    fn delete_path_is_noop_for_missing() {
        let value = Value::from(json!({"a": 1}));
        assert!(!value.delete_path(&["b", "c"]).expect("delete"));
        assert!(value.delete_path(&["a"]).expect("delete"));
        assert_eq!(value, Value::from(json!({})));
    }

    #[test]
    fn json_conversion_omits_undefined_fields() {
        let value = Value::object([("a", Value::Undefined), ("b", Value::from(1.0))]);
        assert_eq!(value.to_json(), json!({"b": 1}));
        assert_eq!(
            serde_json::to_string(&value).expect("serialize"),
            r#"{"b":1}"#
        );
    }

    #[test]
    fn clones_share_the_container() {
        let original = Value::from(json!({"list": [1, 2]}));
        let alias = original.clone();
        alias.get_path(&["list"]).expect("list").set_child("0", Value::from(9)).expect("set");
        assert_eq!(original.get_path(&["list", "0"]), Some(Value::from(9)));
        assert!(original.strict_equals(&alias));
    }

    #[test]
    fn deep_clones_are_independent() {
        let original = Value::from(json!({"list": [1, 2]}));
        let copy = original.deep_clone();
        copy.get_path(&["list"]).expect("list").set_child("0", Value::from(9)).expect("set");
        assert_eq!(original.get_path(&["list", "0"]), Some(Value::from(1)));
        assert_eq!(copy.provenance(), Provenance::Detached);
        assert!(!original.strict_equals(&copy));
    }

    #[test]
    fn equality_is_structural_but_identity_for_scripts() {
        let a = Value::array(vec![Value::from(1)]);
        let b = Value::array(vec![Value::from(1)]);
        assert_eq!(a, b);
        assert!(!a.strict_equals(&b));
        assert!(a.strict_equals(&a.clone()));
    }

    #[test]
    fn cycles_are_cut_everywhere() {
        let list = Value::array(vec![Value::from(1)]);
        list.set_child("1", list.clone()).expect("self reference");

        assert!(list.has_cycle());
        assert_eq!(list.to_json(), json!([1, null]));
        assert_eq!(list.to_display_string(), "1,");
        assert_eq!(list.deep_clone(), Value::array(vec![Value::from(1), Value::Undefined]));
        assert!(format!("{:?}", list).contains("[Circular]"));
        assert!(!Value::from(json!({"a": [1, [2]]})).has_cycle());
    }

    #[test]
    fn tracking_stamps_descendants() {
        let value = Value::from(json!({"v": {"a": [{"x": 1}]}}));
        value.track(&["Obj1".to_string()]);

        let inner = value.get_path(&["v", "a", "0"]).expect("inner");
        assert_eq!(
            inner.provenance(),
            Provenance::Tracked(vec!["Obj1".into(), "v".into(), "a".into(), "0".into()])
        );
    }

    #[test]
    fn tracking_skips_cyclic_placement_and_frozen() {
        let root = Value::object([("a", Value::object::<&str>([]))]);
        root.track(&["E".to_string()]);
        let a = root.child("a").expect("a");
        a.set_child("self", a.clone()).expect("cycle");
        a.track(&["E".to_string(), "a".to_string(), "self".to_string()]);
        assert_eq!(a.provenance(), Provenance::Tracked(vec!["E".into(), "a".into()]));

        let frozen = Value::object::<&str>([]);
        frozen.freeze();
        frozen.track(&["E".to_string()]);
        assert_eq!(frozen.provenance(), Provenance::Frozen);
    }

    #[test]
    fn untracking_stops_at_containers_placed_elsewhere() {
        let moved = Value::object::<&str>([]);
        let old = Value::object([("moved", moved.clone()), ("kept", Value::array(vec![]))]);
        old.track(&["E".to_string(), "old".to_string()]);
        moved.track(&["E".to_string(), "new".to_string()]);

        old.untrack(&["E".to_string(), "old".to_string()]);
        assert_eq!(old.provenance(), Provenance::Detached);
        assert_eq!(old.child("kept").map(|v| v.provenance()), Some(Provenance::Detached));
        assert_eq!(
            moved.provenance(),
            Provenance::Tracked(vec!["E".into(), "new".into()])
        );
    }

    #[test]
    fn index_parsing_rejects_leading_zeros() {
        assert_eq!(parse_index("0"), Some(0));
        assert_eq!(parse_index("12"), Some(12));
        assert_eq!(parse_index("01"), None);
        assert_eq!(parse_index("-1"), None);
    }

    #[test]
    fn error_values_display_name_and_message() {
        let err = Value::error("TypeError", "bad");
        assert_eq!(err.to_string(), "TypeError: bad");
    }
}
