//! # Mutation Patch Tracker
//!
//! Records in-place mutations performed by user code against installed
//! entity references, so that they can be replayed into the Variable State
//! Store after the function that made them returns.
//!
//! A patch is addressed by a [`PatchPath`]: the entity name followed by
//! one segment per member, rendered as `Entity.variable.sub...`.
//! Mutating container methods are modelled by [`MutatingMethod`]; its
//! [`apply`](MutatingMethod::apply) routine is the one the interpreter runs
//! when user code calls the method, and the one replay runs afterwards.

use crate::primitives::PATH_SEPARATOR;
use crate::types::TesseraError;
use crate::value::{ObjectMap, Value};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

// =============================================================================
// MUTATING METHODS
// =============================================================================

/// Container methods that mutate their receiver in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum MutatingMethod {
    #[serde(rename = "push")]
    Push,
    #[serde(rename = "pop")]
    Pop,
    #[serde(rename = "shift")]
    Shift,
    #[serde(rename = "unshift")]
    Unshift,
    #[serde(rename = "splice")]
    Splice,
    #[serde(rename = "reverse")]
    Reverse,
    #[serde(rename = "sort")]
    Sort,
    #[serde(rename = "fill")]
    Fill,
    #[serde(rename = "add")]
    SetAdd,
    #[serde(rename = "delete")]
    SetDelete,
    #[serde(rename = "clear")]
    SetClear,
}

impl MutatingMethod {
    /// Resolve a method name against a receiver.
    #[must_use]
    pub fn lookup(receiver: &Value, name: &str) -> Option<Self> {
        match receiver {
            Value::Array(_) => match name {
                "push" => Some(Self::Push),
                "pop" => Some(Self::Pop),
                "shift" => Some(Self::Shift),
                "unshift" => Some(Self::Unshift),
                "splice" => Some(Self::Splice),
                "reverse" => Some(Self::Reverse),
                "sort" => Some(Self::Sort),
                "fill" => Some(Self::Fill),
                _ => None,
            },
            Value::Set(_) => match name {
                "add" => Some(Self::SetAdd),
                "delete" => Some(Self::SetDelete),
                "clear" => Some(Self::SetClear),
                _ => None,
            },
            _ => None,
        }
    }

    /// Script-visible method name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pop => "pop",
            Self::Shift => "shift",
            Self::Unshift => "unshift",
            Self::Splice => "splice",
            Self::Reverse => "reverse",
            Self::Sort => "sort",
            Self::Fill => "fill",
            Self::SetAdd => "add",
            Self::SetDelete => "delete",
            Self::SetClear => "clear",
        }
    }

    /// Mutate `target` in place and return the method's result.
    ///
    /// `Sort` always uses the default ordering here; comparator sorts are
    /// performed by the interpreter and recorded as a `Set` patch. The
    /// elements are edited on a copy and written back, so a receiver that
    /// contains itself is never borrowed twice.
    pub fn apply(self, target: &Value, args: &[Value]) -> Result<Value, TesseraError> {
        match target {
            Value::Array(cell) if self.is_array_method() => {
                let mut items = cell.borrow().clone();
                let result = self.apply_to_array(&mut items, args);
                *cell.borrow_mut() = items;
                Ok(result.unwrap_or_else(|| target.clone()))
            }
            Value::Set(cell) if !self.is_array_method() => {
                let mut items = cell.borrow().clone();
                let result = self.apply_to_set(&mut items, args);
                *cell.borrow_mut() = items;
                Ok(result.unwrap_or_else(|| target.clone()))
            }
            other => Err(TesseraError::Type(format!(
                "{}.{} is not a function",
                other.describe_kind(),
                self.name()
            ))),
        }
    }

    fn is_array_method(self) -> bool {
        !matches!(self, Self::SetAdd | Self::SetDelete | Self::SetClear)
    }

    /// `None` when the method returns its receiver.
    fn apply_to_array(self, items: &mut Vec<Value>, args: &[Value]) -> Option<Value> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
        match self {
            Self::Push => {
                items.extend(args.iter().cloned());
                Some(Value::from(items.len()))
            }
            Self::Pop => Some(items.pop().unwrap_or_default()),
            Self::Shift => Some(if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            }),
            Self::Unshift => {
                items.splice(0..0, args.iter().cloned());
                Some(Value::from(items.len()))
            }
            Self::Splice => {
                let len = items.len();
                let start = relative_index(&arg(0), len, 0);
                let delete_count = match args.get(1) {
                    None => len - start,
                    Some(count) => clamp_count(count.to_number(), len - start),
                };
                let removed: Vec<Value> = items
                    .splice(start..start + delete_count, args.iter().skip(2).cloned())
                    .collect();
                Some(Value::array(removed))
            }
            Self::Reverse => {
                items.reverse();
                None
            }
            Self::Sort => {
                items.sort_by(default_order);
                None
            }
            Self::Fill => {
                let len = items.len();
                let start = relative_index(&arg(1), len, 0);
                let end = relative_index(&arg(2), len, len);
                let value = arg(0);
                for slot in items.iter_mut().take(end).skip(start) {
                    *slot = value.clone();
                }
                None
            }
            Self::SetAdd | Self::SetDelete | Self::SetClear => None,
        }
    }

    fn apply_to_set(self, items: &mut Vec<Value>, args: &[Value]) -> Option<Value> {
        let value = args.first().cloned().unwrap_or_default();
        match self {
            Self::SetAdd => {
                if !items.iter().any(|item| same_value_zero(item, &value)) {
                    items.push(value);
                }
                None
            }
            Self::SetDelete => {
                let before = items.len();
                items.retain(|item| !same_value_zero(item, &value));
                Some(Value::Bool(items.len() != before))
            }
            _ => {
                items.clear();
                Some(Value::Undefined)
            }
        }
    }
}

impl fmt::Display for MutatingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Default array ordering: `undefined` last, everything else by string form.
pub(crate) fn default_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => Ordering::Equal,
        (Value::Undefined, _) => Ordering::Greater,
        (_, Value::Undefined) => Ordering::Less,
        _ => a.to_display_string().cmp(&b.to_display_string()),
    }
}

/// `SameValueZero`: strict equality, except that NaN equals NaN.
pub(crate) fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => a.strict_equals(b),
    }
}

/// Resolve a possibly negative index argument against `len`.
pub(crate) fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        len.saturating_sub((-n).min(len as f64) as usize)
    } else {
        n.min(len as f64) as usize
    }
}

fn clamp_count(n: f64, max: usize) -> usize {
    if n.is_nan() || n <= 0.0 {
        0
    } else {
        n.trunc().min(max as f64) as usize
    }
}

// =============================================================================
// PATCHES
// =============================================================================

/// Operation kind of a [`Patch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchKind {
    Set,
    Delete,
    PrototypeMethodCall,
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Set => "SET",
            Self::Delete => "DELETE",
            Self::PrototypeMethodCall => "PROTOTYPE_METHOD_CALL",
        })
    }
}

/// Address of a patch: entity first, then one segment per member.
///
/// Segments are kept apart because keys may themselves contain the
/// separator; the dot-joined form is only for display and serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PatchPath(Vec<String>);

impl PatchPath {
    pub fn new<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for PatchPath {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for PatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", PATH_SEPARATOR)?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl Serialize for PatchPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One recorded mutation. Values and arguments are copies taken when the
/// mutation happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operation")]
pub enum Patch {
    /// Assignment of `value` at `path`.
    #[serde(rename = "SET")]
    Set { path: PatchPath, value: Value },
    /// Removal of the property at `path`.
    #[serde(rename = "DELETE")]
    Delete { path: PatchPath },
    /// Mutating method called on the container at `path`.
    #[serde(rename = "PROTOTYPE_METHOD_CALL")]
    MethodCall {
        path: PatchPath,
        method: MutatingMethod,
        args: Vec<Value>,
    },
}

impl Patch {
    #[must_use]
    pub fn path(&self) -> &PatchPath {
        match self {
            Self::Set { path, .. } | Self::Delete { path } | Self::MethodCall { path, .. } => path,
        }
    }

    #[must_use]
    pub fn kind(&self) -> PatchKind {
        match self {
            Self::Set { .. } => PatchKind::Set,
            Self::Delete { .. } => PatchKind::Delete,
            Self::MethodCall { .. } => PatchKind::PrototypeMethodCall,
        }
    }

    /// Replay this patch into an entity's variable map. `rest` is the path
    /// without its entity segment and must not be empty.
    ///
    /// Nested writes edit a copy of the variable that is then stored, so
    /// values previously read out of the map keep their contents.
    pub fn replay(&self, map: &mut ObjectMap, rest: &[String]) -> Result<(), TesseraError> {
        let Some((variable, sub)) = rest.split_first() else {
            return Err(TesseraError::MalformedPatchPath(self.path().to_string()));
        };
        match self {
            Self::Set { value, .. } if sub.is_empty() => {
                map.insert(variable.clone(), value.deep_clone());
                return Ok(());
            }
            Self::Delete { .. } if sub.is_empty() => {
                map.remove(variable);
                return Ok(());
            }
            _ => {}
        }

        let Some(mut root) = map.get(variable).map(Value::deep_clone) else {
            return match self {
                Self::Delete { .. } => Ok(()),
                _ => Err(missing_parent(self.path())),
            };
        };
        match self {
            Self::Set { value, .. } => root.set_path(sub, value.deep_clone())?,
            Self::Delete { .. } => {
                root.delete_path(sub)?;
            }
            Self::MethodCall { method, args, .. } => {
                let target = root.get_path(sub).ok_or_else(|| missing_parent(self.path()))?;
                let args: Vec<Value> = args.iter().map(Value::deep_clone).collect();
                method.apply(&target, &args)?;
            }
        }
        map.insert(variable.clone(), root);
        Ok(())
    }
}

fn missing_parent(path: &PatchPath) -> TesseraError {
    TesseraError::Type(format!("Cannot replay patch on missing value at '{}'", path))
}

// =============================================================================
// TRACKER
// =============================================================================

/// Ordered buffer of recorded patches.
///
/// Tracking starts disabled; a session enables it for trigger-mode runs.
/// The var-update switch lets callers suppress incremental effects while
/// still recording.
#[derive(Debug, Clone)]
pub struct PatchTracker {
    patches: Vec<Patch>,
    tracking: bool,
    var_updates: bool,
}

impl Default for PatchTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            patches: Vec::new(),
            tracking: false,
            var_updates: true,
        }
    }

    /// Record a patch. Returns `false` (and records nothing) while tracking
    /// is disabled.
    pub fn add(&mut self, patch: Patch) -> bool {
        if !self.tracking {
            return false;
        }
        tracing::trace!(path = %patch.path(), kind = %patch.kind(), "patch recorded");
        self.patches.push(patch);
        true
    }

    pub fn enable_tracking(&mut self) {
        self.tracking = true;
    }

    pub fn disable_tracking(&mut self) {
        self.tracking = false;
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn enable_var_update(&mut self) {
        self.var_updates = true;
    }

    pub fn disable_var_update(&mut self) {
        self.var_updates = false;
    }

    #[must_use]
    pub fn var_updates_enabled(&self) -> bool {
        self.var_updates
    }

    /// Recorded patches in call order.
    #[must_use]
    pub fn get_all(&self) -> &[Patch] {
        &self.patches
    }

    /// Move the recorded patches out, leaving the buffer empty.
    pub fn take_all(&mut self) -> Vec<Patch> {
        std::mem::take(&mut self.patches)
    }

    pub fn clear(&mut self) {
        self.patches.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(values: &[f64]) -> Value {
        Value::array(values.iter().copied().map(Value::from).collect())
    }

    fn path(segments: &[&str]) -> PatchPath {
        PatchPath::new(segments.iter().copied())
    }

    fn rest(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tracking_disabled_by_default() {
        let mut tracker = PatchTracker::new();
        assert!(!tracker.is_tracking());
        assert!(!tracker.add(Patch::Delete {
            path: path(&["Obj1", "v"])
        }));
        assert!(tracker.is_empty());
    }

    #[test]
    fn records_in_order_and_clears() {
        let mut tracker = PatchTracker::new();
        tracker.enable_tracking();
        assert!(tracker.add(Patch::Set {
            path: path(&["Obj1", "a"]),
            value: Value::from(1),
        }));
        assert!(tracker.add(Patch::Delete {
            path: path(&["Obj1", "b"])
        }));
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.get_all()[0].path().to_string(), "Obj1.a");
        assert_eq!(tracker.get_all()[1].kind(), PatchKind::Delete);
        tracker.clear();
        assert!(tracker.is_empty());
        assert!(tracker.is_tracking());
    }

    #[test]
    fn var_update_switch_is_independent() {
        let mut tracker = PatchTracker::new();
        assert!(tracker.var_updates_enabled());
        tracker.disable_var_update();
        tracker.enable_tracking();
        assert!(tracker.add(Patch::Delete {
            path: path(&["Obj1", "v"])
        }));
        assert!(!tracker.var_updates_enabled());
    }

    #[test]
    fn array_methods() {
        let arr = numbers(&[1.0, 2.0]);
        assert_eq!(
            MutatingMethod::Push.apply(&arr, &[Value::from(3)]).expect("push"),
            Value::from(3)
        );
        assert_eq!(MutatingMethod::Shift.apply(&arr, &[]).expect("shift"), Value::from(1));
        MutatingMethod::Unshift
            .apply(&arr, &[Value::from(0)])
            .expect("unshift");
        assert_eq!(arr, numbers(&[0.0, 2.0, 3.0]));

        let removed = MutatingMethod::Splice
            .apply(&arr, &[Value::from(1), Value::from(1), Value::from(9)])
            .expect("splice");
        assert_eq!(removed, numbers(&[2.0]));
        assert_eq!(arr, numbers(&[0.0, 9.0, 3.0]));

        let sorted = MutatingMethod::Sort.apply(&arr, &[]).expect("sort");
        assert!(sorted.strict_equals(&arr));
        assert_eq!(arr, numbers(&[0.0, 3.0, 9.0]));

        MutatingMethod::Fill
            .apply(&arr, &[Value::from(7), Value::from(-1)])
            .expect("fill");
        assert_eq!(arr, numbers(&[0.0, 3.0, 7.0]));
    }

    #[test]
    fn default_sort_is_lexicographic() {
        let arr = numbers(&[10.0, 9.0, 1.0]);
        MutatingMethod::Sort.apply(&arr, &[]).expect("sort");
        assert_eq!(arr, numbers(&[1.0, 10.0, 9.0]));
    }

    #[test]
    fn receiver_containing_itself_can_be_sorted() {
        let arr = numbers(&[2.0]);
        MutatingMethod::Push.apply(&arr, &[arr.clone()]).expect("push");
        MutatingMethod::Sort.apply(&arr, &[]).expect("sort");
        assert_eq!(arr.child("0"), Some(Value::from(2)));
        assert!(arr.child("1").is_some_and(|inner| inner.strict_equals(&arr)));
    }

    #[test]
    fn set_methods() {
        let set = Value::new_set(vec![]);
        MutatingMethod::SetAdd.apply(&set, &[Value::from(1)]).expect("add");
        MutatingMethod::SetAdd.apply(&set, &[Value::from(1)]).expect("add");
        assert_eq!(set, Value::new_set(vec![Value::from(1)]));
        assert_eq!(
            MutatingMethod::SetDelete
                .apply(&set, &[Value::from(1)])
                .expect("delete"),
            Value::Bool(true)
        );
        MutatingMethod::SetClear.apply(&set, &[]).expect("clear");
        assert_eq!(set, Value::new_set(vec![]));
    }

    #[test]
    fn wrong_receiver_is_type_error() {
        let obj = Value::from(ObjectMap::new());
        assert!(matches!(
            MutatingMethod::Push.apply(&obj, &[]),
            Err(TesseraError::Type(_))
        ));
        assert!(matches!(
            MutatingMethod::SetAdd.apply(&numbers(&[]), &[]),
            Err(TesseraError::Type(_))
        ));
    }

    #[test]
    fn replay_nested_paths() {
        let mut map = ObjectMap::new();
        Patch::Set {
            path: path(&["Obj1", "v"]),
            value: Value::object([("a", Value::array(vec![]))]),
        }
        .replay(&mut map, &rest(&["v"]))
        .expect("set");
        Patch::MethodCall {
            path: path(&["Obj1", "v", "a"]),
            method: MutatingMethod::Push,
            args: vec![Value::from(1)],
        }
        .replay(&mut map, &rest(&["v", "a"]))
        .expect("push");
        Patch::Delete {
            path: path(&["Obj1", "v", "a", "0"]),
        }
        .replay(&mut map, &rest(&["v", "a", "0"]))
        .expect("delete");
        assert_eq!(
            map.get("v"),
            Some(&Value::object([("a", Value::array(vec![Value::Undefined]))]))
        );
    }

    #[test]
    fn replay_keeps_earlier_reads_intact() {
        let mut map = ObjectMap::new();
        map.insert("xs".into(), numbers(&[1.0]));
        let before = map.get("xs").cloned().expect("xs");

        Patch::MethodCall {
            path: path(&["Obj1", "xs"]),
            method: MutatingMethod::Push,
            args: vec![Value::from(2)],
        }
        .replay(&mut map, &rest(&["xs"]))
        .expect("push");

        assert_eq!(before, numbers(&[1.0]));
        assert_eq!(map.get("xs"), Some(&numbers(&[1.0, 2.0])));
    }

    #[test]
    fn dotted_keys_stay_one_segment() {
        let mut map = ObjectMap::new();
        map.insert("v".into(), Value::object::<&str>([]));
        let patch = Patch::Set {
            path: path(&["Obj1", "v", "a.b"]),
            value: Value::from(1),
        };
        patch.replay(&mut map, &rest(&["v", "a.b"])).expect("set");

        assert_eq!(map.get("v"), Some(&Value::object([("a.b", Value::from(1))])));
        assert_eq!(patch.path().segments().len(), 3);
        assert_eq!(patch.path().to_string(), "Obj1.v.a.b");
    }

    #[test]
    fn patch_serializes_with_operation_tag() {
        let patch = Patch::MethodCall {
            path: path(&["Obj1", "v"]),
            method: MutatingMethod::Push,
            args: vec![Value::from(2)],
        };
        let json = serde_json::to_value(&patch).expect("serialize");
        assert_eq!(json["operation"], "PROTOTYPE_METHOD_CALL");
        assert_eq!(json["path"], "Obj1.v");
        assert_eq!(json["method"], "push");
        assert_eq!(json["args"][0], 2);
        assert_eq!(patch.kind().to_string(), "PROTOTYPE_METHOD_CALL");
    }
}
