//! Tree-walking interpreter.
//!
//! Containers are shared handles, so a write through any alias (a local,
//! a callback parameter, a member chain) lands in the same container.
//! Whether the write is recorded is decided by the container itself: when
//! its [`Provenance`] is tracked, the host is told about the mutation as a
//! [`Patch`] addressed by that path, in execution order.
//!
//! The interpreter never owns global state; it reads it through
//! [`ScriptHost`], which the sandbox implements.

use super::ast::{
    AssignOp, BinaryOp, DeclKind, Expr, FunctionBody, FunctionExpr, Literal, LogicalOp,
    MemberProperty, Program, PropertyKey, Stmt, TemplatePart, UnaryOp, UpdateOp,
};
use super::builtins::{self, NativeFunction};
use crate::config::ExecutionLimits;
use crate::logs::LogLevel;
use crate::patch::{MutatingMethod, Patch, PatchPath};
use crate::types::TesseraError;
use crate::value::{
    Function, FunctionKind, ObjectMap, Provenance, ScriptFunction, Settlement, Value, format_number,
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

// =============================================================================
// HOST & ENVIRONMENT
// =============================================================================

/// What the interpreter needs from its embedding.
pub trait ScriptHost {
    /// Read a global binding. Scripts cannot rebind globals.
    fn global(&self, name: &str) -> Option<&Value>;

    /// Receive a patch for a mutation that has already been applied.
    fn record_patch(&mut self, patch: Patch);

    /// Receive `console.*` output.
    fn console(&mut self, level: LogLevel, entity: Option<&str>, message: String);

    /// Budget for this run.
    fn limits(&self) -> ExecutionLimits;
}

/// A local binding.
#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
}

/// One lexical scope.
pub type Scope = BTreeMap<String, Binding>;

/// A chain of scopes, outermost first. Closures share the scopes they were
/// created in.
pub type Environment = Vec<Rc<RefCell<Scope>>>;

struct Frame {
    env: Environment,
    this_entity: Option<String>,
}

enum Completion {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// A resolved assignment target.
enum Place {
    Local {
        name: String,
        scope: Rc<RefCell<Scope>>,
    },
    Global(String),
    /// A member of a container (or of a primitive, which rejects writes).
    Member { object: Value, key: String },
}

// =============================================================================
// INTERPRETER
// =============================================================================

/// Executes script ASTs against a [`ScriptHost`].
pub struct Interpreter<'h> {
    host: &'h mut dyn ScriptHost,
    frames: Vec<Frame>,
    steps: u64,
    limits: ExecutionLimits,
}

impl<'h> Interpreter<'h> {
    pub fn new(host: &'h mut dyn ScriptHost) -> Self {
        let limits = host.limits();
        Self {
            host,
            frames: vec![Frame {
                env: vec![Rc::new(RefCell::new(Scope::new()))],
                this_entity: None,
            }],
            steps: 0,
            limits,
        }
    }

    /// Evaluate an expression with `this` bound to `this_entity`.
    pub fn evaluate(&mut self, expr: &Expr, this_entity: Option<&str>) -> Result<Value, TesseraError> {
        let frame = Frame {
            env: vec![Rc::new(RefCell::new(Scope::new()))],
            this_entity: this_entity.map(str::to_string),
        };
        self.with_frame(frame, |interp| interp.eval(expr))
    }

    /// Run a statement list. Returns the value of a top-level `return`, or
    /// else the value of the last top-level expression statement.
    pub fn run(&mut self, program: &Program, this_entity: Option<&str>) -> Result<Value, TesseraError> {
        let frame = Frame {
            env: vec![Rc::new(RefCell::new(Scope::new()))],
            this_entity: this_entity.map(str::to_string),
        };
        self.with_frame(frame, |interp| {
            interp.declare_functions(&program.body)?;
            let mut last = Value::Undefined;
            for stmt in &program.body {
                if let Stmt::Expr(expr) = stmt {
                    interp.tick()?;
                    last = interp.eval(expr)?;
                    continue;
                }
                match interp.exec(stmt)? {
                    Completion::Return(value) => return Ok(value),
                    Completion::Normal => {}
                    Completion::Break | Completion::Continue => {
                        return Err(syntax("Illegal break or continue statement"));
                    }
                }
            }
            Ok(last)
        })
    }

    /// Call a function value.
    pub fn call(&mut self, function: &Rc<Function>, args: Vec<Value>) -> Result<Value, TesseraError> {
        self.tick()?;
        if self.frames.len() > self.limits.max_call_depth {
            return Err(TesseraError::LimitExceeded(
                "Maximum call stack size exceeded".into(),
            ));
        }
        match &function.kind {
            FunctionKind::Native(native) => self.call_native(*native, &args),
            FunctionKind::Script(script) => self.call_script(function, script, args),
        }
    }

    // =========================================================================
    // FRAMES & SCOPES
    // =========================================================================

    fn with_frame<T>(
        &mut self,
        frame: Frame,
        body: impl FnOnce(&mut Self) -> Result<T, TesseraError>,
    ) -> Result<T, TesseraError> {
        self.frames.push(frame);
        let result = body(self);
        self.frames.pop();
        result
    }

    fn with_scope<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T, TesseraError>,
    ) -> Result<T, TesseraError> {
        let depth = self.frame().env.len();
        self.frame_mut().env.push(Rc::new(RefCell::new(Scope::new())));
        let result = body(self);
        self.frame_mut().env.truncate(depth);
        result
    }

    fn frame(&self) -> &Frame {
        // The root frame pushed by `new` is never popped.
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn tick(&mut self) -> Result<(), TesseraError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(TesseraError::LimitExceeded(format!(
                "exceeded {} evaluation steps",
                self.limits.max_steps
            )));
        }
        Ok(())
    }

    fn declare(&mut self, name: &str, value: Value, mutable: bool) -> Result<(), TesseraError> {
        let scope = self
            .frame()
            .env
            .last()
            .cloned()
            .ok_or_else(|| syntax("No scope to declare in"))?;
        let mut scope = scope.borrow_mut();
        if scope.get(name).is_some_and(|existing| !existing.mutable) {
            return Err(syntax(format!("Identifier '{}' has already been declared", name)));
        }
        scope.insert(name.to_string(), Binding { value, mutable });
        Ok(())
    }

    fn find_scope(&self, name: &str) -> Option<Rc<RefCell<Scope>>> {
        self.frame()
            .env
            .iter()
            .rev()
            .find(|scope| scope.borrow().contains_key(name))
            .cloned()
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(scope) = self.find_scope(name) {
            return scope.borrow().get(name).map(|b| b.value.clone());
        }
        self.host.global(name).cloned()
    }

    fn this_value(&self) -> Value {
        self.frame()
            .this_entity
            .as_deref()
            .and_then(|entity| self.host.global(entity))
            .cloned()
            .unwrap_or_default()
    }

    fn declare_functions(&mut self, body: &[Stmt]) -> Result<(), TesseraError> {
        for stmt in body {
            if let Stmt::FunctionDecl(definition) = stmt {
                let name = definition.name.clone().unwrap_or_default();
                let closure = self.make_closure(definition);
                self.declare(&name, closure, true)?;
            }
        }
        Ok(())
    }

    fn make_closure(&self, definition: &Rc<FunctionExpr>) -> Value {
        let frame = self.frame();
        Value::Function(Rc::new(Function {
            name: definition.name.clone(),
            kind: FunctionKind::Script(ScriptFunction {
                definition: Rc::clone(definition),
                this_entity: frame.this_entity.clone(),
                captured: frame.env.clone(),
            }),
        }))
    }

    // =========================================================================
    // CALLS
    // =========================================================================

    fn call_native(&mut self, native: NativeFunction, args: &[Value]) -> Result<Value, TesseraError> {
        match native {
            NativeFunction::Console(level) => {
                let message = args.iter().map(console_text).collect::<Vec<_>>().join(" ");
                let entity = self.frame().this_entity.clone();
                self.host.console(level, entity.as_deref(), message);
                Ok(Value::Undefined)
            }
            NativeFunction::MutedConsole => Ok(Value::Undefined),
            other => builtins::call_native(other, args),
        }
    }

    fn call_script(
        &mut self,
        function: &Rc<Function>,
        script: &ScriptFunction,
        args: Vec<Value>,
    ) -> Result<Value, TesseraError> {
        let definition = &script.definition;
        let mut env = script.captured.clone();
        let scope = Rc::new(RefCell::new(Scope::new()));
        if let (Some(name), false) = (&definition.name, definition.is_arrow) {
            scope.borrow_mut().insert(
                name.clone(),
                Binding {
                    value: Value::Function(Rc::clone(function)),
                    mutable: false,
                },
            );
        }
        env.push(Rc::clone(&scope));
        let frame = Frame {
            env,
            this_entity: script.this_entity.clone(),
        };

        let result = self.with_frame(frame, |interp| {
            for (i, param) in definition.params.iter().enumerate() {
                let mut value = args.get(i).cloned().unwrap_or_default();
                if let (Value::Undefined, Some(default)) = (&value, &param.default) {
                    value = interp.eval(default)?;
                }
                scope.borrow_mut().insert(
                    param.name.clone(),
                    Binding {
                        value,
                        mutable: true,
                    },
                );
            }
            match &definition.body {
                FunctionBody::Expression(expr) => interp.eval(expr),
                FunctionBody::Block(body) => {
                    interp.declare_functions(body)?;
                    match interp.exec_list(body)? {
                        Completion::Return(value) => Ok(value),
                        _ => Ok(Value::Undefined),
                    }
                }
            }
        });

        if !definition.is_async {
            return result;
        }
        match result {
            Ok(value) if value.is_promise() => Ok(value),
            Ok(value) => Ok(Value::fulfilled(value)),
            Err(err) if err.is_catchable() => Ok(Value::rejected(err.to_script_value())),
            Err(err) => Err(err),
        }
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>, label: &str) -> Result<Value, TesseraError> {
        match callee {
            Value::Function(function) => self.call(&function, args),
            _ => Err(TesseraError::Type(format!("{} is not a function", label))),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, TesseraError> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    /// Evaluate a call. `None` means an optional chain short-circuited.
    fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> Result<Option<Value>, TesseraError> {
        let Expr::Member {
            object,
            property,
            optional,
        } = callee
        else {
            let Some(function) = self.eval_chain(callee)? else {
                return Ok(None);
            };
            let args = self.eval_args(args)?;
            return self.call_value(function, args, &describe(callee)).map(Some);
        };

        let Some(receiver) = self.eval_chain(object)? else {
            return Ok(None);
        };
        if *optional && receiver.is_nullish() {
            return Ok(None);
        }
        let name = self.property_key(property)?;
        let args = self.eval_args(args)?;
        self.call_method(receiver, &name, args, callee).map(Some)
    }

    fn call_method(
        &mut self,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
        callee: &Expr,
    ) -> Result<Value, TesseraError> {
        if let Some(method) = MutatingMethod::lookup(&receiver, name) {
            if let (MutatingMethod::Sort, Some(Value::Function(comparator))) = (method, args.first()) {
                let comparator = Rc::clone(comparator);
                return self.sort_with(&receiver, &comparator);
            }
            return self.call_mutating(&receiver, method, args);
        }

        if let Some(result) = self.array_callback_method(&receiver, name, &args) {
            return result;
        }
        if let Some(result) = builtins::call_method(&receiver, name, &args) {
            return result;
        }
        if receiver.is_nullish() {
            return Err(TesseraError::Type(format!(
                "Cannot read properties of {} (reading '{}')",
                receiver.describe_kind(),
                name
            )));
        }
        let member = member_of(&receiver, name)?;
        self.call_value(member, args, &describe(callee))
    }

    /// Run a mutating container method and record it when the receiver is
    /// tracked.
    fn call_mutating(
        &mut self,
        receiver: &Value,
        method: MutatingMethod,
        args: Vec<Value>,
    ) -> Result<Value, TesseraError> {
        let provenance = receiver.provenance();
        if provenance == Provenance::Frozen {
            return Err(read_only_member(method.name()));
        }
        let Provenance::Tracked(path) = provenance else {
            return method.apply(receiver, &args);
        };

        let appended_from = match (method, receiver) {
            (MutatingMethod::Push, Value::Array(items)) => Some(items.borrow().len()),
            _ => None,
        };
        if appended_from.is_none() {
            detach_elements(receiver, &path);
        }
        let result = method.apply(receiver, &args)?;
        receiver.track_children(&path, appended_from.unwrap_or(0));
        self.host.record_patch(Patch::MethodCall {
            path: PatchPath::from(path),
            method,
            args: args.iter().map(Value::deep_clone).collect(),
        });
        Ok(result)
    }

    /// `sort(comparator)`: the comparator runs in the interpreter, so a
    /// tracked receiver is recorded as a `Set` of the sorted array.
    fn sort_with(&mut self, receiver: &Value, comparator: &Rc<Function>) -> Result<Value, TesseraError> {
        let Value::Array(cell) = receiver else {
            return Err(TesseraError::Type("sort called on non-array".into()));
        };
        let provenance = receiver.provenance();
        if provenance == Provenance::Frozen {
            return Err(read_only_member("sort"));
        }
        let items = cell.borrow().clone();
        let sorted = self.merge_sort(items, comparator)?;
        if let Provenance::Tracked(path) = &provenance {
            detach_elements(receiver, path);
        }
        *cell.borrow_mut() = sorted;
        if let Provenance::Tracked(path) = provenance {
            receiver.track_children(&path, 0);
            self.host.record_patch(Patch::Set {
                value: receiver.deep_clone(),
                path: PatchPath::from(path),
            });
        }
        Ok(receiver.clone())
    }

    /// Callback methods iterate over a snapshot of the element handles, so
    /// a callback that writes through an element writes the element itself.
    fn array_callback_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: &[Value],
    ) -> Option<Result<Value, TesseraError>> {
        let Value::Array(items) = receiver else {
            return None;
        };
        if !matches!(
            name,
            "map" | "filter" | "find" | "findIndex" | "some" | "every" | "forEach" | "reduce"
        ) {
            return None;
        }
        let Some(Value::Function(callback)) = args.first() else {
            return Some(Err(TesseraError::Type(format!(
                "{} is not a function",
                args.first().map_or("undefined", Value::describe_kind)
            ))));
        };
        let callback = Rc::clone(callback);
        let snapshot = items.borrow().clone();
        Some(self.run_array_callback(receiver, &snapshot, name, &callback, args.get(1).cloned()))
    }

    fn run_array_callback(
        &mut self,
        receiver: &Value,
        items: &[Value],
        name: &str,
        callback: &Rc<Function>,
        initial: Option<Value>,
    ) -> Result<Value, TesseraError> {
        let call = |interp: &mut Self, i: usize, item: &Value| {
            interp.call(callback, vec![item.clone(), Value::from(i), receiver.clone()])
        };
        match name {
            "map" => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(call(self, i, item)?);
                }
                Ok(Value::array(out))
            }
            "filter" => {
                let mut out = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    if call(self, i, item)?.is_truthy() {
                        out.push(item.clone());
                    }
                }
                Ok(Value::array(out))
            }
            "find" | "findIndex" => {
                for (i, item) in items.iter().enumerate() {
                    if call(self, i, item)?.is_truthy() {
                        return Ok(if name == "find" {
                            item.clone()
                        } else {
                            Value::from(i)
                        });
                    }
                }
                Ok(if name == "find" {
                    Value::Undefined
                } else {
                    Value::Number(-1.0)
                })
            }
            "some" => {
                for (i, item) in items.iter().enumerate() {
                    if call(self, i, item)?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            "every" => {
                for (i, item) in items.iter().enumerate() {
                    if !call(self, i, item)?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            "forEach" => {
                for (i, item) in items.iter().enumerate() {
                    call(self, i, item)?;
                }
                Ok(Value::Undefined)
            }
            _ => {
                let mut iter = items.iter().enumerate();
                let mut acc = match initial {
                    Some(value) => value,
                    None => match iter.next() {
                        Some((_, first)) => first.clone(),
                        None => {
                            return Err(TesseraError::Type(
                                "Reduce of empty array with no initial value".into(),
                            ));
                        }
                    },
                };
                for (i, item) in iter {
                    acc = self.call(callback, vec![acc, item.clone(), Value::from(i), receiver.clone()])?;
                }
                Ok(acc)
            }
        }
    }

    fn merge_sort(
        &mut self,
        mut items: Vec<Value>,
        comparator: &Rc<Function>,
    ) -> Result<Vec<Value>, TesseraError> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let right = items.split_off(items.len() / 2);
        let left = self.merge_sort(items, comparator)?;
        let right = self.merge_sort(right, comparator)?;
        let mut merged = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
            let order = self
                .call(comparator, vec![a.clone(), b.clone()])?
                .to_number();
            if order > 0.0 {
                merged.extend(right.next());
            } else {
                merged.extend(left.next());
            }
        }
        merged.extend(left);
        merged.extend(right);
        Ok(merged)
    }

    // =========================================================================
    // PLACES
    // =========================================================================

    /// Resolve an expression to a writable place. `None` for expressions
    /// that are not references.
    fn place_of(&mut self, expr: &Expr) -> Result<Option<Place>, TesseraError> {
        match expr {
            Expr::Identifier(name) => {
                if let Some(scope) = self.find_scope(name) {
                    return Ok(Some(Place::Local {
                        name: name.clone(),
                        scope,
                    }));
                }
                if self.host.global(name).is_some() {
                    return Ok(Some(Place::Global(name.clone())));
                }
                Err(TesseraError::Reference(name.clone()))
            }
            Expr::Member {
                object,
                property,
                optional: false,
            } => {
                let object = self.eval(object)?;
                let key = self.property_key(property)?;
                Ok(Some(Place::Member { object, key }))
            }
            _ => Ok(None),
        }
    }

    fn read_place(&self, place: &Place) -> Result<Value, TesseraError> {
        match place {
            Place::Local { name, scope } => scope
                .borrow()
                .get(name)
                .map(|binding| binding.value.clone())
                .ok_or_else(|| TesseraError::Reference(name.clone())),
            Place::Global(name) => self
                .host
                .global(name)
                .cloned()
                .ok_or_else(|| TesseraError::Reference(name.clone())),
            Place::Member { object, key } => member_of(object, key),
        }
    }

    fn write_place(&mut self, place: Place, value: Value) -> Result<(), TesseraError> {
        match place {
            Place::Local { name, scope } => {
                let mut scope = scope.borrow_mut();
                let binding = scope
                    .get_mut(&name)
                    .ok_or_else(|| TesseraError::Reference(name.clone()))?;
                if !binding.mutable {
                    return Err(TesseraError::Type("Assignment to constant variable.".into()));
                }
                binding.value = value;
                Ok(())
            }
            Place::Global(name) => Err(read_only(&name)),
            Place::Member { object, key } => self.assign_member(&object, &key, value),
        }
    }

    fn assign_member(&mut self, object: &Value, key: &str, value: Value) -> Result<(), TesseraError> {
        let mut path = match object.provenance() {
            Provenance::Frozen => return Err(read_only_member(key)),
            Provenance::Detached => return object.set_child(key, value),
            Provenance::Tracked(path) => path,
        };
        let resizes = key == "length" && matches!(object, Value::Array(_));
        if resizes {
            detach_elements(object, &path);
        } else if let Some(previous) = object.child(key) {
            previous.untrack(&child_path(&path, key));
        }
        object.set_child(key, value.clone())?;
        if resizes {
            object.track_children(&path, 0);
        }
        path.push(key.to_string());
        value.track(&path);
        self.host.record_patch(Patch::Set {
            path: PatchPath::from(path),
            value: value.deep_clone(),
        });
        Ok(())
    }

    fn delete_place(&mut self, place: Place) -> Result<bool, TesseraError> {
        let Place::Member { object, key } = place else {
            return Ok(false);
        };
        let mut path = match object.provenance() {
            Provenance::Frozen => return Err(read_only_member(&key)),
            Provenance::Detached => return object.remove_child(&key).map(|_| true),
            Provenance::Tracked(path) => path,
        };
        if let Some(previous) = object.child(&key) {
            previous.untrack(&child_path(&path, &key));
        }
        object.remove_child(&key)?;
        path.push(key);
        self.host.record_patch(Patch::Delete {
            path: PatchPath::from(path),
        });
        Ok(true)
    }

    fn property_key(&mut self, property: &MemberProperty) -> Result<String, TesseraError> {
        match property {
            MemberProperty::Named(name) => Ok(name.clone()),
            MemberProperty::Computed(expr) => Ok(to_property_key(&self.eval(expr)?)),
        }
    }

    // =========================================================================
    // STATEMENTS
    // =========================================================================

    fn exec_list(&mut self, body: &[Stmt]) -> Result<Completion, TesseraError> {
        for stmt in body {
            match self.exec(stmt)? {
                Completion::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Completion, TesseraError> {
        self.with_scope(|interp| {
            interp.declare_functions(body)?;
            interp.exec_list(body)
        })
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Completion, TesseraError> {
        self.tick()?;
        match stmt {
            Stmt::VarDecl { kind, declarations } => {
                for (name, init) in declarations {
                    let value = match init {
                        Some(expr) => self.eval(expr)?,
                        None => Value::Undefined,
                    };
                    self.declare(name, value, *kind != DeclKind::Const)?;
                }
                Ok(Completion::Normal)
            }
            Stmt::FunctionDecl(_) | Stmt::Empty => Ok(Completion::Normal),
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Completion::Normal)
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.is_truthy() {
                    self.exec(consequent)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate)
                } else {
                    Ok(Completion::Normal)
                }
            }
            Stmt::While { test, body } => {
                while self.eval(test)?.is_truthy() {
                    self.tick()?;
                    match self.exec(body)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => self.with_scope(|interp| {
                if let Some(init) = init {
                    interp.exec(init)?;
                }
                loop {
                    interp.tick()?;
                    if let Some(test) = test {
                        if !interp.eval(test)?.is_truthy() {
                            break;
                        }
                    }
                    match interp.exec(body)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                    if let Some(update) = update {
                        interp.eval(update)?;
                    }
                }
                Ok(Completion::Normal)
            }),
            Stmt::ForOf {
                kind,
                binding,
                iterable,
                body,
            } => {
                let items = iterate(self.eval(iterable)?)?;
                for item in items {
                    self.tick()?;
                    let completion = self.with_scope(|interp| {
                        interp.declare(binding, item, *kind != DeclKind::Const)?;
                        interp.exec(body)
                    })?;
                    match completion {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::Block(body) => self.exec_block(body),
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }
            Stmt::Break => Ok(Completion::Break),
            Stmt::Continue => Ok(Completion::Continue),
            Stmt::Throw(expr) => Err(TesseraError::Thrown(self.eval(expr)?)),
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let mut result = self.exec_block(block);
                if let Some(handler) = handler {
                    let caught = match &result {
                        Err(err) if err.is_catchable() => Some(err.to_script_value()),
                        _ => None,
                    };
                    if let Some(thrown) = caught {
                        result = self.with_scope(|interp| {
                            if let Some(param) = param {
                                interp.declare(param, thrown, true)?;
                            }
                            interp.exec_block(handler)
                        });
                    }
                }
                if let Some(finalizer) = finalizer {
                    match self.exec_block(finalizer)? {
                        Completion::Normal => {}
                        other => return Ok(other),
                    }
                }
                result
            }
        }
    }

    // =========================================================================
    // EXPRESSIONS
    // =========================================================================

    fn eval(&mut self, expr: &Expr) -> Result<Value, TesseraError> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Undefined => Value::Undefined,
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(s.clone()),
            }),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => out.push_str(&self.eval(expr)?.to_display_string()),
                    }
                }
                Ok(Value::String(out))
            }
            Expr::Identifier(name) => self
                .lookup(name)
                .ok_or_else(|| TesseraError::Reference(name.clone())),
            Expr::This => Ok(self.this_value()),
            Expr::Array(items) => Ok(Value::array(self.eval_args(items)?)),
            Expr::Object(entries) => {
                let mut map = ObjectMap::new();
                for (key, value) in entries {
                    let key = match key {
                        PropertyKey::Named(name) => name.clone(),
                        PropertyKey::Computed(expr) => to_property_key(&self.eval(expr)?),
                    };
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(Value::from(map))
            }
            Expr::Member { .. } | Expr::Call { .. } => {
                Ok(self.eval_chain(expr)?.unwrap_or_default())
            }
            Expr::New { callee, args } => {
                let constructor = self.eval(callee)?;
                let args = self.eval_args(args)?;
                match &constructor {
                    Value::Function(function) => match &function.kind {
                        FunctionKind::Native(native) => builtins::construct(*native, &args),
                        FunctionKind::Script(_) => Err(TesseraError::Type(format!(
                            "{} is not a constructor",
                            function.display_name()
                        ))),
                    },
                    _ => Err(TesseraError::Type(format!(
                        "{} is not a constructor",
                        describe(callee)
                    ))),
                }
            }
            Expr::Unary { op, operand } => self.eval_unary(*op, operand),
            Expr::Update { op, prefix, target } => {
                let place = self
                    .place_of(target)?
                    .ok_or_else(|| syntax("Invalid update target"))?;
                let old = self.read_place(&place)?.to_number();
                let new = match op {
                    UpdateOp::Increment => old + 1.0,
                    UpdateOp::Decrement => old - 1.0,
                };
                self.write_place(place, Value::Number(new))?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(binary(*op, &left, &right))
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Assign { op, target, value } => {
                let place = self
                    .place_of(target)?
                    .ok_or_else(|| syntax("Invalid assignment target"))?;
                let value = match op {
                    AssignOp::Assign => self.eval(value)?,
                    AssignOp::Compound(op) => {
                        let current = self.read_place(&place)?;
                        let rhs = self.eval(value)?;
                        binary(*op, &current, &rhs)
                    }
                };
                self.write_place(place, value.clone())?;
                Ok(value)
            }
            Expr::Function(definition) => Ok(self.make_closure(definition)),
            Expr::Await(operand) => match self.eval(operand)? {
                Value::Promise(settlement) => match *settlement {
                    Settlement::Fulfilled(value) => Ok(value),
                    Settlement::Rejected(reason) => Err(TesseraError::Thrown(reason)),
                },
                other => Ok(other),
            },
            Expr::Delete(target) => match self.place_of(target)? {
                Some(place) => self.delete_place(place).map(Value::Bool),
                None => Ok(Value::Bool(true)),
            },
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<Value, TesseraError> {
        if let (UnaryOp::Typeof, Expr::Identifier(name)) = (op, operand) {
            return Ok(Value::from(
                self.lookup(name).map_or("undefined", |value| value.type_name()),
            ));
        }
        let value = self.eval(operand)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!value.is_truthy()),
            UnaryOp::Negate => Value::Number(-value.to_number()),
            UnaryOp::Plus => Value::Number(value.to_number()),
            UnaryOp::Typeof => Value::from(value.type_name()),
            UnaryOp::Void => Value::Undefined,
        })
    }

    /// Evaluate a member/call chain. `None` when an optional link
    /// short-circuited.
    fn eval_chain(&mut self, expr: &Expr) -> Result<Option<Value>, TesseraError> {
        match expr {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let Some(base) = self.eval_chain(object)? else {
                    return Ok(None);
                };
                if *optional && base.is_nullish() {
                    return Ok(None);
                }
                let key = self.property_key(property)?;
                member_of(&base, &key).map(Some)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args),
            other => self.eval(other).map(Some),
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn syntax(message: impl Into<String>) -> TesseraError {
    TesseraError::Syntax {
        message: message.into(),
        line: 0,
        column: 0,
    }
}

fn read_only(name: &str) -> TesseraError {
    TesseraError::Type(format!("Cannot modify read-only global '{}'", name))
}

fn read_only_member(key: &str) -> TesseraError {
    TesseraError::Type(format!("Cannot modify read-only builtin (setting '{}')", key))
}

fn child_path(path: &[String], key: &str) -> Vec<String> {
    let mut child = path.to_vec();
    child.push(key.to_string());
    child
}

/// Detach the current elements of a tracked array before they are moved
/// or removed; the ones still present are re-stamped afterwards.
fn detach_elements(receiver: &Value, path: &[String]) {
    if let Value::Array(items) = receiver {
        for item in items.borrow().iter() {
            item.untrack(path);
        }
    }
}

/// Short source-like label for error messages.
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(name) => name.clone(),
        Expr::This => "this".to_string(),
        Expr::Member {
            object,
            property: MemberProperty::Named(name),
            ..
        } => format!("{}.{}", describe(object), name),
        Expr::Member { object, .. } => format!("{}[...]", describe(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".to_string(),
    }
}

fn to_property_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => format_number(*n),
        other => other.to_display_string(),
    }
}

/// Read one member of a value, including computed members.
fn member_of(value: &Value, key: &str) -> Result<Value, TesseraError> {
    if let Some(virtual_value) = builtins::virtual_property(value, key) {
        return Ok(virtual_value);
    }
    match value {
        Value::Undefined | Value::Null => Err(TesseraError::Type(format!(
            "Cannot read properties of {} (reading '{}')",
            value.describe_kind(),
            key
        ))),
        Value::String(s) => Ok(crate::value::parse_index(key)
            .and_then(|i| s.chars().nth(i))
            .map_or(Value::Undefined, |c| Value::String(c.to_string()))),
        other => Ok(other.child(key).unwrap_or_default()),
    }
}

fn iterate(value: Value) -> Result<Vec<Value>, TesseraError> {
    match value {
        Value::Array(items) | Value::Set(items) => Ok(items.borrow().clone()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(TesseraError::Type(format!(
            "{} is not iterable",
            other.describe_kind()
        ))),
    }
}

fn console_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) if is_error_shape(&map.borrow()) => value.to_string(),
        Value::Array(_) | Value::Object(_) | Value::Set(_) => value.to_json().to_string(),
        other => other.to_display_string(),
    }
}

fn is_error_shape(map: &ObjectMap) -> bool {
    map.contains_key("name") && map.contains_key("message")
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    let is_primitive = |v: &Value| {
        matches!(
            v,
            Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_)
        )
    };
    match op {
        BinaryOp::Add => {
            if is_primitive(left) && is_primitive(right) {
                Value::Number(left.to_number() + right.to_number())
            } else {
                Value::String(left.to_display_string() + &right.to_display_string())
            }
        }
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Pow => Value::Number(left.to_number().powf(right.to_number())),
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::{parse_expression, parse_program};

    /// Minimal host: builtins plus entities stamped with their own name.
    struct TestHost {
        globals: BTreeMap<String, Value>,
        patches: Vec<Patch>,
        console: Vec<String>,
        limits: ExecutionLimits,
    }

    impl TestHost {
        fn new() -> Self {
            let mut globals = BTreeMap::new();
            builtins::install_globals(&mut globals);
            Self {
                globals,
                patches: Vec::new(),
                console: Vec::new(),
                limits: ExecutionLimits::default(),
            }
        }

        fn with_entity(mut self, name: &str, value: Value) -> Self {
            value.track(&[name.to_string()]);
            self.globals.insert(name.to_string(), value);
            self
        }

        fn paths(&self) -> Vec<String> {
            self.patches.iter().map(|p| p.path().to_string()).collect()
        }
    }

    impl ScriptHost for TestHost {
        fn global(&self, name: &str) -> Option<&Value> {
            self.globals.get(name)
        }

        fn record_patch(&mut self, patch: Patch) {
            self.patches.push(patch);
        }

        fn console(&mut self, _level: LogLevel, _entity: Option<&str>, message: String) {
            self.console.push(message);
        }

        fn limits(&self) -> ExecutionLimits {
            self.limits
        }
    }

    fn eval_in(host: &mut TestHost, source: &str) -> Result<Value, TesseraError> {
        let expr = parse_expression(source)?;
        Interpreter::new(host).evaluate(&expr, None)
    }

    fn run_in(host: &mut TestHost, source: &str) -> Result<Value, TesseraError> {
        let program = parse_program(source)?;
        Interpreter::new(host).run(&program, None)
    }

    fn run_as(host: &mut TestHost, source: &str, this_entity: &str) -> Result<Value, TesseraError> {
        let program = parse_program(source)?;
        Interpreter::new(host).run(&program, Some(this_entity))
    }

    fn run(source: &str) -> Value {
        run_in(&mut TestHost::new(), source).expect("run")
    }

    fn store() -> TestHost {
        TestHost::new().with_entity(
            "Store",
            Value::object([
                ("items", Value::array(vec![])),
                (
                    "rows",
                    Value::array(vec![
                        Value::object([("done", Value::Bool(false))]),
                        Value::object([("done", Value::Bool(false))]),
                    ]),
                ),
                ("v", Value::object::<&str>([])),
            ]),
        )
    }

    #[test]
    fn arithmetic_and_strings() {
        assert_eq!(run("1 + 2 * 3"), Value::from(7));
        assert_eq!(run("'a' + 1"), Value::from("a1"));
        assert_eq!(run("`x=${1 + 1}`"), Value::from("x=2"));
        assert_eq!(run("7 % 3"), Value::from(1));
        assert_eq!(run("null ?? 'd'"), Value::from("d"));
        assert_eq!(run("0 || 5"), Value::from(5));
    }

    #[test]
    fn closures_share_scopes() {
        let value = run("let total = 0; [1, 2, 3].forEach(x => { total += x }); total");
        assert_eq!(value, Value::from(6));
        let counter = run(
            "function make() { let n = 0; return () => ++n; }
             const next = make(); next(); next(); next()",
        );
        assert_eq!(counter, Value::from(3));
    }

    #[test]
    fn recursion_via_hoisting() {
        let value = run("function fact(n) { return n <= 1 ? 1 : n * fact(n - 1) } fact(5)");
        assert_eq!(value, Value::from(120));
    }

    #[test]
    fn loops_and_control_flow() {
        let value = run(
            "let out = []; for (let i = 0; i < 10; i++) { if (i % 2) continue; if (i > 6) break; out.push(i) } out",
        );
        assert_eq!(
            value,
            Value::array(vec![
                Value::from(0),
                Value::from(2),
                Value::from(4),
                Value::from(6)
            ])
        );
        assert_eq!(run("let s = 0; for (const x of [1, 2]) s += x; s"), Value::from(3));
        assert_eq!(run("let i = 0; while (i < 4) i++; i"), Value::from(4));
    }

    #[test]
    fn try_catch_binds_error_values() {
        assert_eq!(
            run("let m; try { null.x } catch (e) { m = e.name } m"),
            Value::from("TypeError")
        );
        assert_eq!(
            run("let m; try { throw 'boom' } catch (e) { m = e } finally { m += '!' } m"),
            Value::from("boom!")
        );
    }

    #[test]
    fn undeclared_assignment_is_reference_error() {
        let mut host = TestHost::new();
        assert!(matches!(
            run_in(&mut host, "undeclared = 1"),
            Err(TesseraError::Reference(name)) if name == "undeclared"
        ));
        assert_eq!(run("typeof missing"), Value::from("undefined"));
    }

    #[test]
    fn const_reassignment_is_type_error() {
        let mut host = TestHost::new();
        assert!(matches!(
            run_in(&mut host, "const a = 1; a = 2"),
            Err(TesseraError::Type(_))
        ));
        assert_eq!(run("const o = {a: 1}; o.a = 2; o.a"), Value::from(2));
    }

    #[test]
    fn containers_are_shared_between_bindings() {
        assert_eq!(run("const a = []; const b = a; b.push(1); a.length"), Value::from(1));
        assert_eq!(run("const o = {}; const p = o; p.x = 2; o.x"), Value::from(2));
        assert_eq!(run("const a = [1]; a === a"), Value::Bool(true));
        assert_eq!(run("[1] === [1]"), Value::Bool(false));
        assert_eq!(
            run("const rows = [{n: 1}]; rows.forEach(r => { r.n = 5 }); rows[0].n"),
            Value::from(5)
        );
    }

    #[test]
    fn entity_mutations_emit_patches_in_order() {
        let mut host = TestHost::new()
            .with_entity("Obj1", Value::object([("v", Value::object::<&str>([]))]));
        run_in(
            &mut host,
            "Obj1.v.a = []; Obj1.v.a.push(1); Obj1.v.a.push(2); delete Obj1.v.b",
        )
        .expect("run");
        let kinds: Vec<String> = host.patches.iter().map(|p| p.kind().to_string()).collect();
        assert_eq!(
            kinds,
            vec!["SET", "PROTOTYPE_METHOD_CALL", "PROTOTYPE_METHOD_CALL", "DELETE"]
        );
        assert_eq!(host.paths(), vec!["Obj1.v.a", "Obj1.v.a", "Obj1.v.a", "Obj1.v.b"]);
        assert_eq!(
            host.globals.get("Obj1").and_then(|o| o.get_path(&["v", "a"])),
            Some(Value::array(vec![Value::from(1), Value::from(2)]))
        );
    }

    #[test]
    fn alias_of_entity_container_records_patches() {
        let mut host = store();
        let length = run_as(
            &mut host,
            "const xs = this.items; xs.push(1); return this.items.length",
            "Store",
        )
        .expect("run");
        assert_eq!(length, Value::from(1));
        assert_eq!(host.paths(), vec!["Store.items"]);
        assert_eq!(host.patches[0].kind().to_string(), "PROTOTYPE_METHOD_CALL");
    }

    #[test]
    fn callback_writes_through_elements_record_patches() {
        let mut host = store();
        let done = run_as(
            &mut host,
            "this.rows.forEach(r => { r.done = true }); return this.rows[0].done",
            "Store",
        )
        .expect("run");
        assert_eq!(done, Value::Bool(true));
        assert_eq!(host.paths(), vec!["Store.rows.0.done", "Store.rows.1.done"]);
    }

    #[test]
    fn dotted_keys_are_single_segments() {
        let mut host = store();
        run_as(&mut host, "this.v['a.b'] = 1", "Store").expect("run");
        match &host.patches[0] {
            Patch::Set { path, value } => {
                assert_eq!(path.segments(), ["Store", "v", "a.b"]);
                assert_eq!(value, &Value::from(1));
            }
            other => panic!("unexpected patch {:?}", other),
        }
    }

    #[test]
    fn values_placed_in_entities_become_tracked() {
        let mut host = store();
        run_as(
            &mut host,
            "const fresh = {list: []}; this.v.fresh = fresh; fresh.list.push(1)",
            "Store",
        )
        .expect("run");
        assert_eq!(host.paths(), vec!["Store.v.fresh", "Store.v.fresh.list"]);
    }

    #[test]
    fn removed_values_stop_recording() {
        let mut host = store();
        run_as(
            &mut host,
            "const old = this.items; this.items = []; old.push(1); \
             const row = this.rows.shift(); row.done = true",
            "Store",
        )
        .expect("run");
        assert_eq!(host.paths(), vec!["Store.items", "Store.rows"]);
    }

    #[test]
    fn shifted_elements_record_at_new_index() {
        let mut host = store();
        run_as(&mut host, "this.rows.shift(); this.rows[0].done = true", "Store").expect("run");
        assert_eq!(host.paths(), vec!["Store.rows", "Store.rows.0.done"]);
    }

    #[test]
    fn local_mutations_emit_nothing() {
        let mut host = TestHost::new();
        run_in(&mut host, "const a = []; a.push(1); a.length = 0").expect("run");
        assert!(host.patches.is_empty());
    }

    #[test]
    fn comparator_sort_emits_set() {
        let mut host = TestHost::new().with_entity(
            "Obj1",
            Value::object([(
                "xs",
                Value::array(vec![Value::from(3), Value::from(1), Value::from(2)]),
            )]),
        );
        let sorted = run_in(&mut host, "Obj1.xs.sort((a, b) => a - b)").expect("run");
        assert_eq!(host.patches.len(), 1);
        assert!(
            matches!(&host.patches[0], Patch::Set { path, .. } if path.to_string() == "Obj1.xs")
        );
        assert_eq!(
            host.globals.get("Obj1").and_then(|o| o.child("xs")),
            Some(sorted)
        );
    }

    #[test]
    fn entity_root_reassignment_rejected() {
        let mut host = TestHost::new().with_entity("Obj1", Value::object::<&str>([]));
        assert!(matches!(
            eval_in(&mut host, "Obj1 = 5"),
            Err(TesseraError::Type(_))
        ));
    }

    #[test]
    fn builtins_are_read_only() {
        let mut host = TestHost::new();
        assert!(matches!(
            run_in(&mut host, "Math.max = 1"),
            Err(TesseraError::Type(_))
        ));
        assert!(matches!(
            host.globals.get("Math").and_then(|m| m.child("max")),
            Some(Value::Function(_))
        ));
        assert!(matches!(
            run_in(&mut host, "delete console.log"),
            Err(TesseraError::Type(_))
        ));
    }

    #[test]
    fn async_functions_settle() {
        assert!(run("(async () => 1)()").is_promise());
        assert_eq!(run("const f = async () => 2; await f()"), Value::from(2));
        let rejected = run("(async () => { throw 'x' })()");
        assert_eq!(
            rejected,
            Value::Promise(Box::new(Settlement::Rejected(Value::from("x"))))
        );
    }

    #[test]
    fn optional_chaining_short_circuits() {
        assert_eq!(run("const a = null; a?.b.c.d"), Value::Undefined);
        assert_eq!(run("const a = {b: {c: 1}}; a?.b.c"), Value::from(1));
        assert_eq!(run("const a = null; a?.push(1)"), Value::Undefined);
    }

    #[test]
    fn array_callbacks() {
        assert_eq!(
            run("[1, 2, 3].map(x => x * 2).filter(x => x > 2)"),
            Value::array(vec![Value::from(4), Value::from(6)])
        );
        assert_eq!(run("[1, 2, 3].reduce((a, b) => a + b)"), Value::from(6));
        assert_eq!(run("[1, 2, 3].find(x => x > 1)"), Value::from(2));
        assert_eq!(run("[1, 2].some(x => x > 1)"), Value::Bool(true));
        assert_eq!(
            run("const xs = [1, 2]; xs.forEach((x, i, all) => { all[i] = x * 10; }); xs"),
            Value::array(vec![Value::from(10), Value::from(20)])
        );
    }

    #[test]
    fn console_reaches_host() {
        let mut host = TestHost::new();
        run_in(&mut host, "console.log('n', 1, {a: 1})").expect("run");
        assert_eq!(host.console, vec![r#"n 1 {"a":1}"#.to_string()]);
    }

    #[test]
    fn step_limit_is_not_catchable() {
        let mut host = TestHost::new();
        host.limits.max_steps = 100;
        let result = run_in(&mut host, "try { while (true) {} } catch (e) {}");
        assert!(matches!(result, Err(TesseraError::LimitExceeded(_))));
    }

    #[test]
    fn call_depth_limit() {
        let mut host = TestHost::new();
        host.limits.max_call_depth = 8;
        let result = run_in(&mut host, "function f() { return f() } f()");
        assert!(matches!(result, Err(TesseraError::LimitExceeded(_))));
    }

    #[test]
    fn set_values() {
        assert_eq!(run("const s = new Set([1, 1, 2]); s.add(3); s.size"), Value::from(3));
        assert_eq!(run("new Set([1]).has(1)"), Value::Bool(true));
    }

    #[test]
    fn self_containing_arrays_do_not_panic() {
        assert_eq!(run("const a = [2, 1]; a.push(a); a.sort(); a.length"), Value::from(3));
        let mut host = TestHost::new();
        assert!(matches!(
            run_in(&mut host, "const o = {}; o.o = o; JSON.stringify(o)"),
            Err(TesseraError::Type(_))
        ));
    }
}
