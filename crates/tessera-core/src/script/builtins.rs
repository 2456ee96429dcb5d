//! Builtin globals and the non-mutating, callback-free methods of builtin
//! values.
//!
//! Methods that take callbacks (`map`, `filter`, comparator `sort`, ...)
//! need to re-enter the interpreter and live there; methods that mutate
//! their receiver are [`crate::patch::MutatingMethod`].

use crate::logs::LogLevel;
use crate::patch::{relative_index, same_value_zero};
use crate::types::TesseraError;
use crate::value::{Function, Value, format_number};
use serde::Serialize;
use std::collections::BTreeMap;
use std::rc::Rc;

/// A function implemented by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFunction {
    /// `console.log/info/warn/error`.
    Console(LogLevel),
    /// Console replacement installed by muted sessions.
    MutedConsole,
    MathMax,
    MathMin,
    MathFloor,
    MathCeil,
    MathRound,
    MathAbs,
    MathPow,
    MathSqrt,
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    ArrayIsArray,
    JsonStringify,
    JsonParse,
    PromiseResolve,
    PromiseReject,
    SetConstructor,
    ErrorConstructor,
    NumberCast,
    StringCast,
    BooleanCast,
}

fn native(name: &str, function: NativeFunction) -> Value {
    Value::Function(Rc::new(Function::native(name, function)))
}

/// A frozen object of builtins.
fn namespace(entries: &[(&str, NativeFunction)]) -> Value {
    let value = Value::object(
        entries
            .iter()
            .map(|(name, function)| (*name, native(name, *function))),
    );
    value.freeze();
    value
}

/// The `console` object; a muted console swallows every call.
#[must_use]
pub fn console_object(muted: bool) -> Value {
    let pick = |level| {
        if muted {
            NativeFunction::MutedConsole
        } else {
            NativeFunction::Console(level)
        }
    };
    namespace(&[
        ("log", pick(LogLevel::Info)),
        ("info", pick(LogLevel::Info)),
        ("warn", pick(LogLevel::Warn)),
        ("error", pick(LogLevel::Error)),
    ])
}

/// Install every builtin global into `bindings`.
pub fn install_globals(bindings: &mut BTreeMap<String, Value>) {
    let math = namespace(&[
        ("max", NativeFunction::MathMax),
        ("min", NativeFunction::MathMin),
        ("floor", NativeFunction::MathFloor),
        ("ceil", NativeFunction::MathCeil),
        ("round", NativeFunction::MathRound),
        ("abs", NativeFunction::MathAbs),
        ("pow", NativeFunction::MathPow),
        ("sqrt", NativeFunction::MathSqrt),
    ]);
    if let Value::Object(map) = &math {
        map.borrow_mut()
            .insert("PI".into(), Value::Number(std::f64::consts::PI));
    }

    let globals = [
        ("console", console_object(false)),
        ("Math", math),
        (
            "Object",
            namespace(&[
                ("keys", NativeFunction::ObjectKeys),
                ("values", NativeFunction::ObjectValues),
                ("entries", NativeFunction::ObjectEntries),
            ]),
        ),
        ("Array", namespace(&[("isArray", NativeFunction::ArrayIsArray)])),
        (
            "JSON",
            namespace(&[
                ("stringify", NativeFunction::JsonStringify),
                ("parse", NativeFunction::JsonParse),
            ]),
        ),
        (
            "Promise",
            namespace(&[
                ("resolve", NativeFunction::PromiseResolve),
                ("reject", NativeFunction::PromiseReject),
            ]),
        ),
        ("Set", native("Set", NativeFunction::SetConstructor)),
        ("Error", native("Error", NativeFunction::ErrorConstructor)),
        ("Number", native("Number", NativeFunction::NumberCast)),
        ("String", native("String", NativeFunction::StringCast)),
        ("Boolean", native("Boolean", NativeFunction::BooleanCast)),
        ("NaN", Value::Number(f64::NAN)),
        ("Infinity", Value::Number(f64::INFINITY)),
    ];
    for (name, value) in globals {
        bindings.insert(name.to_string(), value);
    }
}

// =============================================================================
// NATIVE CALLS
// =============================================================================

/// Call a builtin. Console variants are handled by the interpreter, which
/// owns the log; here they are no-ops.
pub fn call_native(function: NativeFunction, args: &[Value]) -> Result<Value, TesseraError> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
    let num = |i: usize| arg(i).to_number();
    match function {
        NativeFunction::Console(_) | NativeFunction::MutedConsole => Ok(Value::Undefined),
        NativeFunction::MathMax => Ok(Value::Number(fold_numbers(args, f64::NEG_INFINITY, f64::max))),
        NativeFunction::MathMin => Ok(Value::Number(fold_numbers(args, f64::INFINITY, f64::min))),
        NativeFunction::MathFloor => Ok(Value::Number(num(0).floor())),
        NativeFunction::MathCeil => Ok(Value::Number(num(0).ceil())),
        NativeFunction::MathRound => Ok(Value::Number((num(0) + 0.5).floor())),
        NativeFunction::MathAbs => Ok(Value::Number(num(0).abs())),
        NativeFunction::MathPow => Ok(Value::Number(num(0).powf(num(1)))),
        NativeFunction::MathSqrt => Ok(Value::Number(num(0).sqrt())),
        NativeFunction::ObjectKeys => object_entries(&arg(0)).map(|entries| {
            Value::array(entries.into_iter().map(|(k, _)| Value::String(k)).collect())
        }),
        NativeFunction::ObjectValues => object_entries(&arg(0))
            .map(|entries| Value::array(entries.into_iter().map(|(_, v)| v).collect())),
        NativeFunction::ObjectEntries => object_entries(&arg(0)).map(|entries| {
            Value::array(
                entries
                    .into_iter()
                    .map(|(k, v)| Value::array(vec![Value::String(k), v]))
                    .collect(),
            )
        }),
        NativeFunction::ArrayIsArray => Ok(Value::Bool(matches!(arg(0), Value::Array(_)))),
        NativeFunction::JsonStringify => {
            let value = arg(0);
            if matches!(value, Value::Undefined | Value::Function(_)) {
                return Ok(Value::Undefined);
            }
            if value.has_cycle() {
                return Err(TesseraError::Type(
                    "Converting circular structure to JSON".into(),
                ));
            }
            let indent = num(2);
            let indent = if indent.is_finite() && indent > 0.0 {
                indent.min(10.0) as usize
            } else {
                0
            };
            stringify(&value, indent).map(Value::String)
        }
        NativeFunction::JsonParse => {
            let text = arg(0).to_display_string();
            serde_json::from_str::<serde_json::Value>(&text)
                .map(Value::from)
                .map_err(|e| {
                    TesseraError::Thrown(Value::error("SyntaxError", format!("JSON.parse: {}", e)))
                })
        }
        NativeFunction::PromiseResolve => {
            let value = arg(0);
            Ok(if value.is_promise() {
                value
            } else {
                Value::fulfilled(value)
            })
        }
        NativeFunction::PromiseReject => Ok(Value::rejected(arg(0))),
        NativeFunction::SetConstructor => Err(TesseraError::Type(
            "Constructor Set requires 'new'".into(),
        )),
        NativeFunction::ErrorConstructor => construct(function, args),
        NativeFunction::NumberCast => Ok(Value::Number(if args.is_empty() { 0.0 } else { num(0) })),
        NativeFunction::StringCast => Ok(Value::String(if args.is_empty() {
            String::new()
        } else {
            arg(0).to_string()
        })),
        NativeFunction::BooleanCast => Ok(Value::Bool(arg(0).is_truthy())),
    }
}

/// `new Callee(args)`.
pub fn construct(function: NativeFunction, args: &[Value]) -> Result<Value, TesseraError> {
    let arg = args.first().cloned().unwrap_or_default();
    match function {
        NativeFunction::SetConstructor => {
            let items = match arg {
                Value::Undefined | Value::Null => Vec::new(),
                Value::Array(items) | Value::Set(items) => items.borrow().clone(),
                Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                other => {
                    return Err(TesseraError::Type(format!(
                        "{} is not iterable",
                        other.describe_kind()
                    )));
                }
            };
            let mut unique: Vec<Value> = Vec::with_capacity(items.len());
            for item in items {
                if !unique.iter().any(|seen| seen.strict_equals(&item)) {
                    unique.push(item);
                }
            }
            Ok(Value::new_set(unique))
        }
        NativeFunction::ErrorConstructor => {
            let message = if matches!(arg, Value::Undefined) {
                String::new()
            } else {
                arg.to_display_string()
            };
            Ok(Value::error("Error", message))
        }
        other => Err(TesseraError::Type(format!(
            "{:?} is not a constructor",
            other
        ))),
    }
}

fn fold_numbers(args: &[Value], init: f64, pick: fn(f64, f64) -> f64) -> f64 {
    let mut acc = init;
    for value in args {
        let n = value.to_number();
        if n.is_nan() {
            return f64::NAN;
        }
        acc = pick(acc, n);
    }
    acc
}

fn object_entries(value: &Value) -> Result<Vec<(String, Value)>, TesseraError> {
    match value {
        Value::Undefined | Value::Null => Err(TesseraError::Type(
            "Cannot convert undefined or null to object".into(),
        )),
        Value::Object(map) => Ok(map
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()),
        Value::Array(items) => Ok(items
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect()),
        Value::String(s) => Ok(s
            .chars()
            .enumerate()
            .map(|(i, c)| (i.to_string(), Value::String(c.to_string())))
            .collect()),
        _ => Ok(Vec::new()),
    }
}

fn stringify(value: &Value, indent: usize) -> Result<String, TesseraError> {
    let json = value.to_json();
    if indent == 0 {
        return serde_json::to_string(&json)
            .map_err(|e| TesseraError::SerializationError(e.to_string()));
    }
    let pad = " ".repeat(indent);
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(pad.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    json.serialize(&mut serializer)
        .map_err(|e| TesseraError::SerializationError(e.to_string()))?;
    String::from_utf8(out).map_err(|e| TesseraError::SerializationError(e.to_string()))
}

// =============================================================================
// VALUE MEMBERS
// =============================================================================

/// Computed members that are not stored: `length` and `size`.
#[must_use]
pub fn virtual_property(receiver: &Value, key: &str) -> Option<Value> {
    match (receiver, key) {
        (Value::Array(items), "length") => Some(Value::from(items.borrow().len())),
        (Value::String(s), "length") => Some(Value::from(s.chars().count())),
        (Value::Set(items), "size") => Some(Value::from(items.borrow().len())),
        _ => None,
    }
}

/// Call a non-mutating, callback-free method. Returns `None` when the
/// receiver has no such method.
#[must_use]
pub fn call_method(
    receiver: &Value,
    name: &str,
    args: &[Value],
) -> Option<Result<Value, TesseraError>> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
    let result = match (receiver, name) {
        (Value::Array(items), "includes") => {
            let needle = arg(0);
            Ok(Value::Bool(
                items.borrow().iter().any(|item| same_value_zero(item, &needle)),
            ))
        }
        (Value::Array(items), "indexOf") => {
            let needle = arg(0);
            Ok(index_value(
                items.borrow().iter().position(|item| item.strict_equals(&needle)),
            ))
        }
        (Value::Array(items), "join") => {
            let separator = match arg(0) {
                Value::Undefined => ",".to_string(),
                other => other.to_display_string(),
            };
            let joined = items
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
                .join(&separator);
            Ok(Value::String(joined))
        }
        (Value::Array(items), "slice") => {
            let items = items.borrow();
            let len = items.len();
            let start = relative_index(&arg(0), len, 0);
            let end = relative_index(&arg(1), len, len);
            Ok(Value::array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            }))
        }
        (Value::Array(items), "concat") => {
            let mut out = items.borrow().clone();
            for value in args {
                match value {
                    Value::Array(more) => out.extend(more.borrow().iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::array(out))
        }
        (Value::Array(_), "toString") => Ok(Value::String(receiver.to_display_string())),
        (Value::Set(items), "has") => {
            let needle = arg(0);
            Ok(Value::Bool(
                items.borrow().iter().any(|item| same_value_zero(item, &needle)),
            ))
        }
        (Value::Object(map), "hasOwnProperty") => Ok(Value::Bool(
            map.borrow().contains_key(&arg(0).to_display_string()),
        )),
        (Value::Number(n), "toFixed") => {
            let digits = arg(0).to_number();
            let digits = if digits.is_finite() && digits > 0.0 {
                digits.min(100.0) as usize
            } else {
                0
            };
            Ok(Value::String(format!("{:.*}", digits, n)))
        }
        (Value::Number(n), "toString") => Ok(Value::String(format_number(*n))),
        (Value::String(s), _) => return string_method(s, name, args),
        _ => return None,
    };
    Some(result)
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Option<Result<Value, TesseraError>> {
    let text = |i: usize| {
        args.get(i)
            .map(Value::to_display_string)
            .unwrap_or_else(|| "undefined".to_string())
    };
    let value = match name {
        "toUpperCase" => Value::String(s.to_uppercase()),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "trim" => Value::String(s.trim().to_string()),
        "toString" => Value::String(s.to_string()),
        "includes" => Value::Bool(s.contains(&text(0))),
        "startsWith" => Value::Bool(s.starts_with(&text(0))),
        "endsWith" => Value::Bool(s.ends_with(&text(0))),
        "indexOf" => {
            let needle = text(0);
            index_value(s.find(&needle).map(|byte| s[..byte].chars().count()))
        }
        "split" => match args.first() {
            None | Some(Value::Undefined) => Value::array(vec![Value::String(s.to_string())]),
            Some(separator) => {
                let separator = separator.to_display_string();
                let parts: Vec<Value> = if separator.is_empty() {
                    s.chars().map(|c| Value::String(c.to_string())).collect()
                } else {
                    s.split(separator.as_str())
                        .map(|part| Value::String(part.to_string()))
                        .collect()
                };
                Value::array(parts)
            }
        },
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let undefined = Value::Undefined;
            let start = relative_index(args.first().unwrap_or(&undefined), chars.len(), 0);
            let end = relative_index(args.get(1).unwrap_or(&undefined), chars.len(), chars.len());
            Value::String(if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            })
        }
        "replace" => Value::String(s.replacen(&text(0), &text(1), 1)),
        "charAt" => {
            let index = args.first().map_or(0.0, Value::to_number);
            let c = if index >= 0.0 {
                s.chars().nth(index as usize)
            } else {
                None
            };
            Value::String(c.map(String::from).unwrap_or_default())
        }
        _ => return None,
    };
    Some(Ok(value))
}

fn index_value(position: Option<usize>) -> Value {
    position.map_or(Value::Number(-1.0), Value::from)
}

// =============================================================================
// TESTS
// =============================================================================
