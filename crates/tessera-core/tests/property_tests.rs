//! # Property-Based Tests
//!
//! Replay equivalence, copy-on-write snapshots and classification totality,
//! checked with proptest.

use proptest::collection::vec;
use proptest::prelude::*;
use serde_json::json;
use tessera_core::{
    Document, Engine, EngineConfig, EntityDecl, EntityKind, ExecutionLimits, Value,
    VariableStateStore,
};

// =============================================================================
// STRATEGIES
// =============================================================================

/// One in-place mutation of `this.a` (an array) or `this.o` (an object).
#[derive(Debug, Clone)]
enum Mutation {
    Push(i32),
    Pop,
    Shift,
    Unshift(i32),
    Splice(usize, usize, i32),
    Reverse,
    Sort,
    SetIndex(usize, i32),
    SetKey(u8, i32),
    DeleteKey(u8),
    Replace(Vec<i32>),
    AliasPush(i32),
    EachIncrement,
}

impl Mutation {
    fn to_script(&self) -> String {
        match self {
            Self::Push(n) => format!("this.a.push({});", n),
            Self::Pop => "this.a.pop();".to_string(),
            Self::Shift => "this.a.shift();".to_string(),
            Self::Unshift(n) => format!("this.a.unshift({});", n),
            Self::Splice(start, count, n) => {
                format!("this.a.splice({}, {}, {});", start, count, n)
            }
            Self::Reverse => "this.a.reverse();".to_string(),
            Self::Sort => "this.a.sort();".to_string(),
            Self::SetIndex(i, n) => format!(
                "if (this.a.length > 0) {{ this.a[{} % this.a.length] = {}; }}",
                i, n
            ),
            Self::SetKey(k, n) => format!("this.o.k{} = {};", k % 4, n),
            Self::DeleteKey(k) => format!("delete this.o.k{};", k % 4),
            Self::Replace(items) => {
                let items: Vec<String> = items.iter().map(i32::to_string).collect();
                format!("this.a = [{}];", items.join(", "))
            }
            Self::AliasPush(n) => format!("{{ const xs = this.a; xs.push({}); }}", n),
            Self::EachIncrement => {
                "this.a.forEach((x, i, all) => { all[i] = x + 1; });".to_string()
            }
        }
    }
}

fn mutation() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        (-50i32..50).prop_map(Mutation::Push),
        Just(Mutation::Pop),
        Just(Mutation::Shift),
        (-50i32..50).prop_map(Mutation::Unshift),
        (0usize..4, 0usize..3, -50i32..50).prop_map(|(s, c, n)| Mutation::Splice(s, c, n)),
        Just(Mutation::Reverse),
        Just(Mutation::Sort),
        (0usize..8, -50i32..50).prop_map(|(i, n)| Mutation::SetIndex(i, n)),
        (any::<u8>(), -50i32..50).prop_map(|(k, n)| Mutation::SetKey(k, n)),
        any::<u8>().prop_map(Mutation::DeleteKey),
        vec(-50i32..50, 0..4).prop_map(Mutation::Replace),
        (-50i32..50).prop_map(Mutation::AliasPush),
        Just(Mutation::EachIncrement),
    ]
}

/// Statement fragments a user function might be made of, including ones
/// that throw, reject, loop forever or recurse without bound.
fn fragment() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("throw new Error('x');"),
        Just("return Promise.reject(1);"),
        Just("return Promise.resolve(1);"),
        Just("this.n.push(1);"),
        Just("while (true) {}"),
        Just("return this.f();"),
        Just("return missing.value;"),
        Just("this.n = null; this.n.push(2);"),
        Just("return 1;"),
        Just("console.log('classified');"),
    ]
}

fn engine_with(function: &str) -> Engine {
    let config = EngineConfig {
        limits: ExecutionLimits {
            max_call_depth: 16,
            max_steps: 5_000,
        },
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config).expect("config");
    let document = Document::from_entities(vec![
        EntityDecl::new("Obj1", EntityKind::JsAction)
            .with_variable("a", "[]")
            .with_variable("o", "{}")
            .with_variable("n", "[]")
            .with_function("f", function),
        EntityDecl::new("View", EntityKind::Widget)
            .with_property("summary", json!("{{ Obj1.a.length }}")),
    ])
    .expect("valid");
    engine.load(document).expect("load");
    engine
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Replaying recorded patches into the store yields what direct
    /// execution produced.
    #[test]
    fn replay_matches_direct_execution(mutations in vec(mutation(), 1..12)) {
        let body: String = mutations.iter().map(Mutation::to_script).collect::<Vec<_>>().join(" ");
        let source = format!("function () {{ {} return {{ a: this.a, o: this.o }}; }}", body);
        let mut engine = engine_with(&source);

        let outcome = engine.execute_function("Obj1", "f", vec![]).expect("execute");
        prop_assert!(outcome.error.is_none(), "{:?}", outcome.error);

        let updates = engine.run_pending_tasks();
        prop_assert!(updates.iter().all(|update| update.skipped == 0));

        let store = engine.variables();
        prop_assert_eq!(store.value_at("Obj1", &["a"]), outcome.value.child("a"));
        prop_assert_eq!(store.value_at("Obj1", &["o"]), outcome.value.child("o"));
        prop_assert_eq!(engine.tree().value_at("Obj1", &["a"]), outcome.value.child("a"));

        let length = match outcome.value.child("a") {
            Some(Value::Array(items)) => items.borrow().len(),
            _ => 0,
        };
        prop_assert_eq!(engine.tree().value_at("View", &["summary"]), Some(Value::from(length)));
    }

    /// A retained handle or snapshot never observes later writes.
    #[test]
    fn snapshots_are_copy_on_write(
        first in vec(-100i32..100, 0..8),
        writes in vec((0u8..4, -100i32..100), 1..16),
    ) {
        let mut store = VariableStateStore::new();
        let initial: Vec<Value> = first.iter().map(|&n| Value::from(n)).collect();
        store.set_variable("Obj1", "v", Value::from(initial.clone()));

        let handle = store.entity_map("Obj1").expect("handle");
        let snapshot = store.entity_snapshot("Obj1").expect("snapshot");

        for (slot, n) in &writes {
            store
                .set_value("Obj1", &[format!("w{}", slot)], Value::from(*n))
                .expect("set");
            store.set_variable("Obj1", "v", Value::from(*n));
        }

        prop_assert_eq!(handle.get("v"), Some(&Value::from(initial.clone())));
        prop_assert_eq!(snapshot.get("v"), Some(&Value::from(initial)));
        prop_assert_eq!(handle.len(), 1);
        let last = writes.last().map(|(_, n)| Value::from(*n));
        prop_assert_eq!(store.value_at("Obj1", &["v"]), last);
    }

    /// Classification is total and side-effect free.
    #[test]
    fn classify_is_total(
        fragments in vec(fragment(), 1..4),
        declared_async in any::<bool>(),
    ) {
        let body = fragments.join(" ");
        let source = if declared_async {
            format!("async function () {{ {} }}", body)
        } else {
            format!("function () {{ {} }}", body)
        };
        let mut engine = engine_with(&source);
        let before = engine.variables().snapshot();

        let result = engine.classify_functions();

        prop_assert_eq!(result.len(), 1);
        if declared_async {
            prop_assert_eq!(result.get("Obj1.f"), Some(&true));
        }
        prop_assert!(engine.tracker().is_empty());
        prop_assert!(!engine.scheduler().has_pending());
        prop_assert_eq!(engine.variables().snapshot(), before);
    }
}
