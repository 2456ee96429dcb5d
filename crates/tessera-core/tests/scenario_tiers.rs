//! # Scenario Tier Tests (S0-S5)
//!
//! End-to-end behavior of the reactive engine, driven through the public API.
//!
//! ## Tiers
//! - S0: Patch Recording
//! - S1: Scheduling
//! - S2: Incremental Apply
//! - S3: Sandbox Isolation
//! - S4: Async Classification
//! - S5: Dependency Evaluation

use serde_json::json;
use tessera_core::{
    AsyncDeterminer, Document, Engine, EngineConfig, EntityDecl, EntityKind, EvalLog,
    EvaluatedTree, ExecutionLimits, GlobalScope, LogCategory, Patch, PatchKind, PatchPath,
    PatchTracker, ResolvedFunctions, Sandbox, SandboxOptions, SandboxServices, SandboxSession, UpdateScheduler,
    Value, VariableStateStore,
};

/// Document shared by most tiers: a text input, a script object and two
/// lists, only one of which reads the script object.
fn document() -> Document {
    Document::from_entities(vec![
        EntityDecl::new("Input1", EntityKind::Widget).with_property("text", json!("hello")),
        EntityDecl::new("Obj1", EntityKind::JsAction)
            .with_variable("v", "{}")
            .with_variable("items", "[]")
            .with_variable("count", "0")
            .with_variable("rows", "[{ done: false }, { done: false }]")
            .with_function(
                "build",
                "function () { this.v = {}; this.v.a = []; this.v.a.push(1); this.v.a.push(2); }",
            )
            .with_function(
                "burst",
                "function () { this.count = 1; this.items.push('x'); this.count = 2; \
                 this.items.push('y'); this.count = 3; }",
            )
            .with_function("add", "function (x) { this.items.push(x); }")
            .with_function(
                "stash",
                "function (x) { const xs = this.items; xs.push(x); return this.items.length; }",
            )
            .with_function(
                "finish",
                "function () { this.rows.forEach(r => { r.done = true }); return this.rows[0].done; }",
            )
            .with_function("tag", "function () { this.v['a.b'] = 1; }")
            .with_function("bump", "function () { this.count += 1; return this.count; }")
            .with_function("later", "async function () { this.count += 1; return 1; }")
            .with_function("boom", "() => { throw new Error('boom'); }")
            .with_function("reject", "() => Promise.reject('nope')"),
        EntityDecl::new("List1", EntityKind::Widget)
            .with_property("size", json!("{{ Obj1.items.length }}")),
        EntityDecl::new("Other", EntityKind::Widget)
            .with_property("label", json!("{{ Input1.text.toUpperCase() }}")),
    ])
    .expect("valid document")
}

/// `(kind, dotted path)` of each patch, in order.
fn recorded(patches: &[Patch]) -> Vec<(PatchKind, String)> {
    patches
        .iter()
        .map(|patch| (patch.kind(), patch.path().to_string()))
        .collect()
}

fn engine() -> Engine {
    let mut engine = Engine::new(EngineConfig::default()).expect("config");
    engine.load(document()).expect("load");
    engine
}

/// Engine state lifted out of a loaded engine, for driving sessions directly.
struct Harness {
    globals: GlobalScope,
    tracker: PatchTracker,
    scheduler: UpdateScheduler,
    logs: EvalLog,
    tree: EvaluatedTree,
    variables: VariableStateStore,
    functions: ResolvedFunctions,
}

impl Harness {
    fn new() -> Self {
        let engine = engine();
        Self {
            globals: GlobalScope::new(),
            tracker: PatchTracker::new(),
            scheduler: UpdateScheduler::new(),
            logs: EvalLog::default(),
            tree: engine.tree().clone(),
            variables: engine.variables().clone(),
            functions: engine.functions().clone(),
        }
    }

    fn session(&mut self, options: SandboxOptions) -> SandboxSession<'_> {
        Sandbox::prepare(
            SandboxServices {
                globals: &mut self.globals,
                tracker: &mut self.tracker,
                scheduler: &mut self.scheduler,
                logs: &mut self.logs,
                limits: ExecutionLimits::default(),
            },
            &self.tree,
            &self.variables,
            &self.functions,
            options,
        )
    }

    fn function(&self, name: &str) -> Value {
        let handle = self.functions.get("Obj1", name).expect("function");
        Value::Function(std::rc::Rc::clone(handle))
    }
}

// =============================================================================
// TIER S0: PATCH RECORDING
// =============================================================================

mod s0_patch_recording {
    use super::*;

    /// S0.1: Each mutation produces its own patch, in execution order.
    #[test]
    fn mutations_recorded_in_order() {
        let mut engine = engine();
        let outcome = engine.execute_function("Obj1", "build", vec![]).expect("execute");

        assert_eq!(
            recorded(&outcome.patches),
            vec![
                (PatchKind::Set, "Obj1.v".to_string()),
                (PatchKind::Set, "Obj1.v.a".to_string()),
                (PatchKind::PrototypeMethodCall, "Obj1.v.a".to_string()),
                (PatchKind::PrototypeMethodCall, "Obj1.v.a".to_string()),
            ]
        );
    }

    /// S0.5: Mutating a local alias of a variable container records a
    /// patch on the variable and the alias sees the same array.
    #[test]
    fn alias_mutation_is_recorded() {
        let mut engine = engine();
        let outcome = engine
            .execute_function("Obj1", "stash", vec![Value::from(1)])
            .expect("execute");

        assert_eq!(outcome.value, Value::from(1));
        assert_eq!(
            recorded(&outcome.patches),
            vec![(PatchKind::PrototypeMethodCall, "Obj1.items".to_string())]
        );
        engine.run_pending_tasks();
        assert_eq!(
            engine.variables().value_at("Obj1", &["items"]),
            Some(Value::from(vec![Value::from(1)]))
        );
        assert_eq!(engine.tree().value_at("List1", &["size"]), Some(Value::from(1)));
    }

    /// S0.6: Writes through callback parameters land on the shared elements
    /// and record one patch per element.
    #[test]
    fn callback_mutation_is_recorded() {
        let mut engine = engine();
        let outcome = engine.execute_function("Obj1", "finish", vec![]).expect("execute");

        assert_eq!(outcome.value, Value::Bool(true));
        assert_eq!(
            recorded(&outcome.patches),
            vec![
                (PatchKind::Set, "Obj1.rows.0.done".to_string()),
                (PatchKind::Set, "Obj1.rows.1.done".to_string()),
            ]
        );
        engine.run_pending_tasks();
        assert_eq!(
            engine.variables().value_at("Obj1", &["rows", "1", "done"]),
            Some(Value::Bool(true))
        );
    }

    /// S0.2: With tracking disabled, mutations record nothing and schedule nothing.
    #[test]
    fn tracking_disabled_is_a_noop() {
        let mut harness = Harness::new();
        {
            let options = SandboxOptions {
                track_mutations: false,
                ..SandboxOptions::trigger()
            };
            let mut session = harness.session(options);
            session
                .run(
                    "for (let i = 0; i < 10; i++) { Obj1.items.push(i); Obj1.count = i; }",
                    None,
                )
                .expect("run");
            assert_eq!(
                session.evaluate("Obj1.items.length", None).expect("eval"),
                Value::from(10)
            );
        }
        assert!(harness.tracker.is_empty());
        assert!(!harness.scheduler.has_pending());
        assert_eq!(harness.scheduler.scheduled_count(), 0);
    }

    /// S0.3: Clearing an empty buffer is a no-op.
    #[test]
    fn clearing_empty_buffer_is_noop() {
        let mut tracker = PatchTracker::new();
        tracker.clear();
        tracker.clear();
        assert!(tracker.is_empty());
    }

    /// S0.4: Binding-mode reads never record.
    #[test]
    fn binding_mode_does_not_record() {
        let mut harness = Harness::new();
        {
            let mut session = harness.session(SandboxOptions::binding());
            session.run("Obj1.count = 5;", None).expect("run");
        }
        assert!(harness.tracker.is_empty());
    }
}

// =============================================================================
// TIER S1: SCHEDULING
// =============================================================================

mod s1_scheduling {
    use super::*;
    use tessera_core::IncrementalApplier;

    /// S1.1: Five synchronous mutations schedule exactly one apply task.
    #[test]
    fn burst_schedules_one_task() {
        let mut engine = engine();
        let outcome = engine.execute_function("Obj1", "burst", vec![]).expect("execute");

        assert_eq!(outcome.patches.len(), 5);
        assert_eq!(engine.scheduler().scheduled_count(), 1);

        let touched = IncrementalApplier::touched_paths(&outcome.patches, engine.tree());
        assert!(touched.len() <= 5);
        let paths: Vec<String> = touched.iter().map(|t| t.full_path()).collect();
        assert_eq!(paths, vec!["Obj1.count", "Obj1.items"]);

        let updates = engine.run_pending_tasks();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].applied, 5);
        assert!(!engine.scheduler().has_pending());
    }

    /// S1.2: Once the task has run, the next burst schedules a new one.
    #[test]
    fn guard_rearms_after_run() {
        let mut engine = engine();
        engine.execute_function("Obj1", "bump", vec![]).expect("first");
        engine.run_pending_tasks();
        engine.execute_function("Obj1", "bump", vec![]).expect("second");
        assert_eq!(engine.scheduler().scheduled_count(), 2);
    }

    /// S1.3: With var updates disabled, patches are recorded but nothing is
    /// scheduled and the store keeps its value.
    #[test]
    fn disabled_var_updates_suppress_scheduling() {
        let mut engine = engine();
        engine.tracker_mut().disable_var_update();

        let outcome = engine
            .execute_function("Obj1", "add", vec![Value::from(7)])
            .expect("execute");
        assert_eq!(outcome.patches.len(), 1);
        assert!(!engine.scheduler().has_pending());
        assert!(engine.run_pending_tasks().is_empty());
        assert_eq!(
            engine.variables().value_at("Obj1", &["items"]),
            Some(Value::from(Vec::<Value>::new()))
        );
        assert_eq!(engine.tree().value_at("List1", &["size"]), Some(Value::from(0)));
    }
}

// =============================================================================
// TIER S2: INCREMENTAL APPLY
// =============================================================================

mod s2_incremental_apply {
    use super::*;

    /// S2.1: Replaying build() yields v = { a: [1, 2] }.
    #[test]
    fn ordered_replay() {
        let mut engine = engine();
        engine.execute_function("Obj1", "build", vec![]).expect("execute");
        let updates = engine.run_pending_tasks();

        assert_eq!(updates[0].applied, 4);
        assert_eq!(updates[0].skipped, 0);
        let expected = Value::object([("a", Value::from(vec![Value::from(1), Value::from(2)]))]);
        assert_eq!(engine.variables().value_at("Obj1", &["v"]), Some(expected.clone()));
        assert_eq!(engine.tree().value_at("Obj1", &["v"]), Some(expected));
    }

    /// S2.4: A computed key containing the path separator replays as one
    /// key, not as a nested path.
    #[test]
    fn dotted_keys_replay_as_one_key() {
        let mut engine = engine();
        let outcome = engine.execute_function("Obj1", "tag", vec![]).expect("execute");
        assert_eq!(outcome.patches[0].path().segments(), ["Obj1", "v", "a.b"]);

        let updates = engine.run_pending_tasks();
        assert_eq!(updates[0].applied, 1);
        assert_eq!(updates[0].skipped, 0);
        assert_eq!(
            engine.variables().value_at("Obj1", &["v"]),
            Some(Value::object([("a.b", Value::from(1))]))
        );
        assert_eq!(
            engine.tree().value_at("Obj1", &["v", "a.b"]),
            Some(Value::from(1))
        );
    }

    /// S2.2: Only bindings reading the touched variable are recomputed.
    #[test]
    fn scoped_reevaluation_touches_only_dependents() {
        let mut engine = engine();
        engine
            .execute_function("Obj1", "add", vec![Value::from("a")])
            .expect("execute");
        let updates = engine.run_pending_tasks();

        assert!(updates[0].reevaluation_requested);
        assert_eq!(updates[0].recomputed, vec!["List1.size"]);
        assert_eq!(engine.tree().value_at("List1", &["size"]), Some(Value::from(1)));
        assert_eq!(
            engine.tree().value_at("Other", &["label"]),
            Some(Value::from("HELLO"))
        );
    }

    /// S2.3: A patch with fewer than two segments is dropped, the rest apply.
    #[test]
    fn malformed_patch_is_skipped() {
        let mut engine = engine();
        engine.tracker_mut().enable_tracking();
        let scheduler_add = |engine: &mut Engine, patch: Patch| {
            let mut tracker = engine.tracker_mut().clone();
            let added = engine.scheduler_mut().add(&mut tracker, patch);
            *engine.tracker_mut() = tracker;
            added
        };
        assert!(scheduler_add(
            &mut engine,
            Patch::Set {
                path: PatchPath::new(["Obj1"]),
                value: Value::from(1),
            }
        ));
        assert!(scheduler_add(
            &mut engine,
            Patch::Set {
                path: PatchPath::new(["Obj1", "count"]),
                value: Value::from(9),
            }
        ));

        let updates = engine.run_pending_tasks();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].applied, 1);
        assert_eq!(updates[0].skipped, 1);
        assert_eq!(engine.variables().value_at("Obj1", &["count"]), Some(Value::from(9)));
        assert_eq!(
            engine.logs().by_category(LogCategory::MalformedPatchPath).count(),
            1
        );
    }
}

// =============================================================================
// TIER S3: SANDBOX ISOLATION
// =============================================================================

mod s3_sandbox_isolation {
    use super::*;

    /// S3.1: teardown twice is safe and leaves no installed names behind.
    #[test]
    fn teardown_twice() {
        let mut harness = Harness::new();
        {
            let mut session = harness.session(SandboxOptions::trigger());
            assert!(session.installed_keys().any(|key| key == "Obj1"));
            session.teardown();
            session.teardown();
            assert!(session.is_torn_down());
            assert_eq!(session.installed_keys().count(), 0);
        }
        for name in ["Input1", "Obj1", "List1", "Other", "$isTriggerBased"] {
            assert!(!harness.globals.contains(name), "{} leaked", name);
        }
        assert!(harness.tracker.is_tracking());
    }

    /// S3.2: A thrown error still tears the session down on drop.
    #[test]
    fn error_then_drop_cleans_up() {
        let mut harness = Harness::new();
        {
            let mut session = harness.session(SandboxOptions::trigger());
            assert!(session.run("throw new Error('x');", None).is_err());
        }
        assert!(!harness.globals.contains("Obj1"));
    }

    /// S3.3: Builtins survive a session that shadows them.
    #[test]
    fn builtins_restored() {
        let mut harness = Harness::new();
        let before = harness.globals.get("console").cloned();
        {
            let _session = harness.session(SandboxOptions::binding().muted());
        }
        assert_eq!(harness.globals.get("console").cloned(), before);
    }

    /// S3.4: Snapshots are independent of the store.
    #[test]
    fn snapshot_independence() {
        let mut store = VariableStateStore::new();
        let value = Value::object([("k", Value::from(vec![Value::from(1)]))]);
        store.set_value("Obj1", &["v"], value.clone()).expect("set");

        let mut snapshot = store.entity_snapshot("Obj1").expect("snapshot");
        assert_eq!(snapshot.get("v"), Some(&value));

        if let Some(Value::Object(copy)) = snapshot.get("v") {
            copy.borrow_mut().insert("k".into(), Value::Null);
        }
        snapshot.insert("w".into(), Value::Null);
        assert_eq!(store.value_at("Obj1", &["v"]), Some(value));
        assert_eq!(store.value_at("Obj1", &["w"]), None);
    }

    /// S3.5: A retained handle never observes later writes.
    #[test]
    fn retained_handles_are_copy_on_write() {
        let mut store = VariableStateStore::new();
        store.set_variable("Obj1", "v", Value::from(1));
        let retained = store.entity_map("Obj1").expect("handle");

        store.set_variable("Obj1", "v", Value::from(2));
        assert_eq!(retained.get("v"), Some(&Value::from(1)));
        assert_eq!(store.value_at("Obj1", &["v"]), Some(Value::from(2)));
    }
}

// =============================================================================
// TIER S4: ASYNC CLASSIFICATION
// =============================================================================

mod s4_async_classification {
    use super::*;

    /// S4.1: A declared-async function is classified without being invoked.
    #[test]
    fn declared_async_is_not_invoked() {
        let mut harness = Harness::new();
        let later = harness.function("later");
        let mut session = harness.session(SandboxOptions::binding());

        assert!(AsyncDeterminer::classify(&mut session, &later, Some("Obj1.later")));
        assert_eq!(session.evaluate("Obj1.count", None).expect("eval"), Value::from(0));
    }

    /// S4.2: A sync function is classified by calling it once.
    #[test]
    fn sync_function_is_called_once() {
        let mut harness = Harness::new();
        let bump = harness.function("bump");
        {
            let mut session = harness.session(SandboxOptions::trigger());
            assert!(!AsyncDeterminer::classify(&mut session, &bump, Some("Obj1.bump")));
            assert_eq!(session.evaluate("Obj1.count", None).expect("eval"), Value::from(1));
        }
        assert!(harness.tracker.is_empty());
        assert!(!harness.scheduler.has_pending());
    }

    /// S4.3: classify never raises, whatever the callable does.
    #[test]
    fn classify_never_raises() {
        let mut harness = Harness::new();
        let boom = harness.function("boom");
        let reject = harness.function("reject");
        {
            let mut session = harness.session(SandboxOptions::binding());
            assert!(!AsyncDeterminer::classify(&mut session, &boom, Some("Obj1.boom")));
            assert!(AsyncDeterminer::classify(&mut session, &reject, Some("Obj1.reject")));
            assert!(!AsyncDeterminer::classify(&mut session, &Value::from(3), None));
        }
        let entries: Vec<_> = harness.logs.by_category(LogCategory::ClassificationProbe).collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].message.starts_with("Error when determining async function"));
    }

    /// S4.4: The engine classifies every function in isolation.
    #[test]
    fn engine_classification() {
        let mut engine = engine();
        let result = engine.classify_functions();
        assert_eq!(result.get("Obj1.later"), Some(&true));
        assert_eq!(result.get("Obj1.reject"), Some(&true));
        assert_eq!(result.get("Obj1.bump"), Some(&false));
        assert_eq!(result.get("Obj1.boom"), Some(&false));
        assert_eq!(engine.variables().value_at("Obj1", &["count"]), Some(Value::from(0)));
        assert!(engine.tracker().is_empty());
    }
}

// =============================================================================
// TIER S5: DEPENDENCY EVALUATION
// =============================================================================

mod s5_dependency_evaluation {
    use super::*;

    /// S5.1: Cycles are reported without halting unrelated entities.
    #[test]
    fn cycles_do_not_halt_evaluation() {
        let document = Document::from_entities(vec![
            EntityDecl::new("A", EntityKind::Widget).with_property("x", json!("{{ B.y }}")),
            EntityDecl::new("B", EntityKind::Widget).with_property("y", json!("{{ A.x }}")),
            EntityDecl::new("C", EntityKind::Widget).with_property("z", json!("{{ 1 + 1 }}")),
        ])
        .expect("valid");
        let mut engine = Engine::new(EngineConfig::default()).expect("config");
        let order = engine.load(document).expect("load");

        assert_eq!(order.cyclic, vec!["A.x", "B.y"]);
        assert_eq!(order.order, vec!["C.z"]);
        assert_eq!(engine.tree().value_at("C", &["z"]), Some(Value::from(2)));
        assert!(engine.logs().by_category(LogCategory::CyclicDependency).count() >= 1);
    }

    /// S5.2: Full pass order puts dependencies first.
    #[test]
    fn dependencies_evaluate_first() {
        let engine = engine();
        let order = engine.graph().evaluation_order();
        let position = |path: &str| order.order.iter().position(|p| p == path).expect(path);
        assert!(position("Obj1.items") < position("List1.size"));
        assert!(position("Input1.text") < position("Other.label"));
        assert!(order.cyclic.is_empty());
    }

    /// S5.3: A failing binding logs and keeps evaluating the rest.
    #[test]
    fn failing_binding_is_logged() {
        let document = Document::from_entities(vec![
            EntityDecl::new("W", EntityKind::Widget)
                .with_property("bad", json!("{{ Missing.value }}"))
                .with_property("good", json!("{{ 'ok' }}")),
        ])
        .expect("valid");
        let mut engine = Engine::new(EngineConfig::default()).expect("config");
        engine.load(document).expect("load");

        assert_eq!(engine.tree().value_at("W", &["good"]), Some(Value::from("ok")));
        assert!(
            engine
                .logs()
                .by_category(LogCategory::ExpressionEvaluation)
                .any(|entry| entry.entity.as_deref() == Some("W.bad"))
        );
    }

    /// S5.5: Pathologically nested sources are rejected as syntax errors
    /// without exhausting the stack, and the rest of the document evaluates.
    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let depth = 50_000;
        let nested = format!("{}1{}", "[".repeat(depth), "]".repeat(depth));
        let document = Document::from_entities(vec![
            EntityDecl::new("Deep", EntityKind::Widget)
                .with_property("list", json!(format!("{{{{ {} }}}}", nested)))
                .with_property("ok", json!("{{ 1 + 1 }}")),
            EntityDecl::new("Fns", EntityKind::JsAction)
                .with_variable("grouped", &format!("{}0{}", "(".repeat(depth), ")".repeat(depth)))
                .with_function("negate", &format!("() => {}1", "!".repeat(depth))),
        ])
        .expect("valid");
        let mut engine = Engine::new(EngineConfig::default()).expect("config");
        engine.load(document).expect("load");

        assert_eq!(engine.tree().value_at("Deep", &["list"]), Some(Value::Undefined));
        assert_eq!(engine.tree().value_at("Deep", &["ok"]), Some(Value::from(2)));
        let errors: Vec<_> = engine
            .logs()
            .by_category(LogCategory::ExpressionEvaluation)
            .filter(|entry| entry.message.contains("Maximum nesting depth exceeded"))
            .collect();
        assert_eq!(errors.len(), 3);
    }

    /// S5.4: Documents load from JSON.
    #[test]
    fn document_from_json() {
        let document = Document::from_json(
            r#"{"entities":[{"name":"T","kind":"WIDGET","properties":{"n":"{{ [1,2,3].length }}"}}]}"#,
        )
        .expect("parse");
        let mut engine = Engine::new(EngineConfig::default()).expect("config");
        engine.load(document).expect("load");
        assert_eq!(engine.tree().value_at("T", &["n"]), Some(Value::from(3)));
    }
}
