//! # Evaluation Benchmarks
//!
//! Full passes, scoped passes after a mutation, and graph construction.
//!
//! Run with: `cargo bench -p tessera-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use tessera_core::{DependencyGraph, Document, Engine, EngineConfig, EntityDecl, EntityKind, Value};

/// One script object and `size` widgets in a chain, every fourth reading
/// the script object's list.
fn create_chain_document(size: usize) -> Document {
    let mut entities = vec![
        EntityDecl::new("Store", EntityKind::JsAction)
            .with_variable("items", "[]")
            .with_function("add", "function (x) { this.items.push(x); }"),
        EntityDecl::new("W0", EntityKind::Widget).with_property("value", json!(1)),
    ];
    for i in 1..size {
        let binding = if i % 4 == 0 {
            format!("{{{{ W{}.value + Store.items.length }}}}", i - 1)
        } else {
            format!("{{{{ W{}.value + 1 }}}}", i - 1)
        };
        entities.push(
            EntityDecl::new(format!("W{}", i), EntityKind::Widget).with_property("value", json!(binding)),
        );
    }
    Document::from_entities(entities).expect("valid")
}

fn loaded_engine(size: usize) -> Engine {
    let mut engine = Engine::new(EngineConfig::default()).expect("config");
    engine.load(create_chain_document(size)).expect("load");
    engine
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_full_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_evaluation");

    for size in [10, 100, 500] {
        let mut engine = loaded_engine(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(engine.evaluate_full()));
        });
    }

    group.finish();
}

fn bench_scoped_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoped_evaluation");

    for size in [10, 100, 500] {
        let mut engine = loaded_engine(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                engine
                    .execute_function("Store", "add", vec![Value::from(1)])
                    .expect("execute");
                black_box(engine.run_pending_tasks())
            });
        });
    }

    group.finish();
}

fn bench_graph_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");

    for size in [10, 100, 500] {
        let document = create_chain_document(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &document, |b, document| {
            b.iter(|| black_box(DependencyGraph::build(document).evaluation_order()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_full_evaluation,
    bench_scoped_evaluation,
    bench_graph_build
);
criterion_main!(benches);
